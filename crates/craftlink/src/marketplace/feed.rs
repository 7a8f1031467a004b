//! Live views over the document store.
//!
//! Subscriptions fail soft: backend, permission, and decoding errors surface as
//! [`LiveFeed::Unavailable`] instead of ending the feed with an error, so a screen bound to
//! a feed keeps its last state and can show an "offline" marker. Dropping a [`Feed`]
//! cancels the underlying store subscription.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::warn;

use super::applications::{Application, ApplicationStore};
use super::chat::{messages_query, ChatRoom, Message};
use super::error::MarketplaceError;
use super::identity::Actor;
use super::ids::{ChatRoomId, JobId};
use super::jobs::{Job, JobStore};
use super::notifications::{Notification, NotificationInbox};
use super::store::{
    decode_all, from_document, Collection, DocumentStore, Query, Snapshot, Subscription,
};

/// One emission of a live feed.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFeed<T> {
    Ready(Vec<T>),
    Empty,
    Unavailable { reason: String },
}

impl<T> LiveFeed<T> {
    pub fn items(&self) -> &[T] {
        match self {
            LiveFeed::Ready(items) => items,
            LiveFeed::Empty | LiveFeed::Unavailable { .. } => &[],
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, LiveFeed::Unavailable { .. })
    }
}

impl<T: DeserializeOwned> LiveFeed<T> {
    fn from_snapshot(name: &'static str, snapshot: Snapshot) -> Self {
        let decoded = snapshot.and_then(decode_all::<T>);
        match decoded {
            Ok(items) if items.is_empty() => LiveFeed::Empty,
            Ok(items) => LiveFeed::Ready(items),
            Err(err) => {
                warn!(feed = name, error = %err, "live feed unavailable");
                LiveFeed::Unavailable {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// A typed live query.
pub struct Feed<T> {
    name: &'static str,
    subscription: Option<Subscription>,
    pending_failure: Option<String>,
    _items: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Feed<T> {
    async fn open<S>(store: &S, name: &'static str, query: Query) -> Self
    where
        S: DocumentStore + ?Sized,
    {
        match store.subscribe(query).await {
            Ok(subscription) => Self {
                name,
                subscription: Some(subscription),
                pending_failure: None,
                _items: PhantomData,
            },
            Err(err) => Self::failed(name, &MarketplaceError::from(err)),
        }
    }

    /// A feed that emits a single `Unavailable` and then ends.
    fn failed(name: &'static str, err: &MarketplaceError) -> Self {
        warn!(feed = name, error = %err, "unable to open live feed");
        Self {
            name,
            subscription: None,
            pending_failure: Some(err.to_string()),
            _items: PhantomData,
        }
    }

    /// Wait for the next emission. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<LiveFeed<T>> {
        if let Some(reason) = self.pending_failure.take() {
            return Some(LiveFeed::Unavailable { reason });
        }
        let snapshot = self.subscription.as_mut()?.next().await?;
        Some(LiveFeed::from_snapshot(self.name, snapshot))
    }

    pub fn cancel(self) {
        drop(self);
    }
}

/// Opens feeds for the screens that show live data.
pub struct FeedWatcher<S> {
    store: Arc<S>,
    jobs: JobStore<S>,
    page_size: usize,
}

impl<S> FeedWatcher<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self {
            jobs: JobStore::new(store.clone()),
            store,
            page_size: page_size.max(1),
        }
    }

    pub async fn open_jobs(&self) -> Feed<Job> {
        Feed::open(
            self.store.as_ref(),
            "open_jobs",
            JobStore::<S>::open_jobs_query(self.page_size),
        )
        .await
    }

    /// Applications for a job, visible to its owner only.
    pub async fn applications_for_job(&self, actor: &Actor, job_id: &JobId) -> Feed<Application> {
        const NAME: &str = "job_applications";
        match self.jobs.fetch(job_id).await {
            Ok(job) if job.is_owned_by(&actor.user_id) => {
                Feed::open(
                    self.store.as_ref(),
                    NAME,
                    ApplicationStore::<S>::for_job_query(job_id),
                )
                .await
            }
            Ok(_) => Feed::failed(
                NAME,
                &MarketplaceError::unauthorized(&actor.user_id, "watch applications for this job"),
            ),
            Err(err) => Feed::failed(NAME, &err),
        }
    }

    /// Messages in a chat room, visible to its two participants only.
    pub async fn messages(&self, actor: &Actor, room_id: &ChatRoomId) -> Feed<Message> {
        const NAME: &str = "chat_messages";
        match self.room(room_id).await {
            Ok(room) if room.participant_role(&actor.user_id).is_some() => {
                Feed::open(
                    self.store.as_ref(),
                    NAME,
                    messages_query(room_id, self.page_size),
                )
                .await
            }
            Ok(_) => Feed::failed(
                NAME,
                &MarketplaceError::unauthorized(&actor.user_id, "watch this chat room"),
            ),
            Err(err) => Feed::failed(NAME, &err),
        }
    }

    pub async fn notifications(&self, actor: &Actor) -> Feed<Notification> {
        Feed::open(
            self.store.as_ref(),
            "notifications",
            NotificationInbox::<S>::for_user_query(&actor.user_id, self.page_size),
        )
        .await
    }

    async fn room(&self, room_id: &ChatRoomId) -> Result<ChatRoom, MarketplaceError> {
        let document = self
            .store
            .get(Collection::ChatRooms, room_id.as_str())
            .await?
            .ok_or_else(|| MarketplaceError::not_found("chat room", room_id))?;
        Ok(from_document(document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::identity::Role;
    use crate::marketplace::jobs::JobDraft;
    use crate::marketplace::jobs::JobBoard;
    use crate::marketplace::media::MemoryObjectStorage;
    use crate::marketplace::store::{MemoryDocumentStore, StoreError};
    use tokio::sync::mpsc;

    fn draft(title: &str) -> JobDraft {
        JobDraft {
            title: title.to_string(),
            description: String::new(),
            category: "Electrical".to_string(),
            location: "Ikeja".to_string(),
            budget: None,
        }
    }

    #[tokio::test]
    async fn open_jobs_feed_tracks_new_postings() {
        let store = Arc::new(MemoryDocumentStore::new());
        let board = JobBoard::new(store.clone(), Arc::new(MemoryObjectStorage::default()), 10);
        let watcher = FeedWatcher::new(store.clone(), 10);
        let client = Actor::new("client-1", "Chioma", Role::Client);

        let mut feed = watcher.open_jobs().await;
        assert_eq!(feed.next().await, Some(LiveFeed::Empty));

        let job = board.post_job(&client, draft("Rewire kitchen")).await.expect("post");
        match feed.next().await {
            Some(LiveFeed::Ready(jobs)) => assert_eq!(jobs, vec![job]),
            other => panic!("expected ready feed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn applications_feed_is_unavailable_to_non_owners() {
        let store = Arc::new(MemoryDocumentStore::new());
        let board = JobBoard::new(store.clone(), Arc::new(MemoryObjectStorage::default()), 10);
        let watcher = FeedWatcher::new(store, 10);
        let client = Actor::new("client-1", "Chioma", Role::Client);
        let job = board.post_job(&client, draft("Fix socket")).await.expect("post");

        let stranger = Actor::new("client-2", "Bola", Role::Client);
        let mut feed = watcher.applications_for_job(&stranger, &job.id).await;
        assert!(feed.next().await.expect("one emission").is_unavailable());
        assert_eq!(feed.next().await, None);

        let mut owner_feed = watcher.applications_for_job(&client, &job.id).await;
        assert_eq!(owner_feed.next().await, Some(LiveFeed::Empty));
    }

    #[tokio::test]
    async fn messages_feed_is_unavailable_to_outsiders() {
        let store = Arc::new(MemoryDocumentStore::new());
        let watcher = FeedWatcher::new(store.clone(), 10);
        let client = Actor::new("client-1", "Chioma", Role::Client);
        let professional = Actor::new("pro-1", "Emeka", Role::Professional);
        let outsider = Actor::new("pro-2", "Tunde", Role::Professional);

        let room_id = ChatRoomId::from("job_j1");
        let mut document = serde_json::Map::new();
        for (key, value) in [
            ("id", serde_json::json!("job_j1")),
            ("jobId", serde_json::json!("j1")),
            ("jobTitle", serde_json::json!("Fix socket")),
            ("clientId", serde_json::json!("client-1")),
            ("clientName", serde_json::json!("Chioma")),
            ("professionalId", serde_json::json!("pro-1")),
            ("professionalName", serde_json::json!("Emeka")),
            ("active", serde_json::json!(true)),
            ("createdAt", serde_json::json!(1_700_000_000_000_i64)),
        ] {
            document.insert(key.to_string(), value);
        }
        let mut batch = store.batch();
        batch.create(Collection::ChatRooms, "job_j1", document);
        store.commit(batch).await.expect("seed room");

        let mut feed = watcher.messages(&outsider, &room_id).await;
        match feed.next().await {
            Some(LiveFeed::Unavailable { reason }) => assert!(reason.contains("pro-2")),
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert_eq!(feed.next().await, None);

        let mut missing = watcher.messages(&client, &ChatRoomId::from("job_none")).await;
        assert!(missing.next().await.expect("one emission").is_unavailable());

        for participant in [&client, &professional] {
            let mut feed = watcher.messages(participant, &room_id).await;
            assert_eq!(feed.next().await, Some(LiveFeed::Empty));
        }
    }

    #[tokio::test]
    async fn backend_errors_become_unavailable_not_empty() {
        let (sender, receiver) = mpsc::channel(2);
        sender
            .send(Err(StoreError::PermissionDenied("session ended".to_string())))
            .await
            .expect("queue snapshot");
        drop(sender);

        let mut feed: Feed<Job> = Feed {
            name: "test",
            subscription: Some(Subscription::from_receiver(receiver)),
            pending_failure: None,
            _items: PhantomData,
        };
        match feed.next().await {
            Some(LiveFeed::Unavailable { reason }) => assert!(reason.contains("session ended")),
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert_eq!(feed.next().await, None);
    }

    #[test]
    fn undecodable_snapshots_are_unavailable() {
        let mut document = serde_json::Map::new();
        document.insert("id".to_string(), serde_json::json!(42));
        let feed = LiveFeed::<Job>::from_snapshot("test", Ok(vec![document]));
        assert!(feed.is_unavailable());
        assert!(feed.items().is_empty());
    }
}
