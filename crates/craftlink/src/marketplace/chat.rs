//! Job chat rooms opened when a client accepts an application.
//!
//! Each room keeps one unread counter per party. Sending a message bumps the other party's
//! counter with an atomic increment and overwrites the room's last-message preview in the
//! same batch that stores the message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::applications::Application;
use super::clock::timestamp;
use super::error::MarketplaceError;
use super::identity::{Actor, Role};
use super::ids::{ChatRoomId, JobId, MessageId, UserId};
use super::jobs::Job;
use super::notifications::{Notification, NotificationSink, NotificationType};
use super::store::{
    decode_all, from_document, Collection, Direction, DocumentStore, FieldUpdate, Filter, Query,
};

pub(crate) mod fields {
    pub const CHAT_ROOM_ID: &str = "chatRoomId";
    pub const SENT_AT: &str = "sentAt";
    pub const CLIENT_ID: &str = "clientId";
    pub const PROFESSIONAL_ID: &str = "professionalId";
    pub const CLIENT_UNREAD: &str = "clientUnread";
    pub const PROFESSIONAL_UNREAD: &str = "professionalUnread";
    pub const LAST_MESSAGE: &str = "lastMessage";
    pub const LAST_MESSAGE_AT: &str = "lastMessageAt";
    pub const LAST_SENDER_ID: &str = "lastSenderId";
    pub const ACTIVE: &str = "active";
}

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: ChatRoomId,
    pub job_id: JobId,
    pub job_title: String,
    pub client_id: UserId,
    pub client_name: String,
    pub professional_id: UserId,
    pub professional_name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sender_id: Option<UserId>,
    #[serde(default)]
    pub client_unread: u32,
    #[serde(default)]
    pub professional_unread: u32,
    pub active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    /// Room opened for an accepted application, seeded with `greeting` as its preview.
    pub fn opened_for(
        job: &Job,
        application: &Application,
        greeting: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ChatRoomId::for_job(&job.id),
            job_id: job.id.clone(),
            job_title: job.title.clone(),
            client_id: job.client_id.clone(),
            client_name: job.client_name.clone(),
            professional_id: application.applicant_id.clone(),
            professional_name: application.applicant_name.clone(),
            last_message: Some(preview(greeting)),
            last_message_at: Some(at),
            last_sender_id: None,
            client_unread: 0,
            professional_unread: 1,
            active: true,
            created_at: at,
        }
    }

    pub fn participant_role(&self, user_id: &UserId) -> Option<Role> {
        if &self.client_id == user_id {
            Some(Role::Client)
        } else if &self.professional_id == user_id {
            Some(Role::Professional)
        } else {
            None
        }
    }

    pub fn unread_for(&self, user_id: &UserId) -> u32 {
        match self.participant_role(user_id) {
            Some(Role::Client) => self.client_unread,
            Some(Role::Professional) => self.professional_unread,
            None => 0,
        }
    }

    fn counterpart(&self, role: Role) -> &UserId {
        match role {
            Role::Client => &self.professional_id,
            Role::Professional => &self.client_id,
        }
    }
}

/// Newest messages in a room first.
pub fn messages_query(room_id: &ChatRoomId, limit: usize) -> Query {
    Query::new(Collection::Messages)
        .filter(Filter::equals(fields::CHAT_ROOM_ID, room_id.as_str()))
        .order_by(fields::SENT_AT, Direction::Descending)
        .limit(limit)
}

fn unread_field(role: Role) -> &'static str {
    match role {
        Role::Client => fields::CLIENT_UNREAD,
        Role::Professional => fields::PROFESSIONAL_UNREAD,
    }
}

fn other_unread_field(role: Role) -> &'static str {
    match role {
        Role::Client => fields::PROFESSIONAL_UNREAD,
        Role::Professional => fields::CLIENT_UNREAD,
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() <= PREVIEW_CHARS {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(PREVIEW_CHARS).collect();
        cut.push('…');
        cut
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_room_id: ChatRoomId,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    pub sender_name: String,
    pub sender_role: SenderRole,
    pub body: String,
    pub kind: MessageKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn system(chat_room_id: ChatRoomId, body: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::generate(),
            chat_room_id,
            sender_id: None,
            sender_name: "System".to_string(),
            sender_role: SenderRole::System,
            body: body.into(),
            kind: MessageKind::System,
            sent_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Client,
    Professional,
    System,
}

impl From<Role> for SenderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => SenderRole::Client,
            Role::Professional => SenderRole::Professional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Normal,
    System,
}

pub struct ChatService<S, N> {
    store: Arc<S>,
    notifications: Arc<N>,
    page_size: usize,
}

impl<S, N> ChatService<S, N>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, notifications: Arc<N>, page_size: usize) -> Self {
        Self {
            store,
            notifications,
            page_size: page_size.max(1),
        }
    }

    /// Load a room the caller takes part in.
    pub async fn room(
        &self,
        actor: &Actor,
        room_id: &ChatRoomId,
    ) -> Result<ChatRoom, MarketplaceError> {
        let room = self.fetch_room(room_id).await?;
        if room.participant_role(&actor.user_id).is_none() {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "open this chat room",
            ));
        }
        Ok(room)
    }

    pub async fn rooms_for_user(&self, actor: &Actor) -> Result<Vec<ChatRoom>, MarketplaceError> {
        let field = match actor.role {
            Role::Client => fields::CLIENT_ID,
            Role::Professional => fields::PROFESSIONAL_ID,
        };
        let query = Query::new(Collection::ChatRooms)
            .filter(Filter::equals(field, actor.user_id.as_str()))
            .order_by(fields::LAST_MESSAGE_AT, Direction::Descending);
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    /// Newest messages first.
    pub async fn messages(
        &self,
        actor: &Actor,
        room_id: &ChatRoomId,
    ) -> Result<Vec<Message>, MarketplaceError> {
        self.room(actor, room_id).await?;
        let query = messages_query(room_id, self.page_size);
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    pub async fn send_message(
        &self,
        actor: &Actor,
        room_id: &ChatRoomId,
        body: &str,
    ) -> Result<Message, MarketplaceError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(MarketplaceError::Invalid("message body is empty".to_string()));
        }

        let room = self.fetch_room(room_id).await?;
        let role = room.participant_role(&actor.user_id).ok_or_else(|| {
            MarketplaceError::unauthorized(&actor.user_id, "send messages to this chat room")
        })?;
        if !room.active {
            return Err(MarketplaceError::invalid_state(
                "chat room",
                room_id,
                "closed",
                "send messages to",
            ));
        }

        let sent_at = timestamp();
        let message = Message {
            id: MessageId::generate(),
            chat_room_id: room.id.clone(),
            sender_id: Some(actor.user_id.clone()),
            sender_name: actor.display_name.clone(),
            sender_role: role.into(),
            body: body.to_string(),
            kind: MessageKind::Normal,
            sent_at,
        };

        let mut batch = self.store.batch();
        batch
            .require_field(Collection::ChatRooms, room.id.as_str(), fields::ACTIVE, true)
            .create(
                Collection::Messages,
                message.id.as_str(),
                super::store::to_document(&message)?,
            )
            .update(
                Collection::ChatRooms,
                room.id.as_str(),
                vec![
                    FieldUpdate::increment(other_unread_field(role), 1),
                    FieldUpdate::set(fields::LAST_MESSAGE, preview(body)),
                    FieldUpdate::set(fields::LAST_MESSAGE_AT, sent_at.timestamp_millis()),
                    FieldUpdate::set(fields::LAST_SENDER_ID, actor.user_id.as_str()),
                ],
            );
        self.store.commit(batch).await?;

        let recipient = room.counterpart(role).clone();
        self.notifications.enqueue(
            Notification::new(
                recipient,
                NotificationType::NewMessage,
                format!("New message from {}", actor.display_name),
                preview(body),
            )
            .with_data("chatRoomId", &room.id)
            .with_data("jobId", &room.job_id)
            .with_route(format!("/chats/{}", room.id)),
        );

        Ok(message)
    }

    /// Reset the caller's own unread counter.
    pub async fn mark_read(
        &self,
        actor: &Actor,
        room_id: &ChatRoomId,
    ) -> Result<(), MarketplaceError> {
        let room = self.fetch_room(room_id).await?;
        let role = room.participant_role(&actor.user_id).ok_or_else(|| {
            MarketplaceError::unauthorized(&actor.user_id, "read this chat room")
        })?;

        self.store
            .update(
                Collection::ChatRooms,
                room.id.as_str(),
                vec![FieldUpdate::set(unread_field(role), 0)],
            )
            .await?;
        Ok(())
    }

    /// Open or close a room. Only the client who owns the job may do this.
    pub async fn set_active(
        &self,
        actor: &Actor,
        room_id: &ChatRoomId,
        active: bool,
    ) -> Result<(), MarketplaceError> {
        let room = self.fetch_room(room_id).await?;
        if room.client_id != actor.user_id {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "open or close this chat room",
            ));
        }

        self.store
            .update(
                Collection::ChatRooms,
                room.id.as_str(),
                vec![FieldUpdate::set(fields::ACTIVE, active)],
            )
            .await?;
        info!(chat_room_id = %room.id, active, "chat room state changed");
        Ok(())
    }

    async fn fetch_room(&self, room_id: &ChatRoomId) -> Result<ChatRoom, MarketplaceError> {
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
    use crate::marketplace::store::{to_document, MemoryDocumentStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded(Mutex<Vec<Notification>>);

    impl NotificationSink for Recorded {
        fn enqueue(&self, notification: Notification) {
            self.0.lock().expect("sink mutex poisoned").push(notification);
        }
    }

    fn client() -> Actor {
        Actor::new("client-1", "Chioma", Role::Client)
    }

    fn professional() -> Actor {
        Actor::new("pro-1", "Emeka", Role::Professional)
    }

    async fn seeded() -> (
        ChatService<MemoryDocumentStore, Recorded>,
        Arc<MemoryDocumentStore>,
        Arc<Recorded>,
        ChatRoomId,
    ) {
        let store = Arc::new(MemoryDocumentStore::new());
        let sink = Arc::new(Recorded::default());
        let at = timestamp();
        let room = ChatRoom {
            id: ChatRoomId::from("job_J"),
            job_id: JobId::from("J"),
            job_title: "Tiling".to_string(),
            client_id: UserId::from("client-1"),
            client_name: "Chioma".to_string(),
            professional_id: UserId::from("pro-1"),
            professional_name: "Emeka".to_string(),
            last_message: None,
            last_message_at: Some(at),
            last_sender_id: None,
            client_unread: 0,
            professional_unread: 0,
            active: true,
            created_at: at,
        };
        store
            .set(
                Collection::ChatRooms,
                room.id.as_str(),
                to_document(&room).expect("encode room"),
            )
            .await
            .expect("seed room");
        let service = ChatService::new(store.clone(), sink.clone(), 50);
        (service, store, sink, room.id)
    }

    #[tokio::test]
    async fn sending_increments_the_other_partys_counter() {
        let (chat, _, sink, room_id) = seeded().await;

        chat.send_message(&client(), &room_id, "When can you start?")
            .await
            .expect("client sends");
        chat.send_message(&client(), &room_id, "Tomorrow works for me")
            .await
            .expect("client sends again");

        let room = chat.room(&professional(), &room_id).await.expect("room");
        assert_eq!(room.professional_unread, 2);
        assert_eq!(room.client_unread, 0);
        assert_eq!(room.last_message.as_deref(), Some("Tomorrow works for me"));
        assert_eq!(room.last_sender_id, Some(UserId::from("client-1")));

        let recorded = sink.0.lock().expect("sink").clone();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].user_id, UserId::from("pro-1"));
        assert_eq!(recorded[0].kind, NotificationType::NewMessage);
    }

    #[tokio::test]
    async fn mark_read_resets_only_the_callers_counter() {
        let (chat, _, _, room_id) = seeded().await;
        chat.send_message(&client(), &room_id, "Hello")
            .await
            .expect("client sends");
        chat.send_message(&professional(), &room_id, "Hi")
            .await
            .expect("professional sends");

        chat.mark_read(&professional(), &room_id)
            .await
            .expect("mark read");

        let room = chat.room(&client(), &room_id).await.expect("room");
        assert_eq!(room.professional_unread, 0);
        assert_eq!(room.client_unread, 1);
        assert_eq!(room.unread_for(&UserId::from("client-1")), 1);
    }

    #[tokio::test]
    async fn messages_are_listed_newest_first() {
        let (chat, _, _, room_id) = seeded().await;
        chat.send_message(&client(), &room_id, "first")
            .await
            .expect("send");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        chat.send_message(&professional(), &room_id, "second")
            .await
            .expect("send");

        let bodies: Vec<String> = chat
            .messages(&client(), &room_id)
            .await
            .expect("list")
            .into_iter()
            .map(|message| message.body)
            .collect();
        assert_eq!(bodies, vec!["second".to_string(), "first".to_string()]);
    }

    #[tokio::test]
    async fn outsiders_and_closed_rooms_are_rejected() {
        let (chat, _, _, room_id) = seeded().await;
        let outsider = Actor::new("pro-2", "Tunde", Role::Professional);
        assert!(matches!(
            chat.send_message(&outsider, &room_id, "hi").await,
            Err(MarketplaceError::Unauthorized { .. })
        ));

        assert!(matches!(
            chat.set_active(&professional(), &room_id, false).await,
            Err(MarketplaceError::Unauthorized { .. })
        ));
        chat.set_active(&client(), &room_id, false)
            .await
            .expect("client closes room");
        assert!(matches!(
            chat.send_message(&client(), &room_id, "still there?").await,
            Err(MarketplaceError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn preview_truncates_long_bodies() {
        let long = "x".repeat(PREVIEW_CHARS + 10);
        let cut = preview(&long);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
