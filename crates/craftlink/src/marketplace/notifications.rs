//! User-facing notifications and their delivery queue.
//!
//! Lifecycle operations hand notifications to a [`NotificationSink`] after their own writes
//! have committed. The sink cannot report failure back to the caller, so delivery problems
//! never change the outcome of the operation that produced them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::clock::timestamp;
use super::error::MarketplaceError;
use super::identity::Actor;
use super::ids::{NotificationId, UserId};
use super::store::{
    decode_all, from_document, to_document, Collection, Direction, DocumentStore, FieldUpdate,
    Filter, Query,
};

pub(crate) mod fields {
    pub const USER_ID: &str = "userId";
    pub const READ: &str = "read";
    pub const CREATED_AT: &str = "createdAt";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub action_route: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: UserId,
        kind: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            user_id,
            kind,
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
            action_route: None,
            image_url: None,
            priority: NotificationPriority::Normal,
            read: false,
            created_at: timestamp(),
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.action_route = Some(route.into());
        self
    }

    pub fn with_image(mut self, url: Option<String>) -> Self {
        self.image_url = url;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewApplication,
    ApplicationAccepted,
    ApplicationRejected,
    ApplicationWithdrawn,
    NewMessage,
    JobUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

/// Fire-and-forget hand-off for notifications.
pub trait NotificationSink: Send + Sync {
    fn enqueue(&self, notification: Notification);
}

/// Bounded queue drained by a background task that persists each notification.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Start the delivery task. It exits once every dispatcher clone has been dropped and
    /// the queue is drained.
    pub fn spawn<S>(store: Arc<S>, capacity: usize) -> (Self, JoinHandle<()>)
    where
        S: DocumentStore + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(deliver(store, receiver));
        (Self { sender }, worker)
    }
}

impl NotificationSink for NotificationDispatcher {
    fn enqueue(&self, notification: Notification) {
        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    notification_id = %dropped.id,
                    user_id = %dropped.user_id,
                    "notification queue full; dropping notification"
                );
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!(
                    notification_id = %dropped.id,
                    user_id = %dropped.user_id,
                    "notification worker stopped; dropping notification"
                );
            }
        }
    }
}

async fn deliver<S>(store: Arc<S>, mut receiver: mpsc::Receiver<Notification>)
where
    S: DocumentStore + 'static,
{
    while let Some(notification) = receiver.recv().await {
        let document = match to_document(&notification) {
            Ok(document) => document,
            Err(err) => {
                warn!(notification_id = %notification.id, error = %err, "unable to encode notification");
                continue;
            }
        };

        if let Err(err) = store
            .set(
                Collection::Notifications,
                notification.id.as_str(),
                document,
            )
            .await
        {
            warn!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                error = %err,
                "notification delivery failed"
            );
        } else {
            debug!(notification_id = %notification.id, kind = ?notification.kind, "notification delivered");
        }
    }
}

/// Read side of a user's notification feed.
pub struct NotificationInbox<S> {
    store: Arc<S>,
    page_size: usize,
}

impl<S> NotificationInbox<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    pub fn for_user_query(user_id: &UserId, limit: usize) -> Query {
        Query::new(Collection::Notifications)
            .filter(Filter::equals(fields::USER_ID, user_id.as_str()))
            .order_by(fields::CREATED_AT, Direction::Descending)
            .limit(limit)
    }

    pub async fn for_user(&self, actor: &Actor) -> Result<Vec<Notification>, MarketplaceError> {
        let query = Self::for_user_query(&actor.user_id, self.page_size);
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    pub async fn unread_count(&self, actor: &Actor) -> Result<usize, MarketplaceError> {
        Ok(self.unread(&actor.user_id).await?.len())
    }

    pub async fn mark_read(
        &self,
        actor: &Actor,
        notification_id: &NotificationId,
    ) -> Result<(), MarketplaceError> {
        let document = self
            .store
            .get(Collection::Notifications, notification_id.as_str())
            .await?
            .ok_or_else(|| MarketplaceError::not_found("notification", notification_id))?;
        let notification: Notification = from_document(document)?;
        if !actor.is(&notification.user_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "read this notification",
            ));
        }

        self.store
            .update(
                Collection::Notifications,
                notification_id.as_str(),
                vec![FieldUpdate::set(fields::READ, true)],
            )
            .await?;
        Ok(())
    }

    /// Mark every unread notification as read in one batch; returns how many changed.
    pub async fn mark_all_read(&self, actor: &Actor) -> Result<usize, MarketplaceError> {
        let unread = self.unread(&actor.user_id).await?;
        if unread.is_empty() {
            return Ok(0);
        }

        let mut batch = self.store.batch();
        for notification in &unread {
            batch.update(
                Collection::Notifications,
                notification.id.as_str(),
                vec![FieldUpdate::set(fields::READ, true)],
            );
        }
        self.store.commit(batch).await?;
        Ok(unread.len())
    }

    async fn unread(&self, user_id: &UserId) -> Result<Vec<Notification>, MarketplaceError> {
        let query = Query::new(Collection::Notifications)
            .filter(Filter::equals(fields::USER_ID, user_id.as_str()))
            .filter(Filter::equals(fields::READ, false));
        Ok(decode_all(self.store.query(&query).await?)?)
    }
}
