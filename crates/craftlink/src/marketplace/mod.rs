//! Craftsman marketplace: job postings, the application lifecycle, hiring chat, and
//! notifications, all persisted through a [`store::DocumentStore`].

pub mod applications;
pub mod chat;
mod clock;
pub mod error;
pub mod feed;
pub mod geo;
pub mod identity;
pub mod ids;
pub mod jobs;
pub mod media;
pub mod notifications;
pub mod router;
pub mod store;

use std::sync::Arc;

use applications::ApplicationLifecycle;
use chat::ChatService;
use feed::FeedWatcher;
use jobs::JobBoard;
use media::ObjectStorage;
use notifications::{NotificationInbox, NotificationSink};
use store::DocumentStore;

pub use error::MarketplaceError;
pub use router::marketplace_router;

/// Every marketplace service wired to one store and one notification sink.
pub struct Marketplace<S, N> {
    pub jobs: JobBoard<S>,
    pub applications: ApplicationLifecycle<S, N>,
    pub chat: ChatService<S, N>,
    pub inbox: NotificationInbox<S>,
    pub feeds: FeedWatcher<S>,
}

impl<S, N> Marketplace<S, N>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifications: Arc<N>,
        media: Arc<dyn ObjectStorage>,
        page_size: usize,
    ) -> Self {
        Self {
            jobs: JobBoard::new(store.clone(), media, page_size),
            applications: ApplicationLifecycle::new(store.clone(), notifications.clone()),
            chat: ChatService::new(store.clone(), notifications, page_size),
            inbox: NotificationInbox::new(store.clone(), page_size),
            feeds: FeedWatcher::new(store, page_size),
        }
    }
}
