use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::marketplace::applications::{ApplicantSnapshot, ApplicationLifecycle, ApplicationProposal};
use crate::marketplace::identity::{Actor, Role};
use crate::marketplace::jobs::{Job, JobBoard, JobDraft};
use crate::marketplace::media::MemoryObjectStorage;
use crate::marketplace::notifications::{Notification, NotificationSink, NotificationType};
use crate::marketplace::store::{
    Collection, Document, DocumentStore, FieldUpdate, MemoryDocumentStore, Query, StoreError,
    Subscription, WriteBatch,
};

#[derive(Default)]
pub(super) struct MemoryNotifications {
    events: Mutex<Vec<Notification>>,
}

impl MemoryNotifications {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notification mutex poisoned").clone()
    }

    pub(super) fn of_kind(&self, kind: NotificationType) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|notification| notification.kind == kind)
            .collect()
    }
}

impl NotificationSink for MemoryNotifications {
    fn enqueue(&self, notification: Notification) {
        self.events
            .lock()
            .expect("notification mutex poisoned")
            .push(notification);
    }
}

/// Memory store whose batch commits or single-document updates can be switched off.
#[derive(Default)]
pub(super) struct FlakyStore {
    pub(super) inner: MemoryDocumentStore,
    fail_commits: AtomicBool,
    fail_updates: AtomicBool,
}

impl FlakyStore {
    pub(super) fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub(super) fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.query(query).await
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.inner.set(collection, id, document).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("update rejected".to_string()));
        }
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }
        self.inner.commit(batch).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(query).await
    }
}

struct Gate {
    collection: Collection,
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Memory store that can park one write so another request runs in between.
#[derive(Default)]
pub(super) struct GatedStore {
    pub(super) inner: MemoryDocumentStore,
    gate: Mutex<Option<Gate>>,
}

impl GatedStore {
    /// Park the next batch or single-document update that writes to `collection`.
    ///
    /// The first receiver fires once that write is parked; sending on the returned sender
    /// lets it through.
    pub(super) fn hold_next_write(
        &self,
        collection: Collection,
    ) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().expect("gate mutex poisoned") = Some(Gate {
            collection,
            reached: reached_tx,
            release: release_rx,
        });
        (reached_rx, release_tx)
    }

    fn take_gate(&self, mut touched: impl Iterator<Item = Collection>) -> Option<Gate> {
        let mut gate = self.gate.lock().expect("gate mutex poisoned");
        let matches = gate
            .as_ref()
            .is_some_and(|gate| touched.any(|collection| collection == gate.collection));
        if matches {
            gate.take()
        } else {
            None
        }
    }
}

async fn park(gate: Option<Gate>) {
    if let Some(gate) = gate {
        let _ = gate.reached.send(());
        let _ = gate.release.await;
    }
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.query(query).await
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.inner.set(collection, id, document).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        park(self.take_gate(std::iter::once(collection))).await;
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        park(self.take_gate(batch.operations().iter().map(|op| op.collection()))).await;
        self.inner.commit(batch).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(query).await
    }
}

pub(super) struct Harness<S> {
    pub(super) store: Arc<S>,
    pub(super) board: JobBoard<S>,
    pub(super) lifecycle: Arc<ApplicationLifecycle<S, MemoryNotifications>>,
    pub(super) notifications: Arc<MemoryNotifications>,
}

pub(super) fn harness() -> Harness<MemoryDocumentStore> {
    harness_with(Arc::new(MemoryDocumentStore::new()))
}

pub(super) fn flaky_harness() -> Harness<FlakyStore> {
    harness_with(Arc::new(FlakyStore::default()))
}

pub(super) fn gated_harness() -> Harness<GatedStore> {
    harness_with(Arc::new(GatedStore::default()))
}

pub(super) fn harness_with<S: DocumentStore + 'static>(store: Arc<S>) -> Harness<S> {
    let notifications = Arc::new(MemoryNotifications::default());
    Harness {
        board: JobBoard::new(store.clone(), Arc::new(MemoryObjectStorage::default()), 50),
        lifecycle: Arc::new(ApplicationLifecycle::new(
            store.clone(),
            notifications.clone(),
        )),
        store,
        notifications,
    }
}

pub(super) fn client() -> Actor {
    Actor::new("client-1", "Chioma Okafor", Role::Client)
}

pub(super) fn professional(suffix: &str) -> Actor {
    Actor::new(
        format!("pro-{suffix}"),
        format!("Professional {suffix}"),
        Role::Professional,
    )
}

pub(super) fn proposal(price: f64) -> ApplicationProposal {
    ApplicationProposal {
        proposed_price: Some(price),
        estimated_duration: Some("3 days".to_string()),
        cover_letter: Some("  I have tiled over forty bathrooms in Lekki.  ".to_string()),
        availability: Some("Weekdays".to_string()),
        profile: ApplicantSnapshot {
            rating: Some(4.7),
            review_count: 23,
            experience_years: Some(8),
            craft: Some("Tiler".to_string()),
            profile_image_url: None,
        },
    }
}

pub(super) async fn post_job<S: DocumentStore + 'static>(harness: &Harness<S>) -> Job {
    harness
        .board
        .post_job(
            &client(),
            JobDraft {
                title: "Bathroom tiling".to_string(),
                description: "Retile a 6sqm bathroom floor".to_string(),
                category: "Tiling".to_string(),
                location: "Lekki, Lagos".to_string(),
                budget: Some(150_000.0),
            },
        )
        .await
        .expect("job posts")
}
