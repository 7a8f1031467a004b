use craftlink::config::MarketplaceConfig;
use craftlink::marketplace::identity::{Actor, Role};
use craftlink::marketplace::jobs::{Job, JobSeed};
use craftlink::marketplace::media::MemoryObjectStorage;
use craftlink::marketplace::notifications::NotificationDispatcher;
use craftlink::marketplace::store::MemoryDocumentStore;
use craftlink::marketplace::{Marketplace, MarketplaceError};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub(crate) type LocalMarketplace = Marketplace<MemoryDocumentStore, NotificationDispatcher>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Marketplace backed by the in-process store, plus its notification worker.
pub(crate) struct LocalRuntime {
    pub(crate) store: Arc<MemoryDocumentStore>,
    pub(crate) marketplace: Arc<LocalMarketplace>,
    pub(crate) notification_worker: JoinHandle<()>,
}

pub(crate) fn local_marketplace(config: &MarketplaceConfig) -> LocalRuntime {
    let store = Arc::new(MemoryDocumentStore::new());
    let (dispatcher, notification_worker) =
        NotificationDispatcher::spawn(store.clone(), config.notification_queue_capacity);
    let marketplace = Marketplace::new(
        store.clone(),
        Arc::new(dispatcher),
        Arc::new(MemoryObjectStorage::default()),
        config.page_size,
    );

    LocalRuntime {
        store,
        marketplace: Arc::new(marketplace),
        notification_worker,
    }
}

/// Post every seed on behalf of its client.
pub(crate) async fn seed_jobs(
    marketplace: &LocalMarketplace,
    seeds: Vec<JobSeed>,
) -> Result<Vec<Job>, MarketplaceError> {
    let mut posted = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let client = Actor::new(seed.client_id, seed.client_name, Role::Client);
        posted.push(marketplace.jobs.post_job(&client, seed.draft).await?);
    }
    info!(count = posted.len(), "seeded jobs");
    Ok(posted)
}
