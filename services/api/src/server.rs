use crate::cli::ServeArgs;
use crate::infra::{local_marketplace, seed_jobs, AppState};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use craftlink::config::AppConfig;
use craftlink::error::AppError;
use craftlink::marketplace::jobs::JobSeedImporter;
use craftlink::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let runtime = local_marketplace(&config.marketplace);
    if let Some(path) = args.seed_csv.take() {
        let seeds = JobSeedImporter::from_path(&path)?;
        seed_jobs(&runtime.marketplace, seeds).await?;
    }

    let app = with_service_routes(runtime.marketplace.clone())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(stage = ?config.stage, %addr, "craftlink marketplace ready");

    axum::serve(listener, app).await?;
    runtime.notification_worker.abort();
    Ok(())
}
