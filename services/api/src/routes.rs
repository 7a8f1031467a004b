use crate::infra::{AppState, LocalMarketplace};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use craftlink::marketplace::marketplace_router;
use serde_json::json;
use std::sync::Arc;

/// Marketplace API plus the operational endpoints.
pub(crate) fn with_service_routes(marketplace: Arc<LocalMarketplace>) -> axum::Router {
    marketplace_router(marketplace)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::local_marketplace;
    use axum::body::Body;
    use axum::http::Request;
    use craftlink::config::MarketplaceConfig;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn state(ready: bool) -> AppState {
        let recorder = PrometheusBuilder::new().build_recorder();
        AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(recorder.handle()),
        }
    }

    #[tokio::test]
    async fn readiness_reflects_flag() {
        let app_state = state(false);
        let runtime = local_marketplace(&MarketplaceConfig::default());
        let app = with_service_routes(runtime.marketplace.clone())
            .layer(Extension(app_state.clone()));

        let request = || {
            Request::builder()
                .uri("/ready")
                .body(Body::empty())
                .expect("request builds")
        };
        let response = app.clone().oneshot(request()).await.expect("responds");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        app_state.readiness.store(true, Ordering::Release);
        let response = app.oneshot(request()).await.expect("responds");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_and_marketplace_routes_share_one_router() {
        let runtime = local_marketplace(&MarketplaceConfig::default());
        let app = with_service_routes(runtime.marketplace.clone()).layer(Extension(state(true)));

        let health = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("responds");
        assert_eq!(health.status(), StatusCode::OK);

        let jobs = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/jobs")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("responds");
        assert_eq!(jobs.status(), StatusCode::OK);
    }
}
