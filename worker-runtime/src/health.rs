use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use common::error::AppError;

use crate::handler::{Healther, Metricker, RegistryMetricker};

#[derive(Clone)]
pub struct HealthState {
    healther: Arc<dyn Healther>,
    metricker: Arc<dyn Metricker>,
    shutting_down: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(healther: Arc<dyn Healther>, shutting_down: Arc<AtomicBool>) -> Self {
        Self {
            healther,
            metricker: Arc::new(RegistryMetricker),
            shutting_down,
        }
    }

    pub fn with_metricker(mut self, metricker: Arc<dyn Metricker>) -> Self {
        self.metricker = metricker;
        self
    }
}

/// Liveness probe: 200 for the whole process lifetime, 503 once shutdown
/// has begun so orchestrators stop routing.
async fn healthz(State(state): State<HealthState>) -> impl IntoResponse {
    if state.shutting_down.load(Ordering::Relaxed) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down" })),
        )
    } else {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    }
}

/// Readiness probe: 200 iff the handler's dependencies answer.
async fn readyz(State(state): State<HealthState>) -> impl IntoResponse {
    if state.healther.ready().await {
        (
            StatusCode::OK,
            Json(json!({ "status": "ok", "checks": { "bus": "ok" } })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "checks": { "bus": "fail" } })),
        )
    }
}

async fn metrics_endpoint(State(state): State<HealthState>) -> impl IntoResponse {
    state.metricker.metrics()
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// Bind the worker's HTTP surface. Called before the fetch loop starts so
/// a bad address fails startup with a non-zero exit.
pub async fn bind(addr: &str) -> Result<tokio::net::TcpListener, AppError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health surface listening");
    Ok(listener)
}

/// Serve the worker's HTTP surface until the token fires.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: HealthState,
    token: CancellationToken,
) -> Result<(), AppError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticHealther(bool);

    #[async_trait]
    impl Healther for StaticHealther {
        async fn ready(&self) -> bool {
            self.0
        }
    }

    async fn probe(router: Router, path: &str) -> StatusCode {
        use tower::ServiceExt;

        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri(path)
                    .body(axum::body::Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        response.status()
    }

    #[tokio::test]
    async fn healthz_flips_on_shutdown() {
        let shutting_down = Arc::new(AtomicBool::new(false));
        let state = HealthState::new(Arc::new(StaticHealther(true)), Arc::clone(&shutting_down));

        assert_eq!(probe(router(state.clone()), "/healthz").await, StatusCode::OK);

        shutting_down.store(true, Ordering::Relaxed);
        assert_eq!(
            probe(router(state), "/healthz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn readyz_reflects_the_healther() {
        let ready = HealthState::new(Arc::new(StaticHealther(true)), Arc::default());
        assert_eq!(probe(router(ready), "/readyz").await, StatusCode::OK);

        let not_ready = HealthState::new(Arc::new(StaticHealther(false)), Arc::default());
        assert_eq!(
            probe(router(not_ready), "/readyz").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let state = HealthState::new(Arc::new(StaticHealther(true)), Arc::default());
        assert_eq!(probe(router(state), "/metrics").await, StatusCode::OK);
    }
}
