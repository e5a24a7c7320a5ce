//! HTTP API for health checks, Prometheus metrics and manual sync triggers

use agent_lib::{
    health::{ComponentStatus, HealthRegistry},
    ResourceKind, SyncLoop,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub sync_loop: SyncLoop,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, sync_loop: SyncLoop) -> Self {
        Self {
            health_registry,
            sync_loop,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Run one cycle of `kind` and return its report
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> impl IntoResponse {
    let Some(resource) = ResourceKind::from_resource_name(&kind) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown resource {kind}") })),
        )
            .into_response();
    };

    match state.sync_loop.trigger(resource).await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("resource {kind} is not enabled") })),
        )
            .into_response(),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/sync/:kind", post(trigger_sync))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_lib::collector::async_trait;
    use agent_lib::health::components;
    use agent_lib::{AgentMetrics, CycleReport, CycleStats, ResourceCollector, SyncLoopBuilder};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    struct FixedCollector(ResourceKind);

    #[async_trait]
    impl ResourceCollector for FixedCollector {
        fn kind(&self) -> ResourceKind {
            self.0
        }

        async fn report(&self) -> CycleReport {
            CycleReport::completed(
                self.0,
                CycleStats {
                    observed: 3,
                    full: 1,
                    live_delivered: true,
                    tombstones_delivered: true,
                    ..Default::default()
                },
            )
        }
    }

    async fn setup_test_app() -> (Router, Arc<AppState>) {
        let health_registry = HealthRegistry::new();
        health_registry.register(components::WATCH_SOURCE).await;
        health_registry.register(components::REPORTER).await;

        let sync_loop = SyncLoopBuilder::new()
            .collector(Arc::new(FixedCollector(ResourceKind::Pod)))
            .build()
            .unwrap();
        let state = Arc::new(AppState::new(health_registry, sync_loop));
        (create_router(state.clone()), state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz_returns_ok_when_degraded() {
        let (app, state) = setup_test_app().await;
        state
            .health_registry
            .set_degraded(components::REPORTER, "reports failing: pods")
            .await;

        let response = app.oneshot(get_request("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health = body_json(response).await;
        assert_eq!(health["status"], "degraded");
        assert!(health["components"]["watch_source"].is_object());
    }

    #[tokio::test]
    async fn test_healthz_returns_503_when_unhealthy() {
        let (app, state) = setup_test_app().await;
        state
            .health_registry
            .set_unhealthy(components::WATCH_SOURCE, "No Kubernetes client")
            .await;

        let response = app.oneshot(get_request("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_follows_readiness_flag() {
        let (app, state) = setup_test_app().await;
        let response = app.clone().oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["ready"], false);

        state.health_registry.set_ready(true).await;
        let response = app.oneshot(get_request("/readyz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_prometheus_format() {
        let (app, _state) = setup_test_app().await;
        AgentMetrics::new().inc_cycles_skipped(ResourceKind::Node);

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let metrics_text = String::from_utf8(body.to_vec()).unwrap();
        assert!(metrics_text.contains("cluster_agent_cycles_skipped_total"));
    }

    #[tokio::test]
    async fn test_trigger_sync_returns_cycle_report() {
        let (app, _state) = setup_test_app().await;

        let response = app.oneshot(post_request("/sync/pods")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let report = body_json(response).await;
        assert_eq!(report["kind"], "pod");
        assert_eq!(report["outcome"]["status"], "completed");
        assert_eq!(report["outcome"]["stats"]["observed"], 3);
    }

    #[tokio::test]
    async fn test_trigger_sync_unknown_or_disabled_kind() {
        let (app, _state) = setup_test_app().await;

        let response = app.clone().oneshot(post_request("/sync/widgets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(post_request("/sync/nodes")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("not enabled"));
    }
}
