//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::gate::{admission_gate, GateState, RouteClass};
use crate::handlers::{get_job_status, health, ready, start_job};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    burst_throttle, cors_layer, request_id, request_logging, security_headers, BurstThrottle,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let gated = |class: RouteClass| {
        middleware::from_fn_with_state(GateState::new(Arc::clone(&state.gate), class), admission_gate)
    };

    // Starting a job needs a signed-in caller and costs one unit of quota
    let start_routes = Router::new()
        .route("/jobs", post(start_job))
        .route_layer(gated(RouteClass::ProtectedRateLimited));

    let status_routes = Router::new()
        .route("/jobs/:task_id/status", get(get_job_status))
        .route_layer(gated(RouteClass::Public));

    let burst = Arc::new(BurstThrottle::new(state.config.burst_rps));

    let api_routes = Router::new()
        .merge(start_routes)
        .merge(status_routes)
        .layer(middleware::from_fn_with_state(burst, burst_throttle));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
