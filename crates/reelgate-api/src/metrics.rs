//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::gate::RouteClass;

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "reelgate_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reelgate_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "reelgate_http_requests_in_flight";

    // Admission gate
    pub const ADMISSIONS_TOTAL: &str = "reelgate_admissions_total";
    pub const BURST_THROTTLE_HITS_TOTAL: &str = "reelgate_burst_throttle_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an admission gate outcome.
pub fn record_admission(class: RouteClass, outcome: &'static str) {
    counter!(names::ADMISSIONS_TOTAL, "route_class" => class.as_str(), "outcome" => outcome)
        .increment(1);
}

/// Record a burst throttle rejection.
pub fn record_burst_throttle_hit(path: &str) {
    let labels = [("path", sanitize_path(path))];
    counter!(names::BURST_THROTTLE_HITS_TOTAL, &labels).increment(1);
}

/// Collapse task IDs so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        ["", "api", "jobs", id, rest @ ..] if !id.is_empty() => {
            let mut out = String::from("/api/jobs/:task_id");
            for segment in rest {
                out.push('/');
                out.push_str(segment);
            }
            out
        }
        _ => path.to_string(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
