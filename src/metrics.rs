//! Prometheus metrics for Vitrine.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "vitrine_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vitrine_http_request_duration_seconds";

/// Total gallery operations (counter). Labels: operation, status.
pub const GALLERY_OPERATIONS_TOTAL: &str = "vitrine_gallery_operations_total";

/// Images created by uploads (counter).
pub const IMAGES_UPLOADED_TOTAL: &str = "vitrine_images_uploaded_total";

/// Files silently dropped because the gallery was nearly full (counter).
pub const IMAGES_TRUNCATED_TOTAL: &str = "vitrine_images_truncated_total";

/// Bytes written to the blob store (counter).
pub const BLOB_BYTES_WRITTEN_TOTAL: &str = "vitrine_blob_bytes_written_total";

/// Best-effort blob deletions that did not remove a file (counter).
pub const BLOB_DELETE_FAILURES_TOTAL: &str = "vitrine_blob_delete_failures_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
///
/// If another recorder is already installed, a detached recorder is kept so
/// rendering still works; it just sees no data.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new();
        match builder.install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("prometheus recorder not installed: {e}");
                PrometheusBuilder::new().build_recorder().handle()
            }
        }
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(GALLERY_OPERATIONS_TOTAL, "Total gallery operations by type");
    describe_counter!(IMAGES_UPLOADED_TOTAL, "Images created by uploads");
    describe_counter!(
        IMAGES_TRUNCATED_TOTAL,
        "Uploaded files dropped because the gallery was nearly full"
    );
    describe_counter!(BLOB_BYTES_WRITTEN_TOTAL, "Bytes written to the blob store");
    describe_counter!(
        BLOB_DELETE_FAILURES_TOTAL,
        "Blob deletions that did not remove a file"
    );
}

/// Count one gallery operation outcome.
pub fn record_operation(operation: &'static str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    counter!(GALLERY_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// This prevents high-cardinality labels from unique parent and image ids.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/parents/p1/images` -> `/parents/{parent}/images`
/// - `/parents/p1/images/order` -> `/parents/{parent}/images/order`
/// - `/parents/p1/images/7` -> `/parents/{parent}/images/{image}`
/// - `/parents/p1/images/7/cover` -> `/parents/{parent}/images/{image}/cover`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/openapi.json" | "/metrics" => return path.to_string(),
        _ => {}
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["parents", _] => "/parents/{parent}".to_string(),
        ["parents", _, "images"] => "/parents/{parent}/images".to_string(),
        ["parents", _, "images", "order"] => "/parents/{parent}/images/order".to_string(),
        ["parents", _, "images", _] => "/parents/{parent}/images/{image}".to_string(),
        ["parents", _, "images", _, "cover"] => {
            "/parents/{parent}/images/{image}/cover".to_string()
        }
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = init_metrics().render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------
