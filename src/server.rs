//! Axum router construction.
//!
//! The [`app`] function wires the gallery endpoints, health check,
//! metrics and OpenAPI document to their handlers and returns a
//! ready-to-serve [`axum::Router`].

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::generate_request_id;
use crate::handlers::images;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the Vitrine gallery API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vitrine Gallery API",
        version = "0.1.0",
        description = "Ordered image galleries with a single cover per parent"
    ),
    paths(
        health_check,
        images::list_images,
        images::upload_images,
        images::delete_image,
        images::set_cover,
        images::reorder_images,
    ),
    components(schemas(
        crate::metadata::store::ImageRecord,
        crate::gallery::manager::DeleteOutcome,
        crate::gallery::order::ReorderItem,
        images::ImageList,
        images::ReorderRequest,
        images::ReorderResponse,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Gallery", description = "Gallery image operations"),
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with all gallery routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;
    let metrics_enabled = state.config.observability.metrics;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/parents/:parent_id/images",
            get(images::list_images).post(images::upload_images),
        )
        .route("/parents/:parent_id/images/order", put(images::reorder_images))
        .route(
            "/parents/:parent_id/images/:image_id",
            delete(images::delete_image),
        )
        .route(
            "/parents/:parent_id/images/:image_id/cover",
            put(images::set_cover),
        );

    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        // Application state shared across all handlers.
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body_bytes));

    if metrics_enabled {
        // metrics_middleware is outermost (captures full request lifecycle).
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

// -- Request id middleware ----------------------------------------------------

/// Tag every response with an `x-request-id` header unless the error
/// renderer already set one.
async fn request_id_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }
    headers.insert("server", HeaderValue::from_static("Vitrine"));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json` -- The generated OpenAPI document.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gallery::manager::GalleryManager;
    use crate::gallery::GalleryOptions;
    use crate::metadata::memory::MemoryGalleryStore;
    use crate::storage::local::LocalBlobStore;
    use axum::body::Body;
    use tower::ServiceExt;

    fn test_state(config: Config) -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGalleryStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path(), 1024).unwrap());
        let gallery = Arc::new(GalleryManager::new(
            store.clone(),
            store,
            blobs,
            GalleryOptions::default(),
        ));
        (dir, Arc::new(AppState { config, gallery }))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, state) = test_state(Config::default());
        let response = app(state).oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["server"], "Vitrine");
    }

    #[tokio::test]
    async fn test_openapi_lists_gallery_paths() {
        let (_dir, state) = test_state(Config::default());
        let response = app(state)
            .oneshot(get_request("/openapi.json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/parents/{parent_id}/images"].is_object());
        assert!(doc["paths"]["/parents/{parent_id}/images/order"]["put"].is_object());
    }

    #[tokio::test]
    async fn test_metrics_route_follows_config() {
        crate::metrics::init_metrics();

        let (_dir, state) = test_state(Config::default());
        let response = app(state).oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut config = Config::default();
        config.observability.metrics = false;
        let (_dir, state) = test_state(config);
        let response = app(state).oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
