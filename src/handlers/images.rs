//! Gallery image handlers.
//!
//! Thin adapters over [`GalleryManager`](crate::gallery::manager::GalleryManager):
//! they extract the request, run the synchronous manager call on the
//! blocking pool and render the result as JSON.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use utoipa::ToSchema;

use crate::errors::GalleryError;
use crate::gallery::manager::DeleteOutcome;
use crate::gallery::order::ReorderItem;
use crate::metadata::store::ImageRecord;
use crate::storage::input::{FileInput, SpooledFile};
use crate::AppState;

// -- Request / response bodies -----------------------------------------------

/// Images of one gallery, in display order.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImageList {
    pub images: Vec<ImageRecord>,
}

/// Body of `PUT /parents/{parent_id}/images/order`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReorderRequest {
    #[serde(default)]
    pub items: Vec<ReorderItem>,
}

/// Result of a reorder.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReorderResponse {
    /// Number of images the parent has.
    pub count: usize,
}

// -- Helpers ------------------------------------------------------------------

/// Run a synchronous gallery call on the blocking thread pool.
async fn run_blocking<T, F>(f: F) -> Result<T, GalleryError>
where
    F: FnOnce() -> Result<T, GalleryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GalleryError::Internal(anyhow::Error::new(e)))?
}

fn parse_image_id(raw: &str) -> Result<i64, GalleryError> {
    raw.parse()
        .map_err(|_| GalleryError::invalid(format!("invalid image id '{raw}'")))
}

/// Spool every file part of `multipart` to an anonymous temp file.
///
/// Parts without a filename are form fields and are skipped.
async fn spool_files(mut multipart: Multipart) -> Result<Vec<Box<dyn FileInput>>, GalleryError> {
    let mut files: Vec<Box<dyn FileInput>> = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| GalleryError::invalid(format!("malformed multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            debug!(field = ?field.name(), "skipping non-file form field");
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let tmp = tempfile::tempfile().map_err(anyhow::Error::from)?;
        let mut out = tokio::fs::File::from_std(tmp);
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| GalleryError::invalid(format!("malformed multipart body: {e}")))?
        {
            out.write_all(&chunk).await.map_err(anyhow::Error::from)?;
        }
        out.flush().await.map_err(anyhow::Error::from)?;

        let spooled = SpooledFile::new(filename, content_type.as_deref(), out.into_std().await)
            .map_err(anyhow::Error::from)?;
        files.push(Box::new(spooled));
    }
    Ok(files)
}

// -- Handlers -----------------------------------------------------------------

/// `GET /parents/{parent_id}/images` -- List a gallery.
#[utoipa::path(
    get,
    path = "/parents/{parent_id}/images",
    tag = "Gallery",
    operation_id = "ListImages",
    params(("parent_id" = String, Path, description = "Parent id")),
    responses(
        (status = 200, description = "Gallery in display order", body = ImageList),
        (status = 404, description = "Parent not found")
    )
)]
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Path(parent_id): Path<String>,
) -> Result<Response, GalleryError> {
    let gallery = state.gallery.clone();
    let images = run_blocking(move || gallery.list(&parent_id)).await?;
    Ok(Json(ImageList { images }).into_response())
}

/// `POST /parents/{parent_id}/images` -- Upload a batch of images.
#[utoipa::path(
    post,
    path = "/parents/{parent_id}/images",
    tag = "Gallery",
    operation_id = "UploadImages",
    params(("parent_id" = String, Path, description = "Parent id")),
    request_body(content_type = "multipart/form-data", description = "One part per image file"),
    responses(
        (status = 201, description = "Images created, in upload order", body = ImageList),
        (status = 400, description = "No files submitted"),
        (status = 404, description = "Parent not found"),
        (status = 409, description = "Gallery is full"),
        (status = 413, description = "Too many files in one request"),
        (status = 415, description = "Unsupported image type")
    )
)]
pub async fn upload_images(
    State(state): State<Arc<AppState>>,
    Path(parent_id): Path<String>,
    multipart: Multipart,
) -> Result<Response, GalleryError> {
    let files = spool_files(multipart).await?;
    debug!(parent_id = %parent_id, files = files.len(), "upload received");

    let gallery = state.gallery.clone();
    let images = run_blocking(move || gallery.upload(&parent_id, files)).await?;
    Ok((StatusCode::CREATED, Json(ImageList { images })).into_response())
}

/// `DELETE /parents/{parent_id}/images/{image_id}` -- Delete an image.
#[utoipa::path(
    delete,
    path = "/parents/{parent_id}/images/{image_id}",
    tag = "Gallery",
    operation_id = "DeleteImage",
    params(
        ("parent_id" = String, Path, description = "Parent id"),
        ("image_id" = i64, Path, description = "Image id"),
    ),
    responses(
        (status = 200, description = "Image deleted", body = DeleteOutcome),
        (status = 404, description = "Image not found")
    )
)]
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path((parent_id, image_id)): Path<(String, String)>,
) -> Result<Response, GalleryError> {
    let image_id = parse_image_id(&image_id)?;
    let gallery = state.gallery.clone();
    let outcome = run_blocking(move || gallery.delete(&parent_id, image_id)).await?;
    Ok(Json(outcome).into_response())
}

/// `PUT /parents/{parent_id}/images/{image_id}/cover` -- Make an image the cover.
#[utoipa::path(
    put,
    path = "/parents/{parent_id}/images/{image_id}/cover",
    tag = "Gallery",
    operation_id = "SetCover",
    params(
        ("parent_id" = String, Path, description = "Parent id"),
        ("image_id" = i64, Path, description = "Image id"),
    ),
    responses(
        (status = 200, description = "Cover assigned", body = ImageRecord),
        (status = 404, description = "Image not found")
    )
)]
pub async fn set_cover(
    State(state): State<Arc<AppState>>,
    Path((parent_id, image_id)): Path<(String, String)>,
) -> Result<Response, GalleryError> {
    let image_id = parse_image_id(&image_id)?;
    let gallery = state.gallery.clone();
    let record = run_blocking(move || gallery.set_cover(&parent_id, image_id)).await?;
    Ok(Json(record).into_response())
}

/// `PUT /parents/{parent_id}/images/order` -- Reorder a gallery.
#[utoipa::path(
    put,
    path = "/parents/{parent_id}/images/order",
    tag = "Gallery",
    operation_id = "ReorderImages",
    params(("parent_id" = String, Path, description = "Parent id")),
    request_body = ReorderRequest,
    responses(
        (status = 200, description = "Gallery renumbered", body = ReorderResponse),
        (status = 400, description = "Empty or malformed payload")
    )
)]
pub async fn reorder_images(
    State(state): State<Arc<AppState>>,
    Path(parent_id): Path<String>,
    body: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Response, GalleryError> {
    let Json(request) =
        body.map_err(|e| GalleryError::invalid(format!("malformed reorder payload: {e}")))?;
    let gallery = state.gallery.clone();
    let count = run_blocking(move || gallery.reorder(&parent_id, &request.items)).await?;
    Ok(Json(ReorderResponse { count }).into_response())
}

// -- Tests --------------------------------------------------------------------
