//! Gallery error types.
//!
//! Every variant maps to a stable error code and an HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(GalleryError::NotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Domain errors surfaced by the gallery manager and its stores.
#[derive(Debug, Error)]
pub enum GalleryError {
    /// A parent or image record does not exist (or belongs to another parent).
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// The request payload is empty or malformed.
    #[error("{message}")]
    InvalidInput { message: String },

    /// More files were submitted than a single request may carry.
    #[error("at most {limit} files may be uploaded per request, got {submitted}")]
    LimitExceeded { limit: usize, submitted: usize },

    /// The parent's gallery is full.
    #[error("gallery for parent {parent_id} is full ({capacity} images)")]
    CapacityExceeded { parent_id: String, capacity: u32 },

    /// The file's content type and extension are both outside the allow-list.
    #[error("unsupported media type for file '{filename}'")]
    UnsupportedMediaType { filename: String },

    /// Catch-all for store and I/O failures.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GalleryError {
    /// Shorthand for a missing parent.
    pub fn parent_not_found(parent_id: &str) -> Self {
        GalleryError::NotFound {
            resource: "parent",
            id: parent_id.to_string(),
        }
    }

    /// Shorthand for a missing image.
    pub fn image_not_found(image_id: i64) -> Self {
        GalleryError::NotFound {
            resource: "image",
            id: image_id.to_string(),
        }
    }

    /// Shorthand for a malformed request.
    pub fn invalid(message: impl Into<String>) -> Self {
        GalleryError::InvalidInput {
            message: message.into(),
        }
    }

    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            GalleryError::NotFound { .. } => "NotFound",
            GalleryError::InvalidInput { .. } => "InvalidInput",
            GalleryError::LimitExceeded { .. } => "LimitExceeded",
            GalleryError::CapacityExceeded { .. } => "CapacityExceeded",
            GalleryError::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            GalleryError::Internal(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GalleryError::NotFound { .. } => StatusCode::NOT_FOUND,
            GalleryError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            GalleryError::LimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GalleryError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            GalleryError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GalleryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GalleryError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        // Internal details stay in the logs.
        let message = match &self {
            GalleryError::Internal(err) => {
                tracing::error!(request_id = %request_id, "internal error: {err:#}");
                "We encountered an internal error, please try again.".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
                "request_id": request_id,
            }
        });

        (status, [("x-request-id", request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GalleryError::parent_not_found("p1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GalleryError::invalid("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GalleryError::CapacityExceeded {
                parent_id: "p1".into(),
                capacity: 30
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GalleryError::Internal(anyhow::anyhow!("boom")).code(),
            "InternalError"
        );
    }

    #[test]
    fn test_not_found_message_names_resource() {
        let err = GalleryError::image_not_found(42);
        assert_eq!(err.to_string(), "image not found: 42");
        assert_eq!(err.code(), "NotFound");
    }
}
