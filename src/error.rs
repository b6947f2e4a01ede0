use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, error};

/// Everything the try-on endpoint can fail with, mapped to an HTTP status
/// and a JSON `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum TryOnError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    InvalidInput(String),
    /// Upload exceeds the configured size bound.
    #[error("file too large (limit {0} MB)")]
    PayloadTooLarge(u64),
    /// The uploaded bytes are not a supported image encoding.
    #[error("unsupported image type")]
    UnsupportedMediaType,
    /// Rejected by the upload filename policy.
    #[error("content rejected by policy")]
    PolicyRejected,
    /// The external generation call failed or timed out.
    #[error("upstream generation failed: {0}")]
    Provider(String),
    /// Temporary artifact write failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl TryOnError {
    pub fn status(&self) -> StatusCode {
        match self {
            TryOnError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TryOnError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            TryOnError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            TryOnError::PolicyRejected => StatusCode::UNPROCESSABLE_ENTITY,
            TryOnError::Provider(_) => StatusCode::BAD_GATEWAY,
            TryOnError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for TryOnError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!("{}", message);
        } else {
            debug!("{}", message);
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
