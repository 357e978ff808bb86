//! Error handling for the capture daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Capture-side failures, local to a single grab attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CameraError {
    /// Cannot connect / resolve / handshake with the camera
    #[error("camera unreachable: {0}")]
    Unreachable(String),

    /// Grab exceeded its wall-clock budget
    #[error("capture timed out after {0}s")]
    Timeout(u64),

    /// No frame produced or the output was not a valid JPEG
    #[error("frame decode failed: {0}")]
    DecodeFailed(String),

    /// External codec tool is not installed
    #[error("ffmpeg not found on PATH")]
    ToolMissing,

    /// Camera is disabled in settings
    #[error("camera {0} is disabled")]
    Disabled(String),
}

/// Upload failures; retriable unless noted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Non-200 response from the intake
    #[error("intake returned HTTP {0}")]
    Http(u16),

    /// Connection / DNS / TLS / timeout at the transport layer
    #[error("transport error: {0}")]
    Transport(String),

    /// File exceeds the per-item byte ceiling; terminal
    #[error("file too large: {0} bytes")]
    Oversize(u64),

    /// Backing file is gone; terminal
    #[error("backing file missing")]
    MissingFile,
}

impl UploadError {
    /// Terminal failures leave the queue; retriable ones stay.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadError::Oversize(_) | UploadError::MissingFile)
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing required configuration
    #[error("config error: {0}")]
    Config(String),

    /// Capture failure
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// Upload failure
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// GPIO setup or line claim failure
    #[error("gpio error: {0}")]
    Gpio(String),

    /// Not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Unauthorized
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Camera(CameraError::Disabled(tag)) => (
                StatusCode::CONFLICT,
                "CAMERA_DISABLED",
                format!("camera {} is disabled", tag),
            ),
            Error::Camera(e) => (StatusCode::BAD_GATEWAY, "CAMERA_ERROR", e.to_string()),
            Error::Upload(e) => (StatusCode::BAD_GATEWAY, "UPLOAD_ERROR", e.to_string()),
            Error::Gpio(msg) => (StatusCode::SERVICE_UNAVAILABLE, "GPIO_ERROR", msg.clone()),
            Error::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
