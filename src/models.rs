//! Shared data models

use serde::Serialize;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ApiError) -> ApiResponse<T> {
        ApiResponse {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// API error
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub db_connected: bool,
    pub gpio_available: bool,
    pub upload: UploadStatus,
    pub cameras_enabled: usize,
}

/// Uploader component status
#[derive(Debug, Serialize)]
pub struct UploadStatus {
    pub enabled: bool,
    /// Last known reachability flag
    pub online: bool,
    /// Present while upload is enabled but misconfigured
    pub config_error: Option<String>,
}
