//! Intake HTTP client
//!
//! One multipart/form-data POST per image. Success is HTTP 200
//! exactly; anything else is a retriable failure for the drain loop
//! to count.

use crate::error::UploadError;
use reqwest::multipart;
use reqwest::StatusCode;
use std::time::Duration;

/// Per-attempt request budget.
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct IntakeClient {
    http: reqwest::Client,
}

impl IntakeClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            // A redirect would turn the POST into a GET; refuse instead
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build HTTP client");

        Self { http }
    }

    /// POST one JPEG under the configured form-field name. The part
    /// filename is the stored filename, which the intake uses for
    /// deduplication.
    pub async fn post_image(
        &self,
        endpoint: &str,
        field_name: &str,
        filename: &str,
        bytes: Vec<u8>,
        bearer: Option<&str>,
    ) -> Result<(), UploadError> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/jpeg")
            .map_err(|e| UploadError::Transport(format!("multipart: {}", e)))?;
        let form = multipart::Form::new().part(field_name.to_string(), part);

        let mut request = self.http.post(endpoint).multipart(form);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Transport(summarize(&e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(UploadError::Http(status.as_u16()));
        }

        // The body may carry an informational Location field
        if let Ok(body) = response.json::<serde_json::Value>().await {
            if let Some(location) = body.get("Location").and_then(|v| v.as_str()) {
                tracing::debug!(filename = %filename, location = %location, "Intake stored image");
            }
        }

        Ok(())
    }
}

impl Default for IntakeClient {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connect: {}", e)
    } else {
        e.to_string()
    }
}
