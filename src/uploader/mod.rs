//! Upload worker
//!
//! ## Responsibilities
//!
//! - Drain `uploaded = 0` rows to the remote intake, oldest id first
//! - At-least-once delivery: a crash between the remote 200 and the
//!   local mark re-sends the item, and the intake deduplicates on
//!   filename
//! - Tolerate arbitrary offline intervals via the connectivity flag
//!
//! One worker task. Items whose backing file is missing or oversize
//! are flagged abandoned and leave the queue permanently; every other
//! failure keeps the row for the next drain pass. Database errors
//! back the loop off without killing the worker.

mod client;
mod connectivity;

pub use client::IntakeClient;
pub use connectivity::ConnectivityMonitor;

use crate::error::UploadError;
use crate::settings::{Settings, SettingsStore};
use crate::store::{ImageRecord, ImageRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Items above this size are never POSTed.
pub const MAX_UPLOAD_BYTES: u64 = 15 * 1024 * 1024;

/// Rows fetched per drain pass.
const BATCH_SIZE: i64 = 5;

const SLEEP_OK_SECS: u64 = 5;
const SLEEP_FAIL_SECS: u64 = 15;
const SLEEP_OFFLINE_SECS: u64 = 15;

pub struct UploadWorker {
    settings: Arc<SettingsStore>,
    repo: ImageRepository,
    client: IntakeClient,
    connectivity: ConnectivityMonitor,
    /// Set while upload is enabled but the endpoint or field name is
    /// missing; surfaced by /api/status
    config_error: RwLock<Option<String>>,
}

impl UploadWorker {
    pub fn new(settings: Arc<SettingsStore>, repo: ImageRepository) -> Self {
        Self {
            settings,
            repo,
            client: IntakeClient::new(),
            connectivity: ConnectivityMonitor::new(),
            config_error: RwLock::new(None),
        }
    }

    /// Use a custom connectivity monitor (tests).
    pub fn with_connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Worker loop; runs until the stop flag flips. A panicking drain
    /// pass is caught at this boundary and the loop re-enters after a
    /// back-off instead of dying.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        use futures::FutureExt;

        tracing::info!("Upload worker started");
        loop {
            if *stop.borrow() {
                break;
            }
            let delay = match std::panic::AssertUnwindSafe(self.drain_pass())
                .catch_unwind()
                .await
            {
                Ok(delay) => delay,
                Err(_) => {
                    tracing::error!("Drain pass panicked, restarting after back-off");
                    Duration::from_secs(SLEEP_FAIL_SECS)
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => {}
            }
        }
        tracing::info!("Upload worker stopped");
    }

    /// One drain pass; returns how long to sleep before the next.
    pub async fn drain_pass(&self) -> Duration {
        let settings = self.settings.current().await;

        if !settings.upload_enabled {
            self.set_config_error(None).await;
            return Duration::from_secs(SLEEP_FAIL_SECS);
        }

        if settings.upload_endpoint.is_empty() {
            self.set_config_error(Some("UPLOAD_ENDPOINT is not configured")).await;
            return Duration::from_secs(SLEEP_FAIL_SECS);
        }
        if settings.upload_field_name.is_empty() {
            // Required key, no safe default
            self.set_config_error(Some("UPLOAD_FIELD_NAME is not configured")).await;
            return Duration::from_secs(SLEEP_FAIL_SECS);
        }
        self.set_config_error(None).await;

        let refresh = Duration::from_secs(settings.connectivity_check_interval_secs);
        if !self.connectivity.is_online(refresh).await {
            match self.repo.pending_count().await {
                Ok(pending) => {
                    tracing::info!(pending = pending, "Offline, holding upload queue")
                }
                Err(e) => tracing::error!(error = %e, "Queue count failed while offline"),
            }
            return Duration::from_secs(SLEEP_OFFLINE_SECS);
        }

        let batch = match self.repo.pending_batch(BATCH_SIZE).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, "Queue fetch failed, backing off");
                return Duration::from_secs(SLEEP_FAIL_SECS);
            }
        };

        if batch.is_empty() {
            return Duration::from_secs(SLEEP_OK_SECS);
        }

        let mut had_failure = false;
        for record in batch {
            if !self.upload_item(&settings, &record).await {
                had_failure = true;
            }
        }

        Duration::from_secs(if had_failure {
            SLEEP_FAIL_SECS
        } else {
            SLEEP_OK_SECS
        })
    }

    /// Upload one row with the per-item bounded retry. Returns false
    /// only for retriable failures that keep the row queued.
    async fn upload_item(&self, settings: &Settings, record: &ImageRecord) -> bool {
        let bytes = match tokio::fs::metadata(&record.path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    id = record.id,
                    filename = %record.filename,
                    "Backing file missing, dropping from queue"
                );
                self.mark_abandoned(record, "file_missing").await;
                return true;
            }
            Err(e) => {
                self.mark_failed(record, &format!("stat: {}", e)).await;
                return false;
            }
            Ok(meta) if meta.len() > MAX_UPLOAD_BYTES => {
                let err = UploadError::Oversize(meta.len());
                tracing::warn!(
                    id = record.id,
                    filename = %record.filename,
                    size = meta.len(),
                    "File exceeds upload ceiling, dropping from queue"
                );
                self.mark_abandoned(record, &err.to_string()).await;
                return true;
            }
            Ok(_) => match tokio::fs::read(&record.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.mark_failed(record, &format!("read: {}", e)).await;
                    return false;
                }
            },
        };

        let bearer = (!settings.upload_auth_bearer.is_empty())
            .then_some(settings.upload_auth_bearer.as_str());
        let max_retries = settings.max_retries.max(1);

        for attempt in 1..=max_retries {
            let result = self
                .client
                .post_image(
                    &settings.upload_endpoint,
                    &settings.upload_field_name,
                    &record.filename,
                    bytes.clone(),
                    bearer,
                )
                .await;

            match result {
                Ok(()) => {
                    if let Err(e) = self.repo.mark_uploaded(record.id).await {
                        tracing::error!(id = record.id, error = %e, "Failed to mark uploaded");
                        return false;
                    }
                    tracing::info!(
                        id = record.id,
                        filename = %record.filename,
                        attempt = attempt,
                        "Image uploaded"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        id = record.id,
                        filename = %record.filename,
                        attempt = attempt,
                        max = max_retries,
                        error = %e,
                        "Upload attempt failed"
                    );
                    self.mark_failed(record, &e.to_string()).await;
                    if attempt < max_retries {
                        tokio::time::sleep(Duration::from_secs(settings.retry_delay_secs)).await;
                    }
                }
            }
        }

        false
    }

    async fn mark_failed(&self, record: &ImageRecord, error: &str) {
        if let Err(e) = self.repo.mark_failed(record.id, error).await {
            tracing::error!(id = record.id, error = %e, "Failed to record upload failure");
        }
    }

    async fn mark_abandoned(&self, record: &ImageRecord, reason: &str) {
        if let Err(e) = self.repo.mark_abandoned(record.id, reason).await {
            tracing::error!(id = record.id, error = %e, "Failed to abandon row");
        }
    }

    async fn set_config_error(&self, message: Option<&str>) {
        let mut current = self.config_error.write().await;
        match (current.as_deref(), message) {
            (None, Some(msg)) => {
                tracing::error!(error = msg, "Uploader configuration incomplete");
                *current = Some(msg.to_string());
            }
            (Some(_), None) => {
                tracing::info!("Uploader configuration complete");
                *current = None;
            }
            (Some(prev), Some(msg)) if prev != msg => {
                tracing::error!(error = msg, "Uploader configuration incomplete");
                *current = Some(msg.to_string());
            }
            _ => {}
        }
    }

    /// Last known reachability flag (status API).
    pub async fn online(&self) -> bool {
        self.connectivity.last_known().await
    }

    /// Active configuration error, if any (status API).
    pub async fn config_error(&self) -> Option<String> {
        self.config_error.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ImageStore, NewImage};
    use std::collections::HashMap;

    async fn worker_fixture(
        env: &[(&str, &str)],
    ) -> (tempfile::TempDir, Arc<UploadWorker>, ImageRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path().join("camcap.db")).await.unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join(".env")).unwrap());
        if !env.is_empty() {
            let patch: HashMap<String, String> = env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            settings.update(patch).await.unwrap();
        }
        let repo = store.repository();
        let worker = Arc::new(UploadWorker::new(settings, repo.clone()));
        (dir, worker, repo)
    }

    #[tokio::test]
    async fn missing_file_is_dropped_from_queue() {
        let (dir, worker, repo) = worker_fixture(&[]).await;
        let settings = worker.settings.current().await;

        let id = repo
            .insert(NewImage {
                source: "r1".to_string(),
                filename: "r1_1700000000.jpg".to_string(),
                path: dir.path().join("gone.jpg").display().to_string(),
                captured_at: 1700000000,
                size_bytes: 0,
            })
            .await
            .unwrap();

        let rec = repo.get(id).await.unwrap().unwrap();
        assert!(worker.upload_item(&settings, &rec).await);

        let row = repo.get(id).await.unwrap().unwrap();
        assert!(row.abandoned);
        assert_eq!(row.last_error.as_deref(), Some("file_missing"));
        assert!(repo.pending_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversize_file_is_never_posted() {
        let (dir, worker, repo) = worker_fixture(&[]).await;
        let settings = worker.settings.current().await;

        let path = dir.path().join("big.jpg");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(MAX_UPLOAD_BYTES + 1).unwrap();

        let id = repo
            .insert(NewImage {
                source: "r1".to_string(),
                filename: "r1_1700000001.jpg".to_string(),
                path: path.display().to_string(),
                captured_at: 1700000001,
                size_bytes: (MAX_UPLOAD_BYTES + 1) as i64,
            })
            .await
            .unwrap();

        let rec = repo.get(id).await.unwrap().unwrap();
        assert!(worker.upload_item(&settings, &rec).await);

        let row = repo.get(id).await.unwrap().unwrap();
        assert!(row.abandoned);
        assert!(row.last_error.unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn incomplete_config_surfaces_and_clears() {
        let (_dir, worker, _repo) =
            worker_fixture(&[("UPLOAD_ENDPOINT", "http://127.0.0.1:9/upload")]).await;

        // Field name unset: drain idles with a config error
        let delay = worker.drain_pass().await;
        assert_eq!(delay, Duration::from_secs(SLEEP_FAIL_SECS));
        assert!(worker
            .config_error()
            .await
            .unwrap()
            .contains("UPLOAD_FIELD_NAME"));

        // Disabling upload clears the error
        let mut patch = HashMap::new();
        patch.insert("UPLOAD_ENABLED".to_string(), "false".to_string());
        worker.settings.update(patch).await.unwrap();
        worker.drain_pass().await;
        assert!(worker.config_error().await.is_none());
    }
}
