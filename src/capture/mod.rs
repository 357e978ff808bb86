//! Capture service
//!
//! ## Responsibilities
//!
//! - Resolve the camera for a source tag from the live settings
//! - Drive the frame grabber and insert the image row (file + row are
//!   written together; the insert is the authoritative event)
//! - Per-source capture statistics
//!
//! `capture_async` never blocks the caller; the GPIO dispatcher uses
//! it. `capture_blocking` returns the result and backs the manual
//! capture endpoint and the `--test-capture` CLI mode. Failed captures
//! are a recorded fact, not retried here: the user can press again.

use crate::error::{CameraError, Error, Result};
use crate::grabber::{FrameGrabber, DEFAULT_TIMEOUT_SECS};
use crate::settings::SettingsStore;
use crate::store::{ImageRecord, ImageRepository, NewImage};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};

/// Concurrent grabs are capped at cameras x 2 to keep a stuck camera
/// from starving the rest.
const PERMITS_PER_CAMERA: usize = 2;

/// Per-source capture counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Epoch seconds of the last successful capture
    pub last_capture_at: Option<i64>,
    pub last_error: Option<String>,
}

pub struct CaptureService {
    settings: Arc<SettingsStore>,
    repo: ImageRepository,
    grabber: FrameGrabber,
    stats: RwLock<HashMap<String, SourceStats>>,
    permits: Semaphore,
}

impl CaptureService {
    pub fn new(settings: Arc<SettingsStore>, repo: ImageRepository) -> Self {
        Self {
            settings,
            repo,
            grabber: FrameGrabber::new(),
            stats: RwLock::new(HashMap::new()),
            permits: Semaphore::new(crate::settings::CAMERA_COUNT * PERMITS_PER_CAMERA),
        }
    }

    /// Fire-and-forget capture; returns immediately. Outcome lands in
    /// the statistics and the log.
    pub fn capture_async(self: &Arc<Self>, source: &str) {
        let service = self.clone();
        let source = source.to_string();
        tokio::spawn(async move {
            match service.capture_blocking(&source).await {
                Ok(record) => {
                    tracing::info!(
                        source = %source,
                        filename = %record.filename,
                        size = record.size_bytes,
                        "Capture complete"
                    );
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Capture failed");
                }
            }
        });
    }

    /// Capture one frame for `source` and insert the image row.
    pub async fn capture_blocking(&self, source: &str) -> Result<ImageRecord> {
        let settings = self.settings.current().await;
        let camera = settings
            .camera_by_tag(source)
            .ok_or_else(|| Error::NotFound(format!("unknown source: {}", source)))?
            .clone();

        self.count_attempt(source).await;

        if !camera.enabled {
            self.count_failure(source, "disabled").await;
            return Err(CameraError::Disabled(source.to_string()).into());
        }

        let rtsp_url = camera.rtsp_url(&settings.camera_username, &settings.camera_password);

        let captured_at = Utc::now().timestamp();
        let filename = filename_for(source, captured_at);

        tokio::fs::create_dir_all(&settings.image_storage_path).await?;
        let storage_dir = tokio::fs::canonicalize(&settings.image_storage_path).await?;
        let path = storage_dir.join(&filename);

        // Bound concurrent ffmpeg invocations
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("capture service shut down".to_string()))?;

        if let Err(e) = self
            .grabber
            .grab(&rtsp_url, &path, DEFAULT_TIMEOUT_SECS)
            .await
        {
            self.count_failure(source, &e.to_string()).await;
            return Err(e.into());
        }

        let size_bytes = tokio::fs::metadata(&path).await?.len() as i64;

        let new = NewImage {
            source: source.to_string(),
            filename: filename.clone(),
            path: path.display().to_string(),
            captured_at,
            size_bytes,
        };

        let id = match self.repo.insert(new).await {
            Ok(id) => id,
            Err(e) => {
                // A row exists iff the file exists; drop the orphan file
                let _ = tokio::fs::remove_file(&path).await;
                self.count_failure(source, &e.to_string()).await;
                return Err(e.into());
            }
        };

        self.count_success(source, captured_at).await;

        Ok(ImageRecord {
            id,
            source: source.to_string(),
            filename,
            path: path.display().to_string(),
            captured_at,
            size_bytes,
            uploaded: false,
            attempts: 0,
            abandoned: false,
            last_error: None,
        })
    }

    /// Snapshot of per-source counters for the stats API.
    pub async fn stats(&self) -> HashMap<String, SourceStats> {
        self.stats.read().await.clone()
    }

    async fn count_attempt(&self, source: &str) {
        let mut stats = self.stats.write().await;
        stats.entry(source.to_string()).or_default().total += 1;
    }

    async fn count_success(&self, source: &str, captured_at: i64) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(source.to_string()).or_default();
        entry.successful += 1;
        entry.last_capture_at = Some(captured_at);
        entry.last_error = None;
    }

    async fn count_failure(&self, source: &str, error: &str) {
        let mut stats = self.stats.write().await;
        let entry = stats.entry(source.to_string()).or_default();
        entry.failed += 1;
        entry.last_error = Some(error.to_string());
    }
}

/// Filename convention: `<source>_<captured_at>.jpg`, integer seconds,
/// no padding. This name is the remote deduplication key.
pub fn filename_for(source: &str, captured_at: i64) -> String {
    format!("{}_{}.jpg", source, captured_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ImageStore;
    use std::collections::HashMap as Map;

    async fn service_with(env: &[(&str, &str)]) -> (tempfile::TempDir, Arc<CaptureService>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path().join("camcap.db")).await.unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join(".env")).unwrap());
        if !env.is_empty() {
            let patch: Map<String, String> = env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            settings.update(patch).await.unwrap();
        }
        let service = Arc::new(CaptureService::new(settings, store.repository()));
        (dir, service)
    }

    #[test]
    fn filename_convention() {
        assert_eq!(filename_for("r1", 1700000000), "r1_1700000000.jpg");
        assert_eq!(filename_for("r3", 7), "r3_7.jpg");
    }

    #[tokio::test]
    async fn disabled_camera_fails_without_a_row() {
        let (_dir, service) = service_with(&[("CAMERA_2_ENABLED", "false")]).await;

        let err = service.capture_blocking("r2").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Camera(CameraError::Disabled(ref tag)) if tag == "r2"
        ));

        let stats = service.stats().await;
        assert_eq!(stats["r2"].total, 1);
        assert_eq!(stats["r2"].failed, 1);
        assert_eq!(stats["r2"].successful, 0);
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let (_dir, service) = service_with(&[]).await;
        let err = service.capture_blocking("r9").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        // Unknown sources never enter the stats map
        assert!(service.stats().await.is_empty());
    }
}
