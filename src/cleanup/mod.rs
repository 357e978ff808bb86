//! Cleanup worker
//!
//! ## Responsibilities
//!
//! - Delete file + row for images older than the retention horizon
//! - Keep running totals for the stats API
//!
//! File first, then row: if the unlink fails the row stays and the
//! pair is retried next cycle. A missing file is fine, the row goes.
//! No transaction is held across the unlink. The loop sleeps in short
//! slices so shutdown and retention changes apply promptly.

use crate::error::Result;
use crate::settings::SettingsStore;
use crate::store::ImageRepository;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// Sleep slice for the periodic loop.
const TICK_SECS: u64 = 60;

/// Cleanup running totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupStats {
    pub total_deleted: u64,
    pub total_bytes_reclaimed: u64,
    /// Epoch seconds of the last completed run
    pub last_run: Option<i64>,
    pub last_run_deleted: u64,
    pub errors: u64,
}

/// Outcome of one cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupRun {
    pub deleted: u64,
    pub bytes_reclaimed: u64,
    pub skipped: u64,
}

pub struct CleanupWorker {
    settings: Arc<SettingsStore>,
    repo: ImageRepository,
    stats: RwLock<CleanupStats>,
}

impl CleanupWorker {
    pub fn new(settings: Arc<SettingsStore>, repo: ImageRepository) -> Self {
        Self {
            settings,
            repo,
            stats: RwLock::new(CleanupStats::default()),
        }
    }

    /// Worker loop: one run at startup, then every
    /// CLEANUP_INTERVAL_HOURS (re-read each cycle).
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        use futures::FutureExt;

        tracing::info!("Cleanup worker started");

        if let Err(e) = self.run_once().await {
            tracing::error!(error = %e, "Initial cleanup run failed");
        }

        'outer: loop {
            let interval_secs = {
                let settings = self.settings.current().await;
                settings.cleanup_interval_hours.max(1) * 3600
            };

            let mut elapsed = 0u64;
            while elapsed < interval_secs {
                if *stop.borrow() {
                    break 'outer;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(TICK_SECS)) => elapsed += TICK_SECS,
                    _ = stop.changed() => {}
                }
            }

            if *stop.borrow() {
                break;
            }
            match std::panic::AssertUnwindSafe(self.run_once())
                .catch_unwind()
                .await
            {
                Ok(Err(e)) => tracing::error!(error = %e, "Cleanup run failed"),
                Err(_) => tracing::error!("Cleanup run panicked, continuing on next interval"),
                Ok(Ok(_)) => {}
            }
        }

        tracing::info!("Cleanup worker stopped");
    }

    /// Delete everything past the retention horizon. Also available on
    /// demand through the API and the --cleanup-now CLI mode.
    pub async fn run_once(&self) -> Result<CleanupRun> {
        let settings = self.settings.current().await;
        let threshold =
            Utc::now().timestamp() - i64::from(settings.image_retention_days) * 86_400;

        let expired = self.repo.older_than(threshold).await?;
        let candidates = expired.len();

        let mut run = CleanupRun::default();
        for row in expired {
            match tokio::fs::remove_file(&row.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    // Row stays; the pair is retried next cycle
                    tracing::warn!(
                        id = row.id,
                        path = %row.path,
                        error = %e,
                        "Could not remove expired file, keeping row"
                    );
                    run.skipped += 1;
                    continue;
                }
            }

            self.repo.delete(row.id).await?;
            run.deleted += 1;
            run.bytes_reclaimed += row.size_bytes.max(0) as u64;
        }

        let mut stats = self.stats.write().await;
        stats.total_deleted += run.deleted;
        stats.total_bytes_reclaimed += run.bytes_reclaimed;
        stats.last_run = Some(Utc::now().timestamp());
        stats.last_run_deleted = run.deleted;
        stats.errors += run.skipped;

        if candidates > 0 {
            tracing::info!(
                deleted = run.deleted,
                bytes = run.bytes_reclaimed,
                skipped = run.skipped,
                retention_days = settings.image_retention_days,
                "Cleanup run complete"
            );
        } else {
            tracing::debug!("Cleanup run: nothing past retention");
        }

        Ok(run)
    }

    pub async fn stats(&self) -> CleanupStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ImageStore, NewImage};

    async fn fixture() -> (tempfile::TempDir, Arc<CleanupWorker>, ImageRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path().join("camcap.db")).await.unwrap();
        let settings = Arc::new(SettingsStore::load(dir.path().join(".env")).unwrap());
        let repo = store.repository();
        let worker = Arc::new(CleanupWorker::new(settings, repo.clone()));
        (dir, worker, repo)
    }

    async fn insert_image(
        repo: &ImageRepository,
        dir: &std::path::Path,
        source: &str,
        captured_at: i64,
        with_file: bool,
    ) -> (i64, std::path::PathBuf) {
        let filename = format!("{}_{}.jpg", source, captured_at);
        let path = dir.join(&filename);
        if with_file {
            tokio::fs::write(&path, [0xFF, 0xD8, 0, 0]).await.unwrap();
        }
        let id = repo
            .insert(NewImage {
                source: source.to_string(),
                filename,
                path: path.display().to_string(),
                captured_at,
                size_bytes: 4,
            })
            .await
            .unwrap();
        (id, path)
    }

    #[tokio::test]
    async fn expired_pair_is_removed_and_counted() {
        let (dir, worker, repo) = fixture().await;
        let old_epoch = Utc::now().timestamp() - 121 * 86_400;
        let (id, path) = insert_image(&repo, dir.path(), "r1", old_epoch, true).await;
        let (keep_id, keep_path) =
            insert_image(&repo, dir.path(), "r1", Utc::now().timestamp(), true).await;

        let run = worker.run_once().await.unwrap();
        assert_eq!(run.deleted, 1);
        assert_eq!(run.bytes_reclaimed, 4);

        assert!(repo.get(id).await.unwrap().is_none());
        assert!(!path.exists());
        assert!(repo.get(keep_id).await.unwrap().is_some());
        assert!(keep_path.exists());

        let stats = worker.stats().await;
        assert_eq!(stats.total_deleted, 1);
        assert_eq!(stats.last_run_deleted, 1);
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let (dir, worker, repo) = fixture().await;
        let old_epoch = Utc::now().timestamp() - 200 * 86_400;
        insert_image(&repo, dir.path(), "r2", old_epoch, true).await;

        let first = worker.run_once().await.unwrap();
        assert_eq!(first.deleted, 1);

        let second = worker.run_once().await.unwrap();
        assert_eq!(second.deleted, 0);
        assert_eq!(second.bytes_reclaimed, 0);
        assert_eq!(worker.stats().await.total_deleted, 1);
    }

    #[tokio::test]
    async fn missing_file_still_drops_the_row() {
        let (dir, worker, repo) = fixture().await;
        let old_epoch = Utc::now().timestamp() - 200 * 86_400;
        let (id, _path) = insert_image(&repo, dir.path(), "r3", old_epoch, false).await;

        let run = worker.run_once().await.unwrap();
        assert_eq!(run.deleted, 1);
        assert!(repo.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_unlink_keeps_the_row() {
        let (dir, worker, repo) = fixture().await;
        let old_epoch = Utc::now().timestamp() - 200 * 86_400;

        // Point the row at a non-empty directory so remove_file fails
        let blocker = dir.path().join("blocker");
        tokio::fs::create_dir(&blocker).await.unwrap();
        let id = repo
            .insert(NewImage {
                source: "r1".to_string(),
                filename: format!("r1_{}.jpg", old_epoch),
                path: blocker.display().to_string(),
                captured_at: old_epoch,
                size_bytes: 4,
            })
            .await
            .unwrap();

        let run = worker.run_once().await.unwrap();
        assert_eq!(run.deleted, 0);
        assert_eq!(run.skipped, 1);
        assert!(repo.get(id).await.unwrap().is_some());
        assert_eq!(worker.stats().await.errors, 1);
    }
}
