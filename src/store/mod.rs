//! Image store
//!
//! ## Responsibilities
//!
//! - Owns the SQLite pool and the `images` schema
//! - Hands out repository handles to the other components
//!
//! The database file lives at a fixed path relative to the working
//! directory. WAL mode keeps the queue durable across power loss
//! without long writer stalls.

mod repository;
mod types;

pub use repository::ImageRepository;
pub use types::{ImageRecord, NewImage, QueueStats, SourceCount, StorageStats};

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    filename TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    captured_at INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    uploaded INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    abandoned INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);
CREATE INDEX IF NOT EXISTS idx_images_pending ON images(uploaded, abandoned, id);
CREATE INDEX IF NOT EXISTS idx_images_captured_at ON images(captured_at);
"#;

/// Image store instance.
pub struct ImageStore {
    pool: SqlitePool,
}

impl ImageStore {
    /// Open (creating if needed) the database at `path` and apply the
    /// schema. Failure here is fatal to startup.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!(path = %path.as_ref().display(), "Image store opened");

        Ok(Self { pool })
    }

    pub fn repository(&self) -> ImageRepository {
        ImageRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
