//! Image store data types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the `images` table; one per successful capture.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    pub id: i64,
    /// Source tag (r1/r2/r3)
    pub source: String,
    /// Basename, `<source>_<captured_at>.jpg`, unique per row
    pub filename: String,
    /// Absolute path inside the storage directory
    pub path: String,
    /// Seconds since the epoch at capture initiation
    pub captured_at: i64,
    pub size_bytes: i64,
    pub uploaded: bool,
    /// Upload attempts so far; monotone non-decreasing
    pub attempts: i64,
    /// Terminally failed (missing file / oversize); never re-sent
    pub abandoned: bool,
    pub last_error: Option<String>,
}

/// Insert payload for a fresh capture.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub source: String,
    pub filename: String,
    pub path: String,
    pub captured_at: i64,
    pub size_bytes: i64,
}

/// Upload queue counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub uploaded: i64,
    pub abandoned: i64,
}

/// Per-source row count.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SourceCount {
    pub source: String,
    pub count: i64,
}

/// Storage-wide counters for the stats API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub total_images: i64,
    pub total_bytes: i64,
    pub by_source: Vec<SourceCount>,
}
