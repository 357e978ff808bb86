//! Image repository
//!
//! All reads and writes against the `images` table. The pool is the
//! single serialization point for queue state; transactions stay
//! short and are never held across file or network I/O.

use super::types::{ImageRecord, NewImage, QueueStats, SourceCount, StorageStats};
use sqlx::{Row, SqlitePool};

/// Max stored length of `last_error`.
const ERROR_TRUNCATE: usize = 200;

const SELECT_COLUMNS: &str = "id, source, filename, path, captured_at, size_bytes, \
                              uploaded, attempts, abandoned, last_error";

#[derive(Clone)]
pub struct ImageRepository {
    pool: SqlitePool,
}

impl ImageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fresh capture; this insert is the authoritative event.
    pub async fn insert(&self, new: NewImage) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO images (source, filename, path, captured_at, size_bytes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.source)
        .bind(&new.filename)
        .bind(&new.path)
        .bind(new.captured_at)
        .bind(new.size_bytes)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<ImageRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {} FROM images WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_by_filename(&self, filename: &str) -> Result<Option<ImageRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {} FROM images WHERE filename = ?",
            SELECT_COLUMNS
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await
    }

    /// Next batch for the uploader: not yet uploaded, not abandoned,
    /// oldest id first.
    pub async fn pending_batch(&self, limit: i64) -> Result<Vec<ImageRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {} FROM images WHERE uploaded = 0 AND abandoned = 0 ORDER BY id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn pending_count(&self) -> Result<i64, sqlx::Error> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM images WHERE uploaded = 0 AND abandoned = 0")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("cnt"))
    }

    /// Record a successful POST. The successful attempt counts too, so
    /// an uploaded row always has `attempts >= 1`.
    pub async fn mark_uploaded(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE images SET uploaded = 1, attempts = attempts + 1, last_error = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt; the row stays in the queue.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE images SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        )
        .bind(truncate(error))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminally fail a row (missing file, oversize). It leaves the
    /// queue permanently but stays browsable until retention cleanup.
    pub async fn mark_abandoned(&self, id: i64, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE images SET abandoned = 1, last_error = ? WHERE id = ?")
            .bind(truncate(reason))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Paginated listing, newest capture first, optional source filter.
    pub async fn list_recent(
        &self,
        source: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>, sqlx::Error> {
        match source {
            Some(tag) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM images WHERE source = ? ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS
                ))
                .bind(tag)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM images ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
    }

    /// Captures within `[start_epoch, end_epoch)`, newest first.
    pub async fn list_by_range(
        &self,
        start_epoch: i64,
        end_epoch: i64,
        source: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>, sqlx::Error> {
        match source {
            Some(tag) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM images WHERE captured_at >= ? AND captured_at < ? AND source = ? \
                     ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS
                ))
                .bind(start_epoch)
                .bind(end_epoch)
                .bind(tag)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM images WHERE captured_at >= ? AND captured_at < ? \
                     ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?",
                    SELECT_COLUMNS
                ))
                .bind(start_epoch)
                .bind(end_epoch)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
    }

    /// Rows past the retention horizon, oldest first.
    pub async fn older_than(&self, threshold_epoch: i64) -> Result<Vec<ImageRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {} FROM images WHERE captured_at < ? ORDER BY captured_at ASC",
            SELECT_COLUMNS
        ))
        .bind(threshold_epoch)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                CAST(COALESCE(SUM(CASE WHEN uploaded = 0 AND abandoned = 0 THEN 1 ELSE 0 END), 0) AS INTEGER) AS pending,
                CAST(COALESCE(SUM(CASE WHEN uploaded = 1 THEN 1 ELSE 0 END), 0) AS INTEGER) AS uploaded,
                CAST(COALESCE(SUM(CASE WHEN abandoned = 1 THEN 1 ELSE 0 END), 0) AS INTEGER) AS abandoned
            FROM images
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.get("pending"),
            uploaded: row.get("uploaded"),
            abandoned: row.get("abandoned"),
        })
    }

    pub async fn storage_stats(&self) -> Result<StorageStats, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, CAST(COALESCE(SUM(size_bytes), 0) AS INTEGER) AS bytes FROM images",
        )
        .fetch_one(&self.pool)
        .await?;

        let by_source: Vec<SourceCount> = sqlx::query_as(
            "SELECT source, COUNT(*) AS count FROM images GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StorageStats {
            total_images: row.get("total"),
            total_bytes: row.get("bytes"),
            by_source,
        })
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= ERROR_TRUNCATE {
        s.to_string()
    } else {
        s.chars().take(ERROR_TRUNCATE).collect()
    }
}
