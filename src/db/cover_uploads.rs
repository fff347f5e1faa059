//! Cover upload tracking repository
//!
//! One row per `(book_id, resolution)` records that a cover has been copied to
//! object storage. A NULL resolution is the original cover. SQLite unique
//! constraints treat NULLs as distinct, so upserts replace the existing row
//! inside a transaction instead of relying on `ON CONFLICT`.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::warn;

use super::sqlite_helpers::{now_iso8601, str_to_datetime_opt};

// ============================================================================
// Cover Resolution
// ============================================================================

/// Size variant of a book cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverResolution {
    Original,
    Small,
    Medium,
    Large,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("unknown cover resolution constant: {0}")]
    UnknownConstant(i64),

    #[error("unknown cover resolution: {0}")]
    UnknownName(String),
}

impl CoverResolution {
    /// Thumbnail variants, smallest first
    pub const THUMBNAILS: [CoverResolution; 3] = [
        CoverResolution::Small,
        CoverResolution::Medium,
        CoverResolution::Large,
    ];

    /// Map the web layer's numeric constant (0, 1, 2, 4)
    pub fn from_constant(value: i64) -> Result<Self, ResolutionError> {
        match value {
            0 => Ok(Self::Original),
            1 => Ok(Self::Small),
            2 => Ok(Self::Medium),
            4 => Ok(Self::Large),
            other => Err(ResolutionError::UnknownConstant(other)),
        }
    }

    /// Numeric constant, also used as the `srcset` pixel-density multiplier
    pub fn constant(self) -> i64 {
        match self {
            Self::Original => 0,
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 4,
        }
    }

    /// Map a URL short name (`og`, `sm`, `md`, `lg`)
    pub fn from_short_name(name: &str) -> Result<Self, ResolutionError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "og" => Ok(Self::Original),
            "sm" => Ok(Self::Small),
            "md" => Ok(Self::Medium),
            "lg" => Ok(Self::Large),
            _ => Err(ResolutionError::UnknownName(name.to_string())),
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Original => "og",
            Self::Small => "sm",
            Self::Medium => "md",
            Self::Large => "lg",
        }
    }

    /// Value stored in the tracking table (`None` for the original)
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Self::Original => None,
            other => Some(other.short_name()),
        }
    }

    /// Inverse of [`tag`](Self::tag)
    pub fn from_tag(tag: Option<&str>) -> Result<Self, ResolutionError> {
        match tag {
            None => Ok(Self::Original),
            Some("og") => Err(ResolutionError::UnknownName("og".to_string())),
            Some(t) => Self::from_short_name(t),
        }
    }

    /// Longest edge of the generated thumbnail
    pub fn thumbnail_bound(self) -> Option<u32> {
        match self {
            Self::Original => None,
            Self::Small => Some(200),
            Self::Medium => Some(400),
            Self::Large => Some(800),
        }
    }

    /// Human readable name for log lines
    pub fn label(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Small => "sm thumbnail",
            Self::Medium => "md thumbnail",
            Self::Large => "lg thumbnail",
        }
    }
}

impl fmt::Display for CoverResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for CoverResolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_short_name(s)
    }
}

// ============================================================================
// Cover Upload Record
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverUploadRecord {
    pub id: i64,
    pub book_id: i64,
    pub resolution: CoverResolution,
    pub s3_key: String,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub etag: Option<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for CoverUploadRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let resolution: Option<String> = row.try_get("resolution")?;
        let uploaded_at: Option<String> = row.try_get("uploaded_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            book_id: row.try_get("book_id")?,
            resolution: CoverResolution::from_tag(resolution.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            s3_key: row.try_get("s3_key")?,
            uploaded_at: str_to_datetime_opt(uploaded_at.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            file_size: row.try_get("file_size")?,
            etag: row.try_get("etag")?,
        })
    }
}

/// Input for recording an upload
#[derive(Debug, Clone)]
pub struct UpsertCoverUpload {
    pub book_id: i64,
    pub resolution: CoverResolution,
    pub s3_key: String,
    pub file_size: i64,
    pub etag: Option<String>,
}

// ============================================================================
// Repository
// ============================================================================

const SELECT_COLUMNS: &str =
    "SELECT id, book_id, resolution, s3_key, uploaded_at, file_size, etag FROM s3_cover_uploads";

pub struct CoverUploadRepository {
    pool: SqlitePool,
}

impl CoverUploadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Tracking row for a book cover variant
    pub async fn get(
        &self,
        book_id: i64,
        resolution: CoverResolution,
    ) -> Result<Option<CoverUploadRecord>> {
        let record = sqlx::query_as::<_, CoverUploadRecord>(&format!(
            "{} WHERE book_id = ? AND resolution IS ? ORDER BY id DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(book_id)
        .bind(resolution.tag())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Whether a cover variant is tracked as uploaded
    pub async fn is_uploaded(&self, book_id: i64, resolution: CoverResolution) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM s3_cover_uploads WHERE book_id = ? AND resolution IS ?",
        )
        .bind(book_id)
        .bind(resolution.tag())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    /// Variants already uploaded for a book. Unknown tags are skipped.
    pub async fn uploaded_resolutions(&self, book_id: i64) -> Result<Vec<CoverResolution>> {
        let rows = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT DISTINCT resolution FROM s3_cover_uploads WHERE book_id = ?",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        let mut resolutions = Vec::with_capacity(rows.len());
        for (tag,) in rows {
            match CoverResolution::from_tag(tag.as_deref()) {
                Ok(r) => resolutions.push(r),
                Err(e) => warn!(book_id, error = %e, "Ignoring unknown tracked resolution"),
            }
        }
        Ok(resolutions)
    }

    /// Record an upload, replacing any previous row for the same variant
    pub async fn upsert(&self, upload: UpsertCoverUpload) -> Result<CoverUploadRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM s3_cover_uploads WHERE book_id = ? AND resolution IS ?")
            .bind(upload.book_id)
            .bind(upload.resolution.tag())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO s3_cover_uploads (book_id, resolution, s3_key, uploaded_at, file_size, etag)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(upload.book_id)
        .bind(upload.resolution.tag())
        .bind(&upload.s3_key)
        .bind(now_iso8601())
        .bind(upload.file_size)
        .bind(&upload.etag)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get(upload.book_id, upload.resolution)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to record cover upload"))
    }

    /// Remove the tracking row for a variant
    pub async fn delete(&self, book_id: i64, resolution: CoverResolution) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM s3_cover_uploads WHERE book_id = ? AND resolution IS ?")
                .bind(book_id)
                .bind(resolution.tag())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All tracked variants for a book
    pub async fn list_for_book(&self, book_id: i64) -> Result<Vec<CoverUploadRecord>> {
        let records = sqlx::query_as::<_, CoverUploadRecord>(&format!(
            "{} WHERE book_id = ? ORDER BY id",
            SELECT_COLUMNS
        ))
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM s3_cover_uploads")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    /// Bytes uploaded across all tracked covers
    pub async fn total_bytes(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (Option<i64>,)>("SELECT SUM(file_size) FROM s3_cover_uploads")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use assert_matches::assert_matches;

    async fn repo() -> CoverUploadRepository {
        let db = Database::connect_in_memory().await.unwrap();
        db.cover_uploads()
    }

    fn upload(book_id: i64, resolution: CoverResolution, etag: &str) -> UpsertCoverUpload {
        UpsertCoverUpload {
            book_id,
            resolution,
            s3_key: format!("cw-cover/{}/{}.jpg", book_id, resolution),
            file_size: 1024,
            etag: Some(etag.to_string()),
        }
    }

    #[test]
    fn test_resolution_constants() {
        assert_eq!(CoverResolution::from_constant(0), Ok(CoverResolution::Original));
        assert_eq!(CoverResolution::from_constant(1), Ok(CoverResolution::Small));
        assert_eq!(CoverResolution::from_constant(2), Ok(CoverResolution::Medium));
        assert_eq!(CoverResolution::from_constant(4), Ok(CoverResolution::Large));
        assert_matches!(
            CoverResolution::from_constant(3),
            Err(ResolutionError::UnknownConstant(3))
        );
    }

    #[test]
    fn test_resolution_tags() {
        assert_eq!(CoverResolution::Original.tag(), None);
        assert_eq!(CoverResolution::Medium.tag(), Some("md"));
        assert_eq!(CoverResolution::from_tag(None), Ok(CoverResolution::Original));
        assert_eq!(CoverResolution::from_tag(Some("lg")), Ok(CoverResolution::Large));
        assert!(CoverResolution::from_tag(Some("og")).is_err());
        assert_eq!("SM".parse::<CoverResolution>(), Ok(CoverResolution::Small));
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = repo().await;
        assert!(!repo.is_uploaded(7, CoverResolution::Original).await.unwrap());

        let record = repo.upsert(upload(7, CoverResolution::Original, "abc")).await.unwrap();
        assert_eq!(record.book_id, 7);
        assert_eq!(record.resolution, CoverResolution::Original);
        assert_eq!(record.etag.as_deref(), Some("abc"));
        assert!(record.uploaded_at.is_some());

        assert!(repo.is_uploaded(7, CoverResolution::Original).await.unwrap());
        assert!(!repo.is_uploaded(7, CoverResolution::Small).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_original_twice_keeps_one_row() {
        let repo = repo().await;
        repo.upsert(upload(1, CoverResolution::Original, "first")).await.unwrap();
        repo.upsert(upload(1, CoverResolution::Original, "second")).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        let record = repo.get(1, CoverResolution::Original).await.unwrap().unwrap();
        assert_eq!(record.etag.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_uploaded_resolutions_and_delete() {
        let repo = repo().await;
        repo.upsert(upload(3, CoverResolution::Original, "a")).await.unwrap();
        repo.upsert(upload(3, CoverResolution::Large, "b")).await.unwrap();
        repo.upsert(upload(4, CoverResolution::Small, "c")).await.unwrap();

        let mut resolutions = repo.uploaded_resolutions(3).await.unwrap();
        resolutions.sort_by_key(|r| r.constant());
        assert_eq!(resolutions, vec![CoverResolution::Original, CoverResolution::Large]);
        assert_eq!(repo.total_bytes().await.unwrap(), 3072);

        assert!(repo.delete(3, CoverResolution::Large).await.unwrap());
        assert!(!repo.delete(3, CoverResolution::Large).await.unwrap());
        assert_eq!(repo.list_for_book(3).await.unwrap().len(), 1);
    }
}
