//! Database connection and operations
//!
//! The application database holds the cover upload tracking table (and,
//! when shared with the web app, its thumbnail table). The Calibre library
//! is opened separately and read-only.

pub mod calibre;
pub mod cover_uploads;
pub mod sqlite_helpers;
pub mod thumbnails;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

pub use calibre::{Book, BookFormat, CalibreLibrary, Series};
pub use cover_uploads::{
    CoverResolution, CoverUploadRecord, CoverUploadRepository, ResolutionError, UpsertCoverUpload,
};
pub use thumbnails::ThumbnailCache;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS s3_cover_uploads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        book_id INTEGER NOT NULL,
        resolution TEXT,
        s3_key TEXT NOT NULL,
        uploaded_at TEXT,
        file_size INTEGER,
        etag TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_s3_cover_uploads_book ON s3_cover_uploads (book_id, resolution)",
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the application database at `path`
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open application database {}", path.display()))?;

        let db = Self { pool };
        db.ensure_schema().await?;
        debug!(path = %path.display(), "Application database ready");
        Ok(db)
    }

    /// Open the application database without writing anything to disk.
    ///
    /// An existing database that already has the tracking table is opened
    /// read-only. Otherwise an empty in-memory database stands in, so every
    /// cover looks untracked.
    pub async fn connect_read_only(path: &Path) -> Result<Self> {
        if path.exists() {
            let options = SqliteConnectOptions::new().filename(path).read_only(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .with_context(|| format!("Failed to open application database {}", path.display()))?;

            let db = Self { pool };
            if db.has_tracking_table().await? {
                debug!(path = %path.display(), "Application database opened read-only");
                return Ok(db);
            }
            db.close().await;
        }

        debug!(path = %path.display(), "No tracking table, using an empty in-memory database");
        Self::connect_in_memory().await
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same memory store.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Create the tracking table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create tracking schema")?;
        }
        Ok(())
    }

    async fn has_tracking_table(&self) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 's3_cover_uploads'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a cover upload tracking repository
    pub fn cover_uploads(&self) -> CoverUploadRepository {
        CoverUploadRepository::new(self.pool.clone())
    }

    /// Get a thumbnail cache lookup rooted at `cache_dir`
    pub fn thumbnails(&self, cache_dir: impl Into<PathBuf>) -> ThumbnailCache {
        ThumbnailCache::new(self.pool.clone(), cache_dir)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
