//! Lookup of thumbnails already rendered by the web application
//!
//! The web app records rendered thumbnails in its `thumbnail` table and keeps
//! the files under `<cache_dir>/thumbnails/<first two chars>/<filename>`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::cover_uploads::CoverResolution;

/// Cache sub-directory for thumbnails
pub const CACHE_TYPE_THUMBNAILS: &str = "thumbnails";

/// `thumbnail.type` value for book covers
const THUMBNAIL_TYPE_COVER: i64 = 0;

/// `thumbnail.expiration` is stored as naive UTC text
const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Formats tried in order of preference
const PREFERRED_FORMATS: [&str; 3] = ["webp", "jpg", "jpeg"];

pub struct ThumbnailCache {
    pool: SqlitePool,
    cache_dir: PathBuf,
}

impl ThumbnailCache {
    pub fn new(pool: SqlitePool, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            cache_dir: cache_dir.into(),
        }
    }

    /// Path of a cached file: `<cache_dir>/thumbnails/<prefix>/<filename>`
    pub fn cache_file_path(&self, filename: &str) -> PathBuf {
        cache_file_path(&self.cache_dir, filename)
    }

    async fn has_thumbnail_table(&self) -> Result<bool> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'thumbnail'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    /// Cached thumbnail for a book cover, preferring webp over jpg.
    /// Expired rows are ignored and only files present on disk are returned.
    pub async fn find(&self, book_id: i64, resolution: CoverResolution) -> Result<Option<PathBuf>> {
        if resolution == CoverResolution::Original || !self.has_thumbnail_table().await? {
            return Ok(None);
        }

        let now = expiration_now();
        for format in PREFERRED_FORMATS {
            let row = sqlx::query_as::<_, (String,)>(
                r#"
                SELECT filename FROM thumbnail
                WHERE entity_id = ? AND type = ? AND resolution = ? AND lower(format) = ?
                  AND (expiration IS NULL OR expiration > ?)
                ORDER BY id DESC LIMIT 1
                "#,
            )
            .bind(book_id)
            .bind(THUMBNAIL_TYPE_COVER)
            .bind(resolution.constant())
            .bind(format)
            .bind(&now)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((filename,)) = row {
                let path = self.cache_file_path(&filename);
                if path.exists() {
                    return Ok(Some(path));
                }
                debug!(book_id, path = %path.display(), "Cached thumbnail recorded but missing on disk");
            }
        }

        Ok(None)
    }
}

/// Current UTC time in the web app's `expiration` column format
fn expiration_now() -> String {
    Utc::now().format(EXPIRATION_FORMAT).to_string()
}

pub fn cache_file_path(cache_dir: &Path, filename: &str) -> PathBuf {
    let prefix: String = filename.chars().take(2).collect();
    cache_dir
        .join(CACHE_TYPE_THUMBNAILS)
        .join(prefix)
        .join(filename)
}
