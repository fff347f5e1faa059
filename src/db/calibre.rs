//! Read-only access to a Calibre library (`metadata.db`)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::sqlite_helpers::{int_to_bool, str_to_datetime};

/// File name of the cover Calibre keeps next to each book
pub const COVER_FILE_NAME: &str = "cover.jpg";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    /// Book directory relative to the library root
    pub path: String,
    pub has_cover: bool,
    pub uuid: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for Book {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let has_cover: Option<i64> = row.try_get("has_cover")?;
        let last_modified: String = row.try_get("last_modified")?;

        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            path: row.try_get("path")?,
            has_cover: int_to_bool(has_cover.unwrap_or(0)),
            uuid: row.try_get("uuid")?,
            last_modified: str_to_datetime(&last_modified)
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// A stored file format of a book (row of the `data` table)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookFormat {
    pub book_id: i64,
    pub format: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Series {
    pub id: i64,
    pub name: String,
}

const BOOK_COLUMNS: &str = "SELECT id, title, path, has_cover, uuid, last_modified FROM books";

/// Calibre library opened read-only
pub struct CalibreLibrary {
    root: PathBuf,
    pool: SqlitePool,
}

impl CalibreLibrary {
    /// Open `<root>/metadata.db`. Fails if the library does not exist.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let metadata_db = root.join("metadata.db");
        if !metadata_db.exists() {
            bail!(
                "Calibre library not found: {} (check the library path {})",
                metadata_db.display(),
                root.display()
            );
        }

        let options = SqliteConnectOptions::new()
            .filename(&metadata_db)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open {}", metadata_db.display()))?;

        Ok(Self { root, pool })
    }

    /// Wrap an existing pool (tests)
    pub fn from_pool(root: impl Into<PathBuf>, pool: SqlitePool) -> Self {
        Self {
            root: root.into(),
            pool,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Books flagged as having a cover, ordered by id
    pub async fn books_with_covers(&self) -> Result<Vec<Book>> {
        let books = sqlx::query_as::<_, Book>(&format!(
            "{} WHERE has_cover = 1 ORDER BY id",
            BOOK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    pub async fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!("{} WHERE id = ?", BOOK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    pub async fn book_formats(&self, book_id: i64) -> Result<Vec<BookFormat>> {
        let formats = sqlx::query_as::<_, BookFormat>(
            "SELECT book AS book_id, format, name FROM data WHERE book = ? ORDER BY format",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(formats)
    }

    pub async fn get_series(&self, id: i64) -> Result<Option<Series>> {
        let series = sqlx::query_as::<_, Series>("SELECT id, name FROM series WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(series)
    }

    /// Location of the full-size cover for a book
    pub fn cover_path(&self, book: &Book) -> PathBuf {
        self.root.join(&book.path).join(COVER_FILE_NAME)
    }
}
