//! Integration tests for the cover upload flow
//!
//! Each test builds a throwaway Calibre library (metadata.db plus cover
//! files) and an application database, and uploads into an in-memory bucket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_matches::assert_matches;
use image::{GenericImageView, ImageBuffer, Rgb};
use pretty_assertions::assert_eq;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

use covershelf::config::S3Settings;
use covershelf::db::{CalibreLibrary, CoverResolution, Database, ThumbnailCache};
use covershelf::filters::get_s3_cover_url;
use covershelf::services::{
    BulkUploader, CoverError, CoverStorage, CoverUrlResolver, MemoryObjectStore, ThumbnailSource,
    UploadOptions, UploadOutcome,
};

const DUNE: i64 = 1;
const MISSING_FILE: i64 = 2;
const NO_COVER: i64 = 3;

struct Fixture {
    dir: TempDir,
    library_path: PathBuf,
    db: Database,
    store: Arc<MemoryObjectStore>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let library_path = dir.path().join("library");
        std::fs::create_dir_all(&library_path).unwrap();
        create_library(&library_path).await;

        let db = Database::connect(&dir.path().join("config").join("app.db"))
            .await
            .unwrap();

        Self {
            dir,
            library_path,
            db,
            store: Arc::new(MemoryObjectStore::new("covers")),
        }
    }

    fn covers(&self) -> CoverStorage {
        CoverStorage::new(self.store.clone(), self.db.cover_uploads(), "cw-cover")
    }

    async fn uploader(&self, options: UploadOptions, cache: Option<ThumbnailCache>) -> BulkUploader {
        let library = CalibreLibrary::open(&self.library_path).await.unwrap();
        BulkUploader::new(library, self.covers(), cache, options)
    }

    fn dune_cover(&self) -> PathBuf {
        self.library_path.join("Frank Herbert/Dune (1)/cover.jpg")
    }
}

async fn create_library(root: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(root.join("metadata.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    for statement in [
        r#"CREATE TABLE books (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            path TEXT NOT NULL,
            has_cover BOOL DEFAULT 0,
            uuid TEXT,
            last_modified TIMESTAMP NOT NULL
        )"#,
        "CREATE TABLE data (id INTEGER PRIMARY KEY, book INTEGER, format TEXT, name TEXT)",
        "CREATE TABLE series (id INTEGER PRIMARY KEY, name TEXT)",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }

    insert_book(&pool, DUNE, "Dune", "Frank Herbert/Dune (1)", true).await;
    insert_book(&pool, MISSING_FILE, "Lost", "Nobody/Lost (2)", true).await;
    insert_book(&pool, NO_COVER, "Plain", "Nobody/Plain (3)", false).await;
    pool.close().await;

    let cover = root.join("Frank Herbert/Dune (1)/cover.jpg");
    std::fs::create_dir_all(cover.parent().unwrap()).unwrap();
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(900, 1350, Rgb([30, 90, 160]));
    img.save(&cover).unwrap();
}

async fn insert_book(pool: &SqlitePool, id: i64, title: &str, path: &str, has_cover: bool) {
    sqlx::query(
        "INSERT INTO books (id, title, path, has_cover, uuid, last_modified) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(path)
    .bind(has_cover)
    .bind(format!("uuid-{}", id))
    .bind("2024-03-01 12:00:00+00:00")
    .execute(pool)
    .await
    .unwrap();
}

fn options() -> UploadOptions {
    UploadOptions::default()
}

// ============================================================================
// Single book
// ============================================================================

#[tokio::test]
async fn test_single_book_uploads_original_and_thumbnails() {
    let fx = Fixture::new().await;
    let ok = fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();
    assert!(ok);

    assert_eq!(
        fx.store.keys(),
        vec![
            "cw-cover/1/cover.jpg",
            "cw-cover/1/lg.jpg",
            "cw-cover/1/md.jpg",
            "cw-cover/1/sm.jpg",
        ]
    );

    let uploads = fx.db.cover_uploads();
    assert_eq!(uploads.count().await.unwrap(), 4);

    let original = uploads.get(DUNE, CoverResolution::Original).await.unwrap().unwrap();
    let object = fx.store.get("cw-cover/1/cover.jpg").unwrap();
    let on_disk = std::fs::read(fx.dune_cover()).unwrap();
    assert_eq!(original.s3_key, "cw-cover/1/cover.jpg");
    assert_eq!(original.file_size, Some(on_disk.len() as i64));
    assert_eq!(original.etag.as_deref(), Some(object.etag.as_str()));
    assert!(!object.etag.contains('"'));
    assert_eq!(object.content_type, "image/jpeg");
    assert_eq!(object.cache_control, "public, max-age=31536000");

    let small = image::load_from_memory(&fx.store.get("cw-cover/1/sm.jpg").unwrap().body).unwrap();
    assert_eq!(small.height(), 200);
}

#[tokio::test]
async fn test_second_run_skips_tracked_covers() {
    let fx = Fixture::new().await;
    fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();
    let puts = fx.store.put_count();

    let ok = fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();
    assert!(ok);
    assert_eq!(fx.store.put_count(), puts);
    assert_eq!(fx.db.cover_uploads().count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_force_uploads_again() {
    let fx = Fixture::new().await;
    fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();
    let puts = fx.store.put_count();

    let forced = UploadOptions {
        force: true,
        ..options()
    };
    assert!(fx.uploader(forced, None).await.run_single(DUNE).await.unwrap());
    assert_eq!(fx.store.put_count(), puts + 4);
    assert_eq!(fx.db.cover_uploads().count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_dry_run_uploads_nothing() {
    let fx = Fixture::new().await;
    let dry = UploadOptions {
        dry_run: true,
        ..options()
    };
    assert!(fx.uploader(dry, None).await.run_single(DUNE).await.unwrap());
    assert_eq!(fx.store.put_count(), 0);
    assert_eq!(fx.db.cover_uploads().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_original_only() {
    let fx = Fixture::new().await;
    let original_only = UploadOptions {
        thumbnails: ThumbnailSource::None,
        ..options()
    };
    fx.uploader(original_only, None).await.run_single(DUNE).await.unwrap();
    assert_eq!(fx.store.keys(), vec!["cw-cover/1/cover.jpg"]);
}

#[tokio::test]
async fn test_single_book_errors() {
    let fx = Fixture::new().await;
    let uploader = fx.uploader(options(), None).await;

    let err = uploader.run_single(999).await.unwrap_err();
    assert!(err.to_string().contains("not found"));

    assert!(uploader.run_single(MISSING_FILE).await.is_err());

    // no cover is not a failure
    assert!(uploader.run_single(NO_COVER).await.unwrap());
    assert_eq!(fx.store.put_count(), 0);
}

#[tokio::test]
async fn test_failed_upload_is_not_tracked() {
    let fx = Fixture::new().await;
    fx.store.set_fail_puts(true);

    let ok = fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();
    assert!(!ok);
    assert_eq!(fx.db.cover_uploads().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_undecodable_cover_still_succeeds() {
    let fx = Fixture::new().await;
    std::fs::write(fx.dune_cover(), b"not really a jpeg").unwrap();

    let ok = fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();
    assert!(ok);
    assert_eq!(fx.store.keys(), vec!["cw-cover/1/cover.jpg"]);

    // thumbnails keep failing to render; the book has nothing left to send
    let summary = fx.uploader(options(), None).await.run_all().await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.uploaded, 0);
    assert_eq!(fx.store.put_count(), 1);
}

// ============================================================================
// All books
// ============================================================================

#[tokio::test]
async fn test_run_all_summary() {
    let fx = Fixture::new().await;
    let summary = fx.uploader(options(), None).await.run_all().await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.missing, 1);
    assert!(!summary.is_success());

    let again = fx.uploader(options(), None).await.run_all().await.unwrap();
    assert_eq!(again.uploaded, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(again.missing, 1);
}

#[tokio::test]
async fn test_run_all_counts_failures() {
    let fx = Fixture::new().await;
    fx.store.set_fail_puts(true);

    let summary = fx.uploader(options(), None).await.run_all().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.uploaded, 0);
}

// ============================================================================
// Thumbnail cache
// ============================================================================

#[tokio::test]
async fn test_cached_thumbnails_are_uploaded() {
    let fx = Fixture::new().await;
    let pool = fx.db.pool();
    sqlx::query(
        r#"CREATE TABLE thumbnail (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id INTEGER,
            type INTEGER,
            format TEXT,
            resolution INTEGER,
            filename TEXT,
            expiration TEXT
        )"#,
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO thumbnail (entity_id, type, format, resolution, filename) VALUES (?, 0, 'webp', 1, 'ab12.webp')",
    )
    .bind(DUNE)
    .execute(pool)
    .await
    .unwrap();

    let cache_dir = fx.dir.path().join("cache");
    let cached = cache_dir.join("thumbnails/ab/ab12.webp");
    std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
    std::fs::write(&cached, b"webp bytes").unwrap();

    let from_cache = UploadOptions {
        thumbnails: ThumbnailSource::Cache,
        ..options()
    };
    let cache = fx.db.thumbnails(cache_dir.clone());
    assert!(fx.uploader(from_cache, Some(cache)).await.run_single(DUNE).await.unwrap());

    assert_eq!(fx.store.keys(), vec!["cw-cover/1/cover.jpg", "cw-cover/1/sm.webp"]);
    assert_eq!(fx.store.get("cw-cover/1/sm.webp").unwrap().content_type, "image/webp");
}

// ============================================================================
// Cover storage and URLs
// ============================================================================

#[tokio::test]
async fn test_upload_cover_outcomes() {
    let fx = Fixture::new().await;
    let covers = fx.covers();

    let first = covers
        .upload_cover(DUNE, &fx.dune_cover(), CoverResolution::Original, false)
        .await
        .unwrap();
    assert!(first.was_uploaded());

    let second = covers
        .upload_cover(DUNE, &fx.dune_cover(), CoverResolution::Original, false)
        .await
        .unwrap();
    assert_matches!(second, UploadOutcome::AlreadyUploaded(ref r) if r.s3_key == "cw-cover/1/cover.jpg");
    assert_eq!(fx.store.put_count(), 1);

    let missing = covers
        .upload_cover(7, Path::new("/nowhere/cover.jpg"), CoverResolution::Original, false)
        .await
        .unwrap_err();
    assert_matches!(missing, CoverError::Missing(_));
}

#[tokio::test]
async fn test_verify_cover_exists_removes_stale_rows() {
    let fx = Fixture::new().await;
    let covers = fx.covers();
    covers
        .upload_cover(DUNE, &fx.dune_cover(), CoverResolution::Original, false)
        .await
        .unwrap();

    assert!(covers.verify_cover_exists(DUNE, CoverResolution::Original).await.unwrap());

    fx.store.remove("cw-cover/1/cover.jpg");
    assert!(!covers.verify_cover_exists(DUNE, CoverResolution::Original).await.unwrap());
    assert!(covers.is_cover_uploaded(DUNE, CoverResolution::Original).await.unwrap().is_none());

    assert!(!covers.verify_cover_exists(NO_COVER, CoverResolution::Small).await.unwrap());
}

#[tokio::test]
async fn test_resolved_urls() {
    let fx = Fixture::new().await;
    fx.uploader(options(), None).await.run_single(DUNE).await.unwrap();

    let settings = S3Settings {
        bucket: "covers".into(),
        region: "eu-west-1".into(),
        cdn_url: Some("https://img.example.org/".into()),
        key_prefix: "cw-cover".into(),
        ..Default::default()
    };
    let resolver = CoverUrlResolver::new(fx.db.cover_uploads(), settings);

    assert_eq!(
        resolver.cover_url(DUNE, CoverResolution::Medium).await.unwrap().as_deref(),
        Some("https://img.example.org/cw-cover/1/md.jpg")
    );
    assert_eq!(resolver.cover_url(NO_COVER, CoverResolution::Original).await.unwrap(), None);
    assert!(resolver.cover_url_for_constant(DUNE, 3).await.is_err());

    let library = CalibreLibrary::open(&fx.library_path).await.unwrap();
    let book = library.get_book(DUNE).await.unwrap().unwrap();
    assert_eq!(
        get_s3_cover_url(&resolver, &book, "og").await.as_deref(),
        Some("https://img.example.org/cw-cover/1/cover.jpg")
    );
    assert_eq!(get_s3_cover_url(&resolver, &book, "xl").await, None);
}
