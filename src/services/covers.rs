//! Cover storage: copies book covers to object storage and tracks them
//!
//! Every upload is recorded in the tracking table so the same cover variant
//! is not sent twice. Public URLs are resolved from tracking rows alone,
//! without touching the bucket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::object_storage::{ObjectStore, StorageError};
use crate::config::S3Settings;
use crate::db::{CoverResolution, CoverUploadRecord, CoverUploadRepository, UpsertCoverUpload};

/// Covers are immutable per key, so clients may cache them for a year
pub const COVER_CACHE_CONTROL: &str = "public, max-age=31536000";

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("cover file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read cover {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tracking(#[from] anyhow::Error),
}

/// What [`CoverStorage::upload_cover`] did
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Uploaded(CoverUploadRecord),
    /// Already tracked; nothing was sent
    AlreadyUploaded(CoverUploadRecord),
}

impl UploadOutcome {
    pub fn record(&self) -> &CoverUploadRecord {
        match self {
            UploadOutcome::Uploaded(r) | UploadOutcome::AlreadyUploaded(r) => r,
        }
    }

    pub fn was_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded(_))
    }
}

/// Object key for a cover variant:
/// `{prefix}/{book_id}/cover.{ext}` or `{prefix}/{book_id}/{tag}.{ext}`
pub fn cover_key(prefix: &str, book_id: i64, resolution: CoverResolution, extension: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = resolution.tag().unwrap_or("cover");
    if prefix.is_empty() {
        format!("{}/{}.{}", book_id, name, extension)
    } else {
        format!("{}/{}/{}.{}", prefix, book_id, name, extension)
    }
}

/// Content type and key extension for a cover file. Anything that is not a
/// recognised image is sent as JPEG.
pub fn cover_content_type(path: &Path) -> (&'static str, &'static str) {
    let content_type = mime_guess::from_path(path)
        .first_raw()
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or("image/jpeg");

    match content_type {
        "image/png" => ("image/png", "png"),
        "image/gif" => ("image/gif", "gif"),
        "image/webp" => ("image/webp", "webp"),
        _ => ("image/jpeg", "jpg"),
    }
}

/// Public URL of an object.
///
/// A CDN base wins; otherwise a custom endpoint is addressed path-style and
/// AWS S3 uses `https://s3.{region}.amazonaws.com/{bucket}/{key}`.
pub fn public_url(settings: &S3Settings, key: &str) -> String {
    if let Some(cdn) = &settings.cdn_url {
        return format!("{}/{}", cdn.trim_end_matches('/'), key);
    }
    if let Some(endpoint) = &settings.endpoint_url {
        return format!(
            "{}/{}/{}",
            super::object_storage::normalize_endpoint(endpoint),
            settings.bucket,
            key
        );
    }
    format!(
        "https://s3.{}.amazonaws.com/{}/{}",
        settings.region, settings.bucket, key
    )
}

// ============================================================================
// Cover Storage
// ============================================================================

/// Uploads covers and keeps the tracking table in step with the bucket
pub struct CoverStorage {
    store: Arc<dyn ObjectStore>,
    uploads: CoverUploadRepository,
    key_prefix: String,
}

impl CoverStorage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        uploads: CoverUploadRepository,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            uploads,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn uploads(&self) -> &CoverUploadRepository {
        &self.uploads
    }

    /// Key a cover file would be stored under
    pub fn key_for(&self, book_id: i64, resolution: CoverResolution, path: &Path) -> String {
        let (_, extension) = cover_content_type(path);
        cover_key(&self.key_prefix, book_id, resolution, extension)
    }

    /// Tracking row for a cover variant, if it has been uploaded
    pub async fn is_cover_uploaded(
        &self,
        book_id: i64,
        resolution: CoverResolution,
    ) -> Result<Option<CoverUploadRecord>> {
        let record = self.uploads.get(book_id, resolution).await?;
        debug!(book_id, resolution = %resolution, tracked = record.is_some(), "Checked upload tracking");
        Ok(record)
    }

    /// Upload a cover file unless it is already tracked (or `force` is set),
    /// then record the upload.
    pub async fn upload_cover(
        &self,
        book_id: i64,
        path: &Path,
        resolution: CoverResolution,
        force: bool,
    ) -> Result<UploadOutcome, CoverError> {
        if !force && let Some(existing) = self.uploads.get(book_id, resolution).await? {
            info!(
                book_id,
                resolution = %resolution,
                key = %existing.s3_key,
                "Cover already uploaded"
            );
            return Ok(UploadOutcome::AlreadyUploaded(existing));
        }

        if !path.exists() {
            return Err(CoverError::Missing(path.to_path_buf()));
        }

        let body = tokio::fs::read(path).await.map_err(|source| CoverError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file_size = body.len() as i64;
        let (content_type, extension) = cover_content_type(path);
        let key = cover_key(&self.key_prefix, book_id, resolution, extension);

        let outcome = self
            .store
            .put_object(&key, body, content_type, COVER_CACHE_CONTROL)
            .await?;

        let record = self
            .uploads
            .upsert(UpsertCoverUpload {
                book_id,
                resolution,
                s3_key: key.clone(),
                file_size,
                etag: outcome.etag,
            })
            .await?;

        info!(
            book_id,
            resolution = %resolution,
            bucket = %self.store.bucket(),
            key = %key,
            size_kb = %format!("{:.1}", file_size as f64 / 1024.0),
            "Uploaded cover"
        );
        Ok(UploadOutcome::Uploaded(record))
    }

    /// Check the tracked object really exists in the bucket.
    /// A tracking row whose object is gone is removed.
    pub async fn verify_cover_exists(
        &self,
        book_id: i64,
        resolution: CoverResolution,
    ) -> Result<bool, CoverError> {
        let Some(record) = self.uploads.get(book_id, resolution).await? else {
            return Ok(false);
        };

        match self.store.head_object(&record.s3_key).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => {
                warn!(book_id, key = %record.s3_key, "Cover tracked but not found in bucket");
                self.uploads.delete(book_id, resolution).await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// URL Resolution
// ============================================================================

/// Resolves public URLs of uploaded covers from the tracking table
pub struct CoverUrlResolver {
    uploads: CoverUploadRepository,
    settings: S3Settings,
}

impl CoverUrlResolver {
    pub fn new(uploads: CoverUploadRepository, settings: S3Settings) -> Self {
        Self { uploads, settings }
    }

    /// URL of a tracked cover variant, `None` if it has not been uploaded
    pub async fn cover_url(
        &self,
        book_id: i64,
        resolution: CoverResolution,
    ) -> Result<Option<String>> {
        let record = self.uploads.get(book_id, resolution).await?;
        Ok(record.map(|r| public_url(&self.settings, &r.s3_key)))
    }

    /// Same as [`cover_url`](Self::cover_url) for the web layer's numeric
    /// resolution constant (0, 1, 2, 4)
    pub async fn cover_url_for_constant(
        &self,
        book_id: i64,
        constant: i64,
    ) -> Result<Option<String>> {
        let resolution = CoverResolution::from_constant(constant)?;
        self.cover_url(book_id, resolution).await
    }
}
