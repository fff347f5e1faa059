//! Object storage for cover images
//!
//! [`ObjectStore`] is the seam the cover manager talks to. [`S3ObjectStore`]
//! targets AWS S3 or any S3-compatible endpoint; [`MemoryObjectStore`] keeps
//! objects in a map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::S3Settings;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("access denied to bucket: {0}")]
    AccessDenied(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Entity tag without surrounding quotes
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket the store writes into
    fn bucket(&self) -> &str;

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> StorageResult<PutOutcome>;

    /// `Ok(())` if the object exists, [`StorageError::NotFound`] if not
    async fn head_object(&self, key: &str) -> StorageResult<()>;

    /// Probe that the bucket exists and is reachable with our credentials
    async fn head_bucket(&self) -> StorageResult<()>;
}

/// S3 returns entity tags wrapped in double quotes
pub fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Prepend `http://` to bare `host:port` endpoints
pub fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", endpoint.trim_end_matches('/'))
    }
}

// ============================================================================
// S3
// ============================================================================

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl S3ObjectStore {
    /// Build a client from settings. Static keys are used when both are set,
    /// otherwise the ambient AWS credential chain.
    pub async fn new(settings: &S3Settings) -> StorageResult<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(StorageError::Config("bucket name is required".to_string()));
        }

        let region = Region::new(settings.region.clone());
        let mut builder = match (&settings.access_key, &settings.secret_key) {
            (Some(key_id), Some(secret)) => aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "covershelf-config",
                )),
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(StorageError::Config(
                    "both access key and secret key are required when either is set".to_string(),
                ));
            }
        };

        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(normalize_endpoint(endpoint));
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        })
    }
}

fn http_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

/// Bucket-level errors worth reporting on their own: 404 and 403
fn bucket_status_error(status: Option<u16>, bucket: &str) -> Option<StorageError> {
    match status {
        Some(404) => Some(StorageError::BucketNotFound(bucket.to_string())),
        Some(403) => Some(StorageError::AccessDenied(bucket.to_string())),
        _ => None,
    }
}

fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, body), fields(backend = "s3", size = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> StorageResult<PutOutcome> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .cache_control(cache_control)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutOutcome {
            etag: output.e_tag().map(normalize_etag),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head_object(&self, key: &str) -> StorageResult<()> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if http_status(&err) == Some(404) => Err(StorageError::NotFound(key.to_string())),
            Err(err) => Err(sdk_error(err)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head_bucket(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => Err(bucket_status_error(http_status(&err), &self.bucket)
                .unwrap_or_else(|| sdk_error(err))),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
    pub etag: String,
}

/// Map-backed store; etags are the MD5 of the body like single-part S3 uploads
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of `put_object` calls, successful or not
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Make every following `put_object` fail
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> StorageResult<PutOutcome> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::S3("simulated upload failure".into()));
        }

        let etag = format!("{:x}", md5::compute(&body));
        debug!(key = %key, size = body.len(), "Stored object in memory");
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
                etag: etag.clone(),
            },
        );

        Ok(PutOutcome { etag: Some(etag) })
    }

    async fn head_object(&self, key: &str) -> StorageResult<()> {
        if self.objects.lock().contains_key(key) {
            Ok(())
        } else {
            Err(StorageError::NotFound(key.to_string()))
        }
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"d41d8cd98f00b204e9800998ecf8427e\""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(normalize_etag("plain"), "plain");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(normalize_endpoint("https://r2.example.com/"), "https://r2.example.com");
    }

    #[test]
    fn test_bucket_status_error() {
        assert_matches!(
            bucket_status_error(Some(404), "covers"),
            Some(StorageError::BucketNotFound(b)) if b == "covers"
        );
        assert_matches!(
            bucket_status_error(Some(403), "covers"),
            Some(StorageError::AccessDenied(b)) if b == "covers"
        );
        assert!(bucket_status_error(Some(500), "covers").is_none());
        assert!(bucket_status_error(None, "covers").is_none());
    }

    #[tokio::test]
    async fn test_memory_store_put_and_head() {
        let store = MemoryObjectStore::new("covers");
        assert_matches!(store.head_object("a.jpg").await, Err(StorageError::NotFound(_)));

        let outcome = store
            .put_object("a.jpg", b"hello".to_vec(), "image/jpeg", "public")
            .await
            .unwrap();
        assert_eq!(outcome.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert!(store.head_object("a.jpg").await.is_ok());
        assert_eq!(store.get("a.jpg").unwrap().content_type, "image/jpeg");
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_failure() {
        let store = MemoryObjectStore::new("covers");
        store.set_fail_puts(true);
        assert!(store.put_object("a.jpg", vec![1], "image/jpeg", "public").await.is_err());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_s3_store_requires_paired_keys() {
        let settings = S3Settings {
            bucket: "covers".into(),
            region: "us-east-1".into(),
            access_key: Some("AKIA".into()),
            ..Default::default()
        };
        assert_matches!(S3ObjectStore::new(&settings).await, Err(StorageError::Config(_)));
    }
}
