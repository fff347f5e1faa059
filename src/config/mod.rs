//! Application configuration management

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

/// Default object key prefix for uploaded covers
pub const DEFAULT_KEY_PREFIX: &str = "cw-cover";

/// Default region when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Object storage settings loaded from the environment
#[derive(Clone, Default)]
pub struct S3Settings {
    /// Bucket that receives the covers
    pub bucket: String,

    /// Bucket region
    pub region: String,

    /// Static access key (both keys or neither)
    pub access_key: Option<String>,

    /// Static secret key
    pub secret_key: Option<String>,

    /// Custom S3-compatible endpoint (MinIO, R2, ...)
    pub endpoint_url: Option<String>,

    /// Use path-style addressing (`endpoint/bucket/key`)
    pub force_path_style: bool,

    /// Public base URL that fronts the bucket
    pub cdn_url: Option<String>,

    /// Key prefix, without trailing slash
    pub key_prefix: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .field("cdn_url", &self.cdn_url)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl S3Settings {
    pub fn from_env() -> Self {
        Self {
            bucket: env::var("S3_BUCKET").unwrap_or_default(),
            region: non_empty_var("S3_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key: non_empty_var("S3_ACCESS_KEY"),
            secret_key: non_empty_var("S3_SECRET_KEY"),
            endpoint_url: non_empty_var("S3_ENDPOINT_URL"),
            force_path_style: env::var("S3_FORCE_PATH_STYLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            cdn_url: non_empty_var("S3_CDN_URL"),
            key_prefix: non_empty_var("S3_KEY_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        }
    }

    /// Check that uploads can be attempted, reporting every missing value at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.bucket.trim().is_empty() {
            problems.push("S3_BUCKET environment variable or --s3-bucket argument");
        }
        match (&self.access_key, &self.secret_key) {
            (Some(_), None) => {
                problems.push("S3_SECRET_KEY environment variable or --s3-secret-key argument")
            }
            (None, Some(_)) => {
                problems.push("S3_ACCESS_KEY environment variable or --s3-access-key argument")
            }
            _ => {}
        }

        if problems.is_empty() {
            Ok(())
        } else {
            bail!("S3 configuration incomplete, please provide: {}", problems.join("; "))
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Calibre library root (contains metadata.db)
    pub library_path: PathBuf,

    /// Application database holding the upload tracking table.
    /// `None` means "search the usual locations".
    pub app_db_path: Option<PathBuf>,

    /// Thumbnail cache root
    pub cache_dir: Option<PathBuf>,

    /// Object storage settings
    pub s3: S3Settings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            library_path: expand_home(
                &non_empty_var("CALIBRE_LIBRARY_PATH").unwrap_or_else(|| "~/calibre-web".into()),
            ),
            app_db_path: non_empty_var("APP_DB_PATH").map(|p| expand_home(&p)),
            cache_dir: non_empty_var("CACHE_DIR").map(|p| expand_home(&p)),
            s3: S3Settings::from_env(),
        }
    }

    /// Resolve the application database: the configured path, else the first
    /// existing candidate, else `./config/app.db` (created on connect).
    pub fn resolve_app_db_path(&self) -> PathBuf {
        if let Some(path) = &self.app_db_path {
            return path.clone();
        }
        app_db_candidates()
            .into_iter()
            .find(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from("./config/app.db"))
    }
}

/// Locations searched for an existing application database, in order
pub fn app_db_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("./config/app.db")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("calibre-web-automated").join("config").join("app.db"));
    }
    candidates.push(PathBuf::from("/config/app.db"));
    candidates
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    Path::new(path).to_path_buf()
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
