//! Command-line flags. Anything given here overrides the environment.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

use crate::config::{Config, expand_home};
use crate::services::uploader::{ThumbnailSource, UploadOptions};

#[derive(Parser, Debug)]
#[command(name = "covershelf")]
#[command(version, about = "Upload Calibre book covers to S3-compatible storage", long_about = None)]
pub struct Cli {
    /// Upload covers for one book
    #[arg(long, conflicts_with = "all")]
    pub book_id: Option<i64>,

    /// Upload covers for every book that has one
    #[arg(long)]
    pub all: bool,

    /// Log what would be uploaded without uploading
    #[arg(long)]
    pub dry_run: bool,

    /// Upload even when already tracked as uploaded
    #[arg(long)]
    pub force: bool,

    /// Calibre library root (contains metadata.db)
    #[arg(long)]
    pub library_path: Option<String>,

    /// Application database holding the upload tracking table
    #[arg(long)]
    pub app_db: Option<String>,

    /// Thumbnail cache root, used with `--thumbnails cache`
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Where thumbnails come from
    #[arg(long, value_enum, default_value_t = ThumbnailArg::Generate)]
    pub thumbnails: ThumbnailArg,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub s3: S3Args,
}

#[derive(Args, Debug, Clone, Default)]
pub struct S3Args {
    /// Bucket name (overrides S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Bucket region (overrides S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Access key (overrides S3_ACCESS_KEY)
    #[arg(long)]
    pub s3_access_key: Option<String>,

    /// Secret key (overrides S3_SECRET_KEY)
    #[arg(long)]
    pub s3_secret_key: Option<String>,

    /// S3-compatible endpoint (overrides S3_ENDPOINT_URL)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Public base URL in front of the bucket (overrides S3_CDN_URL)
    #[arg(long)]
    pub s3_cdn_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ThumbnailArg {
    /// Render sm/md/lg from the full cover
    Generate,
    /// Upload thumbnails from the web app's cache
    Cache,
    /// Upload the original cover only
    None,
}

impl From<ThumbnailArg> for ThumbnailSource {
    fn from(arg: ThumbnailArg) -> Self {
        match arg {
            ThumbnailArg::Generate => ThumbnailSource::Generate,
            ThumbnailArg::Cache => ThumbnailSource::Cache,
            ThumbnailArg::None => ThumbnailSource::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Whether `--book-id` or `--all` was given
    pub fn has_target(&self) -> bool {
        self.book_id.is_some() || self.all
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            dry_run: self.dry_run,
            force: self.force,
            thumbnails: self.thumbnails.into(),
        }
    }

    /// Apply flag overrides on top of the environment configuration
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(path) = &self.library_path {
            config.library_path = expand_home(path);
        }
        if let Some(path) = &self.app_db {
            config.app_db_path = Some(expand_home(path));
        }
        if let Some(path) = &self.cache_dir {
            config.cache_dir = Some(expand_home(path));
        }

        let s3 = &self.s3;
        if let Some(bucket) = &s3.s3_bucket {
            config.s3.bucket = bucket.clone();
        }
        if let Some(region) = &s3.s3_region {
            config.s3.region = region.clone();
        }
        if let Some(key) = &s3.s3_access_key {
            config.s3.access_key = Some(key.clone());
        }
        if let Some(secret) = &s3.s3_secret_key {
            config.s3.secret_key = Some(secret.clone());
        }
        if let Some(endpoint) = &s3.s3_endpoint {
            config.s3.endpoint_url = Some(endpoint.clone());
        }
        if let Some(cdn) = &s3.s3_cdn_url {
            config.s3.cdn_url = Some(cdn.clone());
        }
        config
    }
}

/// Thumbnail cache directory when thumbnails come from the cache
pub fn thumbnail_cache_dir(config: &Config, source: ThumbnailSource) -> Option<PathBuf> {
    match source {
        ThumbnailSource::Cache => config.cache_dir.clone(),
        _ => None,
    }
}
