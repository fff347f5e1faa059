//! Covershelf binary: bulk upload of Calibre covers to object storage

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use covershelf::cli::{Cli, LogFormat, thumbnail_cache_dir};
use covershelf::config::Config;
use covershelf::db::{CalibreLibrary, Database};
use covershelf::services::{
    BulkUploader, CoverStorage, ObjectStore, S3ObjectStore, StorageError, ThumbnailSource,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if !cli.has_target() {
        let _ = Cli::command().print_help();
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "covershelf=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Returns whether the run succeeded
async fn run(cli: Cli) -> Result<bool> {
    let config = cli.apply(Config::from_env());
    let options = cli.upload_options();
    config.s3.validate()?;

    let library = CalibreLibrary::open(&config.library_path).await?;
    info!(path = %config.library_path.display(), "Opened Calibre library");

    let app_db_path = config.resolve_app_db_path();
    let db = if options.dry_run {
        Database::connect_read_only(&app_db_path).await?
    } else {
        Database::connect(&app_db_path)
            .await
            .with_context(|| format!("Failed to open application database {}", app_db_path.display()))?
    };
    info!(path = %app_db_path.display(), "Using application database");

    let store = S3ObjectStore::new(&config.s3)
        .await
        .context("Failed to create S3 client")?;
    if options.dry_run {
        info!("DRY RUN: nothing will be uploaded");
    } else {
        check_bucket(&store).await?;
    }

    let covers = CoverStorage::new(Arc::new(store), db.cover_uploads(), config.s3.key_prefix.clone());
    let thumbnail_cache = thumbnail_cache_dir(&config, options.thumbnails).map(|dir| db.thumbnails(dir));
    if options.thumbnails == ThumbnailSource::Cache && thumbnail_cache.is_none() {
        warn!("No cache directory configured, thumbnails will not be uploaded");
    }

    let uploader = BulkUploader::new(library, covers, thumbnail_cache, options);
    let succeeded = match cli.book_id {
        Some(book_id) => uploader.run_single(book_id).await?,
        None => uploader.run_all().await?.is_success(),
    };

    db.close().await;
    Ok(succeeded)
}

async fn check_bucket(store: &S3ObjectStore) -> Result<()> {
    match store.head_bucket().await {
        Ok(()) => {
            info!(bucket = %store.bucket(), "Connected to S3 bucket");
            Ok(())
        }
        Err(StorageError::BucketNotFound(bucket)) => bail!("S3 bucket '{}' does not exist", bucket),
        Err(StorageError::AccessDenied(bucket)) => {
            bail!("Access denied to S3 bucket '{}', check your credentials", bucket)
        }
        Err(e) => Err(e).context("Cannot access S3 bucket"),
    }
}
