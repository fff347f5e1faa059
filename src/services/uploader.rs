//! Bulk cover upload: walks a Calibre library and sends covers through
//! [`CoverStorage`]
//!
//! A flat loop with a duplicate check and counters. Failures are logged and
//! counted; the run carries on with the next cover.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use super::covers::{CoverError, CoverStorage, UploadOutcome};
use super::thumbnails::generate_thumbnails;
use crate::db::{Book, CalibreLibrary, CoverResolution, ThumbnailCache};

/// Books between progress log lines during a bulk run
const PROGRESS_INTERVAL: usize = 10;

/// Where thumbnail files come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThumbnailSource {
    /// Render sm/md/lg from the full cover
    #[default]
    Generate,
    /// Use thumbnails already rendered by the web app
    Cache,
    /// Upload the original cover only
    None,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    pub dry_run: bool,
    pub force: bool,
    pub thumbnails: ThumbnailSource,
}

/// Per-book result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookReport {
    pub book_id: i64,
    /// Variants that needed uploading. Thumbnails that could not be
    /// rendered are not counted.
    pub planned: usize,
    pub uploaded: usize,
    pub failed: usize,
}

impl BookReport {
    fn new(book_id: i64) -> Self {
        Self {
            book_id,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Every variant was already tracked
    pub fn nothing_to_do(&self) -> bool {
        self.planned == 0
    }
}

/// Totals of a bulk run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub total: usize,
    /// Books with at least one variant uploaded (or planned, in a dry run)
    pub uploaded: usize,
    /// Books with nothing left to upload
    pub skipped: usize,
    /// Books with at least one failed upload
    pub failed: usize,
    /// Books whose cover file is missing from the library
    pub missing: usize,
}

impl BulkSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.missing == 0
    }
}

/// A variant waiting to be uploaded
struct PendingUpload {
    resolution: CoverResolution,
    source: PendingSource,
}

enum PendingSource {
    File(PathBuf),
    /// Rendered from the full cover right before upload
    Render,
}

pub struct BulkUploader {
    library: CalibreLibrary,
    covers: CoverStorage,
    thumbnail_cache: Option<ThumbnailCache>,
    options: UploadOptions,
}

impl BulkUploader {
    pub fn new(
        library: CalibreLibrary,
        covers: CoverStorage,
        thumbnail_cache: Option<ThumbnailCache>,
        options: UploadOptions,
    ) -> Self {
        Self {
            library,
            covers,
            thumbnail_cache,
            options,
        }
    }

    pub fn covers(&self) -> &CoverStorage {
        &self.covers
    }

    /// Upload covers for one book. Returns whether every attempted upload
    /// succeeded; a book without a cover counts as success.
    pub async fn run_single(&self, book_id: i64) -> Result<bool> {
        info!(book_id, "Uploading covers for book");

        let Some(book) = self.library.get_book(book_id).await? else {
            bail!("Book with ID {} not found", book_id);
        };
        if !book.has_cover {
            warn!(book_id, "Book has no cover");
            return Ok(true);
        }

        let cover_path = self.library.cover_path(&book);
        if !cover_path.exists() {
            bail!("Cover file not found: {}", cover_path.display());
        }

        info!(book_id, title = %book.title, "Processing book");
        let report = self.upload_book(&book, cover_path).await?;
        info!(
            book_id,
            uploaded = report.uploaded,
            planned = report.planned,
            "Uploaded {}/{} covers for book",
            report.uploaded,
            report.planned
        );
        Ok(report.succeeded())
    }

    /// Upload covers for every book flagged as having one
    pub async fn run_all(&self) -> Result<BulkSummary> {
        info!("Starting bulk upload of all covers");
        let books = self.library.books_with_covers().await?;
        info!(count = books.len(), "Found books with covers");

        let mut summary = BulkSummary {
            total: books.len(),
            ..Default::default()
        };
        let mut processed = 0usize;

        for (index, book) in books.iter().enumerate() {
            let cover_path = self.library.cover_path(book);
            if !cover_path.exists() {
                warn!(book_id = book.id, path = %cover_path.display(), "Cover file not found");
                summary.missing += 1;
                continue;
            }

            debug!(book_id = book.id, title = %book.title, "[{}/{}] Processing book", index + 1, books.len());
            match self.upload_book(book, cover_path).await {
                Ok(report) if report.nothing_to_do() => {
                    debug!(book_id = book.id, "Skipping book, already uploaded");
                    summary.skipped += 1;
                }
                Ok(report) if !report.succeeded() => summary.failed += 1,
                Ok(_) => summary.uploaded += 1,
                Err(e) => {
                    error!(book_id = book.id, error = %e, "Failed to process book");
                    summary.failed += 1;
                }
            }

            processed += 1;
            if processed % PROGRESS_INTERVAL == 0 {
                info!("Progress: {}/{} books processed", processed, books.len());
            }
        }

        if self.options.dry_run {
            info!(
                books = summary.uploaded,
                skipped = summary.skipped,
                missing = summary.missing,
                "DRY RUN complete"
            );
        } else {
            info!(
                uploaded = summary.uploaded,
                skipped = summary.skipped,
                failed = summary.failed,
                missing = summary.missing,
                "Bulk upload complete"
            );
        }
        Ok(summary)
    }

    /// Work out which variants of a book still need uploading
    async fn pending_uploads(&self, book: &Book, cover_path: &Path) -> Result<Vec<PendingUpload>> {
        let force = self.options.force;
        let mut pending = Vec::new();

        if force || self.covers.is_cover_uploaded(book.id, CoverResolution::Original).await?.is_none() {
            pending.push(PendingUpload {
                resolution: CoverResolution::Original,
                source: PendingSource::File(cover_path.to_path_buf()),
            });
        }

        if self.options.thumbnails == ThumbnailSource::None {
            return Ok(pending);
        }

        for resolution in CoverResolution::THUMBNAILS {
            if !force && self.covers.is_cover_uploaded(book.id, resolution).await?.is_some() {
                continue;
            }
            let source = match self.options.thumbnails {
                ThumbnailSource::Generate => PendingSource::Render,
                ThumbnailSource::Cache => {
                    let cached = match &self.thumbnail_cache {
                        Some(cache) => cache.find(book.id, resolution).await?,
                        None => None,
                    };
                    match cached {
                        Some(path) => PendingSource::File(path),
                        None => {
                            debug!(book_id = book.id, resolution = %resolution, "No cached thumbnail");
                            continue;
                        }
                    }
                }
                ThumbnailSource::None => continue,
            };
            pending.push(PendingUpload { resolution, source });
        }

        Ok(pending)
    }

    /// Upload the pending variants of one book
    async fn upload_book(&self, book: &Book, cover_path: PathBuf) -> Result<BookReport> {
        let mut report = BookReport::new(book.id);
        let pending = self.pending_uploads(book, &cover_path).await?;
        report.planned = pending.len();

        if pending.is_empty() {
            return Ok(report);
        }

        if self.options.dry_run {
            for item in &pending {
                let path = match &item.source {
                    PendingSource::File(path) => path.clone(),
                    PendingSource::Render => cover_path.clone(),
                };
                let key = self.covers.key_for(book.id, item.resolution, &path);
                info!(
                    book_id = book.id,
                    resolution = %item.resolution,
                    "[DRY RUN] Would upload: {} -> s3://{}/{}",
                    path.display(),
                    self.covers.store().bucket(),
                    key
                );
            }
            return Ok(report);
        }

        let to_render: Vec<CoverResolution> = pending
            .iter()
            .filter(|p| matches!(p.source, PendingSource::Render))
            .map(|p| p.resolution)
            .collect();

        // keep the directory alive until the rendered files are uploaded
        let render_dir = tempfile::tempdir().context("Failed to create thumbnail directory")?;
        let rendered = if to_render.is_empty() {
            Vec::new()
        } else {
            let src = cover_path.clone();
            let dir = render_dir.path().to_path_buf();
            let book_id = book.id;
            tokio::task::spawn_blocking(move || generate_thumbnails(&src, book_id, &to_render, &dir))
                .await
                .context("Thumbnail generation task failed")?
        };

        for item in pending {
            let path = match item.source {
                PendingSource::File(path) => path,
                PendingSource::Render => {
                    match rendered.iter().find(|(r, _)| *r == item.resolution) {
                        Some((_, path)) => path.clone(),
                        // render failure was already logged; the size is left out
                        None => {
                            report.planned -= 1;
                            continue;
                        }
                    }
                }
            };

            match self
                .covers
                .upload_cover(book.id, &path, item.resolution, self.options.force)
                .await
            {
                Ok(UploadOutcome::Uploaded(_)) => report.uploaded += 1,
                Ok(UploadOutcome::AlreadyUploaded(_)) => {}
                Err(e) => {
                    log_upload_error(book.id, item.resolution, &e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

fn log_upload_error(book_id: i64, resolution: CoverResolution, err: &CoverError) {
    match err {
        CoverError::Missing(path) => {
            warn!(book_id, resolution = %resolution, path = %path.display(), "Cover file not found")
        }
        other => error!(
            book_id,
            resolution = %resolution,
            error = %other,
            "Failed to upload {}",
            resolution.label()
        ),
    }
}
