//! Cover storage services

pub mod covers;
pub mod object_storage;
pub mod thumbnails;
pub mod uploader;

pub use covers::{
    COVER_CACHE_CONTROL, CoverError, CoverStorage, CoverUrlResolver, UploadOutcome, cover_key,
    public_url,
};
pub use object_storage::{
    MemoryObjectStore, ObjectStore, PutOutcome, S3ObjectStore, StorageError, StorageResult,
};
pub use thumbnails::{generate_thumbnail, generate_thumbnails};
pub use uploader::{BookReport, BulkSummary, BulkUploader, ThumbnailSource, UploadOptions};
