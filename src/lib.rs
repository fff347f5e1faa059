//! Covershelf: Calibre book covers on object storage
//!
//! Uploads covers and their thumbnails to an S3-compatible bucket, tracks
//! what was sent in the application database, and resolves public URLs for
//! templates.

pub mod cli;
pub mod config;
pub mod db;
pub mod filters;
pub mod services;

pub use config::Config;
pub use db::Database;
