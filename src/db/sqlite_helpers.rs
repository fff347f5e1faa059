//! SQLite helper utilities for type conversion
//!
//! Calibre and the application database store timestamps as TEXT in a few
//! different shapes; booleans are 0/1 integers.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Get current UTC timestamp as ISO8601 string for SQLite
#[inline]
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

/// Convert a chrono DateTime to ISO8601 string
#[inline]
pub fn datetime_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339, Calibre's `YYYY-MM-DD HH:MM:SS.ffffff+00:00`, and
/// SQLite's `datetime()` output (`YYYY-MM-DD HH:MM:SS[.fff]`, taken as UTC).
pub fn str_to_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| anyhow!("Invalid datetime '{}': {}", s, e))
}

/// Parse an optional datetime string
#[inline]
pub fn str_to_datetime_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(s) if !s.is_empty() => Ok(Some(str_to_datetime(s)?)),
        _ => Ok(None),
    }
}

// ============================================================================
// Boolean Helpers (SQLite uses 0/1 integers)
// ============================================================================

/// Convert SQLite integer to bool
#[inline]
pub fn int_to_bool(i: i64) -> bool {
    i != 0
}
