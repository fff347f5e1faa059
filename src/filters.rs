//! Template filters for rendering book metadata
//!
//! Plain functions so any template engine can register them. Route-building
//! filters take a [`CoverRoutes`] or [`RouteContext`] describing where the
//! page is mounted.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};
use tracing::debug;
use uuid::Uuid;

use crate::db::{Book, BookFormat, CoverResolution, Series};
use crate::services::covers::CoverUrlResolver;

/// Book formats treated as audio
pub const EXTENSIONS_AUDIO: &[&str] = &["mp3", "mp4", "ogg", "opus", "wav", "flac", "m4a", "m4b"];

/// Default `strftime` pattern
pub const DEFAULT_TIME_FORMAT: &str = "%d %m %Y - %H:%S";

/// Total characters after which [`shortentitle`] stops adding words
const SHORTEN_TOTAL_LIMIT: usize = 60;

// ============================================================================
// Routes
// ============================================================================

/// Cover image routes of the web app
#[derive(Debug, Clone, Default)]
pub struct CoverRoutes {
    script_root: String,
}

impl CoverRoutes {
    /// `script_root` is the prefix the app is mounted under (may be empty)
    pub fn new(script_root: impl Into<String>) -> Self {
        Self {
            script_root: script_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn cover(&self, book_id: i64, resolution: CoverResolution, cache_key: &str) -> String {
        format!(
            "{}/cover/{}/{}?c={}",
            self.script_root,
            book_id,
            resolution.short_name(),
            urlencoding::encode(cache_key)
        )
    }

    pub fn series_cover(&self, series_id: i64, resolution: CoverResolution, cache_key: &str) -> String {
        format!(
            "{}/series_cover/{}/{}?c={}",
            self.script_root,
            series_id,
            resolution.short_name(),
            urlencoding::encode(cache_key)
        )
    }
}

/// The route of the page being rendered: a path template with `{name}`
/// placeholders, the values bound to them, and the query string.
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub template: String,
    pub view_args: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
}

impl RouteContext {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.view_args.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Build a URL from the template. Arguments without a placeholder are
    /// appended as query parameters in name order.
    pub fn build(&self, args: &BTreeMap<String, String>) -> String {
        let mut path = self.template.clone();
        let mut extra = url::form_urlencoded::Serializer::new(String::new());
        let mut has_extra = false;

        for (name, value) in args {
            let placeholder = format!("{{{}}}", name);
            if path.contains(&placeholder) {
                path = path.replace(&placeholder, &urlencoding::encode(value));
            } else {
                extra.append_pair(name, value);
                has_extra = true;
            }
        }

        if has_extra {
            format!("{}?{}", path, extra.finish())
        } else {
            path
        }
    }
}

/// URL of the current page with another page number.
/// Query arguments are carried over; `page` always takes the new value.
pub fn url_for_other_page(route: &RouteContext, page: u32) -> String {
    let mut args = route.view_args.clone();
    for (name, value) in &route.query {
        args.insert(name.clone(), value.clone());
    }
    args.insert("page".to_string(), page.to_string());
    route.build(&args)
}

// ============================================================================
// Text
// ============================================================================

/// Shorten a title word by word.
///
/// Words longer than `nchar` are cut to `nchar - 3` characters plus `[..]`;
/// once 60 characters have been used the rest is replaced by `...`.
pub fn shortentitle(title: &str, nchar: usize) -> String {
    let mut result = String::new();
    let mut used = 0usize;

    for word in title.split_whitespace() {
        if used >= SHORTEN_TOTAL_LIMIT {
            result.push_str("...");
            break;
        }
        let len = word.chars().count();
        if len > nchar {
            result.extend(word.chars().take(nchar.saturating_sub(3)));
            result.push_str("[..] ");
            used += nchar + 3;
        } else {
            result.push_str(word);
            result.push(' ');
            used += len + 1;
        }
    }

    result.trim().to_string()
}

/// [`shortentitle`] with the default word limit of 20
pub fn shortentitle_default(title: &str) -> String {
    shortentitle(title, 20)
}

/// MIME type for a file extension
pub fn mimetype(extension: &str) -> String {
    mime_guess::from_ext(extension.trim_start_matches('.'))
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// `<a href='url'>text</a>` with the link text HTML-escaped
pub fn escapedlink(url: &str, text: &str) -> String {
    format!("<a href='{}'>{}</a>", url, html_escape::encode_quoted_attribute(text))
}

pub fn yesno<T>(value: bool, yes: T, no: T) -> T {
    if value { yes } else { no }
}

/// Fresh random identifier, e.g. for element ids
pub fn uuidfilter() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Numbers and dates
// ============================================================================

/// Format with `decimals` places, dropping an all-zero fraction
/// (`2.0` -> `2`, `2.5` -> `2.5`)
pub fn formatfloat(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value);
    let zero_fraction = format!(".{}", "0".repeat(decimals));
    if formatted.ends_with(&zero_fraction) {
        formatted.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        formatted
    }
}

/// [`formatfloat`] for values stored as text (series indexes). Empty or
/// unparseable input is returned unchanged.
pub fn formatfloat_str(value: &str, decimals: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    match value.trim().parse::<f64>() {
        Ok(v) => formatfloat(v, decimals),
        Err(_) => value.to_string(),
    }
}

/// Medium English date, e.g. `Jan 5, 2024`
pub fn formatdate(date: NaiveDate) -> String {
    date.format("%b %-d, %Y").to_string()
}

/// `YYYY-MM-DD` for date inputs; Calibre's null date becomes empty
pub fn formatdateinput(date: NaiveDate) -> String {
    let formatted = date.format("%Y-%m-%d").to_string();
    if formatted == "0101-01-01" {
        String::new()
    } else {
        formatted
    }
}

/// Millisecond epoch rendered in local time with `fmt`
/// (default [`DEFAULT_TIME_FORMAT`]). Invalid input renders as empty.
pub fn strftime(epoch_millis: i64, fmt: Option<&str>) -> String {
    let Some(date) = Local.timestamp_millis_opt(epoch_millis).single() else {
        return String::new();
    };
    let items = StrftimeItems::new(fmt.unwrap_or(DEFAULT_TIME_FORMAT));
    if items.clone().any(|item| matches!(item, Item::Error)) {
        debug!(format = ?fmt, "Invalid strftime pattern");
        return String::new();
    }
    let mut out = String::new();
    if write!(out, "{}", date.format_with_items(items)).is_err() {
        debug!(format = ?fmt, "Unformattable strftime pattern");
        return String::new();
    }
    out
}

/// Granularity of [`cache_timestamp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollingPeriod {
    Day,
    #[default]
    Month,
    Year,
}

impl FromStr for RollingPeriod {
    type Err = std::convert::Infallible;

    /// Anything other than `day` or `year` rolls monthly
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "day" => RollingPeriod::Day,
            "year" => RollingPeriod::Year,
            _ => RollingPeriod::Month,
        })
    }
}

/// Unix seconds of the start of the current day, month or year.
/// Stable within the period so it can bust caches.
pub fn cache_timestamp(period: RollingPeriod, now: DateTime<Local>) -> String {
    let today = now.date_naive();
    let start = match period {
        RollingPeriod::Day => today,
        RollingPeriod::Month => today.with_day(1).unwrap_or(today),
        RollingPeriod::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
    };
    let midnight = start.and_hms_opt(0, 0, 0).unwrap_or_default();
    let timestamp = Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| midnight.and_utc().timestamp());
    timestamp.to_string()
}

/// Book last-modified time in unix seconds
pub fn last_modified(book: &Book) -> String {
    book.last_modified.timestamp().to_string()
}

// ============================================================================
// Covers and formats
// ============================================================================

/// `srcset` of a book cover's thumbnails, keyed by last modification
pub fn get_cover_srcset(book: &Book, routes: &CoverRoutes) -> String {
    let cache_key = last_modified(book);
    CoverResolution::THUMBNAILS
        .iter()
        .map(|&r| format!("{} {}x", routes.cover(book.id, r, &cache_key), r.constant()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `srcset` of a series cover's thumbnails, keyed by the monthly timestamp
pub fn get_series_srcset(series: &Series, routes: &CoverRoutes, now: DateTime<Local>) -> String {
    let cache_key = cache_timestamp(RollingPeriod::Month, now);
    CoverResolution::THUMBNAILS
        .iter()
        .map(|&r| format!("{} {}x", routes.series_cover(series.id, r, &cache_key), r.constant()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether any of the formats is audio
pub fn music(formats: &[BookFormat]) -> bool {
    formats
        .iter()
        .any(|f| EXTENSIONS_AUDIO.contains(&f.format.to_lowercase().as_str()))
}

/// Direct object-storage URL of a book cover, `None` when not uploaded.
/// `resolution` is a short name; `og` is the original. Lookup errors are
/// logged and yield `None`.
pub async fn get_s3_cover_url(
    resolver: &CoverUrlResolver,
    book: &Book,
    resolution: &str,
) -> Option<String> {
    let resolution = match CoverResolution::from_short_name(resolution) {
        Ok(r) => r,
        Err(e) => {
            debug!(book_id = book.id, error = %e, "Error getting S3 URL");
            return None;
        }
    };

    match resolver.cover_url(book.id, resolution).await {
        Ok(url) => url,
        Err(e) => {
            debug!(book_id = book.id, error = %e, "Error getting S3 URL");
            None
        }
    }
}
