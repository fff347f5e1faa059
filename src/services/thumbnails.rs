//! Thumbnail generation for cover uploads

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::{debug, warn};

use crate::db::CoverResolution;

/// JPEG quality used for generated thumbnails
pub const THUMBNAIL_QUALITY: u8 = 85;

/// Render `src` so it fits inside `bound x bound` and write it to `dest` as
/// JPEG. Aspect ratio is kept and images are never enlarged.
pub fn generate_thumbnail(src: &Path, bound: u32, dest: &Path) -> Result<()> {
    let img = image::open(src).with_context(|| format!("Failed to read {}", src.display()))?;

    let (width, height) = img.dimensions();
    let resized = if width > bound || height > bound {
        img.resize(bound, bound, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());

    let file = File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = BufWriter::new(file);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, THUMBNAIL_QUALITY))
        .with_context(|| format!("Failed to encode {}", dest.display()))?;

    Ok(())
}

/// Generate thumbnails of a cover into `dir`, one per requested resolution.
/// Sizes that fail are skipped with a warning.
pub fn generate_thumbnails(
    src: &Path,
    book_id: i64,
    resolutions: &[CoverResolution],
    dir: &Path,
) -> Vec<(CoverResolution, PathBuf)> {
    let mut generated = Vec::new();

    for &resolution in resolutions {
        let Some(bound) = resolution.thumbnail_bound() else {
            continue;
        };
        let dest = dir.join(format!("cover_{}_{}.jpg", resolution, book_id));
        match generate_thumbnail(src, bound, &dest) {
            Ok(()) => {
                debug!(book_id, resolution = %resolution, bound, "Generated thumbnail");
                generated.push((resolution, dest));
            }
            Err(e) => {
                warn!(book_id, resolution = %resolution, error = %e, "Skipped thumbnail");
            }
        }
    }

    generated
}
