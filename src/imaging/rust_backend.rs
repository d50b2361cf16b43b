//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP, TIFF, BMP) | `image::ImageReader` with format sniffing |
//! | Crop | `image::DynamicImage::crop_imm` of the centered source window |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//!
//! The geometry comes from [`calculations`](super::calculations), not from
//! `resize_to_fill`, so the scale rule and the odd-margin bias are explicit.
//! Cropping happens first, in source pixels, so a thin strip asked into a
//! large box never allocates its full cover-scaled size.

use super::backend::{Dimensions, ImageBackend, TransformError};
use super::calculations::calculate_source_window;
use super::params::{CropParams, Quality};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, TransformError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(e.to_string()))
}

/// Decode an image from memory, sniffing the format from its magic bytes.
fn load_image(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    reader(bytes)?
        .decode()
        .map_err(|e| TransformError::Decode(e.to_string()))
}

/// Crop the centered cover window, then resize it to `width x height`.
fn cover_crop(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (x, y, w, h) = calculate_source_window((img.width(), img.height()), (width, height));
    let window = img.crop_imm(x, y, w, h);
    if (w, h) == (width, height) {
        window
    } else {
        window.resize_exact(width, height, FilterType::Lanczos3)
    }
}

/// Encode as baseline JPEG. Alpha and 16-bit channels are flattened to RGB8
/// because the JPEG encoder rejects them.
fn encode_jpeg(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, TransformError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.value());
    rgb.write_with_encoder(encoder)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(out)
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, TransformError> {
        let (width, height) = reader(bytes)?
            .into_dimensions()
            .map_err(|e| TransformError::Decode(e.to_string()))?;
        Ok(Dimensions { width, height })
    }

    fn center_crop(&self, bytes: &[u8], params: &CropParams) -> Result<Vec<u8>, TransformError> {
        let img = load_image(bytes)?;
        if img.width() == 0 || img.height() == 0 {
            return Err(TransformError::Decode("source image has no pixels".into()));
        }
        let cropped = cover_crop(&img, params.width, params.height);
        encode_jpeg(&cropped, params.quality)
    }
}
