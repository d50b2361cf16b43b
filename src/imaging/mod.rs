//! Image processing: the resize/crop engine.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions` |
//! | **Center crop** | `crop_imm` of the centered cover window |
//! | **Resize** | Lanczos3 via `resize_exact` to the exact box |
//! | **Encode** | JPEG, quality 95 by default |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for crop geometry (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{Dimensions, ImageBackend, TransformError};
pub use calculations::{
    calculate_cover_dimensions, calculate_crop_offset, calculate_source_window,
};
pub use params::{CropParams, Quality};
pub use rust_backend::RustBackend;

/// Center-crop `raw` to exactly `width x height` and encode as JPEG.
///
/// Convenience entry point over [`RustBackend`] with the default quality.
pub fn transform(raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, TransformError> {
    RustBackend::new().center_crop(raw, &CropParams::new(width, height))
}
