//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every backend must
//! support: identify and center_crop. Both work on in-memory encoded bytes,
//! since sources arrive from origin responses rather than files.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate and statically linked into the binary.

use super::params::CropParams;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Failed to decode source image: {0}")]
    Decode(String),
    #[error("Failed to encode JPEG: {0}")]
    Encode(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// `Send + Sync` so one backend instance can be shared by every request
/// thread behind the coordinator.
pub trait ImageBackend: Send + Sync {
    /// Get the pixel dimensions of an encoded image.
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, TransformError>;

    /// Cover-resize, center-crop to `params.width x params.height` and
    /// encode as JPEG.
    fn center_crop(&self, bytes: &[u8], params: &CropParams) -> Result<Vec<u8>, TransformError>;
}

impl<T: ImageBackend + ?Sized> ImageBackend for Arc<T> {
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, TransformError> {
        (**self).identify(bytes)
    }

    fn center_crop(&self, bytes: &[u8], params: &CropParams) -> Result<Vec<u8>, TransformError> {
        (**self).center_crop(bytes, params)
    }
}
