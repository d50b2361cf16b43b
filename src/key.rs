//! Cache keys for renditions.
//!
//! A rendition is identified by the normalized source URL plus the requested
//! box. The key is a SHA-256 fingerprint of those three values, hex encoded,
//! so it is safe to use as a file name and as a map key.
//!
//! The hash input is domain-separated the same way encoding parameters are
//! hashed elsewhere in the ecosystem: a fixed tag, NUL-terminated string
//! fields, then little-endian integers. The NUL after the URL keeps
//! `("a", 12, 3)` and `("a1", 2, 3)` apart.

use crate::request::ImageRequest;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Stable identity of one rendition: `sha256(url, width, height)` in hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix used to spread blobs across directories.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }

    /// Rebuild a key from its hex form (e.g. a stored record).
    ///
    /// Returns `None` unless the input is 64 lowercase hex characters.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a normalized source URL and target box.
///
/// Pure: the same inputs always give the same key.
pub fn derive_key(source_url: &Url, width: u32, height: u32) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(b"crop\0");
    hasher.update(source_url.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(width.to_le_bytes());
    hasher.update(height.to_le_bytes());
    CacheKey(format!("{:x}", hasher.finalize()))
}

impl ImageRequest {
    /// The cache key for this request.
    pub fn cache_key(&self) -> CacheKey {
        derive_key(&self.source_url, self.width, self.height)
    }
}
