//! Artifact storage.
//!
//! Rendered crops are persisted through the [`ArtifactStore`] trait so the
//! resolution pipeline is the same whatever the storage strategy. Three
//! implementations exist, chosen by `store.backend` in the config:
//!
//! | Backend | Type | Payload after `put` | Served as |
//! |---|---|---|---|
//! | `memory` | [`MemoryStore`] | inline bytes | `200 image/jpeg` |
//! | `filesystem` | [`FsStore`] | blob path on disk | `200 image/jpeg` |
//! | `redirect` | [`RedirectStore`] | blob path on disk | `301` to a public URL |
//!
//! ## Contract
//!
//! - `get` returns `Ok(None)` for a miss. Errors are reported, and the
//!   coordinator treats them as a miss too.
//! - `put` may be called concurrently for the same key. All writers of a
//!   key hold identical bytes, so last-write-wins is fine.
//! - Artifacts are never mutated after creation and never deleted here.

mod fs;
mod memory;
mod redirect;

pub use self::fs::FsStore;
pub use memory::MemoryStore;
pub use redirect::RedirectStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::key::CacheKey;
use crate::request::ImageRequest;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("Store is full ({0} entries)")]
    Full(usize),
    #[error("Store configuration error: {0}")]
    Config(String),
}

/// The encoded JPEG, either held in memory or stored externally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Inline(Vec<u8>),
    Blob(PathBuf),
}

/// A persisted rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub key: CacheKey,
    pub source_url: Url,
    pub width: u32,
    pub height: u32,
    pub payload: Payload,
    pub fetched_at: SystemTime,
}

impl CachedArtifact {
    /// A freshly rendered artifact for `request`, holding its bytes inline.
    pub fn rendered(request: &ImageRequest, jpeg: Vec<u8>) -> Self {
        Self {
            key: request.cache_key(),
            source_url: request.source_url.clone(),
            width: request.width,
            height: request.height,
            payload: Payload::Inline(jpeg),
            fetched_at: SystemTime::now(),
        }
    }

    /// The JPEG bytes, reading the blob if the payload is external.
    pub fn load_bytes(&self) -> Result<Vec<u8>, StoreError> {
        match &self.payload {
            Payload::Inline(bytes) => Ok(bytes.clone()),
            Payload::Blob(path) => Ok(std::fs::read(path)?),
        }
    }
}

/// Key-value persistence for rendered crops.
pub trait ArtifactStore: Send + Sync {
    /// Look up an artifact. `Ok(None)` is a miss.
    fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError>;

    /// Persist an artifact and return it in its stored form.
    fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError>;

    /// Public URL for a stored artifact, when this store serves by redirect.
    fn url_for(&self, _artifact: &CachedArtifact) -> Option<Url> {
        None
    }
}

impl<T: ArtifactStore + ?Sized> ArtifactStore for Arc<T> {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError> {
        (**self).put(artifact)
    }

    fn url_for(&self, artifact: &CachedArtifact) -> Option<Url> {
        (**self).url_for(artifact)
    }
}

/// Open the store selected by configuration.
pub fn open(config: &StoreConfig) -> Result<Box<dyn ArtifactStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new(config.max_entries))),
        StoreBackend::Filesystem => Ok(Box::new(FsStore::open(&config.dir)?)),
        StoreBackend::Redirect => {
            let base = Url::parse(&config.public_base_url)
                .map_err(|e| StoreError::Config(format!("store.public_base_url: {e}")))?;
            Ok(Box::new(RedirectStore::new(FsStore::open(&config.dir)?, base)))
        }
    }
}
