//! Store that serves renditions by redirecting to a CDN.
//!
//! Bytes are persisted by an inner [`FsStore`] whose directory is published
//! under `public_base_url` (a bucket sync, a static file server, a CDN
//! origin). The proxy then answers hits with a `301` to the public copy
//! instead of streaming bytes itself.

use super::{ArtifactStore, CachedArtifact, FsStore, Payload, StoreError};
use crate::key::CacheKey;
use url::Url;

#[derive(Debug)]
pub struct RedirectStore {
    inner: FsStore,
    public_base: Url,
}

impl RedirectStore {
    pub fn new(inner: FsStore, mut public_base: Url) -> Self {
        // `Url::join` replaces the last segment unless the base ends in '/'.
        if !public_base.path().ends_with('/') {
            let path = format!("{}/", public_base.path());
            public_base.set_path(&path);
        }
        Self { inner, public_base }
    }
}

impl ArtifactStore for RedirectStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError> {
        self.inner.put(artifact)
    }

    /// Only stored blobs have a public copy; inline bytes are served directly.
    fn url_for(&self, artifact: &CachedArtifact) -> Option<Url> {
        match artifact.payload {
            Payload::Blob(_) => self
                .public_base
                .join(&FsStore::relative_blob_path(&artifact.key))
                .ok(),
            Payload::Inline(_) => None,
        }
    }
}
