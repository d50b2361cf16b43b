//! In-process store holding JPEG bytes inline.

use super::{ArtifactStore, CachedArtifact, StoreError};
use crate::key::CacheKey;
use std::collections::HashMap;
use std::sync::RwLock;

/// Inline-bytes store backed by a `RwLock<HashMap>`.
///
/// With `max_entries` set, new keys are refused once the map is full;
/// existing keys can still be overwritten. Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, CachedArtifact>>,
    max_entries: Option<usize>,
}

impl MemoryStore {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other("memory store lock poisoned"))
}

impl ArtifactStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if let Some(max) = self.max_entries
            && entries.len() >= max
            && !entries.contains_key(&artifact.key)
        {
            return Err(StoreError::Full(max));
        }
        entries.insert(artifact.key.clone(), artifact.clone());
        Ok(artifact)
    }
}
