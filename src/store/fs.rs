//! On-disk blob store.
//!
//! Each artifact is two files, sharded by the first two hex characters of
//! its key:
//!
//! ```text
//! <dir>/
//! └── 3f/
//!     ├── 3fa9…c2.jpg    # the rendered JPEG
//!     └── 3fa9…c2.json   # record: source URL, size, fetch time
//! ```
//!
//! The record is written after the blob, so a record on disk means the
//! blob was complete when it was written. A hit still requires the blob to
//! exist (it may have been cleaned up externally). Records from another
//! format version read as a miss rather than an error, so bumping
//! [`RECORD_VERSION`] invalidates everything without a migration.
//!
//! Both files are written to a unique temp name and renamed into place.
//! Concurrent writers of one key race harmlessly: the bytes are identical.

use super::{ArtifactStore, CachedArtifact, Payload, StoreError};
use crate::key::CacheKey;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;
use url::Url;

/// Version of the on-disk record format.
const RECORD_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ArtifactRecord {
    version: u32,
    key: String,
    source_url: String,
    width: u32,
    height: u32,
    /// Seconds since the Unix epoch.
    fetched_at: u64,
}

/// Blob-reference store rooted at a directory.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Path of the JPEG blob for `key`, relative to the store root.
    pub fn relative_blob_path(key: &CacheKey) -> String {
        format!("{}/{}.jpg", key.shard(), key)
    }

    pub fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(Self::relative_blob_path(key))
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.shard()).join(format!("{key}.json"))
    }

    /// Write `contents` to `dest` via a uniquely named temp file + rename.
    fn write_atomic(&self, dest: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let file_name = dest
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("artifact");
        let tmp = dest.with_file_name(format!(".{file_name}.{}.{n}.tmp", std::process::id()));
        std::fs::write(&tmp, contents)?;
        if let Err(e) = std::fs::rename(&tmp, dest) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn to_unix(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl ArtifactStore for FsStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError> {
        let content = match std::fs::read_to_string(self.record_path(key)) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: ArtifactRecord = serde_json::from_str(&content)?;
        if record.version != RECORD_VERSION {
            debug!(%key, version = record.version, "ignoring record from another version");
            return Ok(None);
        }
        let corrupt = |reason: String| StoreError::Corrupt {
            key: key.to_string(),
            reason,
        };
        if CacheKey::from_hex(&record.key).as_ref() != Some(key) {
            return Err(corrupt(format!("record names key {}", record.key)));
        }
        let source_url = Url::parse(&record.source_url).map_err(|e| corrupt(e.to_string()))?;

        let blob = self.blob_path(key);
        if !blob.exists() {
            debug!(%key, "record without blob, treating as miss");
            return Ok(None);
        }

        Ok(Some(CachedArtifact {
            key: key.clone(),
            source_url,
            width: record.width,
            height: record.height,
            payload: Payload::Blob(blob),
            fetched_at: UNIX_EPOCH + Duration::from_secs(record.fetched_at),
        }))
    }

    fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError> {
        let blob = self.blob_path(&artifact.key);
        if let Some(dir) = blob.parent() {
            std::fs::create_dir_all(dir)?;
        }

        match &artifact.payload {
            Payload::Inline(bytes) => self.write_atomic(&blob, bytes)?,
            Payload::Blob(path) if *path != blob => {
                let bytes = std::fs::read(path)?;
                self.write_atomic(&blob, &bytes)?;
            }
            Payload::Blob(_) => {}
        }

        let record = ArtifactRecord {
            version: RECORD_VERSION,
            key: artifact.key.to_string(),
            source_url: artifact.source_url.to_string(),
            width: artifact.width,
            height: artifact.height,
            fetched_at: to_unix(artifact.fetched_at),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        self.write_atomic(&self.record_path(&artifact.key), &json)?;

        Ok(CachedArtifact {
            payload: Payload::Blob(blob),
            ..artifact
        })
    }
}
