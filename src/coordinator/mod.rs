//! Fetch-once resolution of crop requests.
//!
//! The coordinator turns an [`ImageRequest`] into a rendered JPEG,
//! touching the origin only when the store has nothing for the request's
//! key:
//!
//! ```text
//! lookup ──hit──────────────────────────────────────────▶ artifact
//!    │
//!   miss ─▶ join in-flight ─waiter─▶ wait for owner ─────▶ artifact / error
//!                │
//!              owner ─▶ fetch ─▶ center-crop ─▶ put ─────▶ artifact
//! ```
//!
//! ## Guarantees
//!
//! - A key with a stored artifact never reaches the origin again.
//! - Nothing is stored when the fetch or the transform fails, so the next
//!   request for the key starts over.
//! - A failed store write is logged and the freshly rendered bytes are
//!   still returned.
//! - A failing store read is logged and handled as a miss.
//! - Concurrent misses on one key share a single fetch + render, and so do
//!   concurrent re-renders of an unreadable stored blob.
//!
//! All methods block. The HTTP layer calls them from tokio's blocking pool.

mod failures;
mod in_flight;
mod stats;

pub use failures::FailurePolicy;
pub use stats::CacheStats;

use crate::imaging::{CropParams, ImageBackend, Quality, TransformError};
use crate::key::CacheKey;
use crate::origin::{FetchError, OriginFetcher};
use crate::request::ImageRequest;
use crate::store::{ArtifactStore, CachedArtifact};
use failures::FailureTracker;
use in_flight::{Flight, InFlightRegistry};
use stats::Counters;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Origin(#[from] FetchError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("{url} failed {failures} times in a row, not retrying yet")]
    Unavailable { url: String, failures: u32 },
    #[error("stored image for {key} is unreadable: {reason}")]
    Unreadable { key: String, reason: String },
    #[error("render was abandoned before completing")]
    Abandoned,
}

/// What the HTTP layer should send back for a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Servable {
    Jpeg(Vec<u8>),
    /// Permanent location of the stored rendition.
    Redirect(Url),
    /// The render failed; send the client to the source image instead.
    Source(Url),
}

pub struct Coordinator {
    store: Box<dyn ArtifactStore>,
    fetcher: Box<dyn OriginFetcher>,
    backend: Box<dyn ImageBackend>,
    quality: Quality,
    failures: FailureTracker,
    in_flight: InFlightRegistry,
    counters: Counters,
}

impl Coordinator {
    pub fn new(
        store: Box<dyn ArtifactStore>,
        fetcher: Box<dyn OriginFetcher>,
        backend: Box<dyn ImageBackend>,
    ) -> Self {
        Self {
            store,
            fetcher,
            backend,
            quality: Quality::default(),
            failures: FailureTracker::default(),
            in_flight: InFlightRegistry::default(),
            counters: Counters::default(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failures = FailureTracker::new(policy);
        self
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Return the stored artifact for `request`, rendering it on a miss.
    pub fn resolve(&self, request: &ImageRequest) -> Result<CachedArtifact, ResolveError> {
        let key = request.cache_key();
        if let Some(hit) = self.lookup(&key) {
            debug!(%key, url = %request.source_url, "cache hit");
            self.counters.hits();
            return Ok(hit);
        }

        match self.in_flight.join(&key) {
            Flight::Waiter(flight) => {
                debug!(%key, "waiting on in-flight render");
                self.counters.coalesced();
                flight.wait()
            }
            Flight::Owner(owner) => {
                // The previous owner may have stored it between our lookup and join.
                let result = match self.lookup(&key) {
                    Some(hit) => {
                        self.counters.hits();
                        Ok(hit)
                    }
                    None => self
                        .render(request)
                        .map(|jpeg| self.persist(CachedArtifact::rendered(request, jpeg))),
                };
                owner.finish(result.clone());
                result
            }
        }
    }

    /// Resolve `request` into a response body or a redirect.
    ///
    /// If a stored blob can no longer be read, the image is rendered again
    /// from origin and the store is rewritten. With `redirect_to_source`,
    /// a failed render answers with the source URL.
    pub fn serve(&self, request: &ImageRequest) -> Result<Servable, ResolveError> {
        let artifact = match self.resolve(request) {
            Ok(artifact) => artifact,
            Err(e @ (ResolveError::Origin(_) | ResolveError::Transform(_)))
                if self.failures.redirects_to_source() =>
            {
                info!(url = %request.source_url, error = %e, "render failed, redirecting to source");
                return Ok(Servable::Source(request.source_url.clone()));
            }
            Err(e) => return Err(e),
        };
        if let Some(url) = self.store.url_for(&artifact) {
            return Ok(Servable::Redirect(url));
        }
        match artifact.load_bytes() {
            Ok(bytes) => Ok(Servable::Jpeg(bytes)),
            Err(e) => {
                warn!(key = %artifact.key, error = %e, "stored artifact unreadable, re-rendering");
                self.rerender(request).map(Servable::Jpeg)
            }
        }
    }

    /// Render `request` again without a lookup, joining any render already
    /// running for its key.
    fn rerender(&self, request: &ImageRequest) -> Result<Vec<u8>, ResolveError> {
        let key = request.cache_key();
        let artifact = match self.in_flight.join(&key) {
            Flight::Waiter(flight) => {
                debug!(%key, "waiting on in-flight re-render");
                self.counters.coalesced();
                flight.wait()?
            }
            Flight::Owner(owner) => {
                // Waiters get the fresh inline copy, not the stored form.
                let result = self.render(request).map(|jpeg| {
                    let fresh = CachedArtifact::rendered(request, jpeg);
                    self.persist(fresh.clone());
                    fresh
                });
                owner.finish(result.clone());
                result?
            }
        };
        artifact.load_bytes().map_err(|e| ResolveError::Unreadable {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedArtifact> {
        match self.store.get(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(%key, error = %e, "store lookup failed, treating as miss");
                None
            }
        }
    }

    /// Fetch from origin and center-crop into JPEG bytes.
    fn render(&self, request: &ImageRequest) -> Result<Vec<u8>, ResolveError> {
        let url = request.source_url.as_str();
        if let Some(failures) = self.failures.blocked(url) {
            debug!(url, failures, "source short-circuited");
            self.counters.short_circuits();
            return Err(ResolveError::Unavailable {
                url: url.to_string(),
                failures,
            });
        }

        let started = Instant::now();
        let raw = self.fetcher.fetch(&request.source_url).map_err(|e| {
            let failures = self.failures.record_failure(url);
            warn!(url, failures, error = %e, "origin fetch failed");
            self.counters.fetch_failures();
            ResolveError::from(e)
        })?;

        let params = CropParams::new(request.width, request.height).with_quality(self.quality);
        let jpeg = self.backend.center_crop(&raw, &params).map_err(|e| {
            let failures = self.failures.record_failure(url);
            warn!(url, failures, error = %e, "transform failed");
            self.counters.transform_failures();
            ResolveError::from(e)
        })?;

        self.failures.record_success(url);
        self.counters.renders();
        info!(
            url,
            width = request.width,
            height = request.height,
            source_bytes = raw.len(),
            jpeg_bytes = jpeg.len(),
            ms = started.elapsed().as_millis() as u64,
            "rendered"
        );
        Ok(jpeg)
    }

    /// Store a fresh artifact, falling back to the inline copy on failure.
    fn persist(&self, fresh: CachedArtifact) -> CachedArtifact {
        match self.store.put(fresh.clone()) {
            Ok(stored) => stored,
            Err(e) => {
                error!(key = %fresh.key, error = %e, "failed to store rendered image");
                self.counters.store_failures();
                fresh
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::store::{FsStore, MemoryStore, Payload, RedirectStore, StoreError};
    use crate::test_helpers::{FailingStore, MockFetcher, not_found};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    const SOURCE: &str = "http://example.com/photo.jpg";

    fn request(width: u32, height: u32) -> ImageRequest {
        ImageRequest::new(Url::parse(SOURCE).unwrap(), width, height).unwrap()
    }

    struct Harness {
        coordinator: Coordinator,
        fetcher: Arc<MockFetcher>,
        backend: Arc<MockBackend>,
    }

    fn harness_with(store: Box<dyn ArtifactStore>, fetcher: MockFetcher) -> Harness {
        let fetcher = Arc::new(fetcher);
        let backend = Arc::new(MockBackend::new());
        let coordinator = Coordinator::new(
            store,
            Box::new(Arc::clone(&fetcher)),
            Box::new(Arc::clone(&backend)),
        );
        Harness {
            coordinator,
            fetcher,
            backend,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Box::new(MemoryStore::default()),
            MockFetcher::ok(b"source".to_vec()),
        )
    }

    #[test]
    fn first_request_fetches_second_hits() {
        let h = harness();

        let first = h.coordinator.resolve(&request(200, 100)).unwrap();
        assert_eq!(first.payload, Payload::Inline(MockBackend::output_for(200, 100)));
        assert_eq!(h.fetcher.calls(), 1);

        let second = h.coordinator.resolve(&request(200, 100)).unwrap();
        assert_eq!(second.key, first.key);
        assert_eq!(h.fetcher.calls(), 1);

        let stats = h.coordinator.stats();
        assert_eq!((stats.hits, stats.renders), (1, 1));
    }

    #[test]
    fn different_sizes_fetch_separately() {
        let h = harness();
        h.coordinator.resolve(&request(200, 100)).unwrap();
        h.coordinator.resolve(&request(100, 200)).unwrap();
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[test]
    fn passes_box_and_quality_to_backend() {
        let h = harness();
        let coordinator = h.coordinator.with_quality(Quality::new(80));
        coordinator.resolve(&request(200, 100)).unwrap();

        assert_eq!(
            h.backend.get_operations(),
            vec![RecordedOp::CenterCrop {
                input_len: b"source".len(),
                width: 200,
                height: 100,
                quality: 80,
            }]
        );
    }

    #[test]
    fn failed_fetch_stores_nothing_and_retries() {
        let store = Arc::new(MemoryStore::default());
        let h = harness_with(
            Box::new(Arc::clone(&store)),
            MockFetcher::failing(not_found(SOURCE)),
        );

        let err = h.coordinator.resolve(&request(200, 100)).unwrap_err();
        assert!(matches!(err, ResolveError::Origin(FetchError::Status { status: 404, .. })));
        assert!(store.is_empty());

        h.fetcher.respond_with(Ok(b"source".to_vec()));
        h.coordinator.resolve(&request(200, 100)).unwrap();
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_transform_stores_nothing() {
        let store = Arc::new(MemoryStore::default());
        let fetcher = Arc::new(MockFetcher::ok(b"<html>".to_vec()));
        let coordinator = Coordinator::new(
            Box::new(Arc::clone(&store)),
            Box::new(Arc::clone(&fetcher)),
            Box::new(MockBackend::failing(TransformError::Decode("not an image".into()))),
        );

        let err = coordinator.resolve(&request(200, 100)).unwrap_err();
        assert!(matches!(err, ResolveError::Transform(TransformError::Decode(_))));
        assert!(store.is_empty());

        coordinator.resolve(&request(200, 100)).unwrap_err();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(coordinator.stats().transform_failures, 2);
    }

    #[test]
    fn store_write_failure_still_returns_bytes() {
        let store = Arc::new(FailingStore::failing_writes());
        let h = harness_with(
            Box::new(Arc::clone(&store)),
            MockFetcher::ok(b"source".to_vec()),
        );

        let served = h.coordinator.serve(&request(200, 100)).unwrap();
        assert_eq!(served, Servable::Jpeg(MockBackend::output_for(200, 100)));
        assert_eq!(store.len(), 0);
        assert_eq!(h.coordinator.stats().store_failures, 1);

        // Nothing was stored, so the next request goes to origin again.
        h.coordinator.serve(&request(200, 100)).unwrap();
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[test]
    fn store_read_failure_is_a_miss() {
        let store = Arc::new(FailingStore::default());
        let h = harness_with(
            Box::new(Arc::clone(&store)),
            MockFetcher::ok(b"source".to_vec()),
        );
        h.coordinator.resolve(&request(200, 100)).unwrap();

        store.fail_get.store(true, Ordering::SeqCst);
        let again = h.coordinator.resolve(&request(200, 100)).unwrap();
        assert_eq!(again.payload, Payload::Inline(MockBackend::output_for(200, 100)));
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[test]
    fn concurrent_misses_share_one_fetch() {
        let h = harness_with(
            Box::new(MemoryStore::default()),
            MockFetcher::ok(b"source".to_vec()).with_delay(Duration::from_millis(200)),
        );

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| h.coordinator.resolve(&request(200, 100))))
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(h.fetcher.calls(), 1);
        for result in results {
            assert_eq!(
                result.unwrap().payload,
                Payload::Inline(MockBackend::output_for(200, 100))
            );
        }
        assert_eq!(h.coordinator.in_flight.len(), 0);
    }

    #[test]
    fn concurrent_waiters_share_failure() {
        let h = harness_with(
            Box::new(MemoryStore::default()),
            MockFetcher::failing(not_found(SOURCE)).with_delay(Duration::from_millis(200)),
        );

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| h.coordinator.resolve(&request(200, 100))))
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(h.fetcher.calls(), 1);
        assert!(results.iter().all(|r| matches!(r, Err(ResolveError::Origin(_)))));
    }

    #[test]
    fn failure_threshold_short_circuits_source() {
        let h = harness_with(
            Box::new(MemoryStore::default()),
            MockFetcher::failing(not_found(SOURCE)),
        );
        let coordinator = h
            .coordinator
            .with_failure_policy(FailurePolicy::after(2, Duration::from_secs(60)));

        assert!(matches!(coordinator.resolve(&request(200, 100)), Err(ResolveError::Origin(_))));
        assert!(matches!(coordinator.resolve(&request(200, 100)), Err(ResolveError::Origin(_))));
        assert_eq!(
            coordinator.resolve(&request(200, 100)),
            Err(ResolveError::Unavailable {
                url: SOURCE.to_string(),
                failures: 2
            })
        );
        // Other sizes of the same source are short-circuited too.
        assert!(matches!(
            coordinator.resolve(&request(50, 50)),
            Err(ResolveError::Unavailable { .. })
        ));
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(coordinator.stats().short_circuits, 2);
    }

    #[test]
    fn serve_redirects_when_store_has_public_url() {
        let tmp = TempDir::new().unwrap();
        let store = RedirectStore::new(
            FsStore::open(tmp.path()).unwrap(),
            Url::parse("https://cdn.example.com/crops/").unwrap(),
        );
        let h = harness_with(Box::new(store), MockFetcher::ok(b"source".to_vec()));

        let served = h.coordinator.serve(&request(200, 100)).unwrap();
        let key = request(200, 100).cache_key();
        assert_eq!(
            served,
            Servable::Redirect(
                Url::parse(&format!("https://cdn.example.com/crops/{}/{key}.jpg", key.shard()))
                    .unwrap()
            )
        );
    }

    #[test]
    fn serve_from_filesystem_reads_blob() {
        let tmp = TempDir::new().unwrap();
        let h = harness_with(
            Box::new(FsStore::open(tmp.path()).unwrap()),
            MockFetcher::ok(b"source".to_vec()),
        );

        let first = h.coordinator.serve(&request(200, 100)).unwrap();
        let second = h.coordinator.serve(&request(200, 100)).unwrap();
        assert_eq!(first, Servable::Jpeg(MockBackend::output_for(200, 100)));
        assert_eq!(second, first);
        assert_eq!(h.fetcher.calls(), 1);
    }

    /// Store whose blobs vanish: `get` hands back a path that does not exist.
    struct DanglingStore;

    impl ArtifactStore for DanglingStore {
        fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError> {
            let mut artifact = CachedArtifact::rendered(&request(200, 100), Vec::new());
            artifact.key = key.clone();
            artifact.payload = Payload::Blob("/nonexistent/dangling.jpg".into());
            Ok(Some(artifact))
        }

        fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError> {
            Ok(artifact)
        }
    }

    #[test]
    fn unreadable_blob_is_rendered_again() {
        let h = harness_with(Box::new(DanglingStore), MockFetcher::ok(b"source".to_vec()));

        let served = h.coordinator.serve(&request(200, 100)).unwrap();
        assert_eq!(served, Servable::Jpeg(MockBackend::output_for(200, 100)));
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[test]
    fn concurrent_rerenders_share_one_fetch() {
        let h = harness_with(
            Box::new(DanglingStore),
            MockFetcher::ok(b"source".to_vec()).with_delay(Duration::from_millis(200)),
        );

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| s.spawn(|| h.coordinator.serve(&request(200, 100))))
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        assert_eq!(h.fetcher.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), Servable::Jpeg(MockBackend::output_for(200, 100)));
        }
        assert_eq!(h.coordinator.stats().coalesced, 5);
        assert_eq!(h.coordinator.in_flight.len(), 0);
    }

    #[test]
    fn failed_render_redirects_to_source_when_enabled() {
        let h = harness_with(
            Box::new(MemoryStore::default()),
            MockFetcher::failing(not_found(SOURCE)),
        );
        let coordinator = h.coordinator.with_failure_policy(
            FailurePolicy::after(2, Duration::from_secs(60)).with_redirect_to_source(),
        );

        let source = Url::parse(SOURCE).unwrap();
        for _ in 0..2 {
            assert_eq!(
                coordinator.serve(&request(200, 100)),
                Ok(Servable::Source(source.clone()))
            );
        }
        // Past the threshold the source is short-circuited instead.
        assert!(matches!(
            coordinator.serve(&request(200, 100)),
            Err(ResolveError::Unavailable { .. })
        ));
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[test]
    fn failed_render_is_an_error_by_default() {
        let h = harness_with(
            Box::new(MemoryStore::default()),
            MockFetcher::failing(not_found(SOURCE)),
        );
        assert!(matches!(
            h.coordinator.serve(&request(200, 100)),
            Err(ResolveError::Origin(_))
        ));
    }
}
