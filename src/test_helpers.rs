//! Shared test utilities.
//!
//! Provides in-memory image fixtures, scripted doubles for the origin and
//! the store, and a tiny HTTP server for exercising the real fetcher.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let origin = FakeOrigin::start(200, encode_test_jpeg(400, 300));
//! let body = HttpFetcher::new(FetchOptions::default())
//!     .fetch(&origin.url("/photo.jpg"))
//!     .unwrap();
//! assert_eq!(origin.hits(), 1);
//! ```

use crate::key::CacheKey;
use crate::origin::{FetchError, OriginFetcher};
use crate::store::{ArtifactStore, CachedArtifact, MemoryStore, StoreError};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

// =========================================================================
// Image fixtures
// =========================================================================

/// A `width x height` gradient encoded as JPEG.
pub fn encode_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

pub fn encode_png(img: &DynamicImage) -> Vec<u8> {
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

// =========================================================================
// Origin doubles
// =========================================================================

/// Scripted [`OriginFetcher`] that counts calls.
pub struct MockFetcher {
    response: Mutex<Result<Vec<u8>, FetchError>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            response: Mutex::new(Ok(body)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: FetchError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change what subsequent fetches return.
    pub fn respond_with(&self, response: Result<Vec<u8>, FetchError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OriginFetcher for MockFetcher {
    fn fetch(&self, _url: &Url) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.response.lock().unwrap().clone()
    }
}

pub fn not_found(url: &str) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: 404,
    }
}

/// Minimal HTTP/1.1 server answering every request with one canned response.
///
/// Each connection is served on its own thread and closed after the
/// response. The listener thread lives until the test process exits.
pub struct FakeOrigin {
    addr: std::net::SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl FakeOrigin {
    pub fn start(status: u16, body: Vec<u8>) -> Self {
        Self::start_delayed(status, body, Duration::ZERO)
    }

    pub fn start_delayed(status: u16, body: Vec<u8>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let body = Arc::new(body);

        let counter = Arc::clone(&hits);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let body = Arc::clone(&body);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    respond(stream, status, &body, delay);
                });
            }
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn respond(mut stream: TcpStream, status: u16, body: &[u8], delay: Duration) {
    // Read through the end of the request head; requests here have no body.
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }

    if !delay.is_zero() {
        std::thread::sleep(delay);
    }

    let reason = if status == 200 { "OK" } else { "Error" };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

// =========================================================================
// Store doubles
// =========================================================================

/// [`MemoryStore`] whose reads and writes can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    pub fail_get: AtomicBool,
    pub fail_put: AtomicBool,
}

impl FailingStore {
    pub fn failing_writes() -> Self {
        let store = Self::default();
        store.fail_put.store(true, Ordering::SeqCst);
        store
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

fn injected() -> StoreError {
    StoreError::Io(std::io::Error::other("injected failure"))
}

impl ArtifactStore for FailingStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedArtifact>, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.get(key)
    }

    fn put(&self, artifact: CachedArtifact) -> Result<CachedArtifact, StoreError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.put(artifact)
    }
}
