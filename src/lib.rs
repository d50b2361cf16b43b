//! # cropproxy
//!
//! An HTTP proxy that serves center-cropped JPEG renditions of remote
//! images. A request names a size and a source URL:
//!
//! ```text
//! GET /100x200/http://example.com/photo.jpg
//!      ^^^ ^^^
//!   height  width
//! ```
//!
//! The source is fetched once, scaled to cover the box, cropped around its
//! center and encoded as JPEG. The result is stored under a key derived from
//! the normalized URL and the box, so every later request for the same
//! rendition is served from the store without contacting the origin.
//!
//! # Request Pipeline
//!
//! ```text
//! path ─▶ request::from_path ─▶ key::derive_key ─▶ store.get ─hit──▶ response
//!                                                     │
//!                                                    miss
//!                                                     ▼
//!                      origin.fetch ─▶ imaging::center_crop ─▶ store.put ─▶ response
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`request`] | Parses `/{h}x{w}/{url}` paths and normalizes source URLs |
//! | [`key`] | Deterministic cache keys from (URL, width, height) |
//! | [`imaging`] | Cover-resize + center-crop + JPEG encode, behind the [`imaging::ImageBackend`] trait |
//! | [`origin`] | Blocking HTTP fetch of source images, behind [`origin::OriginFetcher`] |
//! | [`store`] | Where renditions live: memory, filesystem, or filesystem + CDN redirect |
//! | [`coordinator`] | Fetch-once resolution: lookup, single-flight render, failure policy, stats |
//! | [`server`] | The axum router and its handlers |
//! | [`config`] | `cropproxy.toml` loading, merging and validation |
//!
//! # Design Decisions
//!
//! ## Blocking Core, Async Edge
//!
//! Everything below [`server`] is synchronous: fetching uses a blocking
//! `ureq` agent, decoding and resizing are CPU-bound, and the stores do
//! plain file I/O. The handlers hand each request to tokio's blocking pool.
//! The core stays testable with plain `#[test]` functions and threads.
//!
//! ## Fetch Once
//!
//! A stored rendition is never refetched. Failed fetches or transforms
//! store nothing, so they are retried on the next request (subject to the
//! optional [`coordinator::FailurePolicy`]). Concurrent misses on one key
//! share a single render.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate with Lanczos3 resampling.
//! No ImageMagick, no system libraries: the binary is self-contained.

pub mod config;
pub mod coordinator;
pub mod imaging;
pub mod key;
pub mod origin;
pub mod request;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
