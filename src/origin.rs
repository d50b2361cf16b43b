//! Fetching source images from origin servers.
//!
//! [`OriginFetcher`] is the seam the coordinator calls on a cache miss.
//! [`HttpFetcher`] is the production implementation: a blocking `ureq`
//! agent with a global timeout and a body size cap. Calls are made from
//! tokio's blocking pool, so a blocking client is the right fit.
//!
//! There are no retries here. A failed fetch is reported to the caller,
//! which decides what to do (see [`FailurePolicy`](crate::coordinator::FailurePolicy)).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("origin returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("origin timed out for {0}")]
    Timeout(String),
    #[error("origin response for {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
    #[error("failed fetching {url}: {reason}")]
    Request { url: String, reason: String },
}

/// Something that can GET a source image.
pub trait OriginFetcher: Send + Sync {
    /// Fetch the full body of `url`. Non-2xx responses are errors.
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

impl<T: OriginFetcher + ?Sized> OriginFetcher for Arc<T> {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url)
    }
}

/// Settings for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_body_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_body_bytes: 20 * 1024 * 1024,
            user_agent: concat!("cropproxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Blocking HTTP fetcher backed by a shared `ureq` agent (connection pool).
pub struct HttpFetcher {
    agent: ureq::Agent,
    options: FetchOptions,
}

impl HttpFetcher {
    pub fn new(options: FetchOptions) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(options.timeout))
            .build()
            .into();
        Self { agent, options }
    }
}

impl OriginFetcher for HttpFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        debug!(%url, "fetching from origin");

        let response = self
            .agent
            .get(url.as_str())
            .header("User-Agent", self.options.user_agent.as_str())
            .call()
            .map_err(|e| map_error(url, e, self.options.max_body_bytes))?;

        trace!(%url, status = response.status().as_u16(), "origin responded");

        let mut body = response.into_body();
        let data = body
            .with_config()
            .limit(self.options.max_body_bytes)
            .read_to_vec()
            .map_err(|e| map_error(url, e, self.options.max_body_bytes))?;

        trace!(%url, bytes = data.len(), "origin body read");
        Ok(data)
    }
}

fn map_error(url: &Url, err: ureq::Error, limit: u64) -> FetchError {
    let url = url.to_string();
    match err {
        ureq::Error::StatusCode(status) => FetchError::Status { url, status },
        ureq::Error::Timeout(_) => FetchError::Timeout(url),
        ureq::Error::BodyExceedsLimit(_) => FetchError::TooLarge { url, limit },
        other => FetchError::Request {
            url,
            reason: other.to_string(),
        },
    }
}
