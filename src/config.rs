//! Proxy configuration.
//!
//! Handles loading, validating, and merging `cropproxy.toml`. Configuration
//! is layered: stock defaults, then the config file, then command-line
//! flags. Each layer only needs the keys it wants to override.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! cache_max_age = 86400      # Cache-Control max-age on image responses
//!
//! [origin]
//! timeout_secs = 10          # Whole-request timeout for source fetches
//! max_body_bytes = 20971520  # Larger source images are rejected
//! user_agent = "cropproxy/0.1.0"
//!
//! [images]
//! quality = 95               # JPEG quality (1-100)
//! max_dimension = 4096       # Largest accepted width or height
//!
//! [store]
//! backend = "memory"         # memory | filesystem | redirect
//! dir = "cache"              # filesystem and redirect backends
//! # max_entries = 10000      # memory backend; omit for unbounded
//! public_base_url = ""       # redirect backend: where `dir` is published
//!
//! [failures]
//! # threshold = 3            # failures before short-circuiting; omit to disable
//! cooldown_secs = 300
//! redirect_to_source = false # 302 to the source when a render fails
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::coordinator::FailurePolicy;
use crate::imaging::Quality;
use crate::origin::FetchOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// File read from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "cropproxy.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full proxy configuration.
///
/// All fields have defaults; a config file need only specify the values it
/// wants to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub server: ServerConfig,
    pub origin: OriginConfig,
    pub images: ImagesConfig,
    pub store: StoreConfig,
    pub failures: FailuresConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    /// Seconds clients and CDNs may cache a rendered image.
    pub cache_max_age: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            cache_max_age: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OriginConfig {
    pub timeout_secs: u64,
    pub max_body_bytes: u64,
    pub user_agent: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        let options = FetchOptions::default();
        Self {
            timeout_secs: options.timeout.as_secs(),
            max_body_bytes: options.max_body_bytes,
            user_agent: options.user_agent,
        }
    }
}

impl From<&OriginConfig> for FetchOptions {
    fn from(config: &OriginConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_body_bytes: config.max_body_bytes,
            user_agent: config.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// JPEG quality (1-100).
    pub quality: u8,
    /// Requests with a larger width or height are rejected.
    pub max_dimension: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            quality: Quality::default().value(),
            max_dimension: 4096,
        }
    }
}

/// Where rendered crops are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Filesystem,
    Redirect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Blob directory for the `filesystem` and `redirect` backends.
    pub dir: PathBuf,
    /// Capacity of the `memory` backend. `None` is unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    /// Public URL `dir` is served under, for the `redirect` backend.
    pub public_base_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            dir: PathBuf::from("cache"),
            max_entries: None,
            public_base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailuresConfig {
    /// Consecutive failures before a source is short-circuited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    pub cooldown_secs: u64,
    /// Send clients to the source image when a render fails.
    pub redirect_to_source: bool,
}

impl Default for FailuresConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            cooldown_secs: FailurePolicy::default().cooldown.as_secs(),
            redirect_to_source: false,
        }
    }
}

impl From<&FailuresConfig> for FailurePolicy {
    fn from(config: &FailuresConfig) -> Self {
        Self {
            threshold: config.threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
            redirect_to_source: config.redirect_to_source,
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

impl ProxyConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if !(1..=100).contains(&self.images.quality) {
            return Err(invalid("images.quality must be 1-100"));
        }
        if self.images.max_dimension == 0 {
            return Err(invalid("images.max_dimension must be non-zero"));
        }
        if self.origin.timeout_secs == 0 {
            return Err(invalid("origin.timeout_secs must be non-zero"));
        }
        if self.origin.max_body_bytes == 0 {
            return Err(invalid("origin.max_body_bytes must be non-zero"));
        }
        if self.store.max_entries == Some(0) {
            return Err(invalid("store.max_entries must be non-zero"));
        }
        if self.failures.threshold == Some(0) {
            return Err(invalid("failures.threshold must be non-zero"));
        }
        if self.store.backend == StoreBackend::Redirect {
            let base = Url::parse(&self.store.public_base_url).map_err(|e| {
                invalid(format!(
                    "store.public_base_url is required for the redirect backend: {e}"
                ))
            })?;
            if !matches!(base.scheme(), "http" | "https") {
                return Err(invalid("store.public_base_url must be an http(s) URL"));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e| invalid(format!("server.bind '{}': {e}", self.server.bind)))
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ProxyConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
pub fn load_raw_config(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Merge overlays onto the stock defaults in order, then deserialize and
/// validate.
pub fn resolve_config(overlays: Vec<toml::Value>) -> Result<ProxyConfig, ConfigError> {
    let merged = overlays
        .into_iter()
        .fold(stock_defaults_value()?, merge_toml);
    let config: ProxyConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`, or from [`DEFAULT_CONFIG_FILE`] in the
/// working directory if it exists.
///
/// An explicitly named file must exist. `flags` is merged last, so
/// command-line values win over the file.
pub fn load_config(
    path: Option<&Path>,
    flags: Option<toml::Value>,
) -> Result<ProxyConfig, ConfigError> {
    let mut overlays = Vec::new();
    match path {
        Some(p) => overlays.push(load_raw_config(p)?),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                overlays.push(load_raw_config(default)?);
            }
        }
    }
    overlays.extend(flags);
    resolve_config(overlays)
}

/// Returns a fully-commented stock `cropproxy.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# cropproxy configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
# Address to listen on. Overridden by `serve --bind`.
bind = "127.0.0.1:8080"

# Cache-Control max-age (seconds) on image responses.
cache_max_age = 86400

# ---------------------------------------------------------------------------
# Fetching source images
# ---------------------------------------------------------------------------
[origin]
# Whole-request timeout, connect through body.
timeout_secs = 10

# Source images larger than this are rejected.
max_body_bytes = 20971520

# User-Agent sent to origin servers. Defaults to "cropproxy/<version>".
# user_agent = "cropproxy"

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[images]
# JPEG quality (1-100).
quality = 95

# Largest width or height a request may ask for.
max_dimension = 4096

# ---------------------------------------------------------------------------
# Storage of rendered crops
# ---------------------------------------------------------------------------
[store]
# memory:     in-process map, lost on restart
# filesystem: blobs under `dir`, served by the proxy
# redirect:   blobs under `dir`, served by 301 to `public_base_url`
backend = "memory"

# Blob directory for the filesystem and redirect backends.
dir = "cache"

# Capacity of the memory backend. Omit for unbounded.
# max_entries = 10000

# Public URL that `dir` is published under (redirect backend only).
public_base_url = ""

# ---------------------------------------------------------------------------
# Repeated source failures
# ---------------------------------------------------------------------------
[failures]
# After this many consecutive failures a source URL answers 404 without
# contacting the origin, until `cooldown_secs` after the last failure.
# Omit to always retry.
# threshold = 3

cooldown_secs = 300

# When a render fails (and the source is not short-circuited), answer with a
# 302 to the source image instead of a 500.
redirect_to_source = false
"##
}
