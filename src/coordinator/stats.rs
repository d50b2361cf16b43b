//! Counters for cache behavior, shared across request threads.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(super) struct Counters {
    hits: AtomicU64,
    renders: AtomicU64,
    coalesced: AtomicU64,
    fetch_failures: AtomicU64,
    transform_failures: AtomicU64,
    store_failures: AtomicU64,
    short_circuits: AtomicU64,
}

macro_rules! bump {
    ($($name:ident),* $(,)?) => {
        $(
            pub(super) fn $name(&self) {
                self.$name.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Counters {
    bump!(
        hits,
        renders,
        coalesced,
        fetch_failures,
        transform_failures,
        store_failures,
        short_circuits,
    );

    pub(super) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            short_circuits: self.short_circuits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the coordinator's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Served from the store without touching the origin.
    pub hits: u64,
    /// Fetched from origin and rendered successfully.
    pub renders: u64,
    /// Waited on another request's render of the same key.
    pub coalesced: u64,
    pub fetch_failures: u64,
    pub transform_failures: u64,
    /// Renders whose store write failed (bytes were still served).
    pub store_failures: u64,
    /// Requests answered "not found" by the failure policy.
    pub short_circuits: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits
            + self.renders
            + self.coalesced
            + self.fetch_failures
            + self.transform_failures
            + self.short_circuits
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cached, {} rendered", self.hits, self.renders)?;
        if self.coalesced > 0 {
            write!(f, ", {} coalesced", self.coalesced)?;
        }
        let failed = self.fetch_failures + self.transform_failures;
        if failed > 0 {
            write!(f, ", {} failed", failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}
