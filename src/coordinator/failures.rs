//! Per-source failure counting.
//!
//! When a source keeps failing (origin down, URL returns HTML, image is
//! corrupt) every request would otherwise go back to the origin. With a
//! threshold configured, a source that has failed `threshold` times in a
//! row is answered with "not found" until `cooldown` has passed since its
//! last failure. The next attempt after the cooldown goes to the origin
//! again; one success clears the count.
//!
//! With `redirect_to_source`, a failed render below the threshold sends the
//! client to the source image itself instead of an error.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How repeated failures for one source URL are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Consecutive failures before short-circuiting. `None` disables the policy.
    pub threshold: Option<u32>,
    /// How long a tripped source stays short-circuited after its last failure.
    pub cooldown: Duration,
    /// Answer a failed render with a temporary redirect to the source URL.
    pub redirect_to_source: bool,
}

impl FailurePolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn after(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: Some(threshold),
            cooldown,
            redirect_to_source: false,
        }
    }

    pub fn with_redirect_to_source(mut self) -> Self {
        self.redirect_to_source = true;
        self
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            threshold: None,
            cooldown: Duration::from_secs(300),
            redirect_to_source: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureState {
    count: u32,
    last: Instant,
}

#[derive(Debug, Default)]
pub(super) struct FailureTracker {
    policy: FailurePolicy,
    sources: Mutex<HashMap<String, FailureState>>,
}

impl FailureTracker {
    pub(super) fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            sources: Mutex::new(HashMap::new()),
        }
    }

    pub(super) fn redirects_to_source(&self) -> bool {
        self.policy.redirect_to_source
    }

    /// The failure count if `url` is currently short-circuited.
    pub(super) fn blocked(&self, url: &str) -> Option<u32> {
        let threshold = self.policy.threshold?;
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let state = sources.get(url)?;
        (state.count >= threshold && state.last.elapsed() < self.policy.cooldown)
            .then_some(state.count)
    }

    /// Count a failure; returns the new consecutive count.
    ///
    /// Sources whose last failure is older than the cooldown are forgotten
    /// here, so the map only holds sources that failed recently.
    pub(super) fn record_failure(&self, url: &str) -> u32 {
        if self.policy.threshold.is_none() {
            return 0;
        }
        let cooldown = self.policy.cooldown;
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        sources.retain(|_, state| state.last.elapsed() < cooldown);
        let state = sources.entry(url.to_string()).or_insert(FailureState {
            count: 0,
            last: Instant::now(),
        });
        state.count = state.count.saturating_add(1);
        state.last = Instant::now();
        state.count
    }

    pub(super) fn record_success(&self, url: &str) {
        if self.policy.threshold.is_none() {
            return;
        }
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
