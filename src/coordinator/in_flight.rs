//! Per-key registry of renders in progress.
//!
//! The first resolver to miss on a key becomes its owner and does the
//! fetch + render. Resolvers that miss on the same key while the owner is
//! working block on the owner's [`InFlight`] and receive a clone of its
//! result, success or error.
//!
//! The owner holds a [`FlightOwner`] guard. Dropping it without calling
//! [`finish`](FlightOwner::finish) (an early return or a panic in the
//! backend) publishes [`ResolveError::Abandoned`], so waiters never hang.

use super::ResolveError;
use crate::key::CacheKey;
use crate::store::CachedArtifact;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

pub(super) type FlightResult = Result<CachedArtifact, ResolveError>;

pub(super) struct InFlight {
    result: Mutex<Option<FlightResult>>,
    cv: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn set(&self, result: FlightResult) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(result);
        self.cv.notify_all();
    }

    /// Block until the owner publishes, then return a clone of its result.
    pub(super) fn wait(&self) -> FlightResult {
        let mut guard = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub(super) enum Flight<'a> {
    Owner(FlightOwner<'a>),
    Waiter(Arc<InFlight>),
}

#[derive(Default)]
pub(super) struct InFlightRegistry {
    flights: Mutex<HashMap<CacheKey, Arc<InFlight>>>,
}

impl InFlightRegistry {
    /// Join the flight for `key`, becoming its owner if none is running.
    pub(super) fn join(&self, key: &CacheKey) -> Flight<'_> {
        let mut map = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(key) {
            return Flight::Waiter(Arc::clone(existing));
        }
        let flight = Arc::new(InFlight::new());
        map.insert(key.clone(), Arc::clone(&flight));
        Flight::Owner(FlightOwner {
            registry: self,
            key: key.clone(),
            flight,
            done: false,
        })
    }

    pub(super) fn len(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, key: &CacheKey) {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

pub(super) struct FlightOwner<'a> {
    registry: &'a InFlightRegistry,
    key: CacheKey,
    flight: Arc<InFlight>,
    done: bool,
}

impl FlightOwner<'_> {
    /// Publish the result to every waiter and retire the flight.
    pub(super) fn finish(mut self, result: FlightResult) {
        self.complete(result);
    }

    fn complete(&mut self, result: FlightResult) {
        self.flight.set(result);
        self.registry.remove(&self.key);
        self.done = true;
    }
}

impl Drop for FlightOwner<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.complete(Err(ResolveError::Abandoned));
        }
    }
}
