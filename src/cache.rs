//! In-process resolution cache, scoped to one resolution session.
//!
//! One entry per canonical locator, no eviction (the session bounds the
//! lifetime). Concurrent first-time requests for the same locator are
//! serialized through an in-flight latch: one caller becomes the owner and
//! performs the fetch, the others block on the latch and receive the owner's
//! artifact, preserving the at-most-one-fetch-per-locator invariant.

use crate::resolver::ResolvedImage;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

enum FlightState {
  Pending,
  Done(Arc<ResolvedImage>),
  /// The owner went away without publishing a result; waiters re-enter the
  /// resolve loop and race for ownership again.
  Abandoned,
}

/// Latch shared between the owner of an in-flight resolution and its waiters.
pub struct InFlight {
  state: Mutex<FlightState>,
  cv: Condvar,
}

impl InFlight {
  fn new() -> Self {
    Self {
      state: Mutex::new(FlightState::Pending),
      cv: Condvar::new(),
    }
  }

  fn set(&self, state: FlightState) {
    if let Ok(mut slot) = self.state.lock() {
      *slot = state;
      self.cv.notify_all();
    }
  }

  /// Block until the owner publishes. `None` means the owner abandoned the
  /// flight and the caller should retry.
  pub fn wait(&self) -> Option<Arc<ResolvedImage>> {
    let mut guard = self.state.lock().ok()?;
    loop {
      match &*guard {
        FlightState::Pending => guard = self.cv.wait(guard).ok()?,
        FlightState::Done(artifact) => return Some(Arc::clone(artifact)),
        FlightState::Abandoned => return None,
      }
    }
  }
}

/// Two-level session map: resolved artifacts plus in-flight latches.
pub struct SessionCache {
  entries: Mutex<HashMap<String, Arc<ResolvedImage>>>,
  in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
}

impl SessionCache {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      in_flight: Mutex::new(HashMap::new()),
    }
  }

  /// Look up a previously resolved artifact, fallback results included.
  pub fn lookup(&self, key: &str) -> Option<Arc<ResolvedImage>> {
    self
      .entries
      .lock()
      .ok()
      .and_then(|entries| entries.get(key).cloned())
  }

  /// Store an artifact under its canonical locator.
  pub fn store(&self, key: &str, artifact: Arc<ResolvedImage>) {
    if let Ok(mut entries) = self.entries.lock() {
      entries.insert(key.to_string(), artifact);
    }
  }

  /// Join the in-flight resolution for `key`. Returns the latch and whether
  /// the caller became the owner (and must resolve, then [`complete`]).
  ///
  /// [`complete`]: SessionCache::complete
  pub fn join(&self, key: &str) -> (Arc<InFlight>, bool) {
    let mut in_flight = match self.in_flight.lock() {
      Ok(guard) => guard,
      // A poisoned latch map degrades to duplicate fetches, never to a
      // missed resolution.
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(flight) = in_flight.get(key) {
      return (Arc::clone(flight), false);
    }
    let flight = Arc::new(InFlight::new());
    in_flight.insert(key.to_string(), Arc::clone(&flight));
    (flight, true)
  }

  /// Publish the owner's artifact: store it, drop the latch, wake waiters.
  pub fn complete(&self, key: &str, artifact: Arc<ResolvedImage>) {
    self.store(key, Arc::clone(&artifact));
    let flight = self
      .in_flight
      .lock()
      .ok()
      .and_then(|mut in_flight| in_flight.remove(key));
    if let Some(flight) = flight {
      flight.set(FlightState::Done(artifact));
    }
  }

  /// Drop the latch without publishing, waking waiters to retry.
  pub fn abandon(&self, key: &str) {
    let flight = self
      .in_flight
      .lock()
      .ok()
      .and_then(|mut in_flight| in_flight.remove(key));
    if let Some(flight) = flight {
      flight.set(FlightState::Abandoned);
    }
  }
}

impl Default for SessionCache {
  fn default() -> Self {
    Self::new()
  }
}
