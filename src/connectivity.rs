//! Connectivity oracle consumed by the optimistic write path.

use std::sync::atomic::{AtomicBool, Ordering};

/// Point-in-time online/offline signal.
///
/// Implementations must be cheap and synchronous: the cache reads the signal
/// once per decision and never polls or caches the answer. The read-through
/// path is deliberately not gated on it (fetch failure is the real signal);
/// only the optimistic writer consults it, to skip a guaranteed-to-fail
/// round trip.
pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Shared boolean flag the host application wires to its platform's
/// network signal (network-change callbacks, reachability probes, ...).
#[derive(Debug)]
pub struct OnlineFlag {
  online: AtomicBool,
}

impl OnlineFlag {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::Relaxed);
  }
}

impl Default for OnlineFlag {
  /// Online until the host reports otherwise.
  fn default() -> Self {
    Self::new(true)
  }
}

impl Connectivity for OnlineFlag {
  fn is_online(&self) -> bool {
    self.online.load(Ordering::Relaxed)
  }
}
