//! Session lifecycle fan-out.
//!
//! A [`Session`] is constructed once by the host and handed to whatever
//! needs it. Components register with it and get told when the underlying
//! transport starts up, logs a user out, or restarts.

use crate::registry::{ListenerRegistry, Membership};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

/// Lifecycle callbacks. Every method defaults to a no-op; implementers
/// override the ones they care about.
pub trait SessionListener: Send + Sync {
  fn on_perform_startup(&self, _after_restart: bool) {}

  /// The user's data must be forgotten (logout, account switch).
  fn on_perform_user_cleanup(&self) {}

  /// The transport restarted: in-flight work is void and cached state is
  /// stale.
  fn on_perform_restart(&self) {}
}

/// Broadcasts lifecycle events to registered components.
pub struct Session {
  listeners: ListenerRegistry<dyn SessionListener>,
  restarts: AtomicU64,
}

impl Session {
  pub fn new() -> Self {
    Self {
      listeners: ListenerRegistry::new(),
      restarts: AtomicU64::new(0),
    }
  }

  pub fn register(&self, listener: &Arc<dyn SessionListener>, membership: Membership) -> bool {
    self.listeners.add(listener, membership)
  }

  pub fn unregister(&self, listener: &Arc<dyn SessionListener>) -> bool {
    self.listeners.remove(listener)
  }

  pub fn startup(&self) {
    let after_restart = self.restarts.load(Ordering::Acquire) > 0;
    info!(after_restart, "session startup");
    self.listeners.notify_all(|l| l.on_perform_startup(after_restart));
  }

  pub fn user_cleanup(&self) {
    info!("session user cleanup");
    self.listeners.notify_all(|l| l.on_perform_user_cleanup());
  }

  pub fn restart(&self) {
    let n = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
    info!(restarts = n, "session restart");
    self.listeners.notify_all(|l| l.on_perform_restart());
  }

  /// Number of restarts broadcast so far.
  pub fn restarts(&self) -> u64 {
    self.restarts.load(Ordering::Acquire)
  }

  pub fn listener_count(&self) -> usize {
    self.listeners.len()
  }
}

impl Default for Session {
  fn default() -> Self {
    Self::new()
  }
}
