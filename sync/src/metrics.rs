use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector shared by the caches.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) coalesced: CachePadded<AtomicU64>,

  // --- Transport ---
  pub(crate) fetches: CachePadded<AtomicU64>,
  pub(crate) keys_fetched: CachePadded<AtomicU64>,
  pub(crate) errors: CachePadded<AtomicU64>,
  pub(crate) abandoned: CachePadded<AtomicU64>,

  // --- Invalidation ---
  pub(crate) stale_dropped: CachePadded<AtomicU64>,
  pub(crate) restarts: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      coalesced: CachePadded::new(AtomicU64::new(0)),
      fetches: CachePadded::new(AtomicU64::new(0)),
      keys_fetched: CachePadded::new(AtomicU64::new(0)),
      errors: CachePadded::new(AtomicU64::new(0)),
      abandoned: CachePadded::new(AtomicU64::new(0)),
      stale_dropped: CachePadded::new(AtomicU64::new(0)),
      restarts: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &CachePadded<AtomicU64>) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn add(counter: &CachePadded<AtomicU64>, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      coalesced: self.coalesced.load(Ordering::Relaxed),
      fetches: self.fetches.load(Ordering::Relaxed),
      keys_fetched: self.keys_fetched.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
      abandoned: self.abandoned.load(Ordering::Relaxed),
      stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
      restarts: self.restarts.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a cache's metrics.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MetricsSnapshot {
  /// Requests answered from a resolved entry.
  pub hits: u64,
  /// Requests that had to wait for a fetch.
  pub misses: u64,
  /// The hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Misses that joined a fetch already in flight instead of starting one.
  pub coalesced: u64,
  /// Transport calls issued.
  pub fetches: u64,
  /// Keys carried by those calls.
  pub keys_fetched: u64,
  /// Results that resolved to an error.
  pub errors: u64,
  /// Keys whose reply was dropped or did not cover them.
  pub abandoned: u64,
  /// Results discarded because a restart happened while they were in flight.
  pub stale_dropped: u64,
  /// Number of restarts.
  pub restarts: u64,
  /// The number of seconds the component has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("coalesced", &self.coalesced)
      .field("fetches", &self.fetches)
      .field("keys_fetched", &self.keys_fetched)
      .field("errors", &self.errors)
      .field("abandoned", &self.abandoned)
      .field("stale_dropped", &self.stale_dropped)
      .field("restarts", &self.restarts)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
