//! Idempotent "seen N times" counters for at-least-once event delivery.

use crate::builder::CounterBuilder;
use crate::lifecycle::SessionListener;
use crate::runtime::UiScheduler;

use std::collections::hash_map::Entry as MapEntry;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;
use tracing::trace;

/// A prefix-keyed integer store used to keep counts across restarts.
pub trait CounterStore: Send + Sync {
  fn get(&self, key: &str) -> Option<i64>;
  fn put(&self, key: &str, value: i64);
  fn remove_by_prefix(&self, prefix: &str);
}

/// An in-memory [`CounterStore`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
  map: Mutex<BTreeMap<String, i64>>,
}

impl MemoryCounterStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.map.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CounterStore for MemoryCounterStore {
  fn get(&self, key: &str) -> Option<i64> {
    self.map.lock().get(key).copied()
  }

  fn put(&self, key: &str, value: i64) {
    self.map.lock().insert(key.to_string(), value);
  }

  fn remove_by_prefix(&self, prefix: &str) {
    self.map.lock().retain(|k, _| !k.starts_with(prefix));
  }
}

/// A key made of a scope id and an item id, e.g. a chat and a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompoundKey {
  pub scope: i64,
  pub id: i64,
}

impl CompoundKey {
  pub fn new(scope: i64, id: i64) -> Self {
    Self { scope, id }
  }
}

impl fmt::Display for CompoundKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_{}", self.scope, self.id)
  }
}

struct CounterShared<K> {
  counts: Mutex<HashMap<K, u64>>,
  scheduler: Arc<dyn UiScheduler>,
  clear_delay: Duration,
  store: Option<Arc<dyn CounterStore>>,
  prefix: String,
}

impl<K> CounterShared<K>
where
  K: Eq + Hash + fmt::Display,
{
  // The trailing separator keeps "1_2" from matching "1_23" on removal.
  fn store_key(&self, key: &K) -> String {
    format!("{}{}#", self.prefix, key)
  }

  fn restore(&self, key: &K) -> u64 {
    self
      .store
      .as_ref()
      .and_then(|s| s.get(&self.store_key(key)))
      .map_or(0, |v| v.max(0) as u64)
  }

  fn clear(&self, key: &K) -> u64 {
    let previous = self.counts.lock().remove(key).unwrap_or(0);
    if let Some(store) = &self.store {
      store.remove_by_prefix(&self.store_key(key));
    }
    previous
  }
}

/// Counts how many times each event was delivered.
///
/// The first [`record_event`](Self::record_event) for a key returns `true`,
/// every redelivery returns `false` until the key is cleared. Clearing is
/// normally scheduled after a terminal event with a short delay so that late
/// redeliveries are still recognised as repeats.
pub struct AcknowledgementCounter<K> {
  shared: Arc<CounterShared<K>>,
}

impl<K> Clone for AcknowledgementCounter<K> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K> AcknowledgementCounter<K>
where
  K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
  pub fn builder() -> CounterBuilder<K> {
    CounterBuilder::new()
  }

  pub(crate) fn from_parts(
    scheduler: Arc<dyn UiScheduler>,
    clear_delay: Duration,
    store: Option<Arc<dyn CounterStore>>,
    prefix: String,
  ) -> Self {
    Self {
      shared: Arc::new(CounterShared {
        counts: Mutex::new(HashMap::new()),
        scheduler,
        clear_delay,
        store,
        prefix,
      }),
    }
  }

  /// Records one delivery of `key`. Returns `true` if it is the first.
  pub fn record_event(&self, key: K) -> bool {
    let shared = &self.shared;
    let store_key = shared.store.as_ref().map(|_| shared.store_key(&key));
    let mut counts = shared.counts.lock();
    let count = match counts.entry(key) {
      MapEntry::Occupied(e) => e.into_mut(),
      MapEntry::Vacant(e) => {
        let restored = shared.restore(e.key());
        e.insert(restored)
      }
    };
    let first = *count == 0;
    *count += 1;
    trace!(count = *count, first, "event recorded");
    if let (Some(store), Some(store_key)) = (&shared.store, &store_key) {
      store.put(store_key, *count as i64);
    }
    first
  }

  /// Current count for `key`.
  pub fn count(&self, key: &K) -> u64 {
    match self.shared.counts.lock().get(key) {
      Some(count) => *count,
      None => self.shared.restore(key),
    }
  }

  /// Clears `key` after the configured delay.
  pub fn schedule_clear(&self, key: K) {
    let weak = Arc::downgrade(&self.shared);
    self.shared.scheduler.post_delayed(
      self.shared.clear_delay,
      Box::new(move || {
        if let Some(shared) = weak.upgrade() {
          shared.clear(&key);
        }
      }),
    );
  }

  /// Clears `key` immediately, returning the count it had.
  pub fn clear_now(&self, key: &K) -> u64 {
    self.shared.clear(key)
  }

  /// Forgets every count, including persisted ones.
  pub fn clear_all(&self) {
    self.shared.counts.lock().clear();
    if let Some(store) = &self.shared.store {
      store.remove_by_prefix(&self.shared.prefix);
    }
  }

  pub fn clear_delay(&self) -> Duration {
    self.shared.clear_delay
  }
}

impl<K> SessionListener for AcknowledgementCounter<K>
where
  K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
  fn on_perform_user_cleanup(&self) {
    self.clear_all();
  }
}
