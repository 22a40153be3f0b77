//! A cache holding one resolved entry per key, in front of a batched
//! request function.
//!
//! Concurrent requests for a key that is already being fetched only add a
//! waiter; the transport sees at most one outstanding call per key. Results
//! are applied on the ui context and only if no restart happened while they
//! were in flight.

use crate::builder::KeyedCacheBuilder;
use crate::entry::{Entry, EntryWatcher, Resolution};
use crate::error::RequestError;
use crate::lifecycle::SessionListener;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::{Held, KeyedListenerRegistry, Membership};
use crate::runtime::UiScheduler;
use crate::transport::{BatchResult, EntrySource, Reply};

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

type Watcher<K, V, E> = dyn EntryWatcher<K, V, E>;

struct Slot<K, V, E> {
  entry: Entry<K, V, E>,
  valid: bool,
}

/// The mutex-protected maps of a keyed cache.
struct KeyedState<K, V, E> {
  generation: u64,
  entries: HashMap<K, Slot<K, V, E>>,
  pending: HashSet<K>,
  waiters: HashMap<K, Vec<Held<Watcher<K, V, E>>>>,
}

/// The internal, thread-safe core of the keyed cache.
pub(crate) struct KeyedShared<K, V, E> {
  scheduler: Arc<dyn UiScheduler>,
  source: Arc<dyn EntrySource<K, V, E>>,
  state: Mutex<KeyedState<K, V, E>>,
  subscribers: KeyedListenerRegistry<K, Watcher<K, V, E>>,
  metrics: Metrics,
  max_batch_size: usize,
}

impl<K, V, E> KeyedShared<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub(crate) fn new(
    scheduler: Arc<dyn UiScheduler>,
    source: Arc<dyn EntrySource<K, V, E>>,
    max_batch_size: usize,
  ) -> Self {
    let hook_source = source.clone();
    Self {
      scheduler,
      source,
      state: Mutex::new(KeyedState {
        generation: 0,
        entries: HashMap::new(),
        pending: HashSet::new(),
        waiters: HashMap::new(),
      }),
      subscribers: KeyedListenerRegistry::with_fullness_hook(Arc::new(move |key: &K, watched| {
        hook_source.on_watch_state_changed(key, watched)
      })),
      metrics: Metrics::new(),
      max_batch_size,
    }
  }

  /// Issues transport calls for `keys`, at most `max_batch_size` keys each.
  /// Must be called without holding the state lock.
  fn dispatch(self: &Arc<Self>, generation: u64, mut keys: Vec<K>) {
    while !keys.is_empty() {
      let rest = keys.split_off(keys.len().min(self.max_batch_size));
      let batch = std::mem::replace(&mut keys, rest);

      let requested = batch.clone();
      let weak = Arc::downgrade(self);
      let reply = Reply::new(move |result: Option<BatchResult<K, V, E>>| {
        // The cache may have been dropped while the call was in flight.
        if let Some(shared) = weak.upgrade() {
          let scheduler = shared.scheduler.clone();
          scheduler.post(Box::new(move || shared.apply(generation, requested, result)));
        }
      });

      Metrics::incr(&self.metrics.fetches);
      Metrics::add(&self.metrics.keys_fetched, batch.len() as u64);
      trace!(generation, keys = batch.len(), "requesting entries");
      self.source.request_data(batch, reply);
    }
  }

  /// Applies a batch result on the ui context.
  fn apply(&self, generation: u64, requested: Vec<K>, result: Option<BatchResult<K, V, E>>) {
    let mut deliveries = Vec::new();
    {
      let mut state = self.state.lock();
      if state.generation != generation {
        Metrics::add(&self.metrics.stale_dropped, requested.len() as u64);
        debug!(
          generation,
          current = state.generation,
          keys = requested.len(),
          "dropping stale entry results"
        );
        return;
      }

      let mut outstanding: HashSet<K> = requested.into_iter().collect();
      for (key, result) in result.unwrap_or_default() {
        if !outstanding.remove(&key) {
          debug!("ignoring a result for a key that was not part of the batch");
          continue;
        }
        if result.is_err() {
          Metrics::incr(&self.metrics.errors);
        }
        let entry = Entry::new(key.clone(), Resolution::from(result));
        state.pending.remove(&key);
        state.entries.insert(
          key.clone(),
          Slot {
            entry: entry.clone(),
            valid: true,
          },
        );
        let waiters: Vec<_> = state
          .waiters
          .remove(&key)
          .unwrap_or_default()
          .iter()
          .filter_map(Held::upgrade)
          .collect();
        deliveries.push((entry, waiters));
      }

      if !outstanding.is_empty() {
        Metrics::add(&self.metrics.abandoned, outstanding.len() as u64);
        warn!(
          keys = outstanding.len(),
          "transport left keys unresolved, they will be refetched on the next request"
        );
        for key in outstanding {
          state.pending.remove(&key);
        }
      }
    }

    for (entry, waiters) in deliveries {
      self.deliver(&entry, waiters);
    }
  }

  /// Notifies one-shot waiters, then persistent subscribers.
  fn deliver(&self, entry: &Entry<K, V, E>, waiters: Vec<Arc<Watcher<K, V, E>>>) {
    for waiter in waiters {
      waiter.on_entry(entry);
    }
    self
      .subscribers
      .notify(entry.key(), |subscriber| subscriber.on_entry(entry));
  }
}

/// A cache of remote entries keyed by `K`.
///
/// Cheap to clone; clones share the same state.
pub struct KeyedEntryCache<K, V, E> {
  pub(crate) shared: Arc<KeyedShared<K, V, E>>,
}

impl<K, V, E> Clone for KeyedEntryCache<K, V, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, E> fmt::Debug for KeyedEntryCache<K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyedEntryCache")
      .field("max_batch_size", &self.shared.max_batch_size)
      .field("metrics", &self.shared.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, E> KeyedEntryCache<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn builder() -> KeyedCacheBuilder<K, V, E> {
    KeyedCacheBuilder::new()
  }

  /// Requests the entry for `key`.
  ///
  /// A resolved, valid entry is delivered to `watcher` before this returns.
  /// Otherwise the watcher is queued until the entry resolves, and a fetch is
  /// issued unless one is already in flight for `key`. Must be called on the
  /// ui context.
  pub fn request(
    &self,
    key: K,
    watcher: &Arc<Watcher<K, V, E>>,
    membership: Membership,
  ) -> Result<(), RequestError> {
    self.request_many(std::iter::once(key), watcher, membership)
  }

  /// Requests several keys at once.
  ///
  /// Keys that need fetching and are not already in flight are grouped into
  /// as few transport calls as the batch size allows. Repeated keys count
  /// once, and a watcher already waiting on a key is not queued again, so
  /// it sees each resolution once. Every key is checked
  /// against the source first; if any is rejected nothing is registered.
  pub fn request_many<I>(
    &self,
    keys: I,
    watcher: &Arc<Watcher<K, V, E>>,
    membership: Membership,
  ) -> Result<(), RequestError>
  where
    I: IntoIterator<Item = K>,
  {
    let mut unique = HashSet::new();
    let keys: Vec<K> = keys.into_iter().filter(|k| unique.insert(k.clone())).collect();
    for key in &keys {
      self.shared.source.check_key(key)?;
    }

    let shared = &self.shared;
    let mut hits = Vec::new();
    let mut to_fetch = Vec::new();
    let generation;
    {
      let mut state = shared.state.lock();
      generation = state.generation;
      for key in keys {
        if let Some(slot) = state.entries.get(&key) {
          if slot.valid {
            hits.push(slot.entry.clone());
            continue;
          }
        }
        let waiting = state.waiters.entry(key.clone()).or_default();
        if !waiting.iter().any(|h| h.holds(watcher)) {
          waiting.push(Held::new(watcher, membership));
        }
        if state.pending.insert(key.clone()) {
          to_fetch.push(key);
        } else {
          Metrics::incr(&shared.metrics.coalesced);
        }
      }
    }

    Metrics::add(&shared.metrics.hits, hits.len() as u64);
    Metrics::add(&shared.metrics.misses, to_fetch.len() as u64);
    for entry in &hits {
      watcher.on_entry(entry);
    }
    if !to_fetch.is_empty() {
      shared.dispatch(generation, to_fetch);
    }
    Ok(())
  }

  /// Registers a persistent watcher, notified every time the entry for
  /// `key` is replaced. Returns `false` if it was already subscribed.
  pub fn subscribe(&self, key: &K, watcher: &Arc<Watcher<K, V, E>>, membership: Membership) -> bool {
    self.shared.subscribers.add(key, watcher, membership)
  }

  pub fn unsubscribe(&self, key: &K, watcher: &Arc<Watcher<K, V, E>>) -> bool {
    self.shared.subscribers.remove(key, watcher)
  }

  /// Stores a value pushed by the transport outside of any request.
  ///
  /// Applied on the ui context; waiters and subscribers of `key` are
  /// notified there.
  pub fn put(&self, key: K, value: V) {
    let shared = self.shared.clone();
    let generation = shared.state.lock().generation;
    self.shared.scheduler.post(Box::new(move || {
      let entry = Entry::new(key.clone(), Resolution::Value(Arc::new(value)));
      let waiters: Vec<_> = {
        let mut state = shared.state.lock();
        if state.generation != generation {
          Metrics::incr(&shared.metrics.stale_dropped);
          return;
        }
        state.entries.insert(
          key.clone(),
          Slot {
            entry: entry.clone(),
            valid: true,
          },
        );
        state
          .waiters
          .remove(&key)
          .unwrap_or_default()
          .iter()
          .filter_map(Held::upgrade)
          .collect()
      };
      shared.deliver(&entry, waiters);
    }));
  }

  /// Returns the stored entry for `key`, even if it was marked invalid.
  pub fn peek(&self, key: &K) -> Option<Entry<K, V, E>> {
    self
      .shared
      .state
      .lock()
      .entries
      .get(key)
      .map(|slot| slot.entry.clone())
  }

  /// Marks the entry for `key` as invalid so the next request refetches it.
  /// Returns `false` if there was no entry.
  pub fn invalidate(&self, key: &K) -> bool {
    match self.shared.state.lock().entries.get_mut(key) {
      Some(slot) => {
        slot.valid = false;
        true
      }
      None => false,
    }
  }

  /// Removes the entry for `key`.
  pub fn remove(&self, key: &K) -> Option<Entry<K, V, E>> {
    self
      .shared
      .state
      .lock()
      .entries
      .remove(key)
      .map(|slot| slot.entry)
  }

  /// Whether a fetch for `key` is currently in flight.
  pub fn is_pending(&self, key: &K) -> bool {
    self.shared.state.lock().pending.contains(key)
  }

  /// Number of stored entries.
  pub fn len(&self) -> usize {
    self.shared.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn generation(&self) -> u64 {
    self.shared.state.lock().generation
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Invalidates everything.
  ///
  /// In-flight results are dropped when they arrive. Keys that still have
  /// live waiters are fetched again right away under the new generation.
  pub fn restart(&self) {
    let shared = &self.shared;
    let (generation, refetch) = {
      let mut state = shared.state.lock();
      state.generation += 1;
      state.entries.clear();
      state.pending.clear();
      state.waiters.retain(|_, list| {
        list.retain(Held::is_alive);
        !list.is_empty()
      });
      let refetch: Vec<K> = state.waiters.keys().cloned().collect();
      state.pending.extend(refetch.iter().cloned());
      (state.generation, refetch)
    };

    Metrics::incr(&shared.metrics.restarts);
    debug!(generation, refetch = refetch.len(), "keyed cache restarted");
    if !refetch.is_empty() {
      shared.dispatch(generation, refetch);
    }
  }

  /// Drops all entries and waiters without refetching anything.
  pub fn clear(&self) {
    let mut state = self.shared.state.lock();
    state.generation += 1;
    state.entries.clear();
    state.pending.clear();
    state.waiters.clear();
  }
}

impl<K, V, E> SessionListener for KeyedEntryCache<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn on_perform_user_cleanup(&self) {
    self.clear();
  }

  fn on_perform_restart(&self) {
    self.restart();
  }
}
