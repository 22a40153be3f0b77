//! A cache for exactly one globally scoped remote value.

use crate::builder::SingleValueBuilder;
use crate::lifecycle::SessionListener;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::registry::{ListenerRegistry, Membership};
use crate::runtime::UiScheduler;
use crate::transport::{Reply, ValueSource};

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// What a `get` callback receives.
#[derive(Debug)]
pub enum Lookup<V, E> {
  Ready(Arc<V>),
  Failed(Arc<E>),
  /// The value is temporarily unknown: a restart released the caller, or the
  /// source could not build the request yet. Re-request if still needed.
  Unknown,
}

impl<V, E> Clone for Lookup<V, E> {
  fn clone(&self) -> Self {
    match self {
      Lookup::Ready(v) => Lookup::Ready(v.clone()),
      Lookup::Failed(e) => Lookup::Failed(e.clone()),
      Lookup::Unknown => Lookup::Unknown,
    }
  }
}

impl<V, E> Lookup<V, E> {
  pub fn value(&self) -> Option<&Arc<V>> {
    match self {
      Lookup::Ready(v) => Some(v),
      _ => None,
    }
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, Lookup::Unknown)
  }
}

type Callback<V, E> = Box<dyn FnOnce(Lookup<V, E>) + Send>;

/// Receives values pushed with [`SingleValueCache::set`] or loaded by a fetch.
pub trait ValueListener<V>: Send + Sync {
  fn on_value_changed(&self, value: &Arc<V>);
}

impl<V, F> ValueListener<V> for F
where
  F: Fn(&Arc<V>) + Send + Sync,
{
  fn on_value_changed(&self, value: &Arc<V>) {
    self(value)
  }
}

struct SingleState<V, E> {
  generation: u64,
  value: Option<Arc<V>>,
  loading: bool,
  callbacks: Vec<Callback<V, E>>,
}

pub(crate) struct SingleShared<V, E> {
  scheduler: Arc<dyn UiScheduler>,
  source: Arc<dyn ValueSource<V, E>>,
  state: Mutex<SingleState<V, E>>,
  listeners: ListenerRegistry<dyn ValueListener<V>>,
  metrics: Metrics,
}

impl<V, E> SingleShared<V, E>
where
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub(crate) fn new(scheduler: Arc<dyn UiScheduler>, source: Arc<dyn ValueSource<V, E>>) -> Self {
    Self {
      scheduler,
      source,
      state: Mutex::new(SingleState {
        generation: 0,
        value: None,
        loading: false,
        callbacks: Vec::new(),
      }),
      listeners: ListenerRegistry::new(),
      metrics: Metrics::new(),
    }
  }

  fn start_fetch(self: &Arc<Self>, generation: u64) {
    let weak = Arc::downgrade(self);
    let reply = Reply::new(move |result: Option<Result<V, E>>| {
      if let Some(shared) = weak.upgrade() {
        let scheduler = shared.scheduler.clone();
        scheduler.post(Box::new(move || shared.apply(generation, result)));
      }
    });

    Metrics::incr(&self.metrics.fetches);
    trace!(generation, "fetching single value");
    if !self.source.fetch(reply) {
      // The reply was dropped unsent inside `fetch`, which already queued an
      // `Unknown` release for this generation.
      debug!("value source could not build a request yet");
    }
  }

  fn apply(&self, generation: u64, result: Option<Result<V, E>>) {
    let (callbacks, lookup) = {
      let mut state = self.state.lock();
      if state.generation != generation {
        Metrics::incr(&self.metrics.stale_dropped);
        debug!(generation, current = state.generation, "dropping stale value");
        return;
      }
      state.loading = false;
      let lookup = match result {
        Some(Ok(value)) => {
          let value = Arc::new(value);
          state.value = Some(value.clone());
          Lookup::Ready(value)
        }
        Some(Err(error)) => {
          Metrics::incr(&self.metrics.errors);
          Lookup::Failed(Arc::new(error))
        }
        None => {
          Metrics::incr(&self.metrics.abandoned);
          Lookup::Unknown
        }
      };
      (std::mem::take(&mut state.callbacks), lookup)
    };

    for callback in callbacks {
      callback(lookup.clone());
    }
    if let Lookup::Ready(value) = &lookup {
      self.listeners.notify_all(|l| l.on_value_changed(value));
    }
  }
}

/// Caches one value behind a lazily built request.
///
/// Cheap to clone; clones share the same state.
pub struct SingleValueCache<V, E> {
  pub(crate) shared: Arc<SingleShared<V, E>>,
}

impl<V, E> Clone for SingleValueCache<V, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<V, E> fmt::Debug for SingleValueCache<V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SingleValueCache")
      .field("metrics", &self.shared.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<V, E> SingleValueCache<V, E>
where
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn builder() -> SingleValueBuilder<V, E> {
    SingleValueBuilder::new()
  }

  /// Delivers the value to `on_done`.
  ///
  /// A cached value is delivered before this returns. Otherwise the callback
  /// is queued and released together with every other caller once the fetch
  /// completes; the first queued caller starts the fetch.
  pub fn get<F>(&self, on_done: F)
  where
    F: FnOnce(Lookup<V, E>) + Send + 'static,
  {
    let shared = &self.shared;
    let mut state = shared.state.lock();
    if let Some(value) = state.value.clone() {
      drop(state);
      Metrics::incr(&shared.metrics.hits);
      on_done(Lookup::Ready(value));
      return;
    }

    state.callbacks.push(Box::new(on_done));
    if state.loading {
      Metrics::incr(&shared.metrics.coalesced);
      return;
    }
    state.loading = true;
    let generation = state.generation;
    drop(state);

    Metrics::incr(&shared.metrics.misses);
    shared.start_fetch(generation);
  }

  /// Returns the cached value without fetching.
  pub fn peek(&self) -> Option<Arc<V>> {
    self.shared.state.lock().value.clone()
  }

  /// Replaces the value with one pushed by the transport and releases any
  /// queued callers with it. Applied on the ui context.
  pub fn set(&self, value: V) {
    let shared = self.shared.clone();
    let generation = shared.state.lock().generation;
    self.shared.scheduler.post(Box::new(move || {
      shared.apply(generation, Some(Ok(value)));
    }));
  }

  pub fn add_listener(&self, listener: &Arc<dyn ValueListener<V>>, membership: Membership) -> bool {
    self.shared.listeners.add(listener, membership)
  }

  pub fn remove_listener(&self, listener: &Arc<dyn ValueListener<V>>) -> bool {
    self.shared.listeners.remove(listener)
  }

  /// Whether a fetch is in flight.
  pub fn is_loading(&self) -> bool {
    self.shared.state.lock().loading
  }

  pub fn generation(&self) -> u64 {
    self.shared.state.lock().generation
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Invalidates the value.
  ///
  /// Bumps the generation, forgets the cached value and releases every queued
  /// caller with [`Lookup::Unknown`] right away. A fetch still in flight is
  /// dropped when it completes.
  pub fn on_perform_restart(&self) {
    let (generation, callbacks) = {
      let mut state = self.shared.state.lock();
      state.generation += 1;
      state.value = None;
      state.loading = false;
      (state.generation, std::mem::take(&mut state.callbacks))
    };
    Metrics::incr(&self.shared.metrics.restarts);
    debug!(generation, released = callbacks.len(), "single value cache restarted");
    for callback in callbacks {
      callback(Lookup::Unknown);
    }
  }
}

impl<V, E> SessionListener for SingleValueCache<V, E>
where
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn on_perform_user_cleanup(&self) {
    SingleValueCache::on_perform_restart(self);
  }

  fn on_perform_restart(&self) {
    SingleValueCache::on_perform_restart(self);
  }
}
