//! Builders for the sync components.
//!
//! Every component needs a [`UiScheduler`]; the fetching ones also need a
//! source. Tunables default to the values in [`crate::config`] and can be
//! taken from a [`SyncConfig`] in one go.

use crate::config::{
  SyncConfig, DEFAULT_ACK_CLEAR_DELAY_MS, DEFAULT_COUNTER_PREFIX, DEFAULT_INITIAL_PAGE_SIZE,
  DEFAULT_MAX_BATCH_SIZE, DEFAULT_PAGE_SIZE,
};
use crate::counter::{AcknowledgementCounter, CounterStore};
use crate::error::BuildError;
use crate::keyed::{KeyedEntryCache, KeyedShared};
use crate::paged::{Comparator, ListItem, PagedListTracker, PagedShared};
use crate::runtime::UiScheduler;
use crate::single::{SingleShared, SingleValueCache};
use crate::transport::{EntrySource, PageSource, ValueSource};

use core::fmt;
use std::cmp::Ordering;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// A builder for [`KeyedEntryCache`].
pub struct KeyedCacheBuilder<K, V, E> {
  scheduler: Option<Arc<dyn UiScheduler>>,
  source: Option<Arc<dyn EntrySource<K, V, E>>>,
  max_batch_size: usize,
}

impl<K, V, E> fmt::Debug for KeyedCacheBuilder<K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyedCacheBuilder")
      .field("has_scheduler", &self.scheduler.is_some())
      .field("has_source", &self.source.is_some())
      .field("max_batch_size", &self.max_batch_size)
      .finish()
  }
}

impl<K, V, E> Default for KeyedCacheBuilder<K, V, E> {
  fn default() -> Self {
    Self {
      scheduler: None,
      source: None,
      max_batch_size: DEFAULT_MAX_BATCH_SIZE,
    }
  }
}

impl<K, V, E> KeyedCacheBuilder<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  pub fn scheduler(mut self, scheduler: Arc<dyn UiScheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  pub fn source(mut self, source: impl EntrySource<K, V, E>) -> Self {
    self.source = Some(Arc::new(source));
    self
  }

  /// Uses a source that is shared with other owners.
  pub fn shared_source(mut self, source: Arc<dyn EntrySource<K, V, E>>) -> Self {
    self.source = Some(source);
    self
  }

  /// Sets the largest number of keys sent in one transport call.
  pub fn max_batch_size(mut self, size: usize) -> Self {
    self.max_batch_size = size;
    self
  }

  /// Takes every relevant tunable from `config`.
  pub fn config(self, config: &SyncConfig) -> Self {
    self.max_batch_size(config.max_batch_size)
  }

  pub fn build(self) -> Result<KeyedEntryCache<K, V, E>, BuildError> {
    let scheduler = self.scheduler.ok_or(BuildError::SchedulerRequired)?;
    let source = self.source.ok_or(BuildError::SourceRequired)?;
    if self.max_batch_size == 0 {
      return Err(BuildError::ZeroBatchSize);
    }
    Ok(KeyedEntryCache {
      shared: Arc::new(KeyedShared::new(scheduler, source, self.max_batch_size)),
    })
  }
}

/// A builder for [`SingleValueCache`].
pub struct SingleValueBuilder<V, E> {
  scheduler: Option<Arc<dyn UiScheduler>>,
  source: Option<Arc<dyn ValueSource<V, E>>>,
}

impl<V, E> fmt::Debug for SingleValueBuilder<V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SingleValueBuilder")
      .field("has_scheduler", &self.scheduler.is_some())
      .field("has_source", &self.source.is_some())
      .finish()
  }
}

impl<V, E> Default for SingleValueBuilder<V, E> {
  fn default() -> Self {
    Self {
      scheduler: None,
      source: None,
    }
  }
}

impl<V, E> SingleValueBuilder<V, E>
where
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  pub fn scheduler(mut self, scheduler: Arc<dyn UiScheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Sets the request factory. Closures of the form
  /// `Fn(Reply<Result<V, E>>) -> bool` are accepted directly.
  pub fn source(mut self, source: impl ValueSource<V, E>) -> Self {
    self.source = Some(Arc::new(source));
    self
  }

  pub fn shared_source(mut self, source: Arc<dyn ValueSource<V, E>>) -> Self {
    self.source = Some(source);
    self
  }

  pub fn build(self) -> Result<SingleValueCache<V, E>, BuildError> {
    let scheduler = self.scheduler.ok_or(BuildError::SchedulerRequired)?;
    let source = self.source.ok_or(BuildError::SourceRequired)?;
    Ok(SingleValueCache {
      shared: Arc::new(SingleShared::new(scheduler, source)),
    })
  }
}

/// A builder for [`PagedListTracker`].
pub struct PagedListBuilder<T: ListItem, E> {
  scheduler: Option<Arc<dyn UiScheduler>>,
  source: Option<Arc<dyn PageSource<T, T::Id, E>>>,
  comparator: Option<Comparator<T>>,
  page_size: usize,
  initial_page_size: usize,
}

impl<T: ListItem, E> fmt::Debug for PagedListBuilder<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PagedListBuilder")
      .field("has_scheduler", &self.scheduler.is_some())
      .field("has_source", &self.source.is_some())
      .field("has_comparator", &self.comparator.is_some())
      .field("page_size", &self.page_size)
      .field("initial_page_size", &self.initial_page_size)
      .finish()
  }
}

impl<T: ListItem, E> Default for PagedListBuilder<T, E> {
  fn default() -> Self {
    Self {
      scheduler: None,
      source: None,
      comparator: None,
      page_size: DEFAULT_PAGE_SIZE,
      initial_page_size: DEFAULT_INITIAL_PAGE_SIZE,
    }
  }
}

impl<T, E> PagedListBuilder<T, E>
where
  T: ListItem,
  E: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  pub fn scheduler(mut self, scheduler: Arc<dyn UiScheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  pub fn source(mut self, source: impl PageSource<T, T::Id, E>) -> Self {
    self.source = Some(Arc::new(source));
    self
  }

  pub fn shared_source(mut self, source: Arc<dyn PageSource<T, T::Id, E>>) -> Self {
    self.source = Some(source);
    self
  }

  /// Sets the list order. Must be consistent with the order the source
  /// returns pages in.
  pub fn comparator(mut self, cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
    self.comparator = Some(Arc::new(cmp));
    self
  }

  /// Orders the list by a key extracted from each item.
  pub fn order_by<O, F>(self, key: F) -> Self
  where
    O: Ord,
    F: Fn(&T) -> O + Send + Sync + 'static,
  {
    self.comparator(move |a, b| key(a).cmp(&key(b)))
  }

  /// Sets the size of every page after the first.
  pub fn page_size(mut self, size: usize) -> Self {
    self.page_size = size;
    self
  }

  /// Sets the size of the first page.
  pub fn initial_page_size(mut self, size: usize) -> Self {
    self.initial_page_size = size;
    self
  }

  pub fn config(self, config: &SyncConfig) -> Self {
    self
      .page_size(config.page_size)
      .initial_page_size(config.initial_page_size)
  }

  pub fn build(self) -> Result<PagedListTracker<T, E>, BuildError> {
    let scheduler = self.scheduler.ok_or(BuildError::SchedulerRequired)?;
    let source = self.source.ok_or(BuildError::SourceRequired)?;
    let comparator = self.comparator.ok_or(BuildError::ComparatorRequired)?;
    if self.page_size == 0 || self.initial_page_size == 0 {
      return Err(BuildError::ZeroPageSize);
    }
    Ok(PagedListTracker {
      shared: Arc::new(PagedShared::new(
        scheduler,
        source,
        comparator,
        self.page_size,
        self.initial_page_size,
      )),
    })
  }
}

/// A builder for [`AcknowledgementCounter`].
pub struct CounterBuilder<K> {
  scheduler: Option<Arc<dyn UiScheduler>>,
  clear_delay: Duration,
  store: Option<Arc<dyn CounterStore>>,
  prefix: String,
  _key_marker: PhantomData<fn(K)>,
}

impl<K> fmt::Debug for CounterBuilder<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CounterBuilder")
      .field("has_scheduler", &self.scheduler.is_some())
      .field("clear_delay", &self.clear_delay)
      .field("has_store", &self.store.is_some())
      .field("prefix", &self.prefix)
      .finish()
  }
}

impl<K> Default for CounterBuilder<K> {
  fn default() -> Self {
    Self {
      scheduler: None,
      clear_delay: Duration::from_millis(DEFAULT_ACK_CLEAR_DELAY_MS),
      store: None,
      prefix: DEFAULT_COUNTER_PREFIX.to_string(),
      _key_marker: PhantomData,
    }
  }
}

impl<K> CounterBuilder<K>
where
  K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  pub fn scheduler(mut self, scheduler: Arc<dyn UiScheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Sets how long `schedule_clear` waits before forgetting a key.
  pub fn clear_delay(mut self, delay: Duration) -> Self {
    self.clear_delay = delay;
    self
  }

  /// Persists counts in `store` so they survive a restart.
  pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Sets the prefix of every persisted key.
  pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn config(self, config: &SyncConfig) -> Self {
    self
      .clear_delay(config.ack_clear_delay())
      .prefix(config.counter_prefix.clone())
  }

  pub fn build(self) -> Result<AcknowledgementCounter<K>, BuildError> {
    let scheduler = self.scheduler.ok_or(BuildError::SchedulerRequired)?;
    Ok(AcknowledgementCounter::from_parts(
      scheduler,
      self.clear_delay,
      self.store,
      self.prefix,
    ))
  }
}
