//! The seam between the sync components and the remote transport.
//!
//! A component never performs a fetch itself. It hands the source a
//! [`Reply`] and goes back to the caller; the source completes the reply from
//! whatever thread its callback fires on.

use crate::error::RequestError;
use crate::paged::{PageOutcome, PageRequest};
use crate::runtime::TaskSpawner;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A one-shot completion handle for a single transport call.
///
/// Calling [`Reply::send`] delivers the result. Dropping the reply without
/// sending reports the call as abandoned, so the owning component can clear
/// its pending state instead of waiting forever.
pub struct Reply<T> {
  deliver: Option<Box<dyn FnOnce(Option<T>) + Send>>,
}

impl<T> Reply<T> {
  pub(crate) fn new(deliver: impl FnOnce(Option<T>) + Send + 'static) -> Self {
    Self {
      deliver: Some(Box::new(deliver)),
    }
  }

  /// Completes the call with `result`.
  pub fn send(mut self, result: T) {
    if let Some(deliver) = self.deliver.take() {
      deliver(Some(result));
    }
  }
}

impl<T> Drop for Reply<T> {
  fn drop(&mut self) {
    if let Some(deliver) = self.deliver.take() {
      deliver(None);
    }
  }
}

impl<T> fmt::Debug for Reply<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Reply")
      .field("completed", &self.deliver.is_none())
      .finish()
  }
}

/// The results of one batched keyed fetch.
pub type BatchResult<K, V, E> = Vec<(K, Result<V, E>)>;

/// The request function behind a `KeyedEntryCache`.
pub trait EntrySource<K, V, E>: Send + Sync + 'static {
  /// Rejects keys this source can never serve. Called before anything is
  /// registered; an error is returned straight to the requester.
  fn check_key(&self, _key: &K) -> Result<(), RequestError> {
    Ok(())
  }

  /// Fetches every key in `keys` with a single round trip.
  ///
  /// Keys missing from the reply are treated as abandoned.
  fn request_data(&self, keys: Vec<K>, reply: Reply<BatchResult<K, V, E>>);

  /// Called when a key gains its first persistent subscriber (`true`) or
  /// loses its last one (`false`).
  fn on_watch_state_changed(&self, _key: &K, _watched: bool) {}
}

/// The request factory behind a `SingleValueCache`.
pub trait ValueSource<V, E>: Send + Sync + 'static {
  /// Starts a fetch. Returns `false` when the request cannot be built yet,
  /// for example because it depends on parameters that are not known.
  fn fetch(&self, reply: Reply<Result<V, E>>) -> bool;
}

impl<V, E, F> ValueSource<V, E> for F
where
  F: Fn(Reply<Result<V, E>>) -> bool + Send + Sync + 'static,
{
  fn fetch(&self, reply: Reply<Result<V, E>>) -> bool {
    self(reply)
  }
}

/// The page loader behind a `PagedListTracker`.
pub trait PageSource<T, Id, E>: Send + Sync + 'static {
  /// Loads one page.
  fn load_page(&self, request: PageRequest<Id>, reply: Reply<PageOutcome<T, E>>);

  /// Loads an estimate of the total list size. The default reports nothing.
  fn load_total_count(&self, reply: Reply<Option<usize>>) {
    drop(reply);
  }

  /// Whether an item belongs in this list. Used for incremental updates.
  fn matches(&self, _item: &T) -> bool {
    true
  }

  /// Starts the upstream change feed for this list.
  fn subscribe_to_updates(&self) {}

  /// Stops the upstream change feed for this list.
  fn unsubscribe_from_updates(&self) {}
}

/// Adapts an async fetch function into an [`EntrySource`].
///
/// Each batch is spawned on the configured [`TaskSpawner`] and the reply is
/// completed from whichever worker finishes it.
pub struct AsyncEntrySource<K, V, E, F> {
  spawner: Arc<dyn TaskSpawner>,
  fetch: Arc<F>,
  _marker: PhantomData<fn(K) -> (V, E)>,
}

impl<K, V, E, F, Fut> AsyncEntrySource<K, V, E, F>
where
  F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = BatchResult<K, V, E>> + Send + 'static,
{
  pub fn new(spawner: Arc<dyn TaskSpawner>, fetch: F) -> Self {
    Self {
      spawner,
      fetch: Arc::new(fetch),
      _marker: PhantomData,
    }
  }
}

impl<K, V, E, F, Fut> EntrySource<K, V, E> for AsyncEntrySource<K, V, E, F>
where
  K: Send + 'static,
  V: Send + 'static,
  E: Send + 'static,
  F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = BatchResult<K, V, E>> + Send + 'static,
{
  fn request_data(&self, keys: Vec<K>, reply: Reply<BatchResult<K, V, E>>) {
    let fetch = self.fetch.clone();
    self.spawner.spawn(Box::pin(async move {
      let results = fetch(keys).await;
      reply.send(results);
    }));
  }
}
