use std::fmt;
use std::sync::Arc;

/// The resolved state of a cached key: either a value or the error the
/// transport returned for it.
#[derive(Debug)]
pub enum Resolution<V, E> {
  Value(Arc<V>),
  Error(Arc<E>),
}

impl<V, E> Clone for Resolution<V, E> {
  fn clone(&self) -> Self {
    match self {
      Resolution::Value(v) => Resolution::Value(v.clone()),
      Resolution::Error(e) => Resolution::Error(e.clone()),
    }
  }
}

impl<V, E> From<Result<V, E>> for Resolution<V, E> {
  fn from(result: Result<V, E>) -> Self {
    match result {
      Ok(value) => Resolution::Value(Arc::new(value)),
      Err(error) => Resolution::Error(Arc::new(error)),
    }
  }
}

/// A resolved cache slot. Entries are immutable; a refetch produces a new
/// `Entry` that replaces the old one under the same key.
pub struct Entry<K, V, E> {
  key: K,
  resolution: Resolution<V, E>,
}

impl<K, V, E> Entry<K, V, E> {
  pub(crate) fn new(key: K, resolution: Resolution<V, E>) -> Self {
    Self { key, resolution }
  }

  #[inline]
  pub fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub fn resolution(&self) -> &Resolution<V, E> {
    &self.resolution
  }

  /// Returns the value, if the fetch succeeded.
  pub fn value(&self) -> Option<&Arc<V>> {
    match &self.resolution {
      Resolution::Value(v) => Some(v),
      Resolution::Error(_) => None,
    }
  }

  /// Returns the transport error, if the fetch failed.
  pub fn error(&self) -> Option<&Arc<E>> {
    match &self.resolution {
      Resolution::Value(_) => None,
      Resolution::Error(e) => Some(e),
    }
  }

  pub fn is_error(&self) -> bool {
    matches!(self.resolution, Resolution::Error(_))
  }
}

impl<K: Clone, V, E> Clone for Entry<K, V, E> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      resolution: self.resolution.clone(),
    }
  }
}

impl<K: fmt::Debug, V, E> fmt::Debug for Entry<K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Entry")
      .field("key", &self.key)
      .field("is_error", &self.is_error())
      .finish()
  }
}

/// A watcher interested in the resolution of one or more keys.
pub trait EntryWatcher<K, V, E>: Send + Sync {
  fn on_entry(&self, entry: &Entry<K, V, E>);
}

impl<K, V, E, F> EntryWatcher<K, V, E> for F
where
  F: Fn(&Entry<K, V, E>) + Send + Sync,
{
  fn on_entry(&self, entry: &Entry<K, V, E>) {
    self(entry)
  }
}
