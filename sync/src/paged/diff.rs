use std::fmt;
use std::hash::Hash;

/// An item that can live in a paged list.
pub trait ListItem: Clone + Send + Sync + 'static {
  type Id: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

  fn id(&self) -> Self::Id;
}

/// Where a tracked list stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ListStatus {
  /// Nothing requested yet, or the list was reset.
  Empty,
  /// A page request is in flight.
  Loading,
  /// Some pages are loaded and more may exist.
  Partial,
  /// Every item has been loaded.
  Complete,
  /// The last page request failed. `load_more` retries.
  Error,
}

impl fmt::Display for ListStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ListStatus::Empty => "empty",
      ListStatus::Loading => "loading",
      ListStatus::Partial => "partial",
      ListStatus::Complete => "complete",
      ListStatus::Error => "error",
    };
    f.write_str(s)
  }
}

/// A single structural change applied to a list.
#[derive(Debug, Clone, PartialEq)]
pub enum ListDiff<T> {
  Added { item: T, index: usize },
  Removed { item: T, index: usize },
  Moved { item: T, from: usize, to: usize },
  MetadataChanged { item: T, index: usize },
}

impl<T> ListDiff<T> {
  pub fn item(&self) -> &T {
    match self {
      ListDiff::Added { item, .. }
      | ListDiff::Removed { item, .. }
      | ListDiff::Moved { item, .. }
      | ListDiff::MetadataChanged { item, .. } => item,
    }
  }
}

/// Parameters of one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<Id> {
  /// Number of items already loaded.
  pub offset: usize,
  /// Number of items wanted. A shorter answer means the list is complete.
  pub limit: usize,
  /// Id of the last loaded item, for cursor-based sources.
  pub after: Option<Id>,
}

/// What a source answers to a page request.
#[derive(Debug)]
pub enum PageOutcome<T, E> {
  Items {
    items: Vec<T>,
    total_count: Option<usize>,
  },
  /// There is nothing past the last loaded item.
  EndOfData,
  Failed(E),
}

impl<T, E> PageOutcome<T, E> {
  pub fn items(items: Vec<T>) -> Self {
    PageOutcome::Items {
      items,
      total_count: None,
    }
  }
}

/// Observes a tracked list. Every method defaults to a no-op.
pub trait ListChangeListener<T>: Send + Sync {
  /// A page appended `items`, the first of them at `start`.
  fn on_items_added(&self, _items: &[T], _start: usize) {}

  /// An incremental update changed the list.
  fn on_diff(&self, _diff: &ListDiff<T>) {}

  fn on_status_changed(&self, _status: ListStatus) {}

  /// The advisory total count changed.
  fn on_total_count_changed(&self, _count: Option<usize>) {}

  /// Everything was dropped by a reset.
  fn on_list_reset(&self) {}
}
