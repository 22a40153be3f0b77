use super::diff::ListItem;

use std::cmp::Ordering;
use std::sync::Arc;

use ahash::{HashSet, HashSetExt};

/// Orders the items of a list. Must be a strict weak ordering.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Result of moving an item to its sorted position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Placement<T> {
  Unchanged(usize),
  Moved { from: usize, to: usize },
  /// The item sorts past the loaded window and was taken out of the list.
  Dropped(usize, T),
}

/// Ordered, deduplicated items plus the set of every id ever accepted.
///
/// Every id in `items` is in `seen`; `seen` only shrinks on `reset`.
pub(crate) struct ListState<T: ListItem> {
  items: Vec<T>,
  seen: HashSet<T::Id>,
}

impl<T: ListItem> ListState<T> {
  pub(crate) fn new() -> Self {
    Self {
      items: Vec::new(),
      seen: HashSet::new(),
    }
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.items.len()
  }

  #[inline]
  pub(crate) fn items(&self) -> &[T] {
    &self.items
  }

  #[inline]
  pub(crate) fn get(&self, index: usize) -> Option<&T> {
    self.items.get(index)
  }

  pub(crate) fn last_id(&self) -> Option<T::Id> {
    self.items.last().map(ListItem::id)
  }

  pub(crate) fn has_seen(&self, id: &T::Id) -> bool {
    self.seen.contains(id)
  }

  pub(crate) fn index_of(&self, id: &T::Id) -> Option<usize> {
    self.items.iter().position(|item| &item.id() == id)
  }

  /// Appends the items of a page whose ids were never seen, keeping the
  /// order they arrived in. Returns clones of the appended items.
  pub(crate) fn append_page(&mut self, page: Vec<T>) -> Vec<T> {
    let mut appended = Vec::with_capacity(page.len());
    for item in page {
      if self.seen.insert(item.id()) {
        appended.push(item.clone());
        self.items.push(item);
      }
    }
    appended
  }

  fn sorted_position(&self, item: &T, cmp: &Comparator<T>) -> usize {
    self
      .items
      .partition_point(|probe| cmp(probe, item) != Ordering::Greater)
  }

  /// Inserts `item` at its sorted position.
  ///
  /// An item that sorts after the last loaded one is only inserted when the
  /// list is complete; otherwise it belongs to a page not loaded yet and
  /// `None` is returned. An id already in the list is never inserted twice.
  pub(crate) fn insert_sorted(&mut self, item: T, cmp: &Comparator<T>, complete: bool) -> Option<usize> {
    if self.index_of(&item.id()).is_some() {
      return None;
    }
    let index = self.sorted_position(&item, cmp);
    if index == self.items.len() && !complete {
      return None;
    }
    self.seen.insert(item.id());
    self.items.insert(index, item);
    Some(index)
  }

  /// Replaces the item at `index` and moves it to its sorted position.
  pub(crate) fn replace_at(&mut self, index: usize, item: T, cmp: &Comparator<T>, complete: bool) -> Placement<T> {
    self.seen.insert(item.id());
    self.items[index] = item;
    self.reposition(index, cmp, complete)
  }

  /// Moves the item at `index` to where the comparator says it belongs.
  pub(crate) fn reposition(&mut self, index: usize, cmp: &Comparator<T>, complete: bool) -> Placement<T> {
    let item = self.items.remove(index);
    let to = self.sorted_position(&item, cmp);
    if to == index {
      self.items.insert(index, item);
      Placement::Unchanged(index)
    } else if to == self.items.len() && !complete {
      Placement::Dropped(index, item)
    } else {
      self.items.insert(to, item);
      Placement::Moved { from: index, to }
    }
  }

  pub(crate) fn item_mut(&mut self, index: usize) -> &mut T {
    &mut self.items[index]
  }

  pub(crate) fn remove_at(&mut self, index: usize) -> T {
    self.items.remove(index)
  }

  pub(crate) fn reset(&mut self) {
    self.items.clear();
    self.seen.clear();
  }
}
