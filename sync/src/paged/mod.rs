//! A sorted, deduplicated list assembled from paginated fetches and kept up
//! to date by incremental updates.
//!
//! Pages are appended in the order the source returns them. Incremental
//! updates are placed with the comparator and each produces exactly one
//! [`ListDiff`], except a replacement whose new id is already loaded: that
//! reports the removal of the old slot, then the update of the loaded item.
//! An id is never held twice.
//!
//! An update that would land after the last loaded item of an incomplete
//! list is not inserted: that position belongs to a page that has not been
//! loaded yet, and the page will bring the item when it arrives.

mod diff;
mod state;

pub use diff::{ListChangeListener, ListDiff, ListItem, ListStatus, PageOutcome, PageRequest};
pub use state::Comparator;

use crate::builder::PagedListBuilder;
use crate::lifecycle::SessionListener;
use crate::registry::{ListenerRegistry, Membership};
use crate::runtime::UiScheduler;
use crate::transport::{PageSource, Reply};

use state::{ListState, Placement};

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

type Listener<T> = dyn ListChangeListener<T>;

struct PagedState<T: ListItem, E> {
  list: ListState<T>,
  status: ListStatus,
  generation: u64,
  total_count: Option<usize>,
  last_error: Option<Arc<E>>,
}

impl<T: ListItem, E> PagedState<T, E> {
  fn is_complete(&self) -> bool {
    self.status == ListStatus::Complete
  }

  /// Applies a ±1 change to a known total. Returns the new value if it
  /// changed.
  fn adjust_total(&mut self, delta: isize) -> Option<Option<usize>> {
    let current = self.total_count?;
    let next = current.saturating_add_signed(delta);
    (next != current).then(|| {
      self.total_count = Some(next);
      Some(next)
    })
  }
}

/// What an update produced, reported once the lock is released.
struct Changes<T> {
  diffs: Vec<ListDiff<T>>,
  total: Option<Option<usize>>,
}

impl<T> Changes<T> {
  fn none() -> Self {
    Self {
      diffs: Vec::new(),
      total: None,
    }
  }

  fn one(diff: ListDiff<T>, total: Option<Option<usize>>) -> Self {
    Self {
      diffs: vec![diff],
      total,
    }
  }
}

pub(crate) struct PagedShared<T: ListItem, E> {
  scheduler: Arc<dyn UiScheduler>,
  source: Arc<dyn PageSource<T, T::Id, E>>,
  comparator: Comparator<T>,
  state: Mutex<PagedState<T, E>>,
  listeners: ListenerRegistry<Listener<T>>,
  page_size: usize,
  initial_page_size: usize,
}

impl<T, E> PagedShared<T, E>
where
  T: ListItem,
  E: Send + Sync + 'static,
{
  pub(crate) fn new(
    scheduler: Arc<dyn UiScheduler>,
    source: Arc<dyn PageSource<T, T::Id, E>>,
    comparator: Comparator<T>,
    page_size: usize,
    initial_page_size: usize,
  ) -> Self {
    let hook_source = source.clone();
    Self {
      scheduler,
      source,
      comparator,
      state: Mutex::new(PagedState {
        list: ListState::new(),
        status: ListStatus::Empty,
        generation: 0,
        total_count: None,
        last_error: None,
      }),
      listeners: ListenerRegistry::with_fullness_listener(Arc::new(move |is_full: bool| {
        if is_full {
          hook_source.subscribe_to_updates();
        } else {
          hook_source.unsubscribe_from_updates();
        }
      })),
      page_size,
      initial_page_size,
    }
  }

  fn set_status(&self, status: ListStatus) {
    self.listeners.notify_all(|l| l.on_status_changed(status));
  }

  fn report(&self, changes: Changes<T>) {
    for diff in &changes.diffs {
      self.listeners.notify_all(|l| l.on_diff(diff));
    }
    if let Some(count) = changes.total {
      self.listeners.notify_all(|l| l.on_total_count_changed(count));
    }
  }

  fn post(self: &Arc<Self>, task: impl FnOnce(&Self) + Send + 'static) {
    let shared = self.clone();
    self.scheduler.post(Box::new(move || task(&shared)));
  }

  fn apply_page(&self, generation: u64, limit: usize, outcome: Option<PageOutcome<T, E>>) {
    let (appended, start, status, total) = {
      let mut state = self.state.lock();
      if state.generation != generation {
        debug!(generation, current = state.generation, "dropping stale page");
        return;
      }

      let start = state.list.len();
      let mut appended = Vec::new();
      let mut total = None;
      let status = match outcome {
        Some(PageOutcome::Items { items, total_count }) => {
          let received = items.len();
          appended = state.list.append_page(items);
          if let (Some(count), None) = (total_count, state.total_count) {
            state.total_count = Some(count);
            total = Some(Some(count));
          }
          trace!(received, appended = appended.len(), start, "page applied");
          if received < limit {
            ListStatus::Complete
          } else {
            ListStatus::Partial
          }
        }
        Some(PageOutcome::EndOfData) => ListStatus::Complete,
        Some(PageOutcome::Failed(error)) => {
          state.last_error = Some(Arc::new(error));
          ListStatus::Error
        }
        None => {
          warn!("page request was abandoned by the source");
          if state.list.len() == 0 {
            ListStatus::Empty
          } else {
            ListStatus::Partial
          }
        }
      };
      if status != ListStatus::Error {
        state.last_error = None;
      }
      state.status = status;
      (appended, start, status, total)
    };

    if !appended.is_empty() {
      self.listeners.notify_all(|l| l.on_items_added(&appended, start));
    }
    if let Some(count) = total {
      self.listeners.notify_all(|l| l.on_total_count_changed(count));
    }
    self.set_status(status);
  }

  fn apply_total_count(&self, generation: u64, count: Option<usize>) {
    {
      let mut state = self.state.lock();
      if state.generation != generation || count.is_none() || state.total_count.is_some() {
        return;
      }
      state.total_count = count;
    }
    self.listeners.notify_all(|l| l.on_total_count_changed(count));
  }

  fn upsert(&self, item: T) {
    let matches = self.source.matches(&item);
    self.upsert_matched(item, matches);
  }

  fn upsert_matched(&self, item: T, matches: bool) {
    let id = item.id();
    let changes = {
      let mut state = self.state.lock();
      let complete = state.is_complete();
      match (state.list.index_of(&id), matches) {
        (Some(index), true) => {
          let placement = state.list.replace_at(index, item, &self.comparator, complete);
          Changes::one(placed(state.list.items(), placement), None)
        }
        (Some(index), false) => {
          let removed = state.list.remove_at(index);
          let total = state.adjust_total(-1);
          Changes::one(ListDiff::Removed { item: removed, index }, total)
        }
        (None, true) => {
          let total = state.adjust_total(1);
          match state.list.insert_sorted(item.clone(), &self.comparator, complete) {
            Some(index) => Changes::one(ListDiff::Added { item, index }, total),
            None => {
              trace!(?id, "item sorts into an unloaded page");
              Changes {
                diffs: Vec::new(),
                total,
              }
            }
          }
        }
        (None, false) => {
          trace!(?id, "ignoring an item that does not belong to this list");
          Changes::none()
        }
      }
    };
    self.report(changes);
  }

  fn update_in_place(&self, id: T::Id, update: impl FnOnce(&mut T)) {
    let current = {
      let state = self.state.lock();
      state.list.index_of(&id).and_then(|index| state.list.get(index).cloned())
    };
    let Some(mut item) = current else {
      debug!(?id, "update for an item that is not in the list");
      return;
    };
    update(&mut item);
    let matches = self.source.matches(&item);
    if item.id() != id {
      return self.replace_matched(id, item, matches);
    }

    let changes = {
      let mut state = self.state.lock();
      let Some(index) = state.list.index_of(&id) else {
        debug!(?id, "updated item left the list while the update ran");
        return;
      };
      let complete = state.is_complete();
      if matches {
        let placement = state.list.replace_at(index, item, &self.comparator, complete);
        Changes::one(placed(state.list.items(), placement), None)
      } else {
        let removed = state.list.remove_at(index);
        let total = state.adjust_total(-1);
        Changes::one(ListDiff::Removed { item: removed, index }, total)
      }
    };
    self.report(changes);
  }

  fn remove(&self, id: T::Id) {
    let changes = {
      let mut state = self.state.lock();
      match state.list.index_of(&id) {
        Some(index) => {
          let removed = state.list.remove_at(index);
          let total = state.adjust_total(-1);
          Changes::one(ListDiff::Removed { item: removed, index }, total)
        }
        None => {
          debug!(?id, "removal of an item that is not in the list");
          Changes::none()
        }
      }
    };
    self.report(changes);
  }

  fn replace(&self, old_id: T::Id, item: T) {
    let matches = self.source.matches(&item);
    self.replace_matched(old_id, item, matches);
  }

  fn replace_matched(&self, old_id: T::Id, item: T, matches: bool) {
    let new_id = item.id();
    let changes = {
      let mut state = self.state.lock();
      let Some(from) = state.list.index_of(&old_id) else {
        drop(state);
        debug!(?old_id, "replaced item is not in the list, treating as an upsert");
        return self.upsert_matched(item, matches);
      };
      let complete = state.is_complete();

      // The new id may already be loaded: the old slot goes away and the
      // loaded item takes the update.
      if new_id != old_id {
        if let Some(existing) = state.list.index_of(&new_id) {
          debug!(?old_id, ?new_id, "replacement id is already in the list, merging");
          let old = state.list.remove_at(from);
          let existing = if existing > from { existing - 1 } else { existing };
          let mut diffs = vec![ListDiff::Removed { item: old, index: from }];
          let mut total = state.adjust_total(-1);
          if matches {
            let placement = state.list.replace_at(existing, item, &self.comparator, complete);
            diffs.push(placed(state.list.items(), placement));
          } else {
            let removed = state.list.remove_at(existing);
            diffs.push(ListDiff::Removed {
              item: removed,
              index: existing,
            });
            total = state.adjust_total(-1).or(total);
          }
          drop(state);
          return self.report(Changes { diffs, total });
        }
      }

      let old = state.list.remove_at(from);
      if !matches {
        let total = state.adjust_total(-1);
        Changes::one(ListDiff::Removed { item: old, index: from }, total)
      } else {
        let diff = match state.list.insert_sorted(item.clone(), &self.comparator, complete) {
          Some(to) if to == from => ListDiff::MetadataChanged { item, index: to },
          Some(to) => ListDiff::Moved { item, from, to },
          None => ListDiff::Removed { item: old, index: from },
        };
        Changes::one(diff, None)
      }
    };
    self.report(changes);
  }

  fn reset(&self) -> u64 {
    let generation = {
      let mut state = self.state.lock();
      state.generation += 1;
      state.list.reset();
      state.status = ListStatus::Empty;
      state.total_count = None;
      state.last_error = None;
      state.generation
    };
    debug!(generation, "paged list reset");
    self.listeners.notify_all(|l| l.on_list_reset());
    self.set_status(ListStatus::Empty);
    generation
  }
}

fn placed<T: Clone>(items: &[T], placement: Placement<T>) -> ListDiff<T> {
  match placement {
    Placement::Unchanged(index) => ListDiff::MetadataChanged {
      item: items[index].clone(),
      index,
    },
    Placement::Moved { from, to } => ListDiff::Moved {
      item: items[to].clone(),
      from,
      to,
    },
    Placement::Dropped(index, item) => ListDiff::Removed { item, index },
  }
}

/// Tracks one paginated, sorted list.
///
/// Every mutation is applied on the ui context; updates called from other
/// threads are posted there first. Cheap to clone; clones share the same
/// state.
///
/// Ids stay known until [`reset`](Self::reset), even after their item left
/// the list. A change that sorts an item past the last loaded item of an
/// incomplete list removes it, and later pages will not bring it back; only
/// a reset does.
pub struct PagedListTracker<T: ListItem, E> {
  pub(crate) shared: Arc<PagedShared<T, E>>,
}

impl<T: ListItem, E> Clone for PagedListTracker<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T: ListItem, E> fmt::Debug for PagedListTracker<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.shared.state.lock();
    f.debug_struct("PagedListTracker")
      .field("len", &state.list.len())
      .field("status", &state.status)
      .field("total_count", &state.total_count)
      .field("generation", &state.generation)
      .finish_non_exhaustive()
  }
}

impl<T, E> PagedListTracker<T, E>
where
  T: ListItem,
  E: Send + Sync + 'static,
{
  pub fn builder() -> PagedListBuilder<T, E> {
    PagedListBuilder::new()
  }

  /// Requests up to `desired_count` more items.
  ///
  /// Does nothing and returns `false` while a page is loading or once the
  /// list is complete. The first load of an empty list also asks the source
  /// for a total count estimate.
  pub fn load_more(&self, desired_count: usize) -> bool {
    let shared = &self.shared;
    let limit = desired_count.max(1);
    let (generation, request, first) = {
      let mut state = shared.state.lock();
      match state.status {
        ListStatus::Loading | ListStatus::Complete => {
          trace!(status = %state.status, "load_more ignored");
          return false;
        }
        _ => {}
      }
      let first = state.status == ListStatus::Empty && state.total_count.is_none();
      state.status = ListStatus::Loading;
      let request = PageRequest {
        offset: state.list.len(),
        limit,
        after: state.list.last_id(),
      };
      (state.generation, request, first)
    };

    shared.set_status(ListStatus::Loading);
    if first {
      self.refresh_total_count();
    }

    let weak = Arc::downgrade(shared);
    let reply = Reply::new(move |outcome: Option<PageOutcome<T, E>>| {
      if let Some(shared) = weak.upgrade() {
        let scheduler = shared.scheduler.clone();
        scheduler.post(Box::new(move || shared.apply_page(generation, limit, outcome)));
      }
    });
    debug!(offset = request.offset, limit, "loading page");
    shared.source.load_page(request, reply);
    true
  }

  /// Loads the next page with the configured size. The first page of an
  /// empty list uses the initial page size.
  pub fn load_next_page(&self) -> bool {
    let limit = if self.len() == 0 {
      self.shared.initial_page_size
    } else {
      self.shared.page_size
    };
    self.load_more(limit)
  }

  /// Asks the source for a fresh total count estimate. A reported count is
  /// only taken while the total is unknown.
  pub fn refresh_total_count(&self) {
    let generation = self.shared.state.lock().generation;
    let weak = Arc::downgrade(&self.shared);
    let reply = Reply::new(move |count: Option<Option<usize>>| {
      if let Some(shared) = weak.upgrade() {
        let scheduler = shared.scheduler.clone();
        scheduler.post(Box::new(move || {
          shared.apply_total_count(generation, count.flatten())
        }));
      }
    });
    self.shared.source.load_total_count(reply);
  }

  /// Drops every item and goes back to [`ListStatus::Empty`]. Pages still in
  /// flight are discarded when they arrive.
  pub fn reset(&self) {
    self.shared.reset();
  }

  /// Inserts, moves or refreshes `item`, or removes it when it no longer
  /// belongs to the list.
  pub fn on_item_changed(&self, item: T) {
    self.shared.post(move |shared| shared.upsert(item));
  }

  /// Mutates the item with `id` in place and moves it if its sort position
  /// changed. An unknown id is ignored.
  pub fn update_item<F>(&self, id: T::Id, update: F)
  where
    F: FnOnce(&mut T) + Send + 'static,
  {
    self.shared.post(move |shared| shared.update_in_place(id, update));
  }

  pub fn on_item_removed(&self, id: T::Id) {
    self.shared.post(move |shared| shared.remove(id));
  }

  /// Replaces the item known as `old_id` with `item`, which may carry a new
  /// id.
  pub fn on_item_replaced(&self, old_id: T::Id, item: T) {
    self.shared.post(move |shared| shared.replace(old_id, item));
  }

  /// A snapshot of the loaded items, in list order.
  pub fn items(&self) -> Vec<T> {
    self.shared.state.lock().list.items().to_vec()
  }

  pub fn get(&self, index: usize) -> Option<T> {
    self.shared.state.lock().list.get(index).cloned()
  }

  pub fn index_of(&self, id: &T::Id) -> Option<usize> {
    self.shared.state.lock().list.index_of(id)
  }

  /// Whether `id` was ever accepted since the last reset.
  pub fn contains_id(&self, id: &T::Id) -> bool {
    self.shared.state.lock().list.has_seen(id)
  }

  pub fn len(&self) -> usize {
    self.shared.state.lock().list.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn status(&self) -> ListStatus {
    self.shared.state.lock().status
  }

  /// The advisory total count. Never use it as a loop bound.
  pub fn total_count(&self) -> Option<usize> {
    self.shared.state.lock().total_count
  }

  /// The error of the last failed page, while the list is in
  /// [`ListStatus::Error`].
  pub fn last_error(&self) -> Option<Arc<E>> {
    self.shared.state.lock().last_error.clone()
  }

  pub fn generation(&self) -> u64 {
    self.shared.state.lock().generation
  }

  /// Registers a change listener. The first listener starts the upstream
  /// change feed, removing the last one stops it.
  pub fn add_listener(&self, listener: &Arc<Listener<T>>, membership: Membership) -> bool {
    self.shared.listeners.add(listener, membership)
  }

  pub fn remove_listener(&self, listener: &Arc<Listener<T>>) -> bool {
    self.shared.listeners.remove(listener)
  }
}

impl<T, E> SessionListener for PagedListTracker<T, E>
where
  T: ListItem,
  E: Send + Sync + 'static,
{
  fn on_perform_user_cleanup(&self) {
    self.reset();
  }

  fn on_perform_restart(&self) {
    self.reset();
  }
}
