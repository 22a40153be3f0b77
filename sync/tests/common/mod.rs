#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fibre_sync::{
  BatchResult, Entry, EntrySource, EntryWatcher, ListChangeListener, ListDiff, ListItem,
  ListStatus, PageOutcome, PageRequest, PageSource, Reply, RequestError,
};
use parking_lot::Mutex;

/// Installs a test subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub type UserEntry = Entry<u32, String, String>;

/// An entry source that parks every call until the test answers it.
#[derive(Default)]
pub struct ParkedSource {
  pub calls: Mutex<Vec<(Vec<u32>, Reply<BatchResult<u32, String, String>>)>>,
  pub watch_log: Mutex<Vec<(u32, bool)>>,
  pub call_count: AtomicUsize,
}

impl ParkedSource {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn call_count(&self) -> usize {
    self.call_count.load(Ordering::SeqCst)
  }

  /// Takes the oldest parked call.
  pub fn take(&self) -> (Vec<u32>, Reply<BatchResult<u32, String, String>>) {
    self.calls.lock().remove(0)
  }

  /// Answers the oldest parked call with `user-{key}` for every key.
  pub fn answer_next(&self) -> Vec<u32> {
    let (keys, reply) = self.take();
    reply.send(keys.iter().map(|k| (*k, Ok(format!("user-{k}")))).collect());
    keys
  }
}

impl EntrySource<u32, String, String> for ParkedSource {
  fn check_key(&self, key: &u32) -> Result<(), RequestError> {
    if *key == 0 {
      return Err(RequestError::unsupported_key("key 0 is reserved"));
    }
    Ok(())
  }

  fn request_data(&self, keys: Vec<u32>, reply: Reply<BatchResult<u32, String, String>>) {
    self.call_count.fetch_add(1, Ordering::SeqCst);
    self.calls.lock().push((keys, reply));
  }

  fn on_watch_state_changed(&self, key: &u32, watched: bool) {
    self.watch_log.lock().push((*key, watched));
  }
}

/// Collects every entry it is handed.
#[derive(Default)]
pub struct EntryLog {
  pub entries: Mutex<Vec<UserEntry>>,
}

impl EntryLog {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn values(&self) -> Vec<(u32, Option<String>)> {
    self
      .entries
      .lock()
      .iter()
      .map(|e| (*e.key(), e.value().map(|v| v.to_string())))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }
}

impl EntryWatcher<u32, String, String> for EntryLog {
  fn on_entry(&self, entry: &UserEntry) {
    self.entries.lock().push(entry.clone());
  }
}

pub fn as_watcher(log: &Arc<EntryLog>) -> Arc<dyn EntryWatcher<u32, String, String>> {
  log.clone()
}

/// A list item; tests order it by ascending priority.
#[derive(Debug, Clone, PartialEq)]
pub struct Todo {
  pub id: u64,
  pub priority: i32,
  pub title: String,
  pub archived: bool,
}

impl Todo {
  pub fn new(id: u64, priority: i32) -> Self {
    Self {
      id,
      priority,
      title: format!("todo {id}"),
      archived: false,
    }
  }
}

impl ListItem for Todo {
  type Id = u64;

  fn id(&self) -> u64 {
    self.id
  }
}

/// A page source that parks page requests and counts subscriptions.
#[derive(Default)]
pub struct ParkedPages {
  pub requests: Mutex<Vec<(PageRequest<u64>, Reply<PageOutcome<Todo, String>>)>>,
  pub totals: Mutex<Vec<Reply<Option<usize>>>>,
  pub subscribed: AtomicUsize,
  pub unsubscribed: AtomicUsize,
}

impl ParkedPages {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn take(&self) -> (PageRequest<u64>, Reply<PageOutcome<Todo, String>>) {
    self.requests.lock().remove(0)
  }

  pub fn pending(&self) -> usize {
    self.requests.lock().len()
  }
}

impl PageSource<Todo, u64, String> for ParkedPages {
  fn load_page(&self, request: PageRequest<u64>, reply: Reply<PageOutcome<Todo, String>>) {
    self.requests.lock().push((request, reply));
  }

  fn load_total_count(&self, reply: Reply<Option<usize>>) {
    self.totals.lock().push(reply);
  }

  fn matches(&self, item: &Todo) -> bool {
    !item.archived
  }

  fn subscribe_to_updates(&self) {
    self.subscribed.fetch_add(1, Ordering::SeqCst);
  }

  fn unsubscribe_from_updates(&self) {
    self.unsubscribed.fetch_add(1, Ordering::SeqCst);
  }
}

/// Records every list notification.
#[derive(Default)]
pub struct ListLog {
  pub added: Mutex<Vec<(Vec<u64>, usize)>>,
  pub diffs: Mutex<Vec<ListDiff<Todo>>>,
  pub statuses: Mutex<Vec<ListStatus>>,
  pub totals: Mutex<Vec<Option<usize>>>,
  pub resets: AtomicUsize,
}

impl ListLog {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn take_diffs(&self) -> Vec<ListDiff<Todo>> {
    std::mem::take(&mut *self.diffs.lock())
  }
}

impl ListChangeListener<Todo> for ListLog {
  fn on_items_added(&self, items: &[Todo], start: usize) {
    self
      .added
      .lock()
      .push((items.iter().map(|t| t.id).collect(), start));
  }

  fn on_diff(&self, diff: &ListDiff<Todo>) {
    self.diffs.lock().push(diff.clone());
  }

  fn on_status_changed(&self, status: ListStatus) {
    self.statuses.lock().push(status);
  }

  fn on_total_count_changed(&self, count: Option<usize>) {
    self.totals.lock().push(count);
  }

  fn on_list_reset(&self) {
    self.resets.fetch_add(1, Ordering::SeqCst);
  }
}
