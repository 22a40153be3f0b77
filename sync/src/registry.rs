//! Broadcast registries with strong or weak listener membership.
//!
//! Both registries report *fullness* transitions: a hook fires once when a
//! list goes from empty to non-empty and once when it becomes empty again,
//! which owners use to start and stop upstream subscriptions lazily.

use std::hash::Hash;
use std::sync::{Arc, Weak};

use ahash::HashMap;
use parking_lot::Mutex;

/// How a registry holds on to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
  /// The registry keeps the listener alive until it is removed.
  #[default]
  Strong,
  /// The registry only observes the listener. Once every other `Arc` is
  /// dropped the listener is pruned on the next notification pass.
  Weak,
}

/// Receives empty/non-empty transitions of a [`ListenerRegistry`].
pub trait FullnessListener: Send + Sync {
  fn on_fullness_changed(&self, is_full: bool);
}

impl<F> FullnessListener for F
where
  F: Fn(bool) + Send + Sync,
{
  fn on_fullness_changed(&self, is_full: bool) {
    self(is_full)
  }
}

/// A single registration, strong or weak.
pub(crate) enum Held<L: ?Sized> {
  Strong(Arc<L>),
  Weak(Weak<L>),
}

impl<L: ?Sized> Held<L> {
  pub(crate) fn new(listener: &Arc<L>, membership: Membership) -> Self {
    match membership {
      Membership::Strong => Held::Strong(listener.clone()),
      Membership::Weak => Held::Weak(Arc::downgrade(listener)),
    }
  }

  pub(crate) fn upgrade(&self) -> Option<Arc<L>> {
    match self {
      Held::Strong(l) => Some(l.clone()),
      Held::Weak(w) => w.upgrade(),
    }
  }

  pub(crate) fn is_alive(&self) -> bool {
    match self {
      Held::Strong(_) => true,
      Held::Weak(w) => w.strong_count() > 0,
    }
  }

  fn addr(&self) -> *const () {
    match self {
      Held::Strong(l) => Arc::as_ptr(l) as *const (),
      Held::Weak(w) => Weak::as_ptr(w) as *const (),
    }
  }

  /// Whether this live registration points at `listener`.
  pub(crate) fn holds(&self, listener: &Arc<L>) -> bool {
    self.addr() == addr_of(listener) && self.is_alive()
  }
}

fn addr_of<L: ?Sized>(listener: &Arc<L>) -> *const () {
  Arc::as_ptr(listener) as *const ()
}

/// The member list shared by both registry flavours.
struct Members<L: ?Sized> {
  list: Vec<Held<L>>,
}

impl<L: ?Sized> Members<L> {
  fn new() -> Self {
    Self { list: Vec::new() }
  }

  fn is_empty(&self) -> bool {
    self.list.is_empty()
  }

  /// Adds a listener. Returns `false` if it was already present.
  fn add(&mut self, listener: &Arc<L>, membership: Membership) -> bool {
    if self.list.iter().any(|h| h.holds(listener)) {
      return false;
    }
    self.list.retain(|h| h.is_alive());
    self.list.push(Held::new(listener, membership));
    true
  }

  fn remove(&mut self, listener: &Arc<L>) -> bool {
    let addr = addr_of(listener);
    let mut removed = false;
    self.list.retain(|h| {
      if h.addr() == addr {
        removed = true;
        false
      } else {
        h.is_alive()
      }
    });
    removed
  }

  /// Prunes dead weak members and returns the live ones, newest first.
  fn snapshot(&mut self) -> Vec<Arc<L>> {
    let mut live = Vec::with_capacity(self.list.len());
    self.list.retain(|h| match h.upgrade() {
      Some(l) => {
        live.push(l);
        true
      }
      None => false,
    });
    live.reverse();
    live
  }

  fn live_count(&self) -> usize {
    self.list.iter().filter(|h| h.is_alive()).count()
  }
}

/// A multi-listener broadcast registry.
///
/// `notify_all` snapshots the live listeners under the lock and invokes them
/// after releasing it, newest registration first. Listeners may therefore add
/// or remove themselves while being notified.
pub struct ListenerRegistry<L: ?Sized> {
  members: Mutex<Members<L>>,
  hook: Option<Arc<dyn FullnessListener>>,
  // Held across a hook call so transitions are reported in the order they
  // happened, even when they race on different threads.
  hook_order: Mutex<()>,
}

impl<L: ?Sized> ListenerRegistry<L> {
  pub fn new() -> Self {
    Self {
      members: Mutex::new(Members::new()),
      hook: None,
      hook_order: Mutex::new(()),
    }
  }

  /// Creates a registry that reports fullness transitions to `hook`.
  pub fn with_fullness_listener(hook: Arc<dyn FullnessListener>) -> Self {
    Self {
      members: Mutex::new(Members::new()),
      hook: Some(hook),
      hook_order: Mutex::new(()),
    }
  }

  /// Registers `listener`. Returns `false` if it was already registered.
  pub fn add(&self, listener: &Arc<L>, membership: Membership) -> bool {
    let mut members = self.members.lock();
    let was_empty = members.is_empty();
    let added = members.add(listener, membership);
    let transition = was_empty && !members.is_empty();
    self.finish(members, transition.then_some(true));
    added
  }

  /// Unregisters `listener`. Returns `false` if it was not registered.
  pub fn remove(&self, listener: &Arc<L>) -> bool {
    let mut members = self.members.lock();
    let was_empty = members.is_empty();
    let removed = members.remove(listener);
    let transition = !was_empty && members.is_empty();
    self.finish(members, transition.then_some(false));
    removed
  }

  /// Invokes `action` for every live listener, newest first.
  pub fn notify_all<F>(&self, mut action: F)
  where
    F: FnMut(&L),
  {
    let live = {
      let mut members = self.members.lock();
      let was_empty = members.is_empty();
      let live = members.snapshot();
      let transition = !was_empty && members.is_empty();
      self.finish(members, transition.then_some(false));
      live
    };
    for listener in live {
      action(&listener);
    }
  }

  /// Drops every listener.
  pub fn clear(&self) {
    let mut members = self.members.lock();
    let was_empty = members.is_empty();
    members.list.clear();
    self.finish(members, (!was_empty).then_some(false));
  }

  /// Number of listeners whose referent is still alive.
  pub fn len(&self) -> usize {
    self.members.lock().live_count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Releases the member lock and reports a transition, if any.
  fn finish(&self, members: parking_lot::MutexGuard<'_, Members<L>>, transition: Option<bool>) {
    match (transition, &self.hook) {
      (Some(is_full), Some(hook)) => {
        let _order = self.hook_order.lock();
        drop(members);
        hook.on_fullness_changed(is_full);
      }
      _ => drop(members),
    }
  }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
  fn default() -> Self {
    Self::new()
  }
}

/// A per-key fullness hook for [`KeyedListenerRegistry`].
pub type KeyedFullnessHook<K> = Arc<dyn Fn(&K, bool) + Send + Sync>;

/// A registry holding a separate listener list per key.
///
/// Each key reports its own fullness transitions; empty lists are removed
/// from the map.
pub struct KeyedListenerRegistry<K, L: ?Sized> {
  lists: Mutex<HashMap<K, Members<L>>>,
  hook: Option<KeyedFullnessHook<K>>,
  hook_order: Mutex<()>,
}

impl<K, L> KeyedListenerRegistry<K, L>
where
  K: Eq + Hash + Clone,
  L: ?Sized,
{
  pub fn new() -> Self {
    Self {
      lists: Mutex::new(HashMap::default()),
      hook: None,
      hook_order: Mutex::new(()),
    }
  }

  pub fn with_fullness_hook(hook: KeyedFullnessHook<K>) -> Self {
    Self {
      lists: Mutex::new(HashMap::default()),
      hook: Some(hook),
      hook_order: Mutex::new(()),
    }
  }

  pub fn add(&self, key: &K, listener: &Arc<L>, membership: Membership) -> bool {
    let mut lists = self.lists.lock();
    let members = lists.entry(key.clone()).or_insert_with(Members::new);
    let was_empty = members.is_empty();
    let added = members.add(listener, membership);
    let transition = was_empty && !members.is_empty();
    self.finish(lists, key, transition.then_some(true));
    added
  }

  pub fn remove(&self, key: &K, listener: &Arc<L>) -> bool {
    let mut lists = self.lists.lock();
    let (removed, emptied) = match lists.get_mut(key) {
      Some(members) => {
        let removed = members.remove(listener);
        (removed, members.is_empty())
      }
      None => (false, false),
    };
    if emptied {
      lists.remove(key);
    }
    self.finish(lists, key, emptied.then_some(false));
    removed
  }

  /// Invokes `action` for every live listener of `key`, newest first.
  pub fn notify<F>(&self, key: &K, mut action: F)
  where
    F: FnMut(&L),
  {
    let live = {
      let mut lists = self.lists.lock();
      let (live, emptied) = match lists.get_mut(key) {
        Some(members) => {
          let live = members.snapshot();
          (live, members.is_empty())
        }
        None => (Vec::new(), false),
      };
      if emptied {
        lists.remove(key);
      }
      self.finish(lists, key, emptied.then_some(false));
      live
    };
    for listener in live {
      action(&listener);
    }
  }

  /// Whether `key` has at least one live listener.
  pub fn has_listeners(&self, key: &K) -> bool {
    self
      .lists
      .lock()
      .get(key)
      .map_or(false, |m| m.live_count() > 0)
  }

  /// Keys that currently have a listener list.
  pub fn keys(&self) -> Vec<K> {
    self.lists.lock().keys().cloned().collect()
  }

  /// Drops every listener of every key, reporting each key as emptied.
  pub fn clear(&self) {
    let drained: Vec<K> = {
      let mut lists = self.lists.lock();
      lists.drain().map(|(k, _)| k).collect()
    };
    if let Some(hook) = &self.hook {
      let _order = self.hook_order.lock();
      for key in &drained {
        hook(key, false);
      }
    }
  }

  fn finish(
    &self,
    lists: parking_lot::MutexGuard<'_, HashMap<K, Members<L>>>,
    key: &K,
    transition: Option<bool>,
  ) {
    match (transition, &self.hook) {
      (Some(is_full), Some(hook)) => {
        let _order = self.hook_order.lock();
        drop(lists);
        hook(key, is_full);
      }
      _ => drop(lists),
    }
  }
}

impl<K, L> Default for KeyedListenerRegistry<K, L>
where
  K: Eq + Hash + Clone,
  L: ?Sized,
{
  fn default() -> Self {
    Self::new()
  }
}
