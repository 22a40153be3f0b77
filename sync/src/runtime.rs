//! Execution contexts used by the sync components.
//!
//! Every component owns an `Arc<dyn UiScheduler>`. Results arriving on
//! transport threads are posted through it before any state is touched, so
//! all list mutation and watcher dispatch happen on one logical thread.

use crate::error::BuildError;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use fibre::mpsc;
use fibre::RecvErrorTimeout;
use parking_lot::Mutex;
use tracing::{debug, error};

/// A unit of work scheduled onto the ui context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The single ui execution context.
///
/// Tasks posted from one thread run in the order they were posted.
pub trait UiScheduler: Send + Sync + 'static {
  /// Schedules `task` to run on the ui context.
  fn post(&self, task: Task);

  /// Schedules `task` to run on the ui context once `delay` has elapsed.
  fn post_delayed(&self, delay: Duration, task: Task);

  /// Returns `true` when called from the ui context itself.
  fn is_current(&self) -> bool;
}

/// A trait for spawning a future onto an asynchronous runtime.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

#[cfg(feature = "tokio")]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner bound to an explicit runtime handle.
  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Runs a task, keeping the ui loop alive if it panics.
fn run_task(task: Task) {
  if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
    error!("a task posted to the ui context panicked");
  }
}

/// A message sent to the ui thread.
enum Command {
  Run(Task),
  RunAt(Instant, Task),
}

/// A delayed task waiting in the ui thread's timer heap.
struct Delayed {
  deadline: Instant,
  seq: u64,
  task: Task,
}

impl PartialEq for Delayed {
  fn eq(&self, other: &Self) -> bool {
    self.deadline == other.deadline && self.seq == other.seq
  }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
    Some(self.cmp(other))
  }
}

// Reversed so the `BinaryHeap` pops the earliest deadline first.
impl Ord for Delayed {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    other
      .deadline
      .cmp(&self.deadline)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

/// A dedicated OS thread acting as the ui context.
///
/// Tasks are delivered over an unbounded MPSC channel and executed in order.
/// Delayed tasks are kept in a timer heap owned by the thread. Dropping the
/// `UiThread` disconnects the channel and joins the thread.
pub struct UiThread {
  sender: mpsc::UnboundedSender<Command>,
  thread_id: ThreadId,
  handle: Mutex<Option<JoinHandle<()>>>,
}

impl UiThread {
  /// Spawns a new ui thread with the given name.
  pub fn spawn(name: impl Into<String>) -> Result<Self, BuildError> {
    let (tx, rx) = mpsc::unbounded::<Command>();

    let handle = thread::Builder::new()
      .name(name.into())
      .spawn(move || {
        let mut timers: BinaryHeap<Delayed> = BinaryHeap::new();
        let mut seq = 0u64;

        loop {
          let now = Instant::now();
          while timers.peek().map_or(false, |t| t.deadline <= now) {
            if let Some(due) = timers.pop() {
              run_task(due.task);
            }
          }

          // The loop ends once the channel is disconnected, which happens
          // when the owning `UiThread` is dropped.
          let next = match timers.peek() {
            Some(t) => rx.recv_timeout(t.deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvErrorTimeout::Disconnected),
          };

          match next {
            Ok(Command::Run(task)) => run_task(task),
            Ok(Command::RunAt(deadline, task)) => {
              seq += 1;
              timers.push(Delayed { deadline, seq, task });
            }
            Err(RecvErrorTimeout::Timeout) => continue,
            Err(RecvErrorTimeout::Disconnected) => break,
          }
        }
        debug!(pending_timers = timers.len(), "ui thread stopped");
      })
      .map_err(|e| BuildError::Spawn(e.to_string()))?;

    Ok(Self {
      sender: tx,
      thread_id: handle.thread().id(),
      handle: Mutex::new(Some(handle)),
    })
  }

  fn send(&self, command: Command) {
    if self.sender.send(command).is_err() {
      debug!("ui thread is gone, dropping task");
    }
  }
}

impl UiScheduler for UiThread {
  fn post(&self, task: Task) {
    self.send(Command::Run(task));
  }

  fn post_delayed(&self, delay: Duration, task: Task) {
    self.send(Command::RunAt(Instant::now() + delay, task));
  }

  fn is_current(&self) -> bool {
    thread::current().id() == self.thread_id
  }
}

impl Drop for UiThread {
  fn drop(&mut self) {
    let _ = self.sender.close();
    if let Some(handle) = self.handle.lock().take() {
      // A component dropped from inside a ui task cannot join its own thread.
      if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
      }
    }
  }
}

struct ManualState {
  queue: VecDeque<Task>,
  delayed: Vec<(Duration, u64, Task)>,
  now: Duration,
  seq: u64,
}

/// A deterministic ui context driven by the caller.
///
/// Nothing runs until `run_until_idle` or `advance` is called, and delayed
/// tasks use a virtual clock. The thread that created the scheduler is
/// treated as the ui thread. Useful for tests and for hosts that already own
/// an event loop and want to pump the queue themselves.
pub struct ManualScheduler {
  owner: ThreadId,
  state: Mutex<ManualState>,
}

impl ManualScheduler {
  pub fn new() -> Self {
    Self {
      owner: thread::current().id(),
      state: Mutex::new(ManualState {
        queue: VecDeque::new(),
        delayed: Vec::new(),
        now: Duration::ZERO,
        seq: 0,
      }),
    }
  }

  /// Number of tasks ready to run.
  pub fn pending(&self) -> usize {
    self.state.lock().queue.len()
  }

  /// Number of delayed tasks whose deadline has not been reached.
  pub fn pending_delayed(&self) -> usize {
    self.state.lock().delayed.len()
  }

  /// Runs queued tasks, including tasks they post, until the queue is empty.
  /// Returns the number of tasks executed.
  pub fn run_until_idle(&self) -> usize {
    let mut ran = 0;
    loop {
      // The lock is released before running so tasks can post more work.
      let next = self.state.lock().queue.pop_front();
      match next {
        Some(task) => {
          run_task(task);
          ran += 1;
        }
        None => return ran,
      }
    }
  }

  /// Moves the virtual clock forward, queues every delayed task that became
  /// due (in deadline order) and runs the queue until idle.
  pub fn advance(&self, by: Duration) -> usize {
    {
      let mut state = self.state.lock();
      state.now += by;
      let now = state.now;

      let mut due = Vec::new();
      let mut i = 0;
      while i < state.delayed.len() {
        if state.delayed[i].0 <= now {
          due.push(state.delayed.swap_remove(i));
        } else {
          i += 1;
        }
      }
      due.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
      for (_, _, task) in due {
        state.queue.push_back(task);
      }
    }
    self.run_until_idle()
  }
}

impl Default for ManualScheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl UiScheduler for ManualScheduler {
  fn post(&self, task: Task) {
    self.state.lock().queue.push_back(task);
  }

  fn post_delayed(&self, delay: Duration, task: Task) {
    let mut state = self.state.lock();
    state.seq += 1;
    let deadline = state.now + delay;
    let seq = state.seq;
    state.delayed.push((deadline, seq, task));
  }

  fn is_current(&self) -> bool {
    thread::current().id() == self.owner
  }
}
