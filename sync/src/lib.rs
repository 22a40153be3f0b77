//! Client-side synchronization primitives for data served by a remote,
//! asynchronous transport.
//!
//! # Components
//! - **`KeyedEntryCache`**: one resolved entry per key, batched fetches and
//!   per-key request coalescing.
//! - **`SingleValueCache`**: one lazily fetched, globally scoped value.
//! - **`PagedListTracker`**: a sorted, deduplicated list assembled from pages
//!   and kept current by incremental updates.
//! - **`AcknowledgementCounter`**: first-delivery detection for events the
//!   transport may redeliver.
//! - **`ListenerRegistry`**: strong or weak listener fan-out with lazy
//!   subscription hooks.
//! - **`Session`**: startup, user-cleanup and restart broadcast.
//!
//! Every result coming back from the transport is posted to a single ui
//! context, a [`UiScheduler`], before any state is touched. Each component
//! keeps a generation counter; results belonging to an older generation are
//! dropped there.

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod counter;
pub mod entry;
pub mod error;
pub mod keyed;
pub mod lifecycle;
pub mod metrics;
pub mod paged;
pub mod registry;
pub mod runtime;
pub mod single;
pub mod transport;

// Re-export the primary user-facing types for convenience
pub use builder::{CounterBuilder, KeyedCacheBuilder, PagedListBuilder, SingleValueBuilder};
pub use config::SyncConfig;
pub use counter::{AcknowledgementCounter, CompoundKey, CounterStore, MemoryCounterStore};
pub use entry::{Entry, EntryWatcher, Resolution};
pub use error::{BuildError, RequestError};
pub use keyed::KeyedEntryCache;
pub use lifecycle::{Session, SessionListener};
pub use metrics::MetricsSnapshot;
pub use paged::{
  Comparator, ListChangeListener, ListDiff, ListItem, ListStatus, PageOutcome, PageRequest,
  PagedListTracker,
};
pub use registry::{FullnessListener, KeyedListenerRegistry, ListenerRegistry, Membership};
pub use runtime::{ManualScheduler, Task, TaskSpawner, UiScheduler, UiThread};
pub use single::{Lookup, SingleValueCache, ValueListener};
pub use transport::{AsyncEntrySource, BatchResult, EntrySource, PageSource, Reply, ValueSource};

#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
