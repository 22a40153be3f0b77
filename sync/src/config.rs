use std::time::Duration;

/// Default maximum number of keys carried by one keyed fetch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
/// Default number of items requested by `PagedListTracker::load_next_page`.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Default number of items requested by the first page.
pub const DEFAULT_INITIAL_PAGE_SIZE: usize = 20;
/// Default debounce window before an acknowledgement count is cleared.
pub const DEFAULT_ACK_CLEAR_DELAY_MS: u64 = 200;
/// Default prefix of persisted acknowledgement counts.
pub const DEFAULT_COUNTER_PREFIX: &str = "ack_";

/// Tunables shared by the component builders.
///
/// Every builder can be seeded from a `SyncConfig` with its `config` method, and
/// individual setters still override single values afterwards. With the
/// `serde` feature the struct can be loaded from any serde format; missing
/// fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SyncConfig {
  pub max_batch_size: usize,
  pub page_size: usize,
  pub initial_page_size: usize,
  pub ack_clear_delay_ms: u64,
  /// Key prefix used when acknowledgement counts are persisted.
  pub counter_prefix: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_batch_size: DEFAULT_MAX_BATCH_SIZE,
      page_size: DEFAULT_PAGE_SIZE,
      initial_page_size: DEFAULT_INITIAL_PAGE_SIZE,
      ack_clear_delay_ms: DEFAULT_ACK_CLEAR_DELAY_MS,
      counter_prefix: DEFAULT_COUNTER_PREFIX.to_string(),
    }
  }
}

impl SyncConfig {
  #[inline]
  pub fn ack_clear_delay(&self) -> Duration {
    Duration::from_millis(self.ack_clear_delay_ms)
  }
}
