use thiserror::Error;

/// Errors that can occur when building one of the sync components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// No `UiScheduler` was configured. Every component dispatches through one.
  #[error("a ui scheduler is required")]
  SchedulerRequired,
  /// No data source was configured for a component that fetches remotely.
  #[error("a data source is required")]
  SourceRequired,
  /// A paged list was built without a comparator.
  #[error("a paged list requires a comparator")]
  ComparatorRequired,
  /// The keyed cache was configured with a batch size of zero.
  #[error("max batch size cannot be zero")]
  ZeroBatchSize,
  /// A paged list was configured with a page size of zero.
  #[error("page size cannot be zero")]
  ZeroPageSize,
  /// The dedicated ui thread could not be started.
  #[error("failed to spawn the ui thread: {0}")]
  Spawn(String),
}

/// Errors returned to the caller of a request.
///
/// Transport failures never show up here: they are delivered to watchers as
/// error entries. A `RequestError` always means the caller did something the
/// component cannot serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
  /// The source rejected the shape of the key.
  #[error("unsupported key: {reason}")]
  UnsupportedKey { reason: String },
}

impl RequestError {
  pub fn unsupported_key(reason: impl Into<String>) -> Self {
    RequestError::UnsupportedKey {
      reason: reason.into(),
    }
  }
}
