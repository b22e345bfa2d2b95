use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  #[error("connection unavailable: {0}")]
  ConnectionUnavailable(String),
  #[error("store operation failed: {0}")]
  OperationFailed(String),
  #[error("unknown subscription: {0}")]
  UnknownSubscription(String),
  #[error("store is closed")]
  Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LatchError {
  /// A transaction that must apply atomically reported a different number of results.
  #[error("invariant violated in {operation}: expected {expected} transaction results, got {actual}")]
  InvariantViolation {
    operation: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("subscription not confirmed within {0:?}")]
  SubscriptionTimeout(Duration),
  #[error("subscription failed: {0}")]
  SubscriptionFailed(String),
  #[error("count must be positive: {0}")]
  InvalidCount(i64),
  #[error("store error: {0}")]
  Store(StoreError),
}

impl LatchError {
  pub fn is_fatal(&self) -> bool {
    matches!(self, LatchError::InvariantViolation { .. })
  }
}

impl From<StoreError> for LatchError {
  fn from(value: StoreError) -> Self {
    LatchError::Store(value)
  }
}

static_assertions::assert_impl_all!(StoreError: Send, Sync);
static_assertions::assert_impl_all!(LatchError: Send, Sync);
