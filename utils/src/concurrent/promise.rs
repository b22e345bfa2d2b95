use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A write-once value that any number of tasks can wait for.
///
/// Clones share the same slot. Only the first `resolve` takes effect.
#[derive(Debug, Clone)]
pub struct Promise<T> {
  sender: Arc<watch::Sender<Option<T>>>,
}

impl<T: Clone + Send + Sync> Default for Promise<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + Sync> Promise<T> {
  pub fn new() -> Self {
    let (sender, _) = watch::channel(None);
    Self {
      sender: Arc::new(sender),
    }
  }

  /// Returns `false` if the promise had already been resolved.
  pub fn resolve(&self, value: T) -> bool {
    let mut value = Some(value);
    self.sender.send_if_modified(|slot| {
      if slot.is_none() {
        *slot = value.take();
        true
      } else {
        false
      }
    })
  }

  pub fn is_resolved(&self) -> bool {
    self.sender.borrow().is_some()
  }

  pub async fn wait(&self) -> T {
    let mut receiver = self.sender.subscribe();
    loop {
      let resolved = receiver.borrow_and_update().clone();
      if let Some(value) = resolved {
        return value;
      }
      // The sender lives as long as `self`, so `changed` only fails if it is dropped mid-wait.
      if receiver.changed().await.is_err() {
        std::future::pending::<()>().await;
      }
    }
  }

  pub async fn wait_timeout(&self, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, self.wait()).await.ok()
  }

  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.sender, &other.sender)
  }
}
