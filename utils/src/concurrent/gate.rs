use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_condvar::Condvar;

/// A reclosable open/closed flag. Waiters are suspended while the gate is closed
/// and all of them are released when it opens.
#[derive(Clone)]
pub struct Gate {
  open: Arc<Mutex<bool>>,
  condvar: Arc<Condvar>,
}

impl Debug for Gate {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Gate").field("open", &self.open).finish()
  }
}

impl Eq for Gate {}

impl PartialEq for Gate {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.open, &other.open)
  }
}

impl Default for Gate {
  fn default() -> Self {
    Self::new()
  }
}

impl Gate {
  /// Creates a closed gate.
  pub fn new() -> Self {
    Self {
      open: Arc::new(Mutex::new(false)),
      condvar: Arc::new(Condvar::new()),
    }
  }

  pub async fn open(&self) {
    let mut open = self.open.lock().await;
    *open = true;
    self.condvar.notify_all();
  }

  pub async fn close(&self) {
    let mut open = self.open.lock().await;
    *open = false;
  }

  pub async fn is_open(&self) -> bool {
    *self.open.lock().await
  }

  pub async fn wait(&self) {
    let mut open = self.open.lock().await;
    while !*open {
      open = self.condvar.wait(open).await;
    }
  }

  /// Returns `true` if the gate was observed open before `timeout` elapsed.
  pub async fn wait_timeout(&self, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, self.wait()).await.is_ok()
  }
}
