use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

/// Runs a task once after a delay.
///
/// Implementations are fire-and-forget: a task runs at most once, and no ordering is
/// promised between tasks scheduled with different delays.
pub trait DelayedTaskScheduler: Send + Sync + Debug + 'static {
  fn schedule(&self, task: BoxFuture<'static, ()>, delay: Duration);
}

/// `DelayedTaskScheduler` backed by `tokio::time::sleep` on a spawned task.
#[derive(Debug, Clone, Default)]
pub struct TokioDelayedTaskScheduler {
  handle: Option<Handle>,
}

impl TokioDelayedTaskScheduler {
  /// Spawns onto whichever runtime is current at scheduling time.
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_handle(handle: Handle) -> Self {
    Self { handle: Some(handle) }
  }
}

impl DelayedTaskScheduler for TokioDelayedTaskScheduler {
  fn schedule(&self, task: BoxFuture<'static, ()>, delay: Duration) {
    let delayed = async move {
      tokio::time::sleep(delay).await;
      task.await;
    };
    match &self.handle {
      Some(handle) => {
        handle.spawn(delayed);
      }
      None => match Handle::try_current() {
        Ok(handle) => {
          handle.spawn(delayed);
        }
        Err(e) => {
          tracing::warn!("Dropping delayed task, no tokio runtime available: {:?}", e);
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn test_task_runs_after_delay() {
    let scheduler = TokioDelayedTaskScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));

    let cloned = fired.clone();
    scheduler.schedule(
      async move {
        cloned.fetch_add(1, Ordering::SeqCst);
      }
      .boxed(),
      Duration::from_secs(15),
    );

    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_tasks_run_independently() {
    let scheduler = TokioDelayedTaskScheduler::with_handle(Handle::current());
    let fired = Arc::new(AtomicUsize::new(0));

    for delay in [1, 2, 3] {
      let cloned = fired.clone();
      scheduler.schedule(
        async move {
          cloned.fetch_add(1, Ordering::SeqCst);
        }
        .boxed(),
        Duration::from_secs(delay),
      );
    }

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 3);
  }
}
