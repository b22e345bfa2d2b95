use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use nexus_latch_utils_rs::timing::DelayedTaskScheduler;

use crate::entry::SubscriptionEntry;
use crate::pubsub::PubSub;
use crate::registry::SubscriptionRegistry;

/// Debounced teardown of unused subscriptions.
#[derive(Clone)]
pub struct CleanupScheduler {
  registry: Arc<SubscriptionRegistry>,
  pubsub: Arc<dyn PubSub>,
  scheduler: Arc<dyn DelayedTaskScheduler>,
  delay: Duration,
}

impl fmt::Debug for CleanupScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CleanupScheduler")
      .field("scheduler", &self.scheduler)
      .field("delay", &self.delay)
      .finish()
  }
}

impl CleanupScheduler {
  pub fn new(
    registry: Arc<SubscriptionRegistry>,
    pubsub: Arc<dyn PubSub>,
    scheduler: Arc<dyn DelayedTaskScheduler>,
    delay: Duration,
  ) -> Self {
    Self {
      registry,
      pubsub,
      scheduler,
      delay,
    }
  }

  /// Schedules `check` for `name` after the configured delay.
  pub fn schedule(&self, name: &str) {
    let this = self.clone();
    let name = name.to_string();
    self.scheduler.schedule(
      async move {
        this.check(&name).await;
      }
      .boxed(),
      self.delay,
    );
  }

  /// Retires the entry for `name` if nobody holds it. Returns `true` if this call retired it.
  ///
  /// Safe to run any number of times, concurrently with acquisitions: an entry that gained a
  /// hold or was replaced since it was read is left alone.
  pub async fn check(&self, name: &str) -> bool {
    match self.registry.remove_if_free(name) {
      Some(entry) => {
        tracing::debug!("Retiring unused subscription: {}", name);
        self.retire(name, &entry).await;
        true
      }
      None => false,
    }
  }

  /// Detaches a lineage evicted from the registry and retires it if nobody holds it.
  ///
  /// Otherwise the subscription keeps feeding the remaining holders until the last of them
  /// releases through [`CleanupScheduler::schedule_retire`]. Returns `true` if retired here.
  pub async fn retire_evicted(&self, name: &str, entry: &SubscriptionEntry) -> bool {
    if entry.subscription().detach(entry.refcount()) {
      self.retire(name, entry).await;
      true
    } else {
      tracing::debug!("Deferring teardown of {}, {} holds remain", name, entry.refcount());
      false
    }
  }

  /// Retires a detached lineage on the scheduler once its last hold is gone.
  pub fn schedule_retire(&self, name: &str, entry: Arc<SubscriptionEntry>) {
    let this = self.clone();
    let name = name.to_string();
    self.scheduler.schedule(
      async move {
        this.retire(&name, &entry).await;
      }
      .boxed(),
      Duration::ZERO,
    );
  }

  /// Tears down the remote subscription of an entry that is no longer registered.
  pub async fn retire(&self, name: &str, entry: &SubscriptionEntry) {
    if let Some(handle) = entry.subscription().retire() {
      if let Err(e) = self.pubsub.unsubscribe(handle).await {
        tracing::warn!("Failed to unsubscribe latch {}: {:?}", name, e);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::InMemoryStore;
  use crate::pubsub::ChannelListener;
  use async_trait::async_trait;
  use nexus_latch_utils_rs::timing::TokioDelayedTaskScheduler;

  struct NoopListener;

  #[async_trait]
  impl ChannelListener for NoopListener {
    async fn on_subscribed(&self, _channel: &str) {}

    async fn on_message(&self, _channel: &str, _payload: i64) {}
  }

  async fn setup(delay: Duration) -> (InMemoryStore, Arc<SubscriptionRegistry>, CleanupScheduler, Arc<SubscriptionEntry>) {
    let store = InMemoryStore::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let cleanup = CleanupScheduler::new(
      registry.clone(),
      Arc::new(store.clone()),
      Arc::new(TokioDelayedTaskScheduler::new()),
      delay,
    );

    let entry = Arc::new(SubscriptionEntry::new());
    registry.insert_if_absent("a", entry.clone());
    let handle = store.subscribe("chan_a", Arc::new(NoopListener)).await.unwrap();
    assert_eq!(entry.subscription().activate(handle), None);
    (store, registry, cleanup, entry)
  }

  #[tokio::test]
  async fn test_check_leaves_held_entry() {
    let (store, registry, cleanup, _entry) = setup(Duration::from_secs(15)).await;
    assert!(!cleanup.check("a").await);
    assert!(registry.contains("a"));
    assert_eq!(store.subscriber_count("chan_a"), 1);
  }

  #[tokio::test]
  async fn test_check_retires_free_entry_once() {
    let (store, registry, cleanup, entry) = setup(Duration::from_secs(15)).await;
    registry.release("a", &entry);

    assert!(cleanup.check("a").await);
    assert!(!cleanup.check("a").await);
    assert!(!registry.contains("a"));
    assert_eq!(store.subscriber_count("chan_a"), 0);
    assert_eq!(store.unsubscribe_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_scheduled_check_is_debounced_by_new_holds() {
    let (store, registry, cleanup, entry) = setup(Duration::from_secs(15)).await;
    registry.release("a", &entry);
    cleanup.schedule("a");

    tokio::time::sleep(Duration::from_secs(5)).await;
    let held = registry.acquire_if_present("a").unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(registry.contains("a"));
    assert_eq!(store.subscriber_count("chan_a"), 1);

    registry.release("a", &held);
    cleanup.schedule("a");
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(!registry.contains("a"));
    assert_eq!(store.unsubscribe_count(), 1);
  }

  #[tokio::test]
  async fn test_evicted_lineage_outlives_its_holders() {
    let (store, registry, cleanup, entry) = setup(Duration::from_secs(15)).await;
    let held = registry.acquire_if_present("a").unwrap();
    registry.release("a", &entry);

    let evicted = registry.evict_lineage("a", &entry).unwrap();
    assert!(!cleanup.retire_evicted("a", &evicted).await);
    assert_eq!(store.subscriber_count("chan_a"), 1);

    assert!(!registry.release("a", &held));
    assert!(held.subscription().release_detached());
    cleanup.schedule_retire("a", held);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.subscriber_count("chan_a"), 0);
    assert_eq!(store.unsubscribe_count(), 1);
  }

  #[tokio::test]
  async fn test_free_evicted_lineage_is_retired_at_once() {
    let (store, registry, cleanup, entry) = setup(Duration::from_secs(15)).await;
    registry.release("a", &entry);

    let evicted = registry.evict_lineage("a", &entry).unwrap();
    assert!(cleanup.retire_evicted("a", &evicted).await);
    assert_eq!(store.subscriber_count("chan_a"), 0);
  }
}
