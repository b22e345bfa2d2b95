use std::fmt;
use std::sync::Arc;

use nexus_latch_utils_rs::timing::{DelayedTaskScheduler, TokioDelayedTaskScheduler};

use crate::cleanup::CleanupScheduler;
use crate::config::LatchConfig;
use crate::latch::CountDownLatch;
use crate::memory::InMemoryStore;
use crate::pubsub::PubSub;
use crate::registry::SubscriptionRegistry;
use crate::store::ConnectionManager;

pub(crate) struct LatchContext {
  pub(crate) connections: Arc<dyn ConnectionManager>,
  pub(crate) pubsub: Arc<dyn PubSub>,
  pub(crate) registry: Arc<SubscriptionRegistry>,
  pub(crate) cleanup: CleanupScheduler,
  pub(crate) config: LatchConfig,
}

impl fmt::Debug for LatchContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LatchContext")
      .field("connections", &self.connections)
      .field("pubsub", &self.pubsub)
      .field("config", &self.config)
      .finish()
  }
}

/// Entry point for creating latches against one store.
#[derive(Debug, Clone)]
pub struct LatchClient {
  context: Arc<LatchContext>,
}

impl LatchClient {
  pub fn new(
    connections: Arc<dyn ConnectionManager>,
    pubsub: Arc<dyn PubSub>,
    scheduler: Arc<dyn DelayedTaskScheduler>,
    config: LatchConfig,
  ) -> Self {
    let registry = Arc::new(SubscriptionRegistry::new());
    let cleanup = CleanupScheduler::new(registry.clone(), pubsub.clone(), scheduler, config.cleanup_delay());
    Self {
      context: Arc::new(LatchContext {
        connections,
        pubsub,
        registry,
        cleanup,
        config,
      }),
    }
  }

  pub fn in_memory(store: InMemoryStore, config: LatchConfig) -> Self {
    Self::new(
      Arc::new(store.clone()),
      Arc::new(store),
      Arc::new(TokioDelayedTaskScheduler::new()),
      config,
    )
  }

  pub fn count_down_latch(&self, name: impl Into<String>) -> CountDownLatch {
    CountDownLatch::new(self.context.clone(), name.into())
  }

  pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
    &self.context.registry
  }
}
