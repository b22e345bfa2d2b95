use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::store::StoreResult;

/// Receives the events of one channel subscription, in delivery order.
#[async_trait]
pub trait ChannelListener: Send + Sync + 'static {
  async fn on_subscribed(&self, channel: &str);

  async fn on_message(&self, channel: &str, payload: i64);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
  id: u64,
  channel: String,
}

impl SubscriptionHandle {
  pub fn new(id: u64, channel: impl Into<String>) -> Self {
    Self {
      id,
      channel: channel.into(),
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn channel(&self) -> &str {
    &self.channel
  }
}

#[async_trait]
pub trait PubSub: Send + Sync + fmt::Debug + 'static {
  /// Registers `listener` on `channel`. Confirmation arrives later through
  /// `ChannelListener::on_subscribed`.
  async fn subscribe(&self, channel: &str, listener: Arc<dyn ChannelListener>) -> StoreResult<SubscriptionHandle>;

  /// Returns the number of subscriptions the payload was delivered to.
  async fn publish(&self, channel: &str, payload: i64) -> StoreResult<u64>;

  async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()>;
}
