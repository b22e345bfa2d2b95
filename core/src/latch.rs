use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_latch_utils_rs::concurrent::{Gate, Promise};
use tokio::time::Instant;

use crate::client::LatchContext;
use crate::entry::SubscriptionEntry;
use crate::error::LatchError;
use crate::message::LatchMessage;
use crate::pubsub::ChannelListener;
use crate::store::{PooledConnection, Reply, Transaction};


/// Steers the local gate of one subscription from channel notifications.
struct LatchListener {
  channel_name: String,
  promise: Promise<bool>,
  gate: Gate,
}

#[async_trait]
impl ChannelListener for LatchListener {
  async fn on_subscribed(&self, channel: &str) {
    if channel == self.channel_name {
      tracing::debug!("Subscription confirmed: {}", channel);
      self.promise.resolve(true);
    }
  }

  async fn on_message(&self, channel: &str, payload: i64) {
    if channel != self.channel_name {
      return;
    }
    match LatchMessage::try_from(payload) {
      Ok(LatchMessage::Drained) => self.gate.open().await,
      Ok(LatchMessage::Rearmed) => self.gate.close().await,
      Err(_) => tracing::warn!("Ignoring unknown payload on {}: {}", channel, payload),
    }
  }
}

/// One caller's hold on the subscription entry of a latch name.
///
/// Dropping it, on any exit path, releases the hold and schedules the cleanup check.
struct SubscriptionHold {
  context: Arc<LatchContext>,
  name: String,
  entry: Arc<SubscriptionEntry>,
}

impl SubscriptionHold {
  fn gate(&self) -> &Gate {
    self.entry.gate()
  }

  fn failed(&self) -> LatchError {
    LatchError::SubscriptionFailed(self.context.config.channel_name(&self.name))
  }

  async fn confirmed(&self) -> Result<(), LatchError> {
    let timeout = self.context.config.subscription_timeout();
    match self.entry.promise().wait_timeout(timeout).await {
      Some(true) => Ok(()),
      Some(false) => Err(self.failed()),
      None => Err(LatchError::SubscriptionTimeout(timeout)),
    }
  }

  async fn confirmed_unbounded(&self) -> Result<(), LatchError> {
    if self.entry.promise().wait().await {
      Ok(())
    } else {
      Err(self.failed())
    }
  }

  async fn confirmed_within(&self, timeout: Duration) -> Result<bool, LatchError> {
    match self.entry.promise().wait_timeout(timeout).await {
      Some(true) => Ok(true),
      Some(false) => Err(self.failed()),
      None => Ok(false),
    }
  }
}

impl Drop for SubscriptionHold {
  fn drop(&mut self) {
    if self.context.registry.release(&self.name, &self.entry) {
      self.context.cleanup.schedule(&self.name);
    } else if self.entry.subscription().release_detached() {
      self.context.cleanup.schedule_retire(&self.name, self.entry.clone());
    }
  }
}

fn expect_applied(operation: &'static str, replies: &[Reply], expected: usize) -> Result<(), LatchError> {
  if replies.len() == expected {
    return Ok(());
  }
  tracing::error!(
    "{} expected {} transaction results, got {}",
    operation,
    expected,
    replies.len()
  );
  Err(LatchError::InvariantViolation {
    operation,
    expected,
    actual: replies.len(),
  })
}

/// A countdown latch whose counter lives in a shared store.
///
/// Waiters in any process are released once the counter reaches zero. Unlike a local latch the
/// counter can be armed again with [`CountDownLatch::try_set_count`] once it has drained.
#[derive(Clone)]
pub struct CountDownLatch {
  context: Arc<LatchContext>,
  name: String,
  channel_name: String,
}

impl fmt::Debug for CountDownLatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CountDownLatch")
      .field("name", &self.name)
      .field("channel_name", &self.channel_name)
      .finish()
  }
}

impl PartialEq for CountDownLatch {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.context, &other.context) && self.name == other.name
  }
}

impl Eq for CountDownLatch {}

impl CountDownLatch {
  pub(crate) fn new(context: Arc<LatchContext>, name: String) -> Self {
    let channel_name = context.config.channel_name(&name);
    Self {
      context,
      name,
      channel_name,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn channel_name(&self) -> &str {
    &self.channel_name
  }

  /// Suspends until the counter is zero or absent.
  pub async fn wait(&self) -> Result<(), LatchError> {
    let hold = self.ensure_subscribed();
    hold.confirmed_unbounded().await?;

    let recheck = self.context.config.recheck_interval();
    let mut count = self.read_count().await?;
    while count > 0 {
      let opened = hold.gate().wait_timeout(recheck).await;
      count = self.read_after_wake(hold.gate(), opened).await?;
    }
    Ok(())
  }

  /// Like [`CountDownLatch::wait`], but gives up after `timeout`.
  ///
  /// Returns `false` if the counter was still positive when the budget ran out. Joining the
  /// subscription counts against the same budget.
  pub async fn wait_timeout(&self, timeout: Duration) -> Result<bool, LatchError> {
    let started = Instant::now();
    let hold = self.ensure_subscribed();
    if !hold.confirmed_within(timeout).await? {
      return Ok(false);
    }

    let recheck = self.context.config.recheck_interval();
    let mut remaining = timeout.saturating_sub(started.elapsed());
    let mut count = self.read_count().await?;
    while count > 0 {
      if remaining.is_zero() {
        return Ok(false);
      }
      let waited_from = Instant::now();
      let opened = hold.gate().wait_timeout(remaining.min(recheck)).await;
      remaining = remaining.saturating_sub(waited_from.elapsed());
      count = self.read_after_wake(hold.gate(), opened).await?;
    }
    Ok(true)
  }

  /// Decrements the counter. The decrement that reaches zero removes the key and wakes all waiters.
  pub async fn count_down(&self) -> Result<(), LatchError> {
    let hold = self.ensure_subscribed();
    hold.confirmed().await?;
    if self.read_count().await? <= 0 {
      return Ok(());
    }

    let mut connection = PooledConnection::write(&self.context.connections).await?;
    let value = connection.decr(&self.name).await?;
    if value == 0 {
      let mut transaction = Transaction::new();
      transaction
        .del(&self.name)
        .publish(&self.channel_name, LatchMessage::Drained.into());
      let replies = connection.exec(transaction).await?;
      expect_applied("count_down", &replies, 2)?;
      tracing::debug!("Latch drained: {}", self.name);
    } else if value < 0 {
      // Another decrement already reached zero and announced it.
      connection.del(&self.name).await?;
    }
    Ok(())
  }

  /// Reads the counter; an absent key counts as zero.
  pub async fn get_count(&self) -> Result<i64, LatchError> {
    let hold = self.ensure_subscribed();
    hold.confirmed().await?;
    self.read_count().await
  }

  /// Arms the counter with `count`, only if it is currently absent.
  ///
  /// Returns `false` without changing anything if the counter is already set or was set
  /// concurrently.
  pub async fn try_set_count(&self, count: i64) -> Result<bool, LatchError> {
    if count <= 0 {
      return Err(LatchError::InvalidCount(count));
    }
    let hold = self.ensure_subscribed();
    hold.confirmed().await?;

    let mut connection = PooledConnection::write(&self.context.connections).await?;
    connection.watch(&self.name).await?;
    if connection.get(&self.name).await?.is_some() {
      connection.unwatch().await?;
      return Ok(false);
    }
    let mut transaction = Transaction::new();
    transaction
      .set(&self.name, count)
      .publish(&self.channel_name, LatchMessage::Rearmed.into());
    let replies = connection.exec(transaction).await?;
    let armed = replies.len() == 2;
    if armed {
      tracing::debug!("Latch armed: {} = {}", self.name, count);
    }
    Ok(armed)
  }

  /// Removes the counter, wakes all waiters and retires the local subscription right away.
  ///
  /// Returns whether a counter was present.
  pub async fn delete(&self) -> Result<bool, LatchError> {
    let hold = self.ensure_subscribed();
    let result = self.delete_key(&hold).await;
    let entry = hold.entry.clone();
    drop(hold);

    if let Some(evicted) = self.context.registry.evict_lineage(&self.name, &entry) {
      self.context.cleanup.retire_evicted(&self.name, &evicted).await;
    }
    result
  }

  async fn delete_key(&self, hold: &SubscriptionHold) -> Result<bool, LatchError> {
    hold.confirmed().await?;
    let mut connection = PooledConnection::write(&self.context.connections).await?;
    let mut transaction = Transaction::new();
    transaction
      .del(&self.name)
      .publish(&self.channel_name, LatchMessage::Drained.into());
    let replies = connection.exec(transaction).await?;
    expect_applied("delete", &replies, 2)?;
    // Local waiters may lose the notification once the subscription is retired below.
    hold.gate().open().await;
    Ok(matches!(replies.first(), Some(Reply::Integer(removed)) if *removed > 0))
  }

  /// Re-reads the counter after a gate wait and keeps the gate in step with it.
  ///
  /// An open gate over a positive counter is left over from an earlier drain whose rearm
  /// notification has not arrived, and would otherwise wake every wait at once. It is closed,
  /// then the counter is read again so that a drain landing in between reopens it.
  async fn read_after_wake(&self, gate: &Gate, opened: bool) -> Result<i64, LatchError> {
    let count = self.read_count().await?;
    if !opened || count <= 0 {
      return Ok(count);
    }
    gate.close().await;
    let count = self.read_count().await?;
    if count <= 0 {
      gate.open().await;
    }
    Ok(count)
  }

  async fn read_count(&self) -> Result<i64, LatchError> {
    let mut connection = PooledConnection::read(&self.context.connections).await?;
    Ok(connection.get(&self.name).await?.unwrap_or(0))
  }

  /// Joins the subscription for this name, creating it if no local caller holds one.
  fn ensure_subscribed(&self) -> SubscriptionHold {
    let registry = &self.context.registry;
    loop {
      if let Some(entry) = registry.acquire_if_present(&self.name) {
        return self.hold(entry);
      }
      let entry = Arc::new(SubscriptionEntry::new());
      if registry.insert_if_absent(&self.name, entry.clone()) {
        self.spawn_subscription(entry.clone());
        return self.hold(entry);
      }
    }
  }

  fn hold(&self, entry: Arc<SubscriptionEntry>) -> SubscriptionHold {
    SubscriptionHold {
      context: self.context.clone(),
      name: self.name.clone(),
      entry,
    }
  }

  /// Registers the channel subscription on its own task so that it completes even if the
  /// creating caller is cancelled.
  fn spawn_subscription(&self, entry: Arc<SubscriptionEntry>) {
    let context = self.context.clone();
    let name = self.name.clone();
    let channel_name = self.channel_name.clone();
    tokio::spawn(async move {
      let listener = Arc::new(LatchListener {
        channel_name: channel_name.clone(),
        promise: entry.promise().clone(),
        gate: entry.gate().clone(),
      });
      match context.pubsub.subscribe(&channel_name, listener).await {
        Ok(handle) => {
          tracing::debug!("Subscribed: {}", channel_name);
          if let Some(handle) = entry.subscription().activate(handle) {
            tracing::debug!("Subscription retired while subscribing: {}", channel_name);
            if let Err(e) = context.pubsub.unsubscribe(handle).await {
              tracing::warn!("Failed to unsubscribe latch {}: {:?}", name, e);
            }
          }
        }
        Err(e) => {
          tracing::error!("Failed to subscribe to {}: {:?}", channel_name, e);
          entry.promise().resolve(false);
          if let Some(evicted) = context.registry.evict_lineage(&name, &entry) {
            context.cleanup.retire_evicted(&name, &evicted).await;
          }
        }
      }
    });
  }
}
