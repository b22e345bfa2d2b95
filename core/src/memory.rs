use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::pubsub::{ChannelListener, PubSub, SubscriptionHandle};
use crate::store::{Command, ConnectionManager, ConnectionMode, Reply, StoreConnection, StoreResult, Transaction};

#[derive(Debug, Default)]
struct Keyspace {
  values: HashMap<String, i64>,
  versions: HashMap<String, u64>,
}

impl Keyspace {
  fn version(&self, key: &str) -> u64 {
    self.versions.get(key).copied().unwrap_or_default()
  }

  fn touch(&mut self, key: &str) {
    *self.versions.entry(key.to_string()).or_default() += 1;
  }

  fn set(&mut self, key: &str, value: i64) {
    self.values.insert(key.to_string(), value);
    self.touch(key);
  }

  fn del(&mut self, key: &str) -> u64 {
    if self.values.remove(key).is_some() {
      self.touch(key);
      1
    } else {
      0
    }
  }

  fn decr(&mut self, key: &str) -> i64 {
    let value = self.values.get(key).copied().unwrap_or_default() - 1;
    self.set(key, value);
    value
  }
}

#[derive(Debug)]
enum Delivery {
  Subscribed,
  Message(i64),
}

#[derive(Debug)]
struct Subscriber {
  id: u64,
  sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Default)]
struct Inner {
  keyspace: Mutex<Keyspace>,
  channels: DashMap<String, Vec<Subscriber>>,
  published: DashMap<String, Vec<i64>>,
  next_subscription_id: AtomicU64,
  outstanding_connections: AtomicUsize,
  unsubscribes: AtomicUsize,
  drop_next_deliveries: AtomicUsize,
  duplicate_deliveries: AtomicBool,
  fail_subscriptions: AtomicBool,
  closed: AtomicBool,
}

impl Inner {
  fn keyspace(&self) -> MutexGuard<'_, Keyspace> {
    self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn ensure_open(&self) -> StoreResult<()> {
    if self.closed.load(Ordering::SeqCst) {
      Err(StoreError::Closed)
    } else {
      Ok(())
    }
  }

  fn take_drop_credit(&self) -> bool {
    self
      .drop_next_deliveries
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  }

  fn publish(&self, channel: &str, payload: i64) -> u64 {
    self.published.entry(channel.to_string()).or_default().push(payload);
    let Some(subscribers) = self.channels.get(channel) else {
      return 0;
    };
    let duplicate = self.duplicate_deliveries.load(Ordering::SeqCst);
    let mut receivers = 0;
    for subscriber in subscribers.iter() {
      receivers += 1;
      if self.take_drop_credit() {
        tracing::debug!("Dropping delivery on {} for subscription {}", channel, subscriber.id);
        continue;
      }
      let _ = subscriber.sender.send(Delivery::Message(payload));
      if duplicate {
        let _ = subscriber.sender.send(Delivery::Message(payload));
      }
    }
    receivers
  }
}

/// A process-local store implementing both `ConnectionManager` and `PubSub`.
///
/// Semantics follow what the latch protocol relies on from a Redis-like server: `decr` on an
/// absent key yields `-1`, `exec` after a watched key changed returns no replies, and every
/// subscription receives its confirmation before any message, in publish order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
  inner: Arc<Inner>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn value(&self, key: &str) -> Option<i64> {
    self.inner.keyspace().values.get(key).copied()
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.inner.keyspace().values.contains_key(key)
  }

  /// Every payload ever published on `channel`, in order.
  pub fn published(&self, channel: &str) -> Vec<i64> {
    self
      .inner
      .published
      .get(channel)
      .map(|payloads| payloads.clone())
      .unwrap_or_default()
  }

  pub fn subscriber_count(&self, channel: &str) -> usize {
    self.inner.channels.get(channel).map(|s| s.len()).unwrap_or_default()
  }

  pub fn unsubscribe_count(&self) -> usize {
    self.inner.unsubscribes.load(Ordering::SeqCst)
  }

  pub fn outstanding_connections(&self) -> usize {
    self.inner.outstanding_connections.load(Ordering::SeqCst)
  }

  /// Silently discards the next `n` per-subscription deliveries.
  pub fn drop_next_deliveries(&self, n: usize) {
    self.inner.drop_next_deliveries.store(n, Ordering::SeqCst);
  }

  /// Delivers every published message twice.
  pub fn set_duplicate_deliveries(&self, duplicate: bool) {
    self.inner.duplicate_deliveries.store(duplicate, Ordering::SeqCst);
  }

  pub fn set_fail_subscriptions(&self, fail: bool) {
    self.inner.fail_subscriptions.store(fail, Ordering::SeqCst);
  }

  /// Makes every subsequent connection, command and subscription fail with `StoreError::Closed`.
  pub fn close(&self) {
    self.inner.closed.store(true, Ordering::SeqCst);
  }

  fn acquire(&self) -> StoreResult<Box<dyn StoreConnection>> {
    self.inner.ensure_open()?;
    self.inner.outstanding_connections.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(InMemoryConnection {
      inner: self.inner.clone(),
      watched: HashMap::new(),
    }))
  }
}

#[async_trait]
impl ConnectionManager for InMemoryStore {
  async fn acquire_for_read(&self) -> StoreResult<Box<dyn StoreConnection>> {
    self.acquire()
  }

  async fn acquire_for_write(&self) -> StoreResult<Box<dyn StoreConnection>> {
    self.acquire()
  }

  fn release(&self, _mode: ConnectionMode, connection: Box<dyn StoreConnection>) {
    drop(connection);
    self.inner.outstanding_connections.fetch_sub(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl PubSub for InMemoryStore {
  async fn subscribe(&self, channel: &str, listener: Arc<dyn ChannelListener>) -> StoreResult<SubscriptionHandle> {
    self.inner.ensure_open()?;
    if self.inner.fail_subscriptions.load(Ordering::SeqCst) {
      return Err(StoreError::OperationFailed(format!("subscribe to {} rejected", channel)));
    }

    let id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let _ = sender.send(Delivery::Subscribed);
    self
      .inner
      .channels
      .entry(channel.to_string())
      .or_default()
      .push(Subscriber { id, sender });

    let channel_name = channel.to_string();
    tokio::spawn(async move {
      while let Some(delivery) = receiver.recv().await {
        match delivery {
          Delivery::Subscribed => listener.on_subscribed(&channel_name).await,
          Delivery::Message(payload) => listener.on_message(&channel_name, payload).await,
        }
      }
    });

    Ok(SubscriptionHandle::new(id, channel))
  }

  async fn publish(&self, channel: &str, payload: i64) -> StoreResult<u64> {
    self.inner.ensure_open()?;
    Ok(self.inner.publish(channel, payload))
  }

  async fn unsubscribe(&self, handle: SubscriptionHandle) -> StoreResult<()> {
    let removed = match self.inner.channels.get_mut(handle.channel()) {
      Some(mut subscribers) => {
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.id());
        before != subscribers.len()
      }
      None => false,
    };
    if !removed {
      return Err(StoreError::UnknownSubscription(format!(
        "{}#{}",
        handle.channel(),
        handle.id()
      )));
    }
    self
      .inner
      .channels
      .remove_if(handle.channel(), |_, subscribers| subscribers.is_empty());
    self.inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

#[derive(Debug)]
struct InMemoryConnection {
  inner: Arc<Inner>,
  watched: HashMap<String, u64>,
}

#[async_trait]
impl StoreConnection for InMemoryConnection {
  async fn get(&mut self, key: &str) -> StoreResult<Option<i64>> {
    self.inner.ensure_open()?;
    Ok(self.inner.keyspace().values.get(key).copied())
  }

  async fn decr(&mut self, key: &str) -> StoreResult<i64> {
    self.inner.ensure_open()?;
    Ok(self.inner.keyspace().decr(key))
  }

  async fn set(&mut self, key: &str, value: i64) -> StoreResult<()> {
    self.inner.ensure_open()?;
    self.inner.keyspace().set(key, value);
    Ok(())
  }

  async fn del(&mut self, key: &str) -> StoreResult<u64> {
    self.inner.ensure_open()?;
    Ok(self.inner.keyspace().del(key))
  }

  async fn watch(&mut self, key: &str) -> StoreResult<()> {
    self.inner.ensure_open()?;
    let version = self.inner.keyspace().version(key);
    self.watched.insert(key.to_string(), version);
    Ok(())
  }

  async fn unwatch(&mut self) -> StoreResult<()> {
    self.watched.clear();
    Ok(())
  }

  async fn exec(&mut self, transaction: Transaction) -> StoreResult<Vec<Reply>> {
    self.inner.ensure_open()?;
    let watched = std::mem::take(&mut self.watched);
    let mut keyspace = self.inner.keyspace();
    if watched.iter().any(|(key, version)| keyspace.version(key) != *version) {
      tracing::debug!("Discarding transaction, watched keys changed: {:?}", watched.keys());
      return Ok(Vec::new());
    }

    let replies = transaction
      .into_commands()
      .into_iter()
      .map(|command| match command {
        Command::Set { key, value } => {
          keyspace.set(&key, value);
          Reply::Ok
        }
        Command::Del { key } => Reply::Integer(keyspace.del(&key) as i64),
        Command::Publish { channel, payload } => Reply::Integer(self.inner.publish(&channel, payload) as i64),
      })
      .collect();
    Ok(replies)
  }
}
