use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of one command applied inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Ok,
  Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Set { key: String, value: i64 },
  Del { key: String },
  Publish { channel: String, payload: i64 },
}

/// Commands queued for a single `exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
  commands: Vec<Command>,
}

impl Transaction {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&mut self, key: &str, value: i64) -> &mut Self {
    self.commands.push(Command::Set {
      key: key.to_string(),
      value,
    });
    self
  }

  pub fn del(&mut self, key: &str) -> &mut Self {
    self.commands.push(Command::Del { key: key.to_string() });
    self
  }

  pub fn publish(&mut self, channel: &str, payload: i64) -> &mut Self {
    self.commands.push(Command::Publish {
      channel: channel.to_string(),
      payload,
    });
    self
  }

  pub fn into_commands(self) -> Vec<Command> {
    self.commands
  }
}

#[async_trait]
pub trait StoreConnection: Send + Sync + fmt::Debug {
  async fn get(&mut self, key: &str) -> StoreResult<Option<i64>>;

  /// Decrements `key` by one and returns the new value. An absent key counts as zero.
  async fn decr(&mut self, key: &str) -> StoreResult<i64>;

  async fn set(&mut self, key: &str, value: i64) -> StoreResult<()>;

  /// Returns the number of keys removed.
  async fn del(&mut self, key: &str) -> StoreResult<u64>;

  async fn watch(&mut self, key: &str) -> StoreResult<()>;

  async fn unwatch(&mut self) -> StoreResult<()>;

  /// Runs `transaction` and returns one reply per command that was applied.
  ///
  /// An empty list means the store discarded the transaction because a watched key changed.
  /// Callers must not assume all-or-nothing application and should count the replies.
  async fn exec(&mut self, transaction: Transaction) -> StoreResult<Vec<Reply>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
  Read,
  Write,
}

#[async_trait]
pub trait ConnectionManager: Send + Sync + fmt::Debug + 'static {
  async fn acquire_for_read(&self) -> StoreResult<Box<dyn StoreConnection>>;

  async fn acquire_for_write(&self) -> StoreResult<Box<dyn StoreConnection>>;

  /// Takes a connection back. Any keys it still watches must be forgotten before reuse.
  fn release(&self, mode: ConnectionMode, connection: Box<dyn StoreConnection>);
}

/// A connection that goes back to its manager when dropped.
pub struct PooledConnection {
  manager: Arc<dyn ConnectionManager>,
  mode: ConnectionMode,
  connection: Option<Box<dyn StoreConnection>>,
}

impl fmt::Debug for PooledConnection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PooledConnection")
      .field("mode", &self.mode)
      .field("connection", &self.connection)
      .finish()
  }
}

impl PooledConnection {
  pub async fn read(manager: &Arc<dyn ConnectionManager>) -> StoreResult<Self> {
    let connection = manager.acquire_for_read().await?;
    Ok(Self::new(manager.clone(), ConnectionMode::Read, connection))
  }

  pub async fn write(manager: &Arc<dyn ConnectionManager>) -> StoreResult<Self> {
    let connection = manager.acquire_for_write().await?;
    Ok(Self::new(manager.clone(), ConnectionMode::Write, connection))
  }

  fn new(manager: Arc<dyn ConnectionManager>, mode: ConnectionMode, connection: Box<dyn StoreConnection>) -> Self {
    Self {
      manager,
      mode,
      connection: Some(connection),
    }
  }
}

impl Deref for PooledConnection {
  type Target = dyn StoreConnection;

  fn deref(&self) -> &Self::Target {
    match &self.connection {
      Some(connection) => connection.as_ref(),
      None => unreachable!("connection is only taken on drop"),
    }
  }
}

impl DerefMut for PooledConnection {
  fn deref_mut(&mut self) -> &mut Self::Target {
    match &mut self.connection {
      Some(connection) => connection.as_mut(),
      None => unreachable!("connection is only taken on drop"),
    }
  }
}

impl Drop for PooledConnection {
  fn drop(&mut self) {
    if let Some(connection) = self.connection.take() {
      self.manager.release(self.mode, connection);
    }
  }
}

static_assertions::assert_impl_all!(PooledConnection: Send, Sync);
