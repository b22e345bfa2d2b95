//! A countdown latch whose counter and wake-up signal live in a shared store.
//!
//! Each process keeps at most one channel subscription per latch name, shared and
//! reference-counted across all local callers, and tears it down after a quiet period.

mod cleanup;
mod client;
mod config;
mod entry;
mod error;
mod latch;
mod memory;
mod message;
mod pubsub;
mod registry;
mod store;

pub use crate::cleanup::CleanupScheduler;
pub use crate::client::LatchClient;
pub use crate::config::{LatchConfig, LatchConfigOption, DEFAULT_CHANNEL_PREFIX};
pub use crate::entry::{SubscriptionEntry, SubscriptionSlot};
pub use crate::error::{LatchError, StoreError};
pub use crate::latch::CountDownLatch;
pub use crate::memory::InMemoryStore;
pub use crate::message::LatchMessage;
pub use crate::pubsub::{ChannelListener, PubSub, SubscriptionHandle};
pub use crate::registry::SubscriptionRegistry;
pub use crate::store::{
  Command, ConnectionManager, ConnectionMode, PooledConnection, Reply, StoreConnection, StoreResult, Transaction,
};
