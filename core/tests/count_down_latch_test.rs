use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_latch_core_rs::{ChannelListener, InMemoryStore, LatchClient, LatchConfig, LatchMessage, PubSub};
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingListener {
  payloads: Mutex<Vec<i64>>,
}

#[async_trait]
impl ChannelListener for RecordingListener {
  async fn on_subscribed(&self, _channel: &str) {}

  async fn on_message(&self, _channel: &str, payload: i64) {
    self.payloads.lock().await.push(payload);
  }
}

fn two_processes(store: &InMemoryStore) -> (LatchClient, LatchClient) {
  let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
  (
    LatchClient::in_memory(store.clone(), LatchConfig::new()),
    LatchClient::in_memory(store.clone(), LatchConfig::new()),
  )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_count_downs_publish_one_drained_message() {
  let store = InMemoryStore::new();
  let (client, _) = two_processes(&store);
  let latch = client.count_down_latch("scenario");
  assert!(latch.try_set_count(3).await.unwrap());

  let observer = Arc::new(RecordingListener::default());
  store.subscribe(latch.channel_name(), observer.clone()).await.unwrap();

  let mut handles = Vec::new();
  for _ in 0..3 {
    let latch = latch.clone();
    handles.push(tokio::spawn(async move { latch.count_down().await }));
  }
  for handle in handles {
    handle.await.unwrap().unwrap();
  }
  tokio::time::sleep(Duration::from_millis(50)).await;

  assert_eq!(latch.get_count().await.unwrap(), 0);
  assert!(!store.contains_key("scenario"));
  assert_eq!(
    *observer.payloads.lock().await,
    vec![i64::from(LatchMessage::Drained)]
  );
}

#[tokio::test]
async fn waiter_in_one_process_released_by_another() {
  let store = InMemoryStore::new();
  let (waiting, counting) = two_processes(&store);

  let latch = counting.count_down_latch("jobs");
  assert!(latch.try_set_count(2).await.unwrap());

  let waiter = {
    let latch = waiting.count_down_latch("jobs");
    tokio::spawn(async move { latch.wait().await })
  };

  latch.count_down().await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  assert!(!waiter.is_finished());

  latch.count_down().await.unwrap();
  tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .expect("waiter not released")
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn drained_latch_can_be_rearmed() {
  let store = InMemoryStore::new();
  let (a, b) = two_processes(&store);
  let gate_a = a.count_down_latch("gate");
  let gate_b = b.count_down_latch("gate");

  assert!(gate_b.try_set_count(1).await.unwrap());
  assert!(!gate_a.wait_timeout(Duration::from_millis(100)).await.unwrap());

  gate_b.count_down().await.unwrap();
  assert!(gate_a.wait_timeout(Duration::from_secs(1)).await.unwrap());

  assert!(gate_b.try_set_count(1).await.unwrap());
  assert!(!gate_a.try_set_count(4).await.unwrap());
  assert!(!gate_a.wait_timeout(Duration::from_millis(100)).await.unwrap());

  gate_a.count_down().await.unwrap();
  assert!(gate_b.wait_timeout(Duration::from_secs(1)).await.unwrap());
  assert_eq!(
    store.published(gate_a.channel_name()),
    vec![
      i64::from(LatchMessage::Rearmed),
      i64::from(LatchMessage::Drained),
      i64::from(LatchMessage::Rearmed),
      i64::from(LatchMessage::Drained),
    ]
  );
}

#[tokio::test]
async fn delete_from_another_process_releases_waiters() {
  let store = InMemoryStore::new();
  let (a, b) = two_processes(&store);
  assert!(a.count_down_latch("shutdown").try_set_count(10).await.unwrap());

  let mut handles = Vec::new();
  for client in [&a, &b, &a, &b] {
    let latch = client.count_down_latch("shutdown");
    handles.push(tokio::spawn(async move { latch.wait().await }));
  }
  tokio::time::sleep(Duration::from_millis(50)).await;

  assert!(b.count_down_latch("shutdown").delete().await.unwrap());
  for handle in handles {
    tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .expect("waiter not released by delete")
      .unwrap()
      .unwrap();
  }
}

#[tokio::test(start_paused = true)]
async fn busy_name_keeps_one_subscription_until_quiet() {
  let store = InMemoryStore::new();
  let (client, _) = two_processes(&store);
  let latch = client.count_down_latch("busy");
  assert!(latch.try_set_count(1_000).await.unwrap());

  let mut handles = Vec::new();
  for _ in 0..8 {
    let latch = latch.clone();
    handles.push(tokio::spawn(async move {
      for _ in 0..10 {
        latch.count_down().await.unwrap();
        latch.get_count().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
      }
    }));
  }
  for handle in handles {
    handle.await.unwrap();
  }

  assert_eq!(store.subscriber_count(latch.channel_name()), 1);
  assert_eq!(client.registry().get("busy").unwrap().refcount(), 0);
  assert_eq!(latch.get_count().await.unwrap(), 920);

  tokio::time::sleep(Duration::from_secs(20)).await;
  assert!(client.registry().is_empty());
  assert_eq!(store.subscriber_count(latch.channel_name()), 0);
  assert_eq!(store.unsubscribe_count(), 1);
}
