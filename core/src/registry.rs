use std::sync::Arc;

use dashmap::DashMap;
use nexus_latch_utils_rs::collections::{DashMapCasExtension, DashMapExtension};

use crate::entry::SubscriptionEntry;

/// Latch name to current `SubscriptionEntry`.
///
/// Entries are only ever replaced wholesale through compare-and-swap retry loops, so a reader
/// always sees a complete entry. One registry is owned by each `LatchClient`; a process that
/// talks to a single store creates one client at startup and keeps it for its lifetime, which
/// makes the registry process-wide for that store. Entries come and go with use; the map itself
/// is never torn down.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
  entries: DashMap<String, Arc<SubscriptionEntry>>,
}

impl SubscriptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, name: &str) -> Option<Arc<SubscriptionEntry>> {
    self.entries.get(name).map(|entry| entry.clone())
  }

  pub fn contains(&self, name: &str) -> bool {
    self.entries.contains_key(name)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Bumps the reference count of the entry for `name`, if any, and returns the new version.
  pub fn acquire_if_present(&self, name: &str) -> Option<Arc<SubscriptionEntry>> {
    loop {
      let current = self.get(name)?;
      let next = Arc::new(current.acquired());
      if self.entries.compare_and_replace(name, &current, next.clone()) {
        return Some(next);
      }
    }
  }

  /// Returns `false` if another entry was already registered for `name`.
  pub fn insert_if_absent(&self, name: &str, entry: Arc<SubscriptionEntry>) -> bool {
    let (_, existed) = self.entries.load_or_store(name.to_string(), entry);
    !existed
  }

  /// Drops one hold on the lineage of `held`.
  ///
  /// Returns `false` if that lineage is no longer registered; the hold then belongs to a
  /// detached lineage and must be released on its subscription slot instead.
  pub fn release(&self, name: &str, held: &SubscriptionEntry) -> bool {
    loop {
      let Some(current) = self.get(name) else {
        tracing::debug!("Release on evicted subscription entry: {}", name);
        return false;
      };
      if !current.same_lineage(held) {
        tracing::debug!("Release on replaced subscription entry: {}", name);
        return false;
      }
      if current.is_free() {
        tracing::warn!("Release without a matching acquire: {}", name);
        return true;
      }
      let next = Arc::new(current.released());
      if self.entries.compare_and_replace(name, &current, next) {
        return true;
      }
    }
  }

  /// Removes the entry for `name` only if it is unused at the moment of removal.
  pub fn remove_if_free(&self, name: &str) -> Option<Arc<SubscriptionEntry>> {
    let current = self.get(name)?;
    if !current.is_free() {
      return None;
    }
    if self.entries.remove_if_same(name, &current) {
      Some(current)
    } else {
      None
    }
  }

  /// Removes the entry for `name` if it still belongs to the lineage of `held`, whatever its count.
  pub fn evict_lineage(&self, name: &str, held: &SubscriptionEntry) -> Option<Arc<SubscriptionEntry>> {
    self
      .entries
      .remove_if(name, |_, current| current.same_lineage(held))
      .map(|(_, entry)| entry)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  #[test]
  fn test_acquire_if_present_on_empty_registry() {
    let registry = SubscriptionRegistry::new();
    assert!(registry.acquire_if_present("a").is_none());
    assert!(registry.is_empty());
  }

  #[test]
  fn test_insert_then_acquire_and_release() {
    let registry = SubscriptionRegistry::new();
    let entry = Arc::new(SubscriptionEntry::new());
    assert!(registry.insert_if_absent("a", entry.clone()));
    assert!(!registry.insert_if_absent("a", Arc::new(SubscriptionEntry::new())));

    let acquired = registry.acquire_if_present("a").unwrap();
    assert_eq!(acquired.refcount(), 2);
    assert!(acquired.promise().ptr_eq(entry.promise()));

    assert!(registry.release("a", &entry));
    assert!(registry.release("a", &entry));
    assert_eq!(registry.get("a").unwrap().refcount(), 0);

    assert!(registry.release("a", &entry));
    assert_eq!(registry.get("a").unwrap().refcount(), 0);
  }

  #[test]
  fn test_remove_if_free() {
    let registry = SubscriptionRegistry::new();
    let entry = Arc::new(SubscriptionEntry::new());
    registry.insert_if_absent("a", entry.clone());

    assert!(registry.remove_if_free("a").is_none());
    registry.release("a", &entry);
    assert!(registry.remove_if_free("a").is_some());
    assert!(registry.remove_if_free("a").is_none());
    assert!(!registry.contains("a"));
  }

  #[test]
  fn test_release_ignores_other_lineage() {
    let registry = SubscriptionRegistry::new();
    let old = Arc::new(SubscriptionEntry::new());
    registry.insert_if_absent("a", old.clone());
    assert_eq!(registry.evict_lineage("a", &old).unwrap().refcount(), 1);
    assert!(!registry.release("a", &old));

    let fresh = Arc::new(SubscriptionEntry::new());
    registry.insert_if_absent("a", fresh.clone());
    assert!(!registry.release("a", &old));
    assert_eq!(registry.get("a").unwrap().refcount(), 1);

    assert!(registry.evict_lineage("a", &old).is_none());
    assert!(registry.evict_lineage("a", &fresh).is_some());
  }

  #[rstest]
  #[case(2, 100)]
  #[case(8, 500)]
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_acquire_release_balances(#[case] tasks: usize, #[case] rounds: usize) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let entry = Arc::new(SubscriptionEntry::new());
    registry.insert_if_absent("a", entry.clone());

    let mut handles = Vec::new();
    for _ in 0..tasks {
      let registry = registry.clone();
      let entry = entry.clone();
      handles.push(tokio::spawn(async move {
        for _ in 0..rounds {
          let held = registry.acquire_if_present("a").unwrap();
          assert!(held.refcount() >= 2);
          registry.release("a", &entry);
          tokio::task::yield_now().await;
        }
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    assert_eq!(registry.get("a").unwrap().refcount(), 1);
  }
}
