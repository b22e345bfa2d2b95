use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

pub trait DashMapExtension<K: Eq + Hash, V: Clone> {
  fn load_or_store(&self, key: K, value: V) -> (V, bool);
}

impl<K: Eq + Hash, V: Clone> DashMapExtension<K, V> for DashMap<K, V> {
  fn load_or_store(&self, key: K, value: V) -> (V, bool) {
    match self.entry(key) {
      dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), true),
      dashmap::mapref::entry::Entry::Vacant(entry) => (entry.insert(value).clone(), false),
    }
  }
}

/// Compare-and-swap on `Arc` values, comparing by pointer identity.
pub trait DashMapCasExtension<K: Eq + Hash, V> {
  /// Replaces the value for `key` with `new` only if it is still `current`.
  fn compare_and_replace<Q>(&self, key: &Q, current: &Arc<V>, new: Arc<V>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized;

  /// Removes `key` only if its value is still `current`.
  fn remove_if_same<Q>(&self, key: &Q, current: &Arc<V>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized;
}

impl<K: Eq + Hash, V> DashMapCasExtension<K, V> for DashMap<K, Arc<V>> {
  fn compare_and_replace<Q>(&self, key: &Q, current: &Arc<V>, new: Arc<V>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    match self.get_mut(key) {
      Some(mut slot) if Arc::ptr_eq(slot.value(), current) => {
        *slot = new;
        true
      }
      _ => false,
    }
  }

  fn remove_if_same<Q>(&self, key: &Q, current: &Arc<V>) -> bool
  where
    K: Borrow<Q>,
    Q: Hash + Eq + ?Sized,
  {
    self.remove_if(key, |_, value| Arc::ptr_eq(value, current)).is_some()
  }
}
