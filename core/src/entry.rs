use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nexus_latch_utils_rs::concurrent::{Gate, Promise};

use crate::pubsub::SubscriptionHandle;

#[derive(Debug)]
enum Registration {
  Pending,
  Active(SubscriptionHandle),
  Retired,
}

#[derive(Debug)]
struct SlotState {
  registration: Registration,
  detached: bool,
  // Holds still out on the lineage after it left the registry. Goes negative while releases
  // race ahead of the eviction that detaches it.
  detached_holds: isize,
}

/// Owns the remote subscription handle of one entry lineage.
///
/// Whichever side arrives second (the subscriber recording the handle, or the
/// retirement) ends up holding the handle and is responsible for unsubscribing.
///
/// A lineage evicted while callers still hold it is detached: it stays subscribed until the
/// last of those holds is released.
#[derive(Debug)]
pub struct SubscriptionSlot {
  state: Mutex<SlotState>,
}

impl Default for SubscriptionSlot {
  fn default() -> Self {
    Self {
      state: Mutex::new(SlotState {
        registration: Registration::Pending,
        detached: false,
        detached_holds: 0,
      }),
    }
  }
}

impl SubscriptionSlot {
  fn state(&self) -> MutexGuard<'_, SlotState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Records `handle`. Gives it back if the slot was retired in the meantime.
  pub fn activate(&self, handle: SubscriptionHandle) -> Option<SubscriptionHandle> {
    let mut state = self.state();
    if matches!(state.registration, Registration::Pending) {
      state.registration = Registration::Active(handle);
      None
    } else {
      Some(handle)
    }
  }

  /// Marks the slot retired and returns the handle to tear down, if one was recorded.
  pub fn retire(&self) -> Option<SubscriptionHandle> {
    let mut state = self.state();
    match std::mem::replace(&mut state.registration, Registration::Retired) {
      Registration::Active(handle) => Some(handle),
      Registration::Pending | Registration::Retired => None,
    }
  }

  /// Records that the lineage left the registry with `holds` callers still holding it.
  ///
  /// Returns `true` if nobody holds it any more and the caller should retire it now.
  pub fn detach(&self, holds: usize) -> bool {
    let mut state = self.state();
    state.detached = true;
    state.detached_holds += holds as isize;
    state.detached_holds <= 0
  }

  /// Drops one hold taken before the lineage left the registry.
  ///
  /// Returns `true` for the release that leaves a detached lineage without holders.
  pub fn release_detached(&self) -> bool {
    let mut state = self.state();
    state.detached_holds -= 1;
    state.detached && state.detached_holds == 0
  }
}

/// One version of the shared per-name subscription record.
///
/// Entries are never mutated. Changing the reference count produces a new entry that shares
/// the promise, gate and subscription slot of its predecessor; entries sharing those form one
/// lineage.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
  promise: Promise<bool>,
  gate: Gate,
  subscription: Arc<SubscriptionSlot>,
  refcount: usize,
}

impl Default for SubscriptionEntry {
  fn default() -> Self {
    Self::new()
  }
}

impl SubscriptionEntry {
  /// Creates the first entry of a lineage, held once by its creator.
  pub fn new() -> Self {
    Self {
      promise: Promise::new(),
      gate: Gate::new(),
      subscription: Arc::new(SubscriptionSlot::default()),
      refcount: 1,
    }
  }

  pub fn acquired(&self) -> Self {
    Self {
      refcount: self.refcount + 1,
      ..self.clone()
    }
  }

  pub fn released(&self) -> Self {
    Self {
      refcount: self.refcount.saturating_sub(1),
      ..self.clone()
    }
  }

  pub fn promise(&self) -> &Promise<bool> {
    &self.promise
  }

  pub fn gate(&self) -> &Gate {
    &self.gate
  }

  pub fn subscription(&self) -> &SubscriptionSlot {
    &self.subscription
  }

  pub fn refcount(&self) -> usize {
    self.refcount
  }

  pub fn is_free(&self) -> bool {
    self.refcount == 0
  }

  pub fn same_lineage(&self, other: &SubscriptionEntry) -> bool {
    self.promise.ptr_eq(&other.promise)
  }
}
