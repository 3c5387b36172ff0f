//! Single-assignment result cells for state transfers.
//!
//! A [`PendingStateSlot`] is armed before a state request goes out and is
//! resolved exactly once by whoever loads the state. The waiting side bounds
//! its wait; the resolving side never blocks.

use crate::transport::CorrelationId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

/// How a wait on a [`PendingStateSlot`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotOutcome {
  /// The state was loaded.
  Loaded,
  /// Loading the state failed.
  Failed,
  /// Nothing arrived before the timeout.
  TimedOut,
  /// The resolver was dropped without resolving.
  Abandoned,
}

/// Resolving half of a slot.
#[derive(Debug)]
pub struct SlotResolver {
  tx: oneshot::Sender<bool>,
}

impl SlotResolver {
  /// Resolves the slot. Returns false if nobody is waiting any more.
  pub fn resolve(self, loaded: bool) -> bool {
    self.tx.send(loaded).is_ok()
  }
}

/// Waiting half of a slot.
#[derive(Debug)]
pub struct PendingStateSlot {
  rx: oneshot::Receiver<bool>,
}

impl PendingStateSlot {
  /// Creates a connected resolver/slot pair.
  #[allow(clippy::new_ret_no_self)]
  pub fn new() -> (SlotResolver, PendingStateSlot) {
    let (tx, rx) = oneshot::channel();
    (SlotResolver { tx }, PendingStateSlot { rx })
  }

  /// Waits for the slot to be resolved, at most `timeout`.
  pub async fn wait(self, timeout: Duration) -> SlotOutcome {
    match tokio::time::timeout(timeout, self.rx).await {
      Ok(Ok(true)) => SlotOutcome::Loaded,
      Ok(Ok(false)) => SlotOutcome::Failed,
      Ok(Err(_)) => SlotOutcome::Abandoned,
      Err(_) => SlotOutcome::TimedOut,
    }
  }
}

/// Pending named-state pulls keyed by correlation id.
#[derive(Debug)]
pub struct PendingPulls {
  next: AtomicU64,
  slots: Mutex<HashMap<CorrelationId, SlotResolver>>,
}

impl Default for PendingPulls {
  fn default() -> Self {
    Self {
      // 0 is reserved for the join transfer.
      next: AtomicU64::new(1),
      slots: Mutex::new(HashMap::new()),
    }
  }
}

impl PendingPulls {
  /// Creates an empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Arms a slot under a fresh correlation id.
  pub async fn register(&self) -> (CorrelationId, PendingStateSlot) {
    let id = CorrelationId::new(self.next.fetch_add(1, Ordering::Relaxed));
    let (resolver, slot) = PendingStateSlot::new();
    self.slots.lock().await.insert(id, resolver);
    (id, slot)
  }

  /// Resolves and removes the slot for `id`. Returns false if none was armed.
  pub async fn resolve(&self, id: CorrelationId, loaded: bool) -> bool {
    match self.slots.lock().await.remove(&id) {
      Some(resolver) => resolver.resolve(loaded),
      None => false,
    }
  }

  /// Drops the slot for `id` without resolving it.
  pub async fn forget(&self, id: CorrelationId) {
    self.slots.lock().await.remove(&id);
  }

  /// Drops every armed slot; waiters observe [`SlotOutcome::Abandoned`].
  pub async fn clear(&self) {
    self.slots.lock().await.clear();
  }

  /// Number of armed slots.
  pub async fn len(&self) -> usize {
    self.slots.lock().await.len()
  }

  /// Returns true if no slot is armed.
  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }
}
