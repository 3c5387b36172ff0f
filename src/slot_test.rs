//! Tests for pending state slots.

use crate::slot::{PendingPulls, PendingStateSlot, SlotOutcome};
use crate::transport::CorrelationId;
use std::time::Duration;

#[tokio::test]
async fn test_slot_reports_loaded_and_failed() {
  let (resolver, slot) = PendingStateSlot::new();
  assert!(resolver.resolve(true));
  assert_eq!(slot.wait(Duration::from_secs(1)).await, SlotOutcome::Loaded);

  let (resolver, slot) = PendingStateSlot::new();
  resolver.resolve(false);
  assert_eq!(slot.wait(Duration::from_secs(1)).await, SlotOutcome::Failed);
}

#[tokio::test]
async fn test_slot_times_out_when_never_resolved() {
  let (_resolver, slot) = PendingStateSlot::new();
  assert_eq!(
    slot.wait(Duration::from_millis(20)).await,
    SlotOutcome::TimedOut
  );
}

#[tokio::test]
async fn test_dropped_resolver_abandons_the_slot() {
  let (resolver, slot) = PendingStateSlot::new();
  drop(resolver);
  assert_eq!(
    slot.wait(Duration::from_secs(1)).await,
    SlotOutcome::Abandoned
  );
}

#[tokio::test]
async fn test_pulls_get_distinct_ids_and_resolve_once() {
  let pulls = PendingPulls::new();
  let (first, first_slot) = pulls.register().await;
  let (second, _second_slot) = pulls.register().await;
  assert_ne!(first, second);
  assert_ne!(first, CorrelationId::JOIN);
  assert_eq!(pulls.len().await, 2);

  assert!(pulls.resolve(first, true).await);
  assert!(!pulls.resolve(first, true).await);
  assert_eq!(
    first_slot.wait(Duration::from_secs(1)).await,
    SlotOutcome::Loaded
  );

  pulls.forget(second).await;
  assert!(pulls.is_empty().await);
}
