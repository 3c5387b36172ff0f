//! Tests for join-time state transfer.

use crate::bulk::{BulkStateCoordinator, JoinOutcome};
use crate::test_support::{MemoryStore, ScriptedChannel};
use crate::transport::CorrelationId;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_first_member_completes_without_waiting() {
  let bulk = BulkStateCoordinator::new();
  let channel = ScriptedChannel::default();

  let outcome = bulk.join(&channel, Duration::from_secs(5)).await.unwrap();

  assert_eq!(outcome, JoinOutcome::FirstMember);
  let requests = channel.state_requests.lock().unwrap().clone();
  assert_eq!(requests.len(), 1);
  assert_eq!(requests[0].state_id, None);
  assert_eq!(requests[0].correlation, CorrelationId::JOIN);
}

#[tokio::test]
async fn test_missing_state_times_out_without_failing_the_join() {
  let bulk = BulkStateCoordinator::new();
  let channel = ScriptedChannel::default();
  *channel.provider_present.lock().unwrap() = true;

  let outcome = bulk
    .join(&channel, Duration::from_millis(30))
    .await
    .unwrap();
  assert_eq!(outcome, JoinOutcome::TimedOut);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loaded_state_resolves_the_join() {
  let bulk = Arc::new(BulkStateCoordinator::new());
  let channel = ScriptedChannel::default();
  *channel.provider_present.lock().unwrap() = true;
  let provider = MemoryStore::with_entries(&[("a", json!(1)), ("b", json!(2))]);
  let joiner = Arc::new(MemoryStore::default());

  let mut state = Vec::new();
  bulk.provide(Some(&provider), &mut state).await;

  let loader = {
    let bulk = bulk.clone();
    let joiner = joiner.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      bulk.load(Some(joiner.as_ref()), &mut state.as_slice()).await
    })
  };

  let outcome = bulk.join(&channel, Duration::from_secs(5)).await.unwrap();
  assert!(loader.await.unwrap());
  assert_eq!(outcome, JoinOutcome::Loaded);
  assert_eq!(joiner.value("b"), Some(json!(2)));
}

#[tokio::test]
async fn test_corrupt_state_reports_load_failure() {
  let bulk = BulkStateCoordinator::new();
  let joiner = MemoryStore::default();
  let loaded = bulk.load(Some(&joiner), &mut &b"not json"[..]).await;
  assert!(!loaded);
  assert_eq!(joiner.len(), 0);
}
