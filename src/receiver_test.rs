//! Tests for inbound message handling.

use crate::config::ReplicatorConfig;
use crate::object::{InvocationError, Replicable};
use crate::receiver::ReplicationHandler;
use crate::registry::{MethodRegistry, StreamOp};
use crate::test_support::{MemoryStore, ScriptedChannel};
use crate::transport::{Address, CorrelationId, GroupReceiver, StateRequest, View};
use crate::wire::{self, MethodCall, Response};
use bytes::Bytes;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn handler(store: MemoryStore) -> ReplicationHandler<MemoryStore> {
  ReplicationHandler::new(
    Arc::new(store),
    Arc::new(MethodRegistry::build(&MemoryStore::interface()).unwrap()),
    Arc::new(ScriptedChannel::default()),
    &ReplicatorConfig::default(),
  )
}

async fn send(handler: &ReplicationHandler<MemoryStore>, call: MethodCall) -> Response {
  let reply = handler
    .handle(Address::from("peer"), wire::encode_call(&call).unwrap())
    .await;
  wire::decode_response(&reply).unwrap()
}

#[tokio::test]
async fn test_registered_call_executes_on_local_object() {
  let handler = handler(MemoryStore::default());
  let put = handler.registry().lookup("put").unwrap().id;

  let response = send(&handler, MethodCall::new(put, vec![json!("k"), json!(5)])).await;

  assert_eq!(response, Response::Value(json!(true)));
  assert_eq!(handler.object().value("k"), Some(json!(5)));
}

#[tokio::test]
async fn test_object_failure_is_the_response_payload() {
  let handler = handler(MemoryStore::default());
  let fail = handler.registry().lookup("fail").unwrap().id;

  let response = send(&handler, MethodCall::new(fail, vec![])).await;

  assert_eq!(
    response,
    Response::Failure(InvocationError::Failed("boom".to_string()))
  );
}

#[tokio::test]
async fn test_malformed_and_unknown_calls_get_failure_responses() {
  let handler = handler(MemoryStore::default());

  let reply = handler
    .handle(Address::from("peer"), Bytes::from_static(b"{not json"))
    .await;
  assert!(matches!(
    wire::decode_response(&reply).unwrap(),
    Response::Failure(InvocationError::Malformed(_))
  ));

  let response = send(&handler, MethodCall::new(999, vec![])).await;
  assert!(matches!(
    response,
    Response::Failure(InvocationError::NoSuchMethod(_))
  ));
}

#[tokio::test]
async fn test_stream_calls_reassemble_named_state() {
  let handler = handler(MemoryStore::default());
  let registry = handler.registry().clone();
  let begin = registry.stream_id(StreamOp::Begin);
  let chunk = registry.stream_id(StreamOp::Chunk);
  let end = registry.stream_id(StreamOp::End);

  send(&handler, MethodCall::stream_control(begin, "doc")).await;
  send(&handler, MethodCall::stream_chunk(chunk, "doc", b"[1,")).await;
  send(&handler, MethodCall::stream_chunk(chunk, "doc", b"2]")).await;
  send(&handler, MethodCall::stream_control(end, "doc")).await;

  let mut loaded = false;
  for _ in 0..100 {
    if handler.object().value("doc") == Some(json!([1, 2])) {
      loaded = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert!(loaded);
  assert_eq!(handler.streams().live_count().await, 0);
}

#[tokio::test]
async fn test_stream_call_without_state_id_is_malformed() {
  let handler = handler(MemoryStore::default());
  let begin = handler.registry().stream_id(StreamOp::Begin);

  let response = send(&handler, MethodCall::new(begin, vec![json!(7)])).await;

  assert!(matches!(
    response,
    Response::Failure(InvocationError::Malformed(_))
  ));
}

#[tokio::test]
async fn test_view_change_notifies_dropped_members() {
  let handler = handler(MemoryStore::default());
  let members = |names: &[&str]| names.iter().map(|n| Address::from(*n)).collect::<Vec<_>>();

  handler
    .view_accepted(View::new(1, members(&["local", "b", "c"])))
    .await;
  handler
    .view_accepted(View::new(2, members(&["local", "c"])))
    .await;

  let dropped = handler.object().dropped.lock().unwrap().clone();
  assert_eq!(dropped.len(), 1);
  assert!(dropped[0].contains(&Address::from("b")));
  assert_eq!(
    handler.membership().snapshot().await.members(),
    &[Address::from("c")]
  );
}

#[tokio::test]
async fn test_named_state_provider_absorbs_failures() {
  let handler = handler(MemoryStore::with_entries(&[("k", json!(1))]));
  *handler.object().fail_state.lock().unwrap() = true;
  let mut output = Vec::new();

  handler
    .get_state(&StateRequest::named("k", CorrelationId::new(3)), &mut output)
    .await;
  assert!(output.is_empty());

  handler
    .get_state(&StateRequest::named("missing", CorrelationId::new(4)), &mut output)
    .await;
  assert!(output.is_empty());
}

#[tokio::test]
async fn test_named_state_delivery_resolves_its_pull() {
  let handler = handler(MemoryStore::default());
  let (correlation, slot) = handler.pulls().register().await;

  handler
    .set_state(
      &StateRequest::named("k", correlation),
      &mut &b"\"v\""[..],
    )
    .await;

  assert_eq!(
    slot.wait(Duration::from_secs(1)).await,
    crate::slot::SlotOutcome::Loaded
  );
  assert_eq!(handler.object().value("k"), Some(json!("v")));
  assert_eq!(handler.object().value("other"), None::<Value>);
}
