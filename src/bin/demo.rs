//! Two in-process members replicating a small document store.
//!
//! Run with `RUST_LOG=replicast=debug cargo run --bin replicast-demo` to see
//! the replication traffic.

use async_trait::async_trait;
use replicast::object::arg;
use replicast::transport::memory::InMemoryNetwork;
use replicast::{
  Interface, InvocationError, MethodPolicy, ObjectReplicator, Replicable, ReplicatedObject,
  ReplicatedProxy, ReplicationError, ReplicatorConfig, ReturnKind, StateError,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Documents {
  docs: Mutex<BTreeMap<String, Value>>,
}

impl Documents {
  fn get(&self, id: &str) -> Option<Value> {
    self.docs.lock().ok()?.get(id).cloned()
  }

  fn insert(&self, id: String, doc: Value) -> Result<(), InvocationError> {
    self
      .docs
      .lock()
      .map_err(|_| InvocationError::Failed("document store poisoned".to_string()))?
      .insert(id, doc);
    Ok(())
  }

  fn snapshot(&self) -> Result<Vec<u8>, StateError> {
    let docs = self
      .docs
      .lock()
      .map_err(|_| StateError::Other("document store poisoned".to_string()))?;
    Ok(serde_json::to_vec(&*docs)?)
  }
}

#[async_trait]
impl Replicable for Documents {
  fn interface() -> Interface {
    Interface::new("Documents")
      .local("get", ReturnKind::Value)
      .replicated("put", ReturnKind::Bool, MethodPolicy::new())
      .replicated("publish", ReturnKind::Unit, MethodPolicy::new().push())
      .replicated(
        "fetch",
        ReturnKind::Value,
        MethodPolicy::new().pull().with_timeout(Duration::from_secs(2)),
      )
  }

  async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, InvocationError> {
    match method {
      "get" | "fetch" => {
        let id: String = arg(method, args, 0)?;
        Ok(self.get(&id).unwrap_or(Value::Null))
      }
      "put" | "publish" => {
        let id: String = arg(method, args, 0)?;
        self.insert(id, args.get(1).cloned().unwrap_or(Value::Null))?;
        Ok(if method == "put" { json!(true) } else { Value::Null })
      }
      other => Err(InvocationError::NoSuchMethod(other.to_string())),
    }
  }

  fn as_replicated(&self) -> Option<&dyn ReplicatedObject> {
    Some(self)
  }
}

#[async_trait]
impl ReplicatedObject for Documents {
  async fn get_state(&self, output: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<(), StateError> {
    let bytes = self.snapshot()?;
    output.write_all(&bytes).await?;
    Ok(())
  }

  async fn set_state(&self, input: &mut (dyn AsyncRead + Send + Unpin)) -> Result<(), StateError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes).await?;
    let docs: BTreeMap<String, Value> = serde_json::from_slice(&bytes)?;
    *self
      .docs
      .lock()
      .map_err(|_| StateError::Other("document store poisoned".to_string()))? = docs;
    Ok(())
  }

  async fn get_named_state(
    &self,
    state_id: &str,
    output: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StateError> {
    let doc = self
      .get(state_id)
      .ok_or_else(|| StateError::UnknownState(state_id.to_string()))?;
    output.write_all(&serde_json::to_vec(&doc)?).await?;
    Ok(())
  }

  async fn set_named_state(
    &self,
    state_id: &str,
    input: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<(), StateError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes).await?;
    let doc: Value = serde_json::from_slice(&bytes)?;
    self
      .insert(state_id.to_string(), doc)
      .map_err(|e| StateError::Other(e.to_string()))
  }
}

/// Typed handle over the replicated store.
struct DocumentStore(ReplicatedProxy<Documents>);

impl DocumentStore {
  async fn put(&self, id: &str, doc: Value) -> Result<bool, ReplicationError> {
    self.0.call("put", vec![json!(id), doc]).await
  }

  async fn publish(&self, id: &str, doc: Value) -> Result<(), ReplicationError> {
    self.0.invoke("publish", vec![json!(id), doc]).await.map(|_| ())
  }

  async fn fetch(&self, id: &str) -> Result<Option<Value>, ReplicationError> {
    self.0.call("fetch", vec![json!(id)]).await
  }

  fn get(&self, id: &str) -> Option<Value> {
    self.0.local().get(id)
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let config = ReplicatorConfig::from_env()?;
  let network = InMemoryNetwork::new();
  let join_timeout = config.default_join_timeout;

  let seed = Documents::default();
  seed.insert("readme".to_string(), json!({"title": "hello"}))?;
  let a = ObjectReplicator::with_config(Arc::new(network.factory("node-a")), config.clone());
  let a = DocumentStore(a.replicate("documents", seed, join_timeout).await?);

  let b = ObjectReplicator::with_config(Arc::new(network.factory("node-b")), config);
  let b = DocumentStore(b.replicate_default("documents", Documents::default()).await?);
  info!(readme = ?b.get("readme"), "node-b joined with state");

  let accepted = a.put("guide", json!({"title": "getting started"})).await?;
  info!(accepted, guide = ?b.get("guide"), "replicated put");

  a.publish("notes", json!({"lines": ["one", "two"]})).await?;
  tokio::time::sleep(Duration::from_millis(100)).await;
  info!(notes = ?b.get("notes"), "pushed state");

  a.0.local().insert("late".to_string(), json!({"title": "added quietly"}))?;
  let local = b.fetch("late").await?;
  info!(local = ?local, pulled = ?b.get("late"), "pulled state");

  Ok(())
}
