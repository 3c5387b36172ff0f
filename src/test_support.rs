//! Shared fixtures for unit tests.

use crate::object::{InvocationError, Replicable, ReplicatedObject, arg};
use crate::policy::{Interface, MethodPolicy, ReturnKind};
use crate::state::StateError;
use crate::transport::{
  Address, GroupChannel, GroupReceiver, StateRequest, TransportError,
};
use crate::wire::{self, MethodCall, Response};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A channel that records casts and answers sends from a script.
#[derive(Default)]
pub struct ScriptedChannel {
  pub replies: Mutex<HashMap<Address, Response>>,
  pub silent: Mutex<HashSet<Address>>,
  pub casts: Mutex<Vec<(Address, MethodCall)>>,
  pub provider_present: Mutex<bool>,
  pub state_requests: Mutex<Vec<StateRequest>>,
}

impl ScriptedChannel {
  pub fn reply(&self, peer: &str, response: Response) {
    self
      .replies
      .lock()
      .unwrap()
      .insert(Address::from(peer), response);
  }

  pub fn mute(&self, peer: &str) {
    self.silent.lock().unwrap().insert(Address::from(peer));
  }

  pub fn casts(&self) -> Vec<(Address, MethodCall)> {
    self.casts.lock().unwrap().clone()
  }
}

#[async_trait]
impl GroupChannel for ScriptedChannel {
  async fn connect(
    &self,
    _group: &str,
    _receiver: Arc<dyn GroupReceiver>,
  ) -> Result<Address, TransportError> {
    Ok(Address::from("local"))
  }

  async fn disconnect(&self) -> Result<(), TransportError> {
    Ok(())
  }

  fn local_address(&self) -> Option<Address> {
    Some(Address::from("local"))
  }

  async fn send(&self, dest: &Address, _payload: Bytes) -> Result<Bytes, TransportError> {
    if self.silent.lock().unwrap().contains(dest) {
      tokio::time::sleep(Duration::from_secs(3600)).await;
    }
    let response = self
      .replies
      .lock()
      .unwrap()
      .get(dest)
      .cloned()
      .ok_or_else(|| TransportError::UnknownMember(dest.clone()))?;
    wire::encode_response(&response).map_err(|e| TransportError::Other(e.to_string()))
  }

  async fn cast(&self, dest: &Address, payload: Bytes) -> Result<(), TransportError> {
    let call = wire::decode_call(&payload).map_err(|e| TransportError::Other(e.to_string()))?;
    self.casts.lock().unwrap().push((dest.clone(), call));
    Ok(())
  }

  async fn request_state(
    &self,
    request: StateRequest,
    _timeout: Duration,
  ) -> Result<bool, TransportError> {
    self.state_requests.lock().unwrap().push(request);
    Ok(*self.provider_present.lock().unwrap())
  }
}

/// Key/value store used as the replicated object in unit tests.
///
/// Full state is the JSON map; the named state `key` is the JSON value of
/// that key.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, Value>>,
  pub dropped: Mutex<Vec<HashSet<Address>>>,
  pub local_address: Mutex<Option<Address>>,
  pub calls: Mutex<Vec<String>>,
  pub fail_state: Mutex<bool>,
  pub load_delay: Mutex<Duration>,
}

impl MemoryStore {
  pub fn with_entries(entries: &[(&str, Value)]) -> Self {
    let store = Self::default();
    for (key, value) in entries {
      store.insert(key, value.clone());
    }
    store
  }

  pub fn insert(&self, key: &str, value: Value) {
    self.entries.lock().unwrap().insert(key.to_string(), value);
  }

  pub fn value(&self, key: &str) -> Option<Value> {
    self.entries.lock().unwrap().get(key).cloned()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().unwrap().len()
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Replicable for MemoryStore {
  fn interface() -> Interface {
    Interface::new("MemoryStore")
      .local("get", ReturnKind::Value)
      .replicated("put", ReturnKind::Bool, MethodPolicy::new())
      .replicated("keys", ReturnKind::Collection, MethodPolicy::new())
      .replicated("clear", ReturnKind::Unit, MethodPolicy::new().asynchronous())
      .replicated("evict", ReturnKind::Bool, MethodPolicy::new().remote_only())
      .replicated("publish", ReturnKind::Unit, MethodPolicy::new().push())
      .replicated(
        "fetch",
        ReturnKind::Value,
        MethodPolicy::new().pull().with_timeout(Duration::from_secs(2)),
      )
      .replicated("fail", ReturnKind::Value, MethodPolicy::new())
  }

  async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, InvocationError> {
    self.calls.lock().unwrap().push(method.to_string());
    match method {
      "get" | "fetch" => {
        let key: String = arg(method, args, 0)?;
        Ok(self.value(&key).unwrap_or(Value::Null))
      }
      "put" => {
        let key: String = arg(method, args, 0)?;
        let value = args.get(1).cloned().unwrap_or(Value::Null);
        self.insert(&key, value);
        Ok(json!(true))
      }
      "keys" => Ok(json!(
        self.entries.lock().unwrap().keys().cloned().collect::<Vec<_>>()
      )),
      "clear" => {
        self.entries.lock().unwrap().clear();
        Ok(Value::Null)
      }
      "evict" => {
        let key: String = arg(method, args, 0)?;
        Ok(json!(self.entries.lock().unwrap().remove(&key).is_some()))
      }
      "publish" => {
        // Any JSON key is accepted here; only the proxy insists on a string id.
        let key = match args.first() {
          Some(Value::String(key)) => key.clone(),
          Some(other) => other.to_string(),
          None => return Err(InvocationError::Malformed("publish needs a key".to_string())),
        };
        let value = args.get(1).cloned().unwrap_or(Value::Null);
        self.insert(&key, value);
        Ok(Value::Null)
      }
      "fail" => Err(InvocationError::Failed("boom".to_string())),
      other => Err(InvocationError::NoSuchMethod(other.to_string())),
    }
  }

  fn as_replicated(&self) -> Option<&dyn ReplicatedObject> {
    Some(self)
  }
}

#[async_trait]
impl ReplicatedObject for MemoryStore {
  async fn get_state(&self, output: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<(), StateError> {
    let bytes = serde_json::to_vec(&*self.entries.lock().unwrap())?;
    output.write_all(&bytes).await?;
    Ok(())
  }

  async fn set_state(&self, input: &mut (dyn AsyncRead + Send + Unpin)) -> Result<(), StateError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes).await?;
    let entries: BTreeMap<String, Value> = serde_json::from_slice(&bytes)?;
    *self.entries.lock().unwrap() = entries;
    Ok(())
  }

  async fn get_named_state(
    &self,
    state_id: &str,
    output: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StateError> {
    if *self.fail_state.lock().unwrap() {
      return Err(StateError::Other("state unavailable".to_string()));
    }
    let value = self
      .value(state_id)
      .ok_or_else(|| StateError::UnknownState(state_id.to_string()))?;
    output.write_all(&serde_json::to_vec(&value)?).await?;
    Ok(())
  }

  async fn set_named_state(
    &self,
    state_id: &str,
    input: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<(), StateError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes).await?;
    let delay = *self.load_delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    let value: Value = serde_json::from_slice(&bytes)?;
    self.insert(state_id, value);
    Ok(())
  }

  fn set_local_address(&self, address: &Address) {
    *self.local_address.lock().unwrap() = Some(address.clone());
  }

  fn dropped_members(&self, members: &HashSet<Address>) {
    self.dropped.lock().unwrap().push(members.clone());
  }
}
