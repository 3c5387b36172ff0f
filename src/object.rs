//! Contract between the replication layer and the wrapped object.
//!
//! Rust has no runtime proxies, so a replicated interface is expressed in
//! three pieces:
//!
//! 1. an [`Interface`] table naming every method and its policy,
//! 2. a [`Replicable`] implementation on the object that executes a method by
//!    name with JSON arguments,
//! 3. a hand-written forwarding struct implementing the user's own trait by
//!    delegating to [`ReplicatedProxy::invoke`](crate::ReplicatedProxy::invoke).
//!
//! Objects whose state can be transferred also implement [`ReplicatedObject`]
//! and expose it through [`Replicable::as_replicated`].

use crate::policy::Interface;
use crate::state::StateError;
use crate::transport::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Failure raised by the wrapped object's own method.
///
/// It travels back to a remote caller unchanged as the response payload, and
/// is returned to a local caller verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationError {
  /// The object has no method with this name or id.
  #[error("no such method: {0}")]
  NoSuchMethod(String),
  /// Arguments did not match the method's signature.
  #[error("invalid arguments for {method}: {reason}")]
  InvalidArguments {
    /// Method name.
    method: String,
    /// What was wrong.
    reason: String,
  },
  /// The inbound message could not be decoded.
  #[error("malformed call: {0}")]
  Malformed(String),
  /// The method itself failed.
  #[error("{0}")]
  Failed(String),
}

/// An object whose methods can be invoked by name.
#[async_trait]
pub trait Replicable: Send + Sync + 'static {
  /// Declaration-ordered method table.
  fn interface() -> Interface
  where
    Self: Sized;

  /// Executes `method` locally.
  async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, InvocationError>;

  /// State-transfer capability, when supported.
  fn as_replicated(&self) -> Option<&dyn ReplicatedObject> {
    None
  }
}

/// State-transfer and membership capabilities of a replicated object.
#[async_trait]
pub trait ReplicatedObject: Send + Sync {
  /// Writes the full state.
  async fn get_state(&self, output: &mut (dyn AsyncWrite + Send + Unpin))
  -> Result<(), StateError>;

  /// Replaces the full state with the one read from `input`.
  async fn set_state(&self, input: &mut (dyn AsyncRead + Send + Unpin)) -> Result<(), StateError>;

  /// Writes the named state `state_id`.
  async fn get_named_state(
    &self,
    state_id: &str,
    output: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StateError>;

  /// Loads the named state `state_id` from `input`.
  async fn set_named_state(
    &self,
    state_id: &str,
    input: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<(), StateError>;

  /// Called once with the address assigned on connect.
  fn set_local_address(&self, _address: &Address) {}

  /// Called with the peers that left the group since the previous view.
  fn dropped_members(&self, _members: &HashSet<Address>) {}
}

/// Decodes argument `index` of `method`.
pub fn arg<T: DeserializeOwned>(
  method: &str,
  args: &[Value],
  index: usize,
) -> Result<T, InvocationError> {
  let value = args
    .get(index)
    .ok_or_else(|| InvocationError::InvalidArguments {
      method: method.to_string(),
      reason: format!("missing argument {index}"),
    })?;
  serde_json::from_value(value.clone()).map_err(|e| InvocationError::InvalidArguments {
    method: method.to_string(),
    reason: format!("argument {index}: {e}"),
  })
}
