//! Errors surfaced to callers of a replicated object.

use crate::object::InvocationError;
use crate::registry::RegistryError;
use crate::transport::TransportError;
use serde_json::Value;
use thiserror::Error;

/// Error returned by [`ReplicatedProxy`](crate::ReplicatedProxy) and
/// [`ObjectReplicator`](crate::ObjectReplicator).
#[derive(Error, Debug)]
pub enum ReplicationError {
  /// The local object raised this failure; it is passed through unchanged.
  #[error(transparent)]
  Invocation(InvocationError),
  /// The call could not be dispatched to the group. The cause is logged.
  #[error("{method} {args:?} failed")]
  Dispatch {
    /// Method name.
    method: String,
    /// Call arguments.
    args: Vec<Value>,
  },
  /// The group channel failed during a lifecycle operation.
  #[error("transport error: {0}")]
  Transport(#[from] TransportError),
  /// The object's interface cannot be replicated.
  #[error("registry error: {0}")]
  Registry(#[from] RegistryError),
  /// The proxy has already been stopped.
  #[error("replicated object already stopped")]
  Stopped,
}

impl From<InvocationError> for ReplicationError {
  fn from(error: InvocationError) -> Self {
    Self::Invocation(error)
  }
}

impl ReplicationError {
  /// The object's own failure, if this is one.
  pub fn as_invocation(&self) -> Option<&InvocationError> {
    match self {
      Self::Invocation(e) => Some(e),
      _ => None,
    }
  }
}
