//! State transfer contract for replicated objects.
//!
//! A replicated object that supports state transfer implements
//! [`ReplicatedObject`](crate::object::ReplicatedObject). Its state moves
//! between members as an opaque byte stream: either the full state (bulk
//! transfer on join) or one named unit of state identified by a caller-chosen
//! key (pushed after a call or pulled on a local miss).

use thiserror::Error;

/// Error type for state load/store operations.
///
/// These errors never cross the proxy boundary: the replication layer logs
/// them and resolves the pending transfer as failed.
#[derive(Error, Debug)]
pub enum StateError {
  /// Reading or writing the state stream failed.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  /// Serialization or deserialization failed.
  #[error("serialization error: {0}")]
  Serialization(String),
  /// The named state is not known to this member.
  #[error("unknown state: {0}")]
  UnknownState(String),
  /// Other object-specific error.
  #[error("state error: {0}")]
  Other(String),
}

impl From<serde_json::Error> for StateError {
  fn from(error: serde_json::Error) -> Self {
    Self::Serialization(error.to_string())
  }
}
