//! Streaming transfer of named state over ordinary one-way calls.
//!
//! A transfer is one `begin(state_id)` call, any number of
//! `chunk(state_id, bytes)` calls and one `end(state_id)` call, all sent
//! one-way with the three reserved method ids of the
//! [`MethodRegistry`](crate::registry::MethodRegistry). The sending side is
//! [`outbound`]; the receiving side, which reassembles chunks into a reader
//! for the replicated object, is [`inbound`].

pub mod inbound;
pub mod outbound;

pub use inbound::{InboundStreamReader, InboundStreams, InboundTransfer, StreamKey};
pub use outbound::{OutboundStreamWriter, push_named_state};

use crate::dispatcher::DispatchError;
use crate::registry::{MethodRegistry, StreamOp};
use crate::state::StateError;
use crate::wire::MethodId;
use std::io;
use thiserror::Error;

/// The three reserved stream-control ids of one registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamIds {
  /// Id of the begin call.
  pub begin: MethodId,
  /// Id of the chunk call.
  pub chunk: MethodId,
  /// Id of the end call.
  pub end: MethodId,
}

impl StreamIds {
  /// Reads the reserved ids from `registry`.
  pub fn from_registry(registry: &MethodRegistry) -> Self {
    Self {
      begin: registry.stream_id(StreamOp::Begin),
      chunk: registry.stream_id(StreamOp::Chunk),
      end: registry.stream_id(StreamOp::End),
    }
  }
}

/// Errors raised while pushing a named state.
#[derive(Error, Debug)]
pub enum StreamError {
  /// The object failed to write its state.
  #[error("state error: {0}")]
  State(#[from] StateError),
  /// A stream call could not be dispatched.
  #[error("dispatch error: {0}")]
  Dispatch(#[from] DispatchError),
  /// Reading the produced state failed.
  #[error("io error: {0}")]
  Io(#[from] io::Error),
}
