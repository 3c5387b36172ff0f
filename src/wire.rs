//! Wire envelope for replicated calls.
//!
//! A message is one numeric method id plus one argument list. Arguments and
//! results are JSON values; the three stream-control calls carry the state id
//! as their first argument and, for chunks, the base64-encoded bytes as the
//! second. No further framing is added: the envelope rides inside the
//! transport's own message.

use crate::object::InvocationError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Numeric method id, assigned by the [`MethodRegistry`](crate::registry::MethodRegistry).
pub type MethodId = u16;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum WireError {
  /// Encoding failed.
  #[error("encode error: {0}")]
  Encode(String),
  /// Decoding failed.
  #[error("decode error: {0}")]
  Decode(String),
  /// A required argument is absent.
  #[error("missing argument {0}")]
  MissingArgument(usize),
  /// An argument has the wrong shape.
  #[error("invalid argument {index}: {reason}")]
  InvalidArgument {
    /// Position of the argument.
    index: usize,
    /// What was wrong with it.
    reason: String,
  },
}

/// One remote method invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
  /// Registry id of the method.
  pub id: MethodId,
  /// Positional arguments.
  pub args: Vec<Value>,
}

impl MethodCall {
  /// Creates a call.
  #[must_use]
  pub fn new(id: MethodId, args: Vec<Value>) -> Self {
    Self { id, args }
  }

  /// Stream begin/end call for `state_id`.
  #[must_use]
  pub fn stream_control(id: MethodId, state_id: &str) -> Self {
    Self::new(id, vec![Value::String(state_id.to_string())])
  }

  /// Stream chunk call carrying `chunk` for `state_id`.
  #[must_use]
  pub fn stream_chunk(id: MethodId, state_id: &str, chunk: &[u8]) -> Self {
    Self::new(
      id,
      vec![
        Value::String(state_id.to_string()),
        Value::String(BASE64_STANDARD.encode(chunk)),
      ],
    )
  }

  /// Returns the state id carried as the first argument.
  pub fn state_id(&self) -> Result<&str, WireError> {
    self
      .args
      .first()
      .ok_or(WireError::MissingArgument(0))?
      .as_str()
      .ok_or_else(|| WireError::InvalidArgument {
        index: 0,
        reason: "state id must be a string".to_string(),
      })
  }

  /// Returns the chunk bytes carried as the second argument.
  pub fn chunk(&self) -> Result<Bytes, WireError> {
    let encoded = self
      .args
      .get(1)
      .ok_or(WireError::MissingArgument(1))?
      .as_str()
      .ok_or_else(|| WireError::InvalidArgument {
        index: 1,
        reason: "chunk must be a base64 string".to_string(),
      })?;
    BASE64_STANDARD
      .decode(encoded)
      .map(Bytes::from)
      .map_err(|e| WireError::InvalidArgument {
        index: 1,
        reason: e.to_string(),
      })
  }
}

/// Reply to a [`MethodCall`]: the callee's result or the failure it raised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Response {
  /// The method returned normally.
  Value(Value),
  /// The method failed; the failure itself is the payload.
  Failure(InvocationError),
}

/// Encodes a call.
pub fn encode_call(call: &MethodCall) -> Result<Bytes, WireError> {
  serde_json::to_vec(call)
    .map(Bytes::from)
    .map_err(|e| WireError::Encode(e.to_string()))
}

/// Decodes a call.
pub fn decode_call(payload: &[u8]) -> Result<MethodCall, WireError> {
  if payload.is_empty() {
    return Err(WireError::Decode("message buffer is empty".to_string()));
  }
  serde_json::from_slice(payload).map_err(|e| WireError::Decode(e.to_string()))
}

/// Encodes a response.
pub fn encode_response(response: &Response) -> Result<Bytes, WireError> {
  serde_json::to_vec(response)
    .map(Bytes::from)
    .map_err(|e| WireError::Encode(e.to_string()))
}

/// Decodes a response.
pub fn decode_response(payload: &[u8]) -> Result<Response, WireError> {
  serde_json::from_slice(payload).map_err(|e| WireError::Decode(e.to_string()))
}
