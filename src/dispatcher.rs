//! Outbound call fan-out and response aggregation.
//!
//! The [`CallDispatcher`] encodes a [`MethodCall`] once and sends it to every
//! destination concurrently. One-way calls return as soon as they are queued;
//! synchronous calls share one deadline across all destinations.

use crate::policy::{MethodPolicy, ReturnKind};
use crate::transport::{Address, GroupChannel, TransportError};
use crate::wire::{self, MethodCall, Response, WireError};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Whether the dispatcher waits for replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
  /// One-way: do not wait.
  GetNone,
  /// Wait for every destination, up to the timeout.
  GetAll,
}

/// Per-call dispatch options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestOptions {
  /// Reply handling.
  pub mode: ResponseMode,
  /// Shared deadline for all destinations.
  pub timeout: Duration,
}

impl RequestOptions {
  /// Options matching a method policy.
  pub fn for_policy(policy: &MethodPolicy) -> Self {
    Self {
      mode: if policy.asynchronous {
        ResponseMode::GetNone
      } else {
        ResponseMode::GetAll
      },
      timeout: policy.timeout,
    }
  }

  /// One-way options.
  pub fn one_way() -> Self {
    Self {
      mode: ResponseMode::GetNone,
      timeout: Duration::ZERO,
    }
  }
}

/// Outcome for one destination.
#[derive(Clone, Debug, PartialEq)]
pub enum Rsp {
  /// A reply arrived.
  Received(Response),
  /// The send failed or the reply could not be decoded.
  Failed(String),
  /// No reply before the deadline.
  NotReceived,
}

/// Replies of one dispatched call, in destination order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseList {
  entries: Vec<(Address, Rsp)>,
}

impl ResponseList {
  /// All entries.
  pub fn entries(&self) -> &[(Address, Rsp)] {
    &self.entries
  }

  /// Destinations that did not answer in time.
  pub fn missing(&self) -> Vec<&Address> {
    self
      .entries
      .iter()
      .filter(|(_, rsp)| matches!(rsp, Rsp::NotReceived))
      .map(|(addr, _)| addr)
      .collect()
  }

  /// Number of entries.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Returns true if there are no entries.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl FromIterator<(Address, Rsp)> for ResponseList {
  fn from_iter<I: IntoIterator<Item = (Address, Rsp)>>(iter: I) -> Self {
    Self {
      entries: iter.into_iter().collect(),
    }
  }
}

/// Dispatch failures.
#[derive(Error, Debug)]
pub enum DispatchError {
  /// The call could not be encoded.
  #[error(transparent)]
  Wire(#[from] WireError),
  /// The transport refused the call.
  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// Sends calls to group members over a [`GroupChannel`].
#[derive(Clone)]
pub struct CallDispatcher {
  channel: Arc<dyn GroupChannel>,
}

impl CallDispatcher {
  /// Creates a dispatcher over `channel`.
  pub fn new(channel: Arc<dyn GroupChannel>) -> Self {
    Self { channel }
  }

  /// Sends `call` to every destination.
  ///
  /// With [`ResponseMode::GetNone`] the returned list is empty; casts that
  /// fail to queue are logged. With [`ResponseMode::GetAll`] the list holds
  /// one entry per destination.
  pub async fn call(
    &self,
    dests: &[Address],
    call: &MethodCall,
    options: RequestOptions,
  ) -> Result<ResponseList, DispatchError> {
    let payload = wire::encode_call(call)?;

    if options.mode == ResponseMode::GetNone {
      for (dest, error) in self.channel.multicast(dests, payload).await {
        warn!(peer = %dest, method_id = call.id, error = %error, "one-way call not delivered");
      }
      return Ok(ResponseList::default());
    }

    let deadline = Instant::now() + options.timeout;
    let sends = dests.iter().map(|dest| {
      let payload = payload.clone();
      async move {
        let rsp = match tokio::time::timeout_at(deadline, self.channel.send(dest, payload)).await {
          Ok(Ok(reply)) => match wire::decode_response(&reply) {
            Ok(response) => Rsp::Received(response),
            Err(e) => Rsp::Failed(e.to_string()),
          },
          Ok(Err(e)) => Rsp::Failed(e.to_string()),
          Err(_) => Rsp::NotReceived,
        };
        (dest.clone(), rsp)
      }
    });
    let responses: ResponseList = join_all(sends).await.into_iter().collect();

    let missing = responses.missing();
    if !missing.is_empty() {
      warn!(
        method_id = call.id,
        missing = missing.len(),
        timeout_ms = options.timeout.as_millis() as u64,
        "some peers did not respond in time"
      );
    }
    trace!(method_id = call.id, responses = responses.len(), "call dispatched");
    Ok(responses)
  }
}

/// Combines the local result with peer replies according to `kind`.
///
/// `local` is `None` when the method was not executed locally.
pub fn aggregate(kind: ReturnKind, local: Option<Value>, responses: &ResponseList) -> Value {
  match kind {
    ReturnKind::Bool => {
      let local_ok = local.as_ref().is_none_or(|v| v.as_bool().unwrap_or(false));
      let peers_ok = responses.entries().iter().all(|(peer, rsp)| match rsp {
        Rsp::Received(Response::Value(Value::Bool(b))) => *b,
        other => {
          debug!(peer = %peer, response = ?other, "peer response counts as false");
          false
        }
      });
      Value::Bool(local_ok && peers_ok)
    }
    ReturnKind::Collection => {
      let mut union = match local {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
      };
      for (_, rsp) in responses.entries() {
        if let Rsp::Received(Response::Value(Value::Array(items))) = rsp {
          union.extend(items.iter().cloned());
        }
      }
      Value::Array(union)
    }
    ReturnKind::Unit | ReturnKind::Value => local.unwrap_or(Value::Null),
  }
}
