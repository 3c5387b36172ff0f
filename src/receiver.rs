//! Inbound side of a replicated object.
//!
//! The [`ReplicationHandler`] is the [`GroupReceiver`] registered with the
//! channel. It executes calls arriving from peers on the local object, feeds
//! stream-control calls into the live inbound transfers, tracks views and
//! serves both ends of state transfers.

use crate::bulk::BulkStateCoordinator;
use crate::config::ReplicatorConfig;
use crate::membership::MembershipTracker;
use crate::object::{InvocationError, Replicable};
use crate::registry::{MethodRegistry, StreamOp};
use crate::slot::PendingPulls;
use crate::streaming::inbound::spawn_consumer;
use crate::streaming::{InboundStreams, StreamKey};
use crate::transport::{Address, GroupChannel, GroupReceiver, StateRequest, View};
use crate::wire::{self, MethodCall, Response, WireError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, trace, warn};

/// Receives group traffic on behalf of one replicated object.
pub struct ReplicationHandler<O: Replicable> {
  object: Arc<O>,
  registry: Arc<MethodRegistry>,
  channel: Arc<dyn GroupChannel>,
  membership: MembershipTracker,
  streams: InboundStreams,
  pulls: PendingPulls,
  bulk: BulkStateCoordinator,
}

impl<O: Replicable> ReplicationHandler<O> {
  /// Creates a handler for `object` on `channel`.
  pub fn new(
    object: Arc<O>,
    registry: Arc<MethodRegistry>,
    channel: Arc<dyn GroupChannel>,
    config: &ReplicatorConfig,
  ) -> Self {
    Self {
      object,
      registry,
      channel,
      membership: MembershipTracker::new(),
      streams: InboundStreams::new(config.inbound_buffer_chunks, config.stream_stall_timeout),
      pulls: PendingPulls::new(),
      bulk: BulkStateCoordinator::new(),
    }
  }

  /// The wrapped object.
  pub fn object(&self) -> &Arc<O> {
    &self.object
  }

  /// The method registry.
  pub fn registry(&self) -> &Arc<MethodRegistry> {
    &self.registry
  }

  /// Peer tracking.
  pub fn membership(&self) -> &MembershipTracker {
    &self.membership
  }

  /// Live inbound transfers.
  pub fn streams(&self) -> &InboundStreams {
    &self.streams
  }

  /// Pending named-state pulls.
  pub fn pulls(&self) -> &PendingPulls {
    &self.pulls
  }

  /// Join-time transfer coordination.
  pub fn bulk(&self) -> &BulkStateCoordinator {
    &self.bulk
  }

  /// Releases every in-flight transfer and forgets all peers.
  pub async fn shutdown(&self) {
    self.streams.close_all().await;
    self.pulls.clear().await;
    self.membership.disconnected().await;
  }

  async fn dispatch(&self, src: Address, call: MethodCall) -> Response {
    if let Some(op) = self.registry.stream_op(call.id) {
      return match self.stream(op, src, &call).await {
        Ok(()) => Response::Value(Value::Null),
        Err(e) => {
          warn!(method_id = call.id, error = %e, "malformed stream call");
          Response::Failure(InvocationError::Malformed(e.to_string()))
        }
      };
    }

    let Some(method) = self.registry.method(call.id) else {
      warn!(method_id = call.id, peer = %src, "call for unknown method id");
      return Response::Failure(InvocationError::NoSuchMethod(format!(
        "method id {}",
        call.id
      )));
    };

    trace!(method = %method.name, peer = %src, "executing replicated call");
    match self.object.invoke(&method.name, &call.args).await {
      Ok(value) => Response::Value(value),
      Err(e) => {
        debug!(method = %method.name, peer = %src, error = %e, "replicated call failed");
        Response::Failure(e)
      }
    }
  }

  async fn stream(&self, op: StreamOp, src: Address, call: &MethodCall) -> Result<(), WireError> {
    let key = StreamKey::new(call.state_id()?, src);
    match op {
      StreamOp::Begin => {
        let transfer = self.streams.begin(key).await;
        spawn_consumer(self.object.clone(), transfer);
      }
      StreamOp::Chunk => {
        let data = call.chunk()?;
        self.streams.chunk(&key, data).await;
      }
      StreamOp::End => self.streams.end(&key).await,
    }
    Ok(())
  }
}

#[async_trait]
impl<O: Replicable> GroupReceiver for ReplicationHandler<O> {
  async fn handle(&self, src: Address, payload: Bytes) -> Bytes {
    let response = match wire::decode_call(&payload) {
      Ok(call) => self.dispatch(src, call).await,
      Err(e) => {
        warn!(peer = %src, error = %e, "malformed call");
        Response::Failure(InvocationError::Malformed(e.to_string()))
      }
    };
    match wire::encode_response(&response) {
      Ok(bytes) => bytes,
      Err(e) => {
        error!(error = %e, "failed to encode response");
        Bytes::new()
      }
    }
  }

  async fn view_accepted(&self, view: View) {
    let local = self.channel.local_address();
    self
      .membership
      .apply_view(&view, local.as_ref(), self.object.as_replicated())
      .await;
  }

  async fn get_state(&self, request: &StateRequest, output: &mut (dyn AsyncWrite + Send + Unpin)) {
    let Some(state_id) = request.state_id.as_deref() else {
      self.bulk.provide(self.object.as_replicated(), output).await;
      return;
    };

    match self.object.as_replicated() {
      Some(object) => match object.get_named_state(state_id, output).await {
        Ok(()) => debug!(state_id = %state_id, "named state provided"),
        Err(e) => error!(state_id = %state_id, error = %e, "failed to provide named state"),
      },
      None => debug!(state_id = %state_id, "named state requested from object without state transfer"),
    }
    let _ = output.shutdown().await;
  }

  async fn set_state(&self, request: &StateRequest, input: &mut (dyn AsyncRead + Send + Unpin)) {
    let Some(state_id) = request.state_id.as_deref() else {
      self.bulk.load(self.object.as_replicated(), input).await;
      return;
    };

    let loaded = match self.object.as_replicated() {
      Some(object) => match object.set_named_state(state_id, input).await {
        Ok(()) => true,
        Err(e) => {
          error!(state_id = %state_id, error = %e, "failed to load named state");
          false
        }
      },
      None => false,
    };
    if !self.pulls.resolve(request.correlation, loaded).await {
      debug!(
        state_id = %state_id,
        correlation = %request.correlation,
        "named state arrived after its pull gave up"
      );
    }
  }
}
