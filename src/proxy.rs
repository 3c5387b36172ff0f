//! Outbound side of a replicated object.
//!
//! A [`ReplicatedProxy`] stands in for the wrapped object. Local-only
//! methods, and every method while the object has no peers, run directly on
//! the object. Replicated methods follow their [`MethodPolicy`]:
//!
//! - mode `None` replays the call on every peer,
//! - mode `Push` runs locally, then streams the named state to every peer,
//! - mode `Pull` runs locally and, on a null result, loads the named state
//!   from the group.
//!
//! Users normally wrap the proxy in a forwarding struct implementing their
//! own trait:
//!
//! ```rust,ignore
//! struct CacheHandle(ReplicatedProxy<SessionCache>);
//!
//! impl CacheHandle {
//!   async fn put(&self, key: &str, value: &str) -> Result<bool, ReplicationError> {
//!     self.0.call("put", vec![json!(key), json!(value)]).await
//!   }
//! }
//! ```

use crate::config::ReplicatorConfig;
use crate::dispatcher::{CallDispatcher, RequestOptions, ResponseMode, aggregate};
use crate::error::ReplicationError;
use crate::object::{InvocationError, Replicable};
use crate::policy::{MethodPolicy, ReplicationMode};
use crate::receiver::ReplicationHandler;
use crate::registry::{MethodRegistry, RegisteredMethod};
use crate::slot::SlotOutcome;
use crate::streaming::{StreamIds, push_named_state};
use crate::transport::{Address, GroupChannel, StateRequest};
use crate::wire::MethodCall;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

struct ProxyCore<O: Replicable> {
  handler: Arc<ReplicationHandler<O>>,
  channel: Arc<dyn GroupChannel>,
  dispatcher: CallDispatcher,
  stream_ids: StreamIds,
  config: ReplicatorConfig,
  group: String,
  stopped: AtomicBool,
}

/// Replicating stand-in for an object of type `O`. Cheap to clone.
pub struct ReplicatedProxy<O: Replicable> {
  core: Arc<ProxyCore<O>>,
}

impl<O: Replicable> Clone for ReplicatedProxy<O> {
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
    }
  }
}

impl<O: Replicable> ReplicatedProxy<O> {
  pub(crate) fn new(
    handler: Arc<ReplicationHandler<O>>,
    channel: Arc<dyn GroupChannel>,
    config: ReplicatorConfig,
    group: String,
  ) -> Self {
    let stream_ids = StreamIds::from_registry(handler.registry());
    Self {
      core: Arc::new(ProxyCore {
        dispatcher: CallDispatcher::new(channel.clone()),
        handler,
        channel,
        stream_ids,
        config,
        group,
        stopped: AtomicBool::new(false),
      }),
    }
  }

  /// Invokes `method` with `args` under its replication policy.
  ///
  /// Failures of the local object come back as
  /// [`ReplicationError::Invocation`] unchanged; failures to reach the group
  /// come back as [`ReplicationError::Dispatch`].
  pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ReplicationError> {
    let Some(registered) = self.registry().lookup(method).cloned() else {
      return self.invoke_local(method, &args).await;
    };

    let peers = self.peers().await;
    if peers.is_empty() {
      if registered.policy.remote_only {
        trace!(method = %method, "remote-only call with no peers");
        return Ok(registered.returns.zero_value());
      }
      return self.invoke_local(method, &args).await;
    }

    match registered.policy.mode {
      ReplicationMode::None => self.invoke_replicated(&registered, args, peers).await,
      ReplicationMode::Push => self.invoke_push(&registered, args, peers).await,
      ReplicationMode::Pull => self.invoke_pull(&registered, args).await,
    }
  }

  /// Typed form of [`invoke`](Self::invoke) for forwarding structs.
  pub async fn call<R: DeserializeOwned>(
    &self,
    method: &str,
    args: Vec<Value>,
  ) -> Result<R, ReplicationError> {
    let value = self.invoke(method, args).await?;
    serde_json::from_value(value).map_err(|e| {
      ReplicationError::Invocation(InvocationError::InvalidArguments {
        method: method.to_string(),
        reason: format!("unexpected result: {e}"),
      })
    })
  }

  async fn invoke_local(&self, method: &str, args: &[Value]) -> Result<Value, ReplicationError> {
    self
      .local()
      .invoke(method, args)
      .await
      .map_err(ReplicationError::Invocation)
  }

  async fn invoke_replicated(
    &self,
    method: &RegisteredMethod,
    args: Vec<Value>,
    peers: Vec<Address>,
  ) -> Result<Value, ReplicationError> {
    let policy = &method.policy;
    let local = if policy.remote_only {
      None
    } else {
      Some(self.invoke_local(&method.name, &args).await?)
    };

    let call = MethodCall::new(method.id, args);
    let options = RequestOptions::for_policy(policy);
    let responses = match self.core.dispatcher.call(&peers, &call, options).await {
      Ok(responses) => responses,
      Err(e) => {
        warn!(method = %method.name, error = %e, "replicated call failed");
        return Err(ReplicationError::Dispatch {
          method: method.name.clone(),
          args: call.args,
        });
      }
    };

    if options.mode == ResponseMode::GetNone {
      return Ok(local.unwrap_or_else(|| method.returns.zero_value()));
    }
    Ok(aggregate(method.returns, local, &responses))
  }

  async fn invoke_push(
    &self,
    method: &RegisteredMethod,
    args: Vec<Value>,
    peers: Vec<Address>,
  ) -> Result<Value, ReplicationError> {
    let result = self.invoke_local(&method.name, &args).await?;
    let state_id = state_id(&method.name, &args)?;
    let Some(object) = self.local().as_replicated() else {
      return Err(dispatch_error(&method.name, args));
    };

    debug!(method = %method.name, state_id = %state_id, "replicating state");
    match push_named_state(
      object,
      self.core.dispatcher.clone(),
      peers,
      &state_id,
      self.core.stream_ids,
      self.core.config.chunk_size,
    )
    .await
    {
      Ok(chunks) => trace!(state_id = %state_id, chunks, "sent state"),
      Err(e) => warn!(state_id = %state_id, error = %e, "failed to push state"),
    }
    Ok(result)
  }

  async fn invoke_pull(
    &self,
    method: &RegisteredMethod,
    args: Vec<Value>,
  ) -> Result<Value, ReplicationError> {
    let result = self.invoke_local(&method.name, &args).await?;
    if !result.is_null() {
      return Ok(result);
    }
    let state_id = state_id(&method.name, &args)?;
    self.pull(&method.policy, &state_id).await;
    Ok(result)
  }

  async fn pull(&self, policy: &MethodPolicy, state_id: &str) {
    debug!(state_id = %state_id, "pulling state");
    let pulls = self.core.handler.pulls();
    let (correlation, slot) = pulls.register().await;

    let requested = self
      .core
      .channel
      .request_state(StateRequest::named(state_id, correlation), policy.timeout)
      .await;
    match requested {
      Ok(true) => match slot.wait(policy.timeout).await {
        SlotOutcome::Loaded => debug!(state_id = %state_id, "loaded"),
        outcome => {
          pulls.forget(correlation).await;
          warn!(state_id = %state_id, ?outcome, "load error or timeout");
        }
      },
      Ok(false) => {
        pulls.forget(correlation).await;
        info!(state_id = %state_id, "first member or timeout exceeded");
      }
      Err(e) => {
        pulls.forget(correlation).await;
        warn!(state_id = %state_id, error = %e, "state request failed");
      }
    }
  }

  /// The wrapped object, for purely local access.
  pub fn local(&self) -> &O {
    self.core.handler.object()
  }

  /// Current peers; empty once stopped.
  pub async fn peers(&self) -> Vec<Address> {
    if self.is_stopped() {
      return Vec::new();
    }
    self
      .core
      .handler
      .membership()
      .snapshot()
      .await
      .members()
      .to_vec()
  }

  /// Local address while connected.
  pub fn local_address(&self) -> Option<Address> {
    self.core.channel.local_address()
  }

  /// The method registry.
  pub fn registry(&self) -> &MethodRegistry {
    self.core.handler.registry()
  }

  /// Group this proxy replicates over.
  pub fn group(&self) -> &str {
    &self.core.group
  }

  /// Returns true once [`ObjectReplicator::stop`](crate::ObjectReplicator::stop) ran.
  pub fn is_stopped(&self) -> bool {
    self.core.stopped.load(Ordering::Acquire)
  }

  pub(crate) async fn shutdown(&self) -> Result<(), ReplicationError> {
    if self.core.stopped.swap(true, Ordering::AcqRel) {
      return Err(ReplicationError::Stopped);
    }
    let disconnected = self.core.channel.disconnect().await;
    self.core.handler.shutdown().await;
    disconnected?;
    Ok(())
  }
}

fn state_id(method: &str, args: &[Value]) -> Result<String, ReplicationError> {
  match args.first() {
    Some(Value::String(id)) => Ok(id.clone()),
    _ => {
      warn!(method = %method, "state id argument must be a string");
      Err(dispatch_error(method, args.to_vec()))
    }
  }
}

fn dispatch_error(method: &str, args: Vec<Value>) -> ReplicationError {
  ReplicationError::Dispatch {
    method: method.to_string(),
    args,
  }
}
