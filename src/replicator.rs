//! Replication lifecycle: wrap an object, join its group, leave again.

use crate::config::ReplicatorConfig;
use crate::error::ReplicationError;
use crate::object::Replicable;
use crate::policy::ReplicationMode;
use crate::proxy::ReplicatedProxy;
use crate::receiver::ReplicationHandler;
use crate::registry::{MethodRegistry, RegistryError};
use crate::transport::{ChannelFactory, GroupReceiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Creates replicated objects on channels from one [`ChannelFactory`].
pub struct ObjectReplicator {
  factory: Arc<dyn ChannelFactory>,
  config: ReplicatorConfig,
}

impl ObjectReplicator {
  /// Creates a replicator with the default configuration.
  pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
    Self::with_config(factory, ReplicatorConfig::default())
  }

  /// Creates a replicator with `config`.
  pub fn with_config(factory: Arc<dyn ChannelFactory>, config: ReplicatorConfig) -> Self {
    Self { factory, config }
  }

  /// The configuration applied to every replicated object.
  pub fn config(&self) -> &ReplicatorConfig {
    &self.config
  }

  /// Replicates `object` over `group`, waiting at most `join_timeout` for
  /// its initial state.
  ///
  /// The returned proxy is usable even when no state arrived: only failures
  /// to build the registry or to connect are errors. A failed connect leaves
  /// the channel disconnected.
  pub async fn replicate<O: Replicable>(
    &self,
    group: &str,
    object: O,
    join_timeout: Duration,
  ) -> Result<ReplicatedProxy<O>, ReplicationError> {
    let registry = MethodRegistry::build(&O::interface())?;
    if object.as_replicated().is_none() {
      if let Some(method) = registry
        .methods()
        .iter()
        .find(|m| m.policy.mode != ReplicationMode::None)
      {
        return Err(RegistryError::StateTransferUnsupported(method.name.clone()).into());
      }
    }

    let channel = self.factory.create_channel(group)?;
    let object = Arc::new(object);
    let handler = Arc::new(ReplicationHandler::new(
      object.clone(),
      Arc::new(registry),
      channel.clone(),
      &self.config,
    ));

    let receiver: Arc<dyn GroupReceiver> = handler.clone();
    let joined = async {
      let address = channel.connect(group, receiver).await?;
      handler.membership().connected().await;
      info!(group = %group, address = %address, "joined group");
      // Objects without state transfer never ask the group for state.
      if let Some(replicated) = object.as_replicated() {
        replicated.set_local_address(&address);
        handler.bulk().join(channel.as_ref(), join_timeout).await?;
      }
      Ok::<_, ReplicationError>(())
    }
    .await;

    if let Err(e) = joined {
      error!(group = %group, error = %e, "failed to replicate object");
      if let Err(disconnect) = channel.disconnect().await {
        debug!(group = %group, error = %disconnect, "disconnect after failed join");
      }
      handler.shutdown().await;
      return Err(e);
    }

    Ok(ReplicatedProxy::new(
      handler,
      channel,
      self.config.clone(),
      group.to_string(),
    ))
  }

  /// [`replicate`](Self::replicate) with the configured default join timeout.
  pub async fn replicate_default<O: Replicable>(
    &self,
    group: &str,
    object: O,
  ) -> Result<ReplicatedProxy<O>, ReplicationError> {
    self
      .replicate(group, object, self.config.default_join_timeout)
      .await
  }

  /// Leaves the group. The proxy keeps working, locally only.
  ///
  /// Stopping twice returns [`ReplicationError::Stopped`].
  pub async fn stop<O: Replicable>(&self, proxy: &ReplicatedProxy<O>) -> Result<(), ReplicationError> {
    proxy.shutdown().await?;
    info!(group = %proxy.group(), "stopped replicating object");
    Ok(())
  }
}
