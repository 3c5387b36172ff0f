//! Bulk state transfer on join.
//!
//! A joining member asks the group for the full state of the replicated
//! object and waits, bounded, for it to load. The first member of a group has
//! nobody to ask and starts from its own state.

use crate::object::ReplicatedObject;
use crate::slot::{PendingStateSlot, SlotOutcome, SlotResolver};
use crate::transport::{CorrelationId, GroupChannel, StateRequest, TransportError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of the join-time state transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
  /// The full state was loaded from a provider.
  Loaded,
  /// A provider answered but loading failed.
  LoadFailed,
  /// No state arrived in time.
  TimedOut,
  /// No other member exists.
  FirstMember,
}

/// Coordinates the full-state transfer of one replicated object.
#[derive(Default)]
pub struct BulkStateCoordinator {
  join_slot: Mutex<Option<SlotResolver>>,
}

impl BulkStateCoordinator {
  /// Creates a coordinator with no pending join.
  pub fn new() -> Self {
    Self::default()
  }

  /// Requests the full state from the group and waits up to `timeout`.
  ///
  /// Only transport errors fail the join; a missing or broken state is
  /// logged and reported through the outcome.
  pub async fn join(
    &self,
    channel: &dyn GroupChannel,
    timeout: Duration,
  ) -> Result<JoinOutcome, TransportError> {
    let (resolver, slot) = PendingStateSlot::new();
    *self.join_slot.lock().await = Some(resolver);

    let requested = channel
      .request_state(StateRequest::full(CorrelationId::JOIN), timeout)
      .await;
    let requested = match requested {
      Ok(requested) => requested,
      Err(e) => {
        self.join_slot.lock().await.take();
        return Err(e);
      }
    };

    if !requested {
      self.join_slot.lock().await.take();
      info!("first member of the group; starting with local state");
      return Ok(JoinOutcome::FirstMember);
    }

    let outcome = match slot.wait(timeout).await {
      SlotOutcome::Loaded => {
        info!("state loaded");
        JoinOutcome::Loaded
      }
      SlotOutcome::Failed => {
        warn!("state load error or timeout");
        JoinOutcome::LoadFailed
      }
      SlotOutcome::TimedOut | SlotOutcome::Abandoned => {
        warn!(timeout_ms = timeout.as_millis() as u64, "state load error or timeout");
        JoinOutcome::TimedOut
      }
    };
    self.join_slot.lock().await.take();
    Ok(outcome)
  }

  /// Provider side: writes the full state of `object` and always shuts the
  /// stream down.
  pub async fn provide(
    &self,
    object: Option<&dyn ReplicatedObject>,
    output: &mut (dyn AsyncWrite + Send + Unpin),
  ) {
    match object {
      Some(object) => {
        if let Err(e) = object.get_state(output).await {
          error!(error = %e, "failed to provide state");
        }
      }
      None => debug!("state requested from object without state transfer"),
    }
    let _ = output.shutdown().await;
  }

  /// Receiver side: loads the full state and resolves the pending join.
  pub async fn load(
    &self,
    object: Option<&dyn ReplicatedObject>,
    input: &mut (dyn AsyncRead + Send + Unpin),
  ) -> bool {
    let loaded = match object {
      Some(object) => match object.set_state(input).await {
        Ok(()) => true,
        Err(e) => {
          error!(error = %e, "failed to load state");
          false
        }
      },
      None => {
        warn!("state delivered to object without state transfer");
        false
      }
    };

    match self.join_slot.lock().await.take() {
      Some(resolver) => {
        resolver.resolve(loaded);
      }
      None => debug!(loaded, "state delivered with no pending join"),
    }
    loaded
  }
}
