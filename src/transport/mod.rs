//! Transport binding.
//!
//! The replication layer consumes group communication as an opaque
//! capability. A [`GroupChannel`] connects to a named group, sends
//! request/response and one-way messages to individual members, and brokers
//! point-to-point state transfer. The channel reports everything that arrives
//! from the group to a [`GroupReceiver`]: inbound messages, membership view
//! changes and both ends of a state transfer.
//!
//! Reliable delivery, failure detection and per sender-to-receiver FIFO
//! ordering are the channel's responsibility. [`memory`] provides an
//! in-process implementation.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Address of one member of a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
  /// Creates an address from its textual form.
  pub fn new(address: impl Into<String>) -> Self {
    Self(address.into())
  }

  /// Returns the textual form of the address.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Address {
  fn from(address: &str) -> Self {
    Self::new(address)
  }
}

impl From<String> for Address {
  fn from(address: String) -> Self {
    Self(address)
  }
}

/// The current authoritative membership of a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
  /// Monotonic view identifier assigned by the transport.
  pub id: u64,
  /// Members in join order; the first member is the group coordinator.
  pub members: Vec<Address>,
}

impl View {
  /// Creates a view.
  pub fn new(id: u64, members: Vec<Address>) -> Self {
    Self { id, members }
  }

  /// Returns true if `address` is a member of this view.
  pub fn contains(&self, address: &Address) -> bool {
    self.members.contains(address)
  }

  /// Returns the oldest member, if any.
  pub fn coordinator(&self) -> Option<&Address> {
    self.members.first()
  }
}

/// Correlates a state request with the delivery it eventually produces on
/// the requesting member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
  /// Correlation used by the bulk transfer performed on join.
  pub const JOIN: CorrelationId = CorrelationId(0);

  /// Creates a correlation id from a raw value.
  pub const fn new(id: u64) -> Self {
    Self(id)
  }

  /// Returns the raw value.
  pub const fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for CorrelationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A request for state, echoed back to the requester when the state arrives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateRequest {
  /// `None` for the full state, otherwise the named state key.
  pub state_id: Option<String>,
  /// Correlation of the waiting caller.
  pub correlation: CorrelationId,
}

impl StateRequest {
  /// Request for the full object state.
  pub fn full(correlation: CorrelationId) -> Self {
    Self {
      state_id: None,
      correlation,
    }
  }

  /// Request for one named unit of state.
  pub fn named(state_id: impl Into<String>, correlation: CorrelationId) -> Self {
    Self {
      state_id: Some(state_id.into()),
      correlation,
    }
  }
}

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// The channel is not connected to a group.
  #[error("Channel is not connected")]
  NotConnected,
  /// The channel is already connected to a group.
  #[error("Channel is already connected to group {0}")]
  AlreadyConnected(String),
  /// The destination is not a member of the group.
  #[error("Unknown member: {0}")]
  UnknownMember(Address),
  /// The message could not be delivered or its reply was lost.
  #[error("Channel closed")]
  Closed,
  /// I/O error.
  #[error("Network error: {0}")]
  Io(#[from] io::Error),
  /// Other transport error.
  #[error("Transport error: {0}")]
  Other(String),
}

/// Receives everything a [`GroupChannel`] delivers from the group.
#[async_trait]
pub trait GroupReceiver: Send + Sync {
  /// Handles one inbound message and returns the encoded reply.
  ///
  /// The reply is discarded for one-way messages.
  async fn handle(&self, src: Address, payload: Bytes) -> Bytes;

  /// Called on every membership change, including the one caused by this
  /// member's own join.
  async fn view_accepted(&self, view: View);

  /// Provider side of a state transfer: write the requested state.
  async fn get_state(&self, request: &StateRequest, output: &mut (dyn AsyncWrite + Send + Unpin));

  /// Requester side of a state transfer: consume the delivered state.
  async fn set_state(&self, request: &StateRequest, input: &mut (dyn AsyncRead + Send + Unpin));
}

/// A connection to a communication group.
#[async_trait]
pub trait GroupChannel: Send + Sync {
  /// Joins `group`, routing all deliveries to `receiver`, and returns the
  /// local address.
  async fn connect(
    &self,
    group: &str,
    receiver: Arc<dyn GroupReceiver>,
  ) -> Result<Address, TransportError>;

  /// Leaves the group and releases transport resources. Disconnecting an
  /// unconnected channel is a no-op.
  async fn disconnect(&self) -> Result<(), TransportError>;

  /// Returns the local address while connected.
  fn local_address(&self) -> Option<Address>;

  /// Sends a message to `dest` and waits for its reply.
  async fn send(&self, dest: &Address, payload: Bytes) -> Result<Bytes, TransportError>;

  /// Sends a one-way message to `dest`.
  async fn cast(&self, dest: &Address, payload: Bytes) -> Result<(), TransportError>;

  /// Sends a one-way message to every destination and returns the failures.
  async fn multicast(&self, dests: &[Address], payload: Bytes) -> Vec<(Address, TransportError)> {
    let mut failures = Vec::new();
    for dest in dests {
      if let Err(error) = self.cast(dest, payload.clone()).await {
        failures.push((dest.clone(), error));
      }
    }
    failures
  }

  /// Asks one other member to provide the requested state.
  ///
  /// Returns `Ok(false)` when no other member exists to provide it. On
  /// `Ok(true)` the transfer proceeds asynchronously and completes with
  /// [`GroupReceiver::set_state`] on this member; `timeout` bounds the
  /// provider side of the transfer.
  async fn request_state(
    &self,
    request: StateRequest,
    timeout: Duration,
  ) -> Result<bool, TransportError>;
}

/// Creates channels for named groups.
pub trait ChannelFactory: Send + Sync {
  /// Creates an unconnected channel for `group`.
  fn create_channel(&self, group: &str) -> Result<Arc<dyn GroupChannel>, TransportError>;
}
