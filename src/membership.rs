//! Membership tracking.
//!
//! The [`MembershipTracker`] owns the current [`PeerSet`] and replaces it on
//! every view change. Peers that disappear between two views are reported to
//! the replicated object before the replacement becomes visible.

use crate::object::ReplicatedObject;
use crate::transport::{Address, View};
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;

/// Connection state of a replicated object's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
  /// Not (or no longer) connected to a group.
  #[default]
  Disconnected,
  /// Connected and tracking views.
  Connected,
}

/// Ordered set of peer addresses, never containing the local address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSet {
  members: Vec<Address>,
}

impl PeerSet {
  /// Builds the peer set of `view` as seen from `local`.
  pub fn from_view(view: &View, local: Option<&Address>) -> Self {
    let members = view
      .members
      .iter()
      .filter(|member| Some(*member) != local)
      .cloned()
      .collect();
    Self { members }
  }

  /// Peers in view order.
  pub fn members(&self) -> &[Address] {
    &self.members
  }

  /// Returns true if `address` is a peer.
  pub fn contains(&self, address: &Address) -> bool {
    self.members.contains(address)
  }

  /// Number of peers.
  pub fn len(&self) -> usize {
    self.members.len()
  }

  /// Returns true if there are no peers.
  pub fn is_empty(&self) -> bool {
    self.members.is_empty()
  }

  /// Members of `self` that are absent from `next`.
  pub fn departed(&self, next: &PeerSet, local: Option<&Address>) -> HashSet<Address> {
    self
      .members
      .iter()
      .filter(|member| !next.contains(member) && Some(*member) != local)
      .cloned()
      .collect()
  }
}

#[derive(Debug, Default)]
struct Tracked {
  state: ConnectionState,
  peers: PeerSet,
  view_id: Option<u64>,
}

/// Tracks the peer set of one replicated object.
#[derive(Debug, Default)]
pub struct MembershipTracker {
  inner: Mutex<Tracked>,
}

impl MembershipTracker {
  /// Creates a disconnected tracker with no peers.
  pub fn new() -> Self {
    Self::default()
  }

  /// Marks the channel connected.
  pub async fn connected(&self) {
    self.inner.lock().await.state = ConnectionState::Connected;
  }

  /// Marks the channel disconnected and forgets all peers.
  pub async fn disconnected(&self) {
    let mut tracked = self.inner.lock().await;
    tracked.state = ConnectionState::Disconnected;
    tracked.peers = PeerSet::default();
    tracked.view_id = None;
  }

  /// Applies a new view and returns the peers it dropped.
  ///
  /// When peers were dropped and `object` is present, the object is told
  /// about them while the lock is held, so no caller observes the new peer
  /// set before the notification.
  pub async fn apply_view(
    &self,
    view: &View,
    local: Option<&Address>,
    object: Option<&dyn ReplicatedObject>,
  ) -> HashSet<Address> {
    let mut tracked = self.inner.lock().await;
    let next = PeerSet::from_view(view, local);
    let dropped = tracked.peers.departed(&next, local);

    if !dropped.is_empty() {
      debug!(view = view.id, dropped = dropped.len(), "members dropped");
      if let Some(object) = object {
        object.dropped_members(&dropped);
      }
    }

    debug!(view = view.id, peers = next.len(), "view accepted");
    tracked.peers = next;
    tracked.view_id = Some(view.id);
    dropped
  }

  /// Copy of the current peer set.
  pub async fn snapshot(&self) -> PeerSet {
    self.inner.lock().await.peers.clone()
  }

  /// Current connection state.
  pub async fn state(&self) -> ConnectionState {
    self.inner.lock().await.state
  }

  /// Id of the last applied view.
  pub async fn view_id(&self) -> Option<u64> {
    self.inner.lock().await.view_id
  }
}
