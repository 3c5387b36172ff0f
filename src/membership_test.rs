//! Tests for membership tracking.

use crate::membership::{ConnectionState, MembershipTracker, PeerSet};
use crate::object::ReplicatedObject;
use crate::state::StateError;
use crate::transport::{Address, View};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Default)]
struct DropRecorder {
  notifications: Mutex<Vec<HashSet<Address>>>,
}

#[async_trait]
impl ReplicatedObject for DropRecorder {
  async fn get_state(
    &self,
    _output: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StateError> {
    Ok(())
  }

  async fn set_state(&self, _input: &mut (dyn AsyncRead + Send + Unpin)) -> Result<(), StateError> {
    Ok(())
  }

  async fn get_named_state(
    &self,
    _state_id: &str,
    _output: &mut (dyn AsyncWrite + Send + Unpin),
  ) -> Result<(), StateError> {
    Ok(())
  }

  async fn set_named_state(
    &self,
    _state_id: &str,
    _input: &mut (dyn AsyncRead + Send + Unpin),
  ) -> Result<(), StateError> {
    Ok(())
  }

  fn dropped_members(&self, members: &HashSet<Address>) {
    self.notifications.lock().unwrap().push(members.clone());
  }
}

fn view(id: u64, members: &[&str]) -> View {
  View::new(id, members.iter().map(|m| Address::from(*m)).collect())
}

#[test]
fn test_peer_set_excludes_local_address() {
  let local = Address::from("a");
  let peers = PeerSet::from_view(&view(1, &["a", "b", "c"]), Some(&local));
  assert_eq!(peers.members(), &[Address::from("b"), Address::from("c")]);
  assert!(!peers.contains(&local));
}

#[tokio::test]
async fn test_view_change_reports_dropped_members_then_replaces() {
  let tracker = MembershipTracker::new();
  let recorder = DropRecorder::default();
  let local = Address::from("a");

  tracker.connected().await;
  tracker
    .apply_view(&view(1, &["a", "b", "c"]), Some(&local), Some(&recorder))
    .await;
  let dropped = tracker
    .apply_view(&view(2, &["a", "c", "d"]), Some(&local), Some(&recorder))
    .await;

  let expected: HashSet<Address> = [Address::from("b")].into_iter().collect();
  assert_eq!(dropped, expected);
  assert_eq!(*recorder.notifications.lock().unwrap(), vec![expected]);
  assert_eq!(
    tracker.snapshot().await.members(),
    &[Address::from("c"), Address::from("d")]
  );
  assert_eq!(tracker.view_id().await, Some(2));
}

#[tokio::test]
async fn test_growth_only_view_does_not_notify() {
  let tracker = MembershipTracker::new();
  let recorder = DropRecorder::default();
  let local = Address::from("a");

  tracker
    .apply_view(&view(1, &["a"]), Some(&local), Some(&recorder))
    .await;
  tracker
    .apply_view(&view(2, &["a", "b"]), Some(&local), Some(&recorder))
    .await;

  assert!(recorder.notifications.lock().unwrap().is_empty());
  assert_eq!(tracker.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_disconnect_clears_peers() {
  let tracker = MembershipTracker::new();
  let local = Address::from("a");
  tracker.connected().await;
  tracker
    .apply_view(&view(1, &["a", "b"]), Some(&local), None)
    .await;
  assert_eq!(tracker.state().await, ConnectionState::Connected);

  tracker.disconnected().await;
  assert_eq!(tracker.state().await, ConnectionState::Disconnected);
  assert!(tracker.snapshot().await.is_empty());
}
