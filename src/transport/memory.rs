//! In-process group transport.
//!
//! [`InMemoryNetwork`] hosts any number of groups inside one process. Each
//! [`InMemoryChannel`] is one member. Messages from one member to another
//! travel over a dedicated link drained by a single task, so every
//! sender-to-receiver path is FIFO. State transfer runs the provider and the
//! requester concurrently over an in-memory pipe.
//!
//! ## Example
//!
//! ```rust,no_run
//! use replicast::transport::memory::InMemoryNetwork;
//! use replicast::ObjectReplicator;
//! use std::sync::Arc;
//!
//! let network = InMemoryNetwork::new();
//! let replicator = ObjectReplicator::new(Arc::new(network.factory("node-a")));
//! ```

use super::{
  Address, ChannelFactory, GroupChannel, GroupReceiver, StateRequest, TransportError, View,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Capacity of the pipe carrying one state transfer.
const STATE_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Clone)]
struct Member {
  address: Address,
  receiver: Arc<dyn GroupReceiver>,
}

struct Delivery {
  payload: Bytes,
  reply: Option<oneshot::Sender<Bytes>>,
}

#[derive(Default)]
struct NetworkInner {
  groups: Mutex<HashMap<String, Vec<Member>>>,
  /// Serializes joins and leaves so views are delivered in order.
  membership_changes: tokio::sync::Mutex<()>,
  next_view_id: AtomicU64,
  next_node: AtomicU64,
  messages: AtomicU64,
  state_requests: AtomicU64,
}

/// A set of in-process groups.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
  inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
  /// Creates an empty network.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates an unconnected member channel. `name` prefixes its address.
  #[must_use]
  pub fn channel(&self, name: &str) -> InMemoryChannel {
    let node = self.inner.next_node.fetch_add(1, Ordering::Relaxed) + 1;
    InMemoryChannel {
      network: self.clone(),
      address: Address::new(format!("{name}#{node}")),
      group: Mutex::new(None),
      links: tokio::sync::Mutex::new(HashMap::new()),
    }
  }

  /// Creates a factory that hands out channels named after `name`.
  #[must_use]
  pub fn factory(&self, name: &str) -> InMemoryChannelFactory {
    InMemoryChannelFactory {
      network: self.clone(),
      name: name.to_string(),
    }
  }

  /// Returns the current members of `group` in join order.
  pub fn members(&self, group: &str) -> Vec<Address> {
    self
      .groups()
      .get(group)
      .map(|members| members.iter().map(|m| m.address.clone()).collect())
      .unwrap_or_default()
  }

  /// Number of point-to-point messages sent so far, one-way or not.
  pub fn messages_sent(&self) -> u64 {
    self.inner.messages.load(Ordering::Relaxed)
  }

  /// Number of state requests issued so far.
  pub fn state_requests(&self) -> u64 {
    self.inner.state_requests.load(Ordering::Relaxed)
  }

  fn groups(&self) -> MutexGuard<'_, HashMap<String, Vec<Member>>> {
    self
      .inner
      .groups
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn member(&self, group: &str, address: &Address) -> Option<Member> {
    self
      .groups()
      .get(group)
      .and_then(|members| members.iter().find(|m| &m.address == address).cloned())
  }

  fn is_member(&self, group: &str, address: &Address) -> bool {
    self.member(group, address).is_some()
  }

  fn next_view(&self, members: &[Member]) -> View {
    let id = self.inner.next_view_id.fetch_add(1, Ordering::Relaxed) + 1;
    View::new(id, members.iter().map(|m| m.address.clone()).collect())
  }
}

/// Hands out [`InMemoryChannel`]s from one [`InMemoryNetwork`].
pub struct InMemoryChannelFactory {
  network: InMemoryNetwork,
  name: String,
}

impl ChannelFactory for InMemoryChannelFactory {
  fn create_channel(&self, group: &str) -> Result<Arc<dyn GroupChannel>, TransportError> {
    let channel = self.network.channel(&self.name);
    trace!(group = %group, address = %channel.address, "created in-memory channel");
    Ok(Arc::new(channel))
  }
}

/// One member of an in-process group.
pub struct InMemoryChannel {
  network: InMemoryNetwork,
  address: Address,
  group: Mutex<Option<String>>,
  links: tokio::sync::Mutex<HashMap<Address, mpsc::UnboundedSender<Delivery>>>,
}

impl InMemoryChannel {
  fn current_group(&self) -> Result<String, TransportError> {
    self
      .group
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
      .ok_or(TransportError::NotConnected)
  }

  /// Returns the FIFO link to `dest`, opening it on first use.
  async fn link(&self, dest: &Address) -> Result<mpsc::UnboundedSender<Delivery>, TransportError> {
    let group = self.current_group()?;
    let mut links = self.links.lock().await;
    if let Some(link) = links.get(dest) {
      if !link.is_closed() {
        return Ok(link.clone());
      }
    }

    let member = self
      .network
      .member(&group, dest)
      .ok_or_else(|| TransportError::UnknownMember(dest.clone()))?;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(deliver(
      self.network.clone(),
      group,
      self.address.clone(),
      member,
      rx,
    ));
    links.insert(dest.clone(), tx.clone());
    Ok(tx)
  }

  async fn enqueue(&self, dest: &Address, delivery: Delivery) -> Result<(), TransportError> {
    let link = self.link(dest).await?;
    link.send(delivery).map_err(|_| TransportError::Closed)?;
    self.network.inner.messages.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }
}

/// Drains one sender-to-receiver link in order.
async fn deliver(
  network: InMemoryNetwork,
  group: String,
  src: Address,
  member: Member,
  mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
  while let Some(delivery) = rx.recv().await {
    if !network.is_member(&group, &member.address) {
      trace!(dest = %member.address, "dropping message for departed member");
      continue;
    }
    let reply = member.receiver.handle(src.clone(), delivery.payload).await;
    if let Some(tx) = delivery.reply {
      let _ = tx.send(reply);
    }
  }
}

#[async_trait]
impl GroupChannel for InMemoryChannel {
  async fn connect(
    &self,
    group: &str,
    receiver: Arc<dyn GroupReceiver>,
  ) -> Result<Address, TransportError> {
    let _changes = self.network.inner.membership_changes.lock().await;
    {
      let mut current = self.group.lock().unwrap_or_else(PoisonError::into_inner);
      if let Some(existing) = current.as_ref() {
        return Err(TransportError::AlreadyConnected(existing.clone()));
      }
      *current = Some(group.to_string());
    }

    let (view, members) = {
      let mut groups = self.network.groups();
      let members = groups.entry(group.to_string()).or_default();
      members.push(Member {
        address: self.address.clone(),
        receiver,
      });
      (self.network.next_view(members), members.clone())
    };

    debug!(group = %group, address = %self.address, view = view.id, "joined group");
    for member in members {
      member.receiver.view_accepted(view.clone()).await;
    }
    Ok(self.address.clone())
  }

  async fn disconnect(&self) -> Result<(), TransportError> {
    let _changes = self.network.inner.membership_changes.lock().await;
    let Some(group) = self
      .group
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    else {
      return Ok(());
    };

    let (view, members) = {
      let mut groups = self.network.groups();
      let members = groups.entry(group.clone()).or_default();
      members.retain(|m| m.address != self.address);
      let remaining = (self.network.next_view(members), members.clone());
      if members.is_empty() {
        groups.remove(&group);
      }
      remaining
    };
    self.links.lock().await.clear();

    debug!(group = %group, address = %self.address, view = view.id, "left group");
    for member in members {
      member.receiver.view_accepted(view.clone()).await;
    }
    Ok(())
  }

  fn local_address(&self) -> Option<Address> {
    self.current_group().ok().map(|_| self.address.clone())
  }

  async fn send(&self, dest: &Address, payload: Bytes) -> Result<Bytes, TransportError> {
    let (tx, rx) = oneshot::channel();
    self
      .enqueue(
        dest,
        Delivery {
          payload,
          reply: Some(tx),
        },
      )
      .await?;
    rx.await.map_err(|_| TransportError::Closed)
  }

  async fn cast(&self, dest: &Address, payload: Bytes) -> Result<(), TransportError> {
    self
      .enqueue(
        dest,
        Delivery {
          payload,
          reply: None,
        },
      )
      .await
  }

  async fn request_state(
    &self,
    request: StateRequest,
    timeout: Duration,
  ) -> Result<bool, TransportError> {
    let group = self.current_group()?;
    self
      .network
      .inner
      .state_requests
      .fetch_add(1, Ordering::Relaxed);

    let members = self
      .network
      .groups()
      .get(&group)
      .cloned()
      .unwrap_or_default();
    let Some(provider) = members.iter().find(|m| m.address != self.address).cloned() else {
      return Ok(false);
    };
    let requester = members
      .into_iter()
      .find(|m| m.address == self.address)
      .ok_or(TransportError::NotConnected)?;

    debug!(
      provider = %provider.address,
      requester = %requester.address,
      state_id = ?request.state_id,
      "starting state transfer"
    );

    let (mut output, mut input) = tokio::io::duplex(STATE_PIPE_CAPACITY);
    let provider_request = request.clone();
    tokio::spawn(async move {
      let provided = tokio::time::timeout(
        timeout,
        provider.receiver.get_state(&provider_request, &mut output),
      )
      .await;
      if provided.is_err() {
        warn!(provider = %provider.address, "state provider timed out");
      }
      let _ = output.shutdown().await;
    });
    tokio::spawn(async move {
      requester.receiver.set_state(&request, &mut input).await;
    });
    Ok(true)
  }
}
