//! # replicast
//!
//! Replicated objects over a group communication channel.
//!
//! replicast turns an ordinary local object into a cluster-replicated one.
//! Calls on a chosen subset of its methods are fanned out to every peer of a
//! named group, and the object's state moves to joining or lagging members
//! either in bulk or as a named, chunked stream.
//!
//! ## Key Features
//!
//! - **Per-method policies**: one-way or synchronous, remote-only, bounded
//!   timeouts, and push/pull of named state
//! - **Result aggregation**: boolean results are combined with AND,
//!   collections are merged
//! - **State transfer**: full state on join, streamed named state on demand
//! - **Pluggable transport**: anything implementing
//!   [`GroupChannel`](transport::GroupChannel); an in-process network is
//!   included
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use replicast::transport::memory::InMemoryNetwork;
//! use replicast::ObjectReplicator;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let network = InMemoryNetwork::new();
//! let replicator = ObjectReplicator::new(Arc::new(network.factory("node")));
//! let cache = replicator
//!   .replicate("sessions", SessionCache::default(), Duration::from_secs(5))
//!   .await?;
//! cache.invoke("put", vec![json!("k"), json!("v")]).await?;
//! ```

#![warn(missing_docs)]

/// Full-state transfer on join.
pub mod bulk;
/// Replicator configuration.
pub mod config;
/// Outbound fan-out and aggregation.
pub mod dispatcher;
/// Caller-facing errors.
pub mod error;
/// Peer tracking.
pub mod membership;
/// Contract implemented by replicated objects.
pub mod object;
/// Per-method replication policies.
pub mod policy;
/// Replicating stand-in for a local object.
pub mod proxy;
/// Inbound message handling.
pub mod receiver;
/// Method ids.
pub mod registry;
/// Lifecycle entry point.
pub mod replicator;
/// Single-assignment transfer results.
pub mod slot;
/// State transfer errors.
pub mod state;
/// Chunked named-state streams.
pub mod streaming;
/// Group transport binding.
pub mod transport;
/// Call envelope.
pub mod wire;

pub use config::ReplicatorConfig;
pub use error::ReplicationError;
pub use object::{InvocationError, Replicable, ReplicatedObject};
pub use policy::{Interface, MethodPolicy, ReplicationMode, ReturnKind};
pub use proxy::ReplicatedProxy;
pub use replicator::ObjectReplicator;
pub use state::StateError;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod bulk_test;
#[cfg(test)]
mod membership_test;
#[cfg(test)]
mod receiver_test;
#[cfg(test)]
mod slot_test;
