//! Per-method replication metadata.
//!
//! An [`Interface`] describes the methods of a replicated interface in
//! declaration order. Methods carrying a [`MethodPolicy`] are routed to peers;
//! the rest always execute locally.
//!
//! ```rust
//! use replicast::policy::{Interface, MethodPolicy, ReturnKind};
//! use std::time::Duration;
//!
//! let interface = Interface::new("SessionCache")
//!   .local("get", ReturnKind::Value)
//!   .replicated("put", ReturnKind::Bool, MethodPolicy::new())
//!   .replicated("clear", ReturnKind::Unit, MethodPolicy::new().asynchronous())
//!   .replicated(
//!     "load",
//!     ReturnKind::Value,
//!     MethodPolicy::new().pull().with_timeout(Duration::from_secs(2)),
//!   );
//! assert_eq!(interface.methods().len(), 4);
//! ```

use serde_json::Value;
use std::time::Duration;

/// Default wait for synchronous calls and pulls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether and how state accompanies a replicated call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplicationMode {
  /// The call itself is replayed on every peer.
  #[default]
  None,
  /// After the local call, the named state (first argument) is pushed to peers.
  Push,
  /// On a null local result, the named state (first argument) is pulled from the group.
  Pull,
}

/// Shape of a method's result; drives aggregation and the zero value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
  /// No meaningful result.
  Unit,
  /// Boolean; aggregated with logical AND.
  Bool,
  /// JSON array; aggregated by union.
  Collection,
  /// Any other value; the local result wins.
  Value,
}

impl ReturnKind {
  /// Value returned by a remote-only call when there is nobody to call.
  pub fn zero_value(self) -> Value {
    match self {
      ReturnKind::Bool => Value::Bool(false),
      ReturnKind::Collection => Value::Array(Vec::new()),
      ReturnKind::Unit | ReturnKind::Value => Value::Null,
    }
  }
}

/// Replication policy of one method. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodPolicy {
  /// Replication mode.
  pub mode: ReplicationMode,
  /// One-way call: do not wait for peer responses.
  pub asynchronous: bool,
  /// Only peers execute the call; the local object is skipped.
  pub remote_only: bool,
  /// Bound on every wait performed for this method.
  pub timeout: Duration,
}

impl Default for MethodPolicy {
  fn default() -> Self {
    Self {
      mode: ReplicationMode::None,
      asynchronous: false,
      remote_only: false,
      timeout: DEFAULT_TIMEOUT,
    }
  }
}

impl MethodPolicy {
  /// Synchronous, mode `None`, default timeout.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the replication mode.
  #[must_use]
  pub fn with_mode(mut self, mode: ReplicationMode) -> Self {
    self.mode = mode;
    self
  }

  /// Push named state after the local call.
  #[must_use]
  pub fn push(self) -> Self {
    self.with_mode(ReplicationMode::Push)
  }

  /// Pull named state when the local call returns null.
  #[must_use]
  pub fn pull(self) -> Self {
    self.with_mode(ReplicationMode::Pull)
  }

  /// Make the call one-way.
  #[must_use]
  pub fn asynchronous(mut self) -> Self {
    self.asynchronous = true;
    self
  }

  /// Execute on peers only.
  #[must_use]
  pub fn remote_only(mut self) -> Self {
    self.remote_only = true;
    self
  }

  /// Sets the timeout.
  #[must_use]
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

/// One method of a replicated interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
  /// Method name, unique within the interface.
  pub name: String,
  /// Result shape.
  pub returns: ReturnKind,
  /// Replication policy; `None` for local-only methods.
  pub policy: Option<MethodPolicy>,
}

/// Declaration-ordered method table of a replicated interface.
///
/// Both ends of a group must build the table identically: method ids are
/// derived from the order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
  name: String,
  methods: Vec<MethodDescriptor>,
}

impl Interface {
  /// Creates an empty interface.
  #[must_use]
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      methods: Vec::new(),
    }
  }

  /// Appends a method descriptor.
  #[must_use]
  pub fn method(mut self, descriptor: MethodDescriptor) -> Self {
    self.methods.push(descriptor);
    self
  }

  /// Appends a local-only method.
  #[must_use]
  pub fn local(self, name: impl Into<String>, returns: ReturnKind) -> Self {
    self.method(MethodDescriptor {
      name: name.into(),
      returns,
      policy: None,
    })
  }

  /// Appends a replicated method.
  #[must_use]
  pub fn replicated(
    self,
    name: impl Into<String>,
    returns: ReturnKind,
    policy: MethodPolicy,
  ) -> Self {
    self.method(MethodDescriptor {
      name: name.into(),
      returns,
      policy: Some(policy),
    })
  }

  /// Interface name, used in logs.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Methods in declaration order.
  pub fn methods(&self) -> &[MethodDescriptor] {
    &self.methods
  }
}
