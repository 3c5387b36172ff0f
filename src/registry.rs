//! Method registry: stable numeric ids for replicable methods.
//!
//! Replicable methods get ids `0..n` in declaration order; ids `n`, `n + 1`
//! and `n + 2` are reserved for the stream begin/chunk/end operations. The
//! assignment depends only on the [`Interface`], so every member of a group
//! resolves the same id to the same method.

use crate::policy::{Interface, MethodPolicy, ReturnKind};
use crate::wire::MethodId;
use std::collections::HashMap;
use thiserror::Error;

/// Number of synthetic stream-control ids appended to every registry.
const STREAM_OPS: usize = 3;

/// Errors raised while building a registry or validating it against an object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  /// Two replicable methods share a name.
  #[error("duplicate replicated method: {0}")]
  DuplicateMethod(String),
  /// The interface has more replicable methods than ids available.
  #[error("too many replicated methods: {0}")]
  TooManyMethods(usize),
  /// A push or pull method was declared on an object without state transfer support.
  #[error("method {0} transfers state but the object does not support state transfer")]
  StateTransferUnsupported(String),
}

/// Stream-control operation carried by a reserved id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamOp {
  /// Opens a named state stream.
  Begin,
  /// Carries one chunk of a named state stream.
  Chunk,
  /// Closes a named state stream.
  End,
}

impl StreamOp {
  fn offset(self) -> usize {
    match self {
      StreamOp::Begin => 0,
      StreamOp::Chunk => 1,
      StreamOp::End => 2,
    }
  }
}

/// A replicable method with its assigned id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredMethod {
  /// Wire id.
  pub id: MethodId,
  /// Method name.
  pub name: String,
  /// Result shape.
  pub returns: ReturnKind,
  /// Replication policy.
  pub policy: MethodPolicy,
}

/// Immutable name/id mapping for one replicated interface.
#[derive(Clone, Debug)]
pub struct MethodRegistry {
  interface: String,
  methods: Vec<RegisteredMethod>,
  by_name: HashMap<String, MethodId>,
}

impl MethodRegistry {
  /// Builds the registry for `interface`.
  ///
  /// An interface without replicable methods is valid; its registry holds
  /// only the stream-control ids.
  pub fn build(interface: &Interface) -> Result<Self, RegistryError> {
    let mut methods = Vec::new();
    let mut by_name = HashMap::new();

    for descriptor in interface.methods() {
      let Some(policy) = descriptor.policy.as_ref() else {
        continue;
      };
      let id = MethodId::try_from(methods.len())
        .map_err(|_| RegistryError::TooManyMethods(methods.len()))?;
      if by_name.insert(descriptor.name.clone(), id).is_some() {
        return Err(RegistryError::DuplicateMethod(descriptor.name.clone()));
      }
      methods.push(RegisteredMethod {
        id,
        name: descriptor.name.clone(),
        returns: descriptor.returns,
        policy: policy.clone(),
      });
    }

    if methods.len() + STREAM_OPS > usize::from(MethodId::MAX) + 1 {
      return Err(RegistryError::TooManyMethods(methods.len()));
    }

    Ok(Self {
      interface: interface.name().to_string(),
      methods,
      by_name,
    })
  }

  /// Name of the interface this registry was built from.
  pub fn interface(&self) -> &str {
    &self.interface
  }

  /// Looks a replicable method up by name.
  pub fn lookup(&self, name: &str) -> Option<&RegisteredMethod> {
    self
      .by_name
      .get(name)
      .and_then(|id| self.methods.get(usize::from(*id)))
  }

  /// Resolves an id to a replicable method. Stream ids resolve to `None`.
  pub fn method(&self, id: MethodId) -> Option<&RegisteredMethod> {
    self.methods.get(usize::from(id))
  }

  /// Resolves an id to a stream-control operation.
  pub fn stream_op(&self, id: MethodId) -> Option<StreamOp> {
    let offset = usize::from(id).checked_sub(self.methods.len())?;
    [StreamOp::Begin, StreamOp::Chunk, StreamOp::End]
      .into_iter()
      .find(|op| op.offset() == offset)
  }

  /// Id reserved for a stream-control operation.
  pub fn stream_id(&self, op: StreamOp) -> MethodId {
    // build() guarantees every reserved id fits.
    (self.methods.len() + op.offset()) as MethodId
  }

  /// Replicable methods in id order.
  pub fn methods(&self) -> &[RegisteredMethod] {
    &self.methods
  }

  /// Total number of ids in use, stream ids included.
  pub fn id_count(&self) -> usize {
    self.methods.len() + STREAM_OPS
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::policy::MethodPolicy;

  fn interface() -> Interface {
    Interface::new("Cache")
      .local("get", ReturnKind::Value)
      .replicated("put", ReturnKind::Bool, MethodPolicy::new())
      .local("size", ReturnKind::Value)
      .replicated("publish", ReturnKind::Unit, MethodPolicy::new().push())
  }

  #[test]
  fn ids_follow_declaration_order_of_replicable_methods() {
    let registry = MethodRegistry::build(&interface()).unwrap();
    assert_eq!(registry.lookup("put").unwrap().id, 0);
    assert_eq!(registry.lookup("publish").unwrap().id, 1);
    assert!(registry.lookup("get").is_none());
    assert_eq!(registry.id_count(), 5);
  }

  #[test]
  fn last_three_ids_are_stream_operations() {
    let registry = MethodRegistry::build(&interface()).unwrap();
    assert_eq!(registry.stream_id(StreamOp::Begin), 2);
    assert_eq!(registry.stream_id(StreamOp::Chunk), 3);
    assert_eq!(registry.stream_id(StreamOp::End), 4);
    assert_eq!(registry.stream_op(2), Some(StreamOp::Begin));
    assert_eq!(registry.stream_op(4), Some(StreamOp::End));
    assert_eq!(registry.stream_op(1), None);
    assert_eq!(registry.stream_op(5), None);
    assert!(registry.method(2).is_none());
  }

  #[test]
  fn construction_is_deterministic() {
    let a = MethodRegistry::build(&interface()).unwrap();
    let b = MethodRegistry::build(&interface()).unwrap();
    assert_eq!(a.methods(), b.methods());
  }

  #[test]
  fn interface_without_replicable_methods_is_allowed() {
    let registry =
      MethodRegistry::build(&Interface::new("Plain").local("get", ReturnKind::Value)).unwrap();
    assert!(registry.methods().is_empty());
    assert_eq!(registry.stream_id(StreamOp::Begin), 0);
  }

  #[test]
  fn duplicate_names_are_rejected() {
    let interface = Interface::new("Dup")
      .replicated("put", ReturnKind::Bool, MethodPolicy::new())
      .replicated("put", ReturnKind::Bool, MethodPolicy::new().asynchronous());
    assert_eq!(
      MethodRegistry::build(&interface).unwrap_err(),
      RegistryError::DuplicateMethod("put".to_string())
    );
  }
}
