//! Replicator configuration.

use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding [`ReplicatorConfig::chunk_size`].
pub const ENV_CHUNK_SIZE: &str = "REPLICAST_CHUNK_SIZE";
/// Environment variable overriding [`ReplicatorConfig::inbound_buffer_chunks`].
pub const ENV_INBOUND_BUFFER_CHUNKS: &str = "REPLICAST_INBOUND_BUFFER_CHUNKS";
/// Environment variable overriding [`ReplicatorConfig::stream_stall_timeout`], in milliseconds.
pub const ENV_STREAM_STALL_TIMEOUT_MS: &str = "REPLICAST_STREAM_STALL_TIMEOUT_MS";
/// Environment variable overriding [`ReplicatorConfig::default_join_timeout`], in milliseconds.
pub const ENV_JOIN_TIMEOUT_MS: &str = "REPLICAST_JOIN_TIMEOUT_MS";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  /// A variable holds something other than a positive integer.
  #[error("invalid value for {name}: {value:?}")]
  InvalidValue {
    /// Variable name.
    name: String,
    /// Raw value.
    value: String,
  },
}

/// Settings shared by every object an [`ObjectReplicator`](crate::ObjectReplicator) replicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatorConfig {
  /// Bytes per streamed chunk.
  pub chunk_size: usize,
  /// Chunks buffered per inbound transfer before the sender is held back.
  pub inbound_buffer_chunks: usize,
  /// How long a held-back chunk may wait before its transfer is closed.
  pub stream_stall_timeout: Duration,
  /// Join timeout used by [`ObjectReplicator::replicate_default`](crate::ObjectReplicator::replicate_default).
  pub default_join_timeout: Duration,
}

impl Default for ReplicatorConfig {
  fn default() -> Self {
    Self {
      chunk_size: 64 * 1024,
      inbound_buffer_chunks: 100,
      stream_stall_timeout: Duration::from_secs(30),
      default_join_timeout: Duration::from_secs(10),
    }
  }
}

impl ReplicatorConfig {
  /// Sets the chunk size. Zero is raised to one.
  #[must_use]
  pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
    self.chunk_size = chunk_size.max(1);
    self
  }

  /// Sets the inbound buffer capacity. Zero is raised to one.
  #[must_use]
  pub fn with_inbound_buffer_chunks(mut self, chunks: usize) -> Self {
    self.inbound_buffer_chunks = chunks.max(1);
    self
  }

  /// Sets the stall timeout.
  #[must_use]
  pub fn with_stream_stall_timeout(mut self, timeout: Duration) -> Self {
    self.stream_stall_timeout = timeout;
    self
  }

  /// Sets the default join timeout.
  #[must_use]
  pub fn with_default_join_timeout(mut self, timeout: Duration) -> Self {
    self.default_join_timeout = timeout;
    self
  }

  /// Defaults overridden by the `REPLICAST_*` environment variables.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Defaults overridden by whatever `lookup` returns for each variable.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let parse = |name: &str| -> Result<Option<u64>, ConfigError> {
      let Some(raw) = lookup(name) else {
        return Ok(None);
      };
      match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::InvalidValue {
          name: name.to_string(),
          value: raw,
        }),
      }
    };

    let mut config = Self::default();
    if let Some(size) = parse(ENV_CHUNK_SIZE)? {
      config = config.with_chunk_size(size as usize);
    }
    if let Some(chunks) = parse(ENV_INBOUND_BUFFER_CHUNKS)? {
      config = config.with_inbound_buffer_chunks(chunks as usize);
    }
    if let Some(ms) = parse(ENV_STREAM_STALL_TIMEOUT_MS)? {
      config = config.with_stream_stall_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = parse(ENV_JOIN_TIMEOUT_MS)? {
      config = config.with_default_join_timeout(Duration::from_millis(ms));
    }
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use tokio_test::{assert_err, assert_ok};

  #[test]
  fn defaults_apply_when_nothing_is_set() {
    let config = assert_ok!(ReplicatorConfig::from_lookup(|_| None));
    assert_eq!(config, ReplicatorConfig::default());
    assert_eq!(config.chunk_size, 64 * 1024);
  }

  #[test]
  fn variables_override_defaults() {
    let vars: HashMap<&str, &str> = [
      (ENV_CHUNK_SIZE, "512"),
      (ENV_STREAM_STALL_TIMEOUT_MS, "250"),
    ]
    .into_iter()
    .collect();
    let config = assert_ok!(ReplicatorConfig::from_lookup(|name| vars
      .get(name)
      .map(|v| v.to_string())));
    assert_eq!(config.chunk_size, 512);
    assert_eq!(config.stream_stall_timeout, Duration::from_millis(250));
    assert_eq!(config.inbound_buffer_chunks, 100);
  }

  #[test]
  fn zero_and_garbage_are_rejected() {
    let zero = ReplicatorConfig::from_lookup(|name| {
      (name == ENV_INBOUND_BUFFER_CHUNKS).then(|| "0".to_string())
    });
    assert_eq!(
      assert_err!(zero),
      ConfigError::InvalidValue {
        name: ENV_INBOUND_BUFFER_CHUNKS.to_string(),
        value: "0".to_string(),
      }
    );

    let garbage =
      ReplicatorConfig::from_lookup(|name| (name == ENV_JOIN_TIMEOUT_MS).then(|| "soon".to_string()));
    assert!(matches!(garbage, Err(ConfigError::InvalidValue { .. })));
  }
}
