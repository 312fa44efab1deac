//! Error taxonomy for the cache and fetch layers.

use thiserror::Error;

/// Errors produced by [`crate::DataCache`] and [`crate::DataGetter`].
///
/// `Clone` so one failed network call can be handed to every caller that was
/// waiting on the same in-flight request.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// Persisted data could not be decoded. Recovered at load time.
  #[error("stored cache is unreadable: {0}")]
  StoreCorruption(String),

  /// The storage backend could not be read.
  #[error("failed to read persistent storage: {0}")]
  StorageRead(String),

  /// The storage backend rejected a write (quota, I/O, ...).
  #[error("failed to write cache to persistent storage: {0}")]
  StorageWrite(String),

  /// The caller broke the request contract of an entity type.
  #[error("invalid request for {entity}: {message}")]
  ContractViolation { entity: String, message: String },

  /// The server answered with data that does not fit the entity's shape.
  #[error("unexpected response for {entity}: {message}")]
  ServerShapeViolation { entity: String, message: String },

  /// The transport failed. Nothing was written to the cache.
  #[error("failed to fetch {entity} (keys: {}): {message}", keys.join(", "))]
  NetworkFailure {
    entity: String,
    keys: Vec<String>,
    message: String,
  },
}

impl CacheError {
  pub fn contract(entity: impl Into<String>, message: impl Into<String>) -> Self {
    Self::ContractViolation {
      entity: entity.into(),
      message: message.into(),
    }
  }

  pub fn server_shape(entity: impl Into<String>, message: impl Into<String>) -> Self {
    Self::ServerShapeViolation {
      entity: entity.into(),
      message: message.into(),
    }
  }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_network_failure_lists_keys() {
    let err = CacheError::NetworkFailure {
      entity: "concepts".to_string(),
      keys: vec!["1".to_string(), "2".to_string()],
      message: "connection refused".to_string(),
    };
    assert_eq!(
      err.to_string(),
      "failed to fetch concepts (keys: 1, 2): connection refused"
    );
  }
}
