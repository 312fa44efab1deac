//! Diagnostic log of cache loads, saves and purges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the cache history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHistoryEvent {
  pub timestamp: DateTime<Utc>,
  pub message: String,
}

impl CacheHistoryEvent {
  pub fn now(message: impl Into<String>) -> Self {
    Self {
      timestamp: Utc::now(),
      message: message.into(),
    }
  }
}

/// Message for a completed save.
pub fn saved_message(uncompressed: usize, compressed: usize) -> String {
  let ratio = if uncompressed == 0 {
    0.0
  } else {
    compressed as f64 / uncompressed as f64 * 100.0
  };
  format!(
    "saved cache: {} bytes compressed to {} bytes ({:.1}%)",
    uncompressed, compressed, ratio
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_saved_message_ratio() {
    assert_eq!(
      saved_message(1000, 250),
      "saved cache: 1000 bytes compressed to 250 bytes (25.0%)"
    );
    assert_eq!(
      saved_message(0, 0),
      "saved cache: 0 bytes compressed to 0 bytes (0.0%)"
    );
  }
}
