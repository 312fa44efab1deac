//! Network transport to the VS-Hub REST API.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Something that can send GET and POST requests and return JSON.
#[async_trait]
pub trait Transport: Send + Sync {
  /// GET `endpoint` with the given query pairs.
  async fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value>;

  /// POST `body` as JSON to `endpoint`.
  async fn post(&self, endpoint: &str, body: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Method::Get => f.write_str("GET"),
      Method::Post => f.write_str("POST"),
    }
  }
}

/// A fully built request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
  Get {
    endpoint: &'static str,
    query: Vec<(String, String)>,
  },
  Post {
    endpoint: &'static str,
    body: Value,
  },
}

impl Request {
  pub fn method(&self) -> Method {
    match self {
      Request::Get { .. } => Method::Get,
      Request::Post { .. } => Method::Post,
    }
  }

  pub fn endpoint(&self) -> &'static str {
    match self {
      Request::Get { endpoint, .. } | Request::Post { endpoint, .. } => endpoint,
    }
  }

  /// Stable fixed-length identity of this request, used to share identical
  /// in-flight requests.
  pub fn fingerprint(&self) -> String {
    let input = match self {
      Request::Get { endpoint, query } => {
        let query: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("GET {}?{}", endpoint, query.join("&"))
      }
      Request::Post { endpoint, body } => format!("POST {} {}", endpoint, body),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub async fn send(self, transport: &dyn Transport) -> Result<Value> {
    match self {
      Request::Get { endpoint, query } => transport.get(endpoint, &query).await,
      Request::Post { endpoint, body } => transport.post(endpoint, &body).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_fingerprint_distinguishes_requests() {
    let get = Request::Get {
      endpoint: "get-concepts",
      query: vec![("id".to_string(), "1|2".to_string())],
    };
    let other = Request::Get {
      endpoint: "get-concepts",
      query: vec![("id".to_string(), "1|3".to_string())],
    };
    let post = Request::Post {
      endpoint: "get-concepts",
      body: json!({"id": [1, 2]}),
    };

    assert_eq!(get.fingerprint(), get.clone().fingerprint());
    assert_eq!(get.fingerprint().len(), 64);
    assert_ne!(get.fingerprint(), other.fingerprint());
    assert_ne!(get.fingerprint(), post.fingerprint());
    assert_eq!(post.method(), Method::Post);
    assert_eq!(post.endpoint(), "get-concepts");
  }
}
