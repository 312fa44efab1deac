use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::Transport;
use crate::config::Config;

/// reqwest-based transport against the configured API root.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base(&config.api_root, Duration::from_secs(config.request_timeout_secs))
  }

  pub fn with_base(api_root: &str, timeout: Duration) -> Result<Self> {
    let base = normalize_base(api_root)?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base })
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  fn url_for(&self, endpoint: &str) -> Result<Url> {
    self
      .base
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid endpoint {}: {}", endpoint, e))
  }
}

/// Parse the API root, making sure relative endpoints join below it.
fn normalize_base(api_root: &str) -> Result<Url> {
  let mut root = api_root.trim().to_string();
  if !root.ends_with('/') {
    root.push('/');
  }
  Url::parse(&root).map_err(|e| eyre!("Invalid API root {}: {}", api_root, e))
}

#[async_trait]
impl Transport for HttpTransport {
  async fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value> {
    let mut url = self.url_for(endpoint)?;
    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query);
    }
    debug!(%url, "GET");

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("GET {} failed: {}", endpoint, e))?
      .error_for_status()
      .map_err(|e| eyre!("GET {} failed: {}", endpoint, e))?;

    response
      .json::<Value>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", endpoint, e))
  }

  async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
    let url = self.url_for(endpoint)?;
    debug!(%url, "POST");

    let response = self
      .client
      .post(url)
      .json(body)
      .send()
      .await
      .map_err(|e| eyre!("POST {} failed: {}", endpoint, e))?
      .error_for_status()
      .map_err(|e| eyre!("POST {} failed: {}", endpoint, e))?;

    response
      .json::<Value>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", endpoint, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_joins_below_root() {
    let transport =
      HttpTransport::with_base("https://example.org/api", Duration::from_secs(5)).unwrap();
    assert_eq!(
      transport.url_for("get-concepts").unwrap().as_str(),
      "https://example.org/api/get-concepts"
    );
    assert_eq!(
      transport.url_for("/whoami").unwrap().as_str(),
      "https://example.org/api/whoami"
    );
  }

  #[test]
  fn test_invalid_root_is_rejected() {
    assert!(HttpTransport::with_base("not a url", Duration::from_secs(5)).is_err());
  }
}
