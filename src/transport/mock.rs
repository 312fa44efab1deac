//! Recording transport for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

use super::{Method, Transport};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
  pub method: Method,
  pub endpoint: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl RecordedCall {
  /// Values of `param`, from the query string or the POST body.
  pub fn values(&self, param: &str) -> Vec<String> {
    match self.method {
      Method::Get => self
        .query
        .iter()
        .filter(|(name, _)| name == param)
        .flat_map(|(_, value)| value.split('|').map(String::from))
        .filter(|value| !value.is_empty())
        .collect(),
      Method::Post => self
        .body
        .as_ref()
        .and_then(|body| body.get(param))
        .and_then(Value::as_array)
        .map(|items| {
          items
            .iter()
            .map(|item| match item {
              Value::String(s) => s.clone(),
              other => other.to_string(),
            })
            .collect()
        })
        .unwrap_or_default(),
    }
  }
}

type Responder = Box<dyn Fn(&RecordedCall) -> Result<Value> + Send + Sync>;

pub struct MockTransport {
  calls: Mutex<Vec<RecordedCall>>,
  responder: Responder,
  delay: Duration,
}

impl MockTransport {
  pub fn new<F>(responder: F) -> Self
  where
    F: Fn(&RecordedCall) -> Result<Value> + Send + Sync + 'static,
  {
    Self {
      calls: Mutex::new(Vec::new()),
      responder: Box::new(responder),
      delay: Duration::ZERO,
    }
  }

  /// Transport whose every call fails.
  pub fn failing(message: &'static str) -> Self {
    Self::new(move |_| Err(eyre!(message)))
  }

  /// Wait this long before answering.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> Vec<RecordedCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  async fn respond(&self, call: RecordedCall) -> Result<Value> {
    self.calls.lock().unwrap().push(call.clone());
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    (self.responder)(&call)
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value> {
    self
      .respond(RecordedCall {
        method: Method::Get,
        endpoint: endpoint.to_string(),
        query: query.to_vec(),
        body: None,
      })
      .await
  }

  async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
    self
      .respond(RecordedCall {
        method: Method::Post,
        endpoint: endpoint.to_string(),
        query: Vec::new(),
        body: Some(body.clone()),
      })
      .await
  }
}
