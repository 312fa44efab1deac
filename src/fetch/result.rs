//! Uniform result of a fetch, with metadata about where the data came from.

use serde_json::{Map, Value};

use super::descriptor::EntityKind;

/// How a request was split between cache and network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPlan {
  /// Keys answered from the cache
  pub cached_keys: Vec<String>,
  /// Keys that had to be requested from the server
  pub uncached_keys: Vec<String>,
  /// Uncached keys the server did not return, filled with stubs
  pub stubbed_keys: Vec<String>,
}

/// Indicates where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Everything was already cached
  Cache,
  /// Everything came from the network
  Network,
  /// Partly cached, partly fetched
  Mixed,
}

impl CacheSource {
  fn from_plan(plan: &RequestPlan) -> Self {
    match (plan.cached_keys.is_empty(), plan.uncached_keys.is_empty()) {
      (_, true) => CacheSource::Cache,
      (true, false) => CacheSource::Network,
      (false, false) => CacheSource::Mixed,
    }
  }
}

/// Result of [`crate::DataGetter::fetch_and_cache`].
///
/// Items are in the order the keys were requested. Whole-slice and
/// compound-key fetches produce a single item.
#[derive(Debug, Clone)]
pub struct FetchResult {
  pub entity: EntityKind,
  pub items: Vec<(String, Value)>,
  pub plan: RequestPlan,
  pub source: CacheSource,
}

impl FetchResult {
  pub fn new(entity: EntityKind, items: Vec<(String, Value)>, plan: RequestPlan) -> Self {
    let source = CacheSource::from_plan(&plan);
    Self {
      entity,
      items,
      plan,
      source,
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self
      .items
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, value)| value)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.items.iter().map(|(k, _)| k.as_str())
  }

  /// Values in request order.
  pub fn into_values(self) -> Vec<Value> {
    self.items.into_iter().map(|(_, value)| value).collect()
  }

  /// Values keyed by canonical key.
  pub fn into_map(self) -> Map<String, Value> {
    self.items.into_iter().collect()
  }

  /// The single value of a whole-slice or compound-key fetch.
  pub fn into_value(self) -> Option<Value> {
    self.items.into_iter().next().map(|(_, value)| value)
  }
}
