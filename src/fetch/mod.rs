//! Fetch coordination above the cache.
//!
//! [`DataGetter`] knows, for every [`EntityKind`], which cache slice it lives
//! in and how to ask the server for it. A fetch answers what it can from the
//! cache, asks the server once for the rest, stores what came back and
//! returns everything in the order it was asked for.

mod descriptor;
mod params;
mod result;
mod rows;

pub use descriptor::{
  ApiResultShape, BatchSpec, Caching, CompoundSpec, EntityDescriptor, EntityKind, EntityShape,
  Protocol,
};
pub use params::{CompoundParams, FetchParams, Key};
pub use result::{CacheSource, FetchResult, RequestPlan};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{CachePath, DataCache};
use crate::error::{CacheError, Result};
use crate::transport::{Method, Request, Transport};

/// Above this many identity values, requests switch from GET to POST.
pub const DEFAULT_GET_THRESHOLD: usize = 1000;

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

/// Fetches entities through the cache.
///
/// Cloning is cheap and shares the cache, the transport and the table of
/// in-flight requests.
#[derive(Clone)]
pub struct DataGetter {
  cache: DataCache,
  transport: Arc<dyn Transport>,
  get_threshold: usize,
  /// Requests currently on the wire, by request fingerprint
  inflight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl DataGetter {
  pub fn new(cache: DataCache, transport: Arc<dyn Transport>) -> Self {
    Self {
      cache,
      transport,
      get_threshold: DEFAULT_GET_THRESHOLD,
      inflight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Set the largest number of identity values still sent with GET.
  pub fn with_get_threshold(mut self, threshold: usize) -> Self {
    self.get_threshold = threshold;
    self
  }

  pub fn cache(&self) -> &DataCache {
    &self.cache
  }

  /// Fetch `kind` for `params`, using the cache where possible.
  pub async fn fetch_and_cache(
    &self,
    kind: EntityKind,
    params: FetchParams,
  ) -> Result<FetchResult> {
    let descriptor = kind.descriptor();
    match descriptor.shape {
      EntityShape::WholeSlice => self.fetch_whole_slice(&descriptor, params).await,
      EntityShape::SingleCompoundKey(spec) => {
        self.fetch_compound(&descriptor, &spec, params).await
      }
      EntityShape::PerKeyBatch(spec) => self.fetch_batch(&descriptor, &spec, params).await,
    }
  }

  /// Shorthand for a per-key batch fetch.
  pub async fn fetch_keys<K: Into<Key>>(
    &self,
    kind: EntityKind,
    keys: impl IntoIterator<Item = K>,
  ) -> Result<FetchResult> {
    self.fetch_and_cache(kind, FetchParams::keys(keys)).await
  }

  /// Ask the server when its data was last refreshed and purge the cache if
  /// it is newer than what we hold. Returns whether the cache was purged.
  pub async fn check_for_server_refresh(&self) -> Result<bool> {
    let value = self
      .fetch_and_cache(EntityKind::LastRefreshed, FetchParams::None)
      .await?
      .into_value()
      .unwrap_or(Value::Null);

    let Some(timestamp) = value.as_str() else {
      return Err(CacheError::server_shape(
        EntityKind::LastRefreshed.as_str(),
        format!("expected a timestamp string, got {}", value),
      ));
    };
    self.cache.apply_server_refresh(timestamp)
  }

  /// Ask the server to refresh its database from the enclave.
  pub async fn trigger_db_refresh(&self) -> Result<Value> {
    let result = self
      .fetch_and_cache(EntityKind::DbRefresh, FetchParams::None)
      .await?;
    Ok(result.into_value().unwrap_or(Value::Null))
  }

  async fn fetch_whole_slice(
    &self,
    descriptor: &EntityDescriptor,
    params: FetchParams,
  ) -> Result<FetchResult> {
    let slice = descriptor.slice();
    if params != FetchParams::None {
      return Err(CacheError::contract(
        slice,
        format!("takes no parameters, got {}", params.describe()),
      ));
    }

    let path = CachePath::from(slice);
    let key = slice.to_string();

    if descriptor.is_cached() {
      if let Some(value) = self.cache.get(&path) {
        debug!(entity = slice, "Cache hit");
        let plan = RequestPlan {
          cached_keys: vec![key.clone()],
          ..RequestPlan::default()
        };
        return Ok(FetchResult::new(descriptor.kind, vec![(key, value)], plan));
      }
    }

    let request = match self.choose_method(descriptor.protocol, 0) {
      Method::Get => Request::Get {
        endpoint: descriptor.endpoint,
        query: Vec::new(),
      },
      Method::Post => Request::Post {
        endpoint: descriptor.endpoint,
        body: json!({}),
      },
    };
    let value = self.call(descriptor, request, &[]).await?;

    if descriptor.is_cached() {
      self.cache.put(&path, value.clone(), true)?;
    }
    let plan = RequestPlan {
      uncached_keys: vec![key.clone()],
      ..RequestPlan::default()
    };
    Ok(FetchResult::new(descriptor.kind, vec![(key, value)], plan))
  }

  async fn fetch_compound(
    &self,
    descriptor: &EntityDescriptor,
    spec: &CompoundSpec,
    params: FetchParams,
  ) -> Result<FetchResult> {
    let slice = descriptor.slice();
    let params = match params {
      FetchParams::Compound(params) => params,
      other => {
        return Err(CacheError::contract(
          slice,
          format!("expects compound parameters, got {}", other.describe()),
        ))
      }
    };

    if let Some(unknown) = params.names().find(|name| !spec.accepts(name)) {
      return Err(CacheError::contract(
        slice,
        format!("unknown parameter {}", unknown),
      ));
    }
    if let Some(missing) = spec
      .required
      .iter()
      .find(|name| params.get(name).is_none())
    {
      return Err(CacheError::contract(
        slice,
        format!("missing required parameter {}", missing),
      ));
    }

    let key = (spec.key_fn)(&params);
    let path = CachePath::from(slice).join(&key);

    if descriptor.is_cached() {
      if let Some(value) = self.cache.get(&path) {
        debug!(entity = slice, key = %key, "Cache hit");
        let plan = RequestPlan {
          cached_keys: vec![key.clone()],
          ..RequestPlan::default()
        };
        return Ok(FetchResult::new(descriptor.kind, vec![(key, value)], plan));
      }
    }

    let request = match self.choose_method(descriptor.protocol, params.value_count()) {
      Method::Get => Request::Get {
        endpoint: descriptor.endpoint,
        query: params
          .canonical_values()
          .into_iter()
          .map(|(name, values)| (name.to_string(), values.join("|")))
          .collect(),
      },
      Method::Post => Request::Post {
        endpoint: descriptor.endpoint,
        body: params.to_json(),
      },
    };
    let value = self
      .call(descriptor, request, std::slice::from_ref(&key))
      .await?;

    if descriptor.is_cached() {
      self.cache.put(&path, value.clone(), true)?;
    }
    let plan = RequestPlan {
      uncached_keys: vec![key.clone()],
      ..RequestPlan::default()
    };
    Ok(FetchResult::new(descriptor.kind, vec![(key, value)], plan))
  }

  async fn fetch_batch(
    &self,
    descriptor: &EntityDescriptor,
    spec: &BatchSpec,
    params: FetchParams,
  ) -> Result<FetchResult> {
    let slice = descriptor.slice();
    let keys = match params {
      FetchParams::Keys(keys) => keys,
      other => {
        return Err(CacheError::contract(
          slice,
          format!("expects a key list, got {}", other.describe()),
        ))
      }
    };

    let keys: Vec<String> = keys.iter().map(Key::canonical).collect();
    let duplicates = find_duplicates(&keys);
    if !duplicates.is_empty() {
      return Err(CacheError::contract(
        slice,
        format!("duplicate keys in request: {}", duplicates.join(", ")),
      ));
    }

    let mut plan = RequestPlan::default();
    let mut found: HashMap<String, Value> = HashMap::new();
    for key in &keys {
      let cached = if descriptor.is_cached() {
        self.cache.get(CachePath::from(slice).join(key))
      } else {
        None
      };
      match cached {
        Some(value) => {
          plan.cached_keys.push(key.clone());
          found.insert(key.clone(), value);
        }
        None => plan.uncached_keys.push(key.clone()),
      }
    }
    debug!(
      entity = slice,
      cached = plan.cached_keys.len(),
      uncached = plan.uncached_keys.len(),
      "Partitioned request"
    );

    if !plan.uncached_keys.is_empty() {
      let fetched = self.fetch_uncached(descriptor, spec, &mut plan).await?;

      if descriptor.is_cached() && !fetched.is_empty() {
        for (key, value) in &fetched {
          self
            .cache
            .put(CachePath::from(slice).join(key), value.clone(), false)?;
        }
        self.cache.schedule_persist();
      }
      found.extend(fetched);
    }

    let items = keys
      .into_iter()
      .filter_map(|key| found.remove(&key).map(|value| (key, value)))
      .collect();
    Ok(FetchResult::new(descriptor.kind, items, plan))
  }

  /// One network call for the plan's uncached keys, with stubs filled in.
  async fn fetch_uncached(
    &self,
    descriptor: &EntityDescriptor,
    spec: &BatchSpec,
    plan: &mut RequestPlan,
  ) -> Result<HashMap<String, Value>> {
    let slice = descriptor.slice();

    let mut request_keys = plan.uncached_keys.clone();
    params::sort_canonical(&mut request_keys);

    let request = match self.choose_method(descriptor.protocol, request_keys.len()) {
      Method::Get => Request::Get {
        endpoint: descriptor.endpoint,
        query: vec![(spec.query_param.to_string(), request_keys.join("|"))],
      },
      Method::Post => {
        let values: Vec<Value> = request_keys
          .iter()
          .map(|key| params::canonical_to_json(key))
          .collect();
        let mut body = Map::new();
        body.insert(spec.query_param.to_string(), Value::Array(values));
        Request::Post {
          endpoint: descriptor.endpoint,
          body: Value::Object(body),
        }
      }
    };
    let response = self.call(descriptor, request, &request_keys).await?;
    let rows = rows::key_rows(slice, spec.result_shape, response)?;

    if spec.one_row_per_key && rows.len() > request_keys.len() {
      return Err(CacheError::server_shape(
        slice,
        format!(
          "server returned {} rows for {} requested keys",
          rows.len(),
          request_keys.len()
        ),
      ));
    }

    let requested: HashSet<&str> = request_keys.iter().map(String::as_str).collect();
    let mut fetched: HashMap<String, Value> = HashMap::new();
    for (key, value) in rows {
      if !requested.contains(key.as_str()) {
        warn!(entity = slice, key = %key, "Server returned a key that was not requested");
        continue;
      }
      if fetched.insert(key.clone(), value).is_some() && spec.one_row_per_key {
        return Err(CacheError::server_shape(
          slice,
          format!("server returned more than one row for key {}", key),
        ));
      }
    }

    if spec.one_row_per_key {
      for key in &plan.uncached_keys {
        if fetched.contains_key(key) {
          continue;
        }
        match spec.stub {
          Some(stub) => {
            fetched.insert(key.clone(), stub(key));
            plan.stubbed_keys.push(key.clone());
          }
          None => warn!(entity = slice, key = %key, "Server did not return a requested key"),
        }
      }
      if !plan.stubbed_keys.is_empty() {
        info!(
          entity = slice,
          missing = plan.stubbed_keys.len(),
          "Filled keys missing from server response with stubs"
        );
      }
    } else if is_grouped(spec.result_shape) {
      // A key with no rows is an empty group, cached like any other
      for key in &plan.uncached_keys {
        fetched
          .entry(key.clone())
          .or_insert_with(|| Value::Object(Map::new()));
      }
    }

    Ok(fetched)
  }

  fn choose_method(&self, protocol: Protocol, value_count: usize) -> Method {
    match protocol {
      Protocol::Get => Method::Get,
      Protocol::Post => Method::Post,
      Protocol::Either if value_count <= self.get_threshold => Method::Get,
      Protocol::Either => Method::Post,
    }
  }

  /// Send `request`, sharing the call with anyone already waiting on an
  /// identical request.
  async fn call(
    &self,
    descriptor: &EntityDescriptor,
    request: Request,
    keys: &[String],
  ) -> Result<Value> {
    let fingerprint = request.fingerprint();

    let shared = {
      let mut inflight = self
        .inflight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      match inflight.get(&fingerprint) {
        Some(existing) => {
          debug!(entity = descriptor.slice(), "Joining in-flight request");
          existing.clone()
        }
        None => {
          debug!(
            entity = descriptor.slice(),
            method = %request.method(),
            endpoint = request.endpoint(),
            keys = keys.len(),
            "Fetching from server"
          );
          let transport = Arc::clone(&self.transport);
          let entity = descriptor.slice();
          let keys = keys.to_vec();
          let future = async move {
            request
              .send(transport.as_ref())
              .await
              .map_err(|e| CacheError::NetworkFailure {
                entity: entity.to_string(),
                keys,
                message: format!("{:#}", e),
              })
          }
          .boxed()
          .shared();
          inflight.insert(fingerprint.clone(), future.clone());
          future
        }
      }
    };

    // Clears the entry on completion, and also when this caller is dropped
    // mid-request.
    let _guard = InflightGuard {
      inflight: &self.inflight,
      fingerprint,
      shared: shared.clone(),
    };
    shared.await
  }
}

struct InflightGuard<'a> {
  inflight: &'a Mutex<HashMap<String, SharedFetch>>,
  fingerprint: String,
  shared: SharedFetch,
}

impl Drop for InflightGuard<'_> {
  fn drop(&mut self) {
    let mut inflight = self
      .inflight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if inflight
      .get(&self.fingerprint)
      .is_some_and(|current| current.ptr_eq(&self.shared))
    {
      inflight.remove(&self.fingerprint);
    }
  }
}

fn is_grouped(shape: ApiResultShape) -> bool {
  matches!(shape, ApiResultShape::ArrayOfKeyedObjects { key_fields } if key_fields.len() > 1)
}

fn find_duplicates(keys: &[String]) -> Vec<String> {
  let mut seen = HashSet::new();
  let mut duplicates: Vec<String> = Vec::new();
  for key in keys {
    if !seen.insert(key.as_str()) && !duplicates.contains(key) {
      duplicates.push(key.clone());
    }
  }
  duplicates
}
