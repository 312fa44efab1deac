//! Persistent nested key/value cache.
//!
//! The whole cache is one JSON tree kept in memory. Changes are written back
//! to a [`StorageBackend`] as a single compressed string, debounced so that a
//! burst of writes costs one save. The stored form is read once, when the
//! cache is constructed; unreadable data is discarded and the cache starts
//! empty.

mod codec;
mod history;
mod path;
mod scheduler;
mod storage;

pub use codec::{compress, decompress};
pub use history::CacheHistoryEvent;
pub use path::CachePath;
pub use scheduler::PersistScheduler;
pub use storage::{MemoryBackend, SqliteBackend, StorageBackend};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, Result};

/// Storage key the cache is saved under.
pub const DEFAULT_STORAGE_KEY: &str = "dataCache";

/// Default quiet period before a scheduled save runs.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(400);

/// Options for constructing a [`DataCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
  pub storage_key: String,
  pub persist_debounce: Duration,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      storage_key: DEFAULT_STORAGE_KEY.to_string(),
      persist_debounce: DEFAULT_PERSIST_DEBOUNCE,
    }
  }
}

impl CacheOptions {
  pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
    self.storage_key = key.into();
    self
  }

  pub fn with_debounce(mut self, debounce: Duration) -> Self {
    self.persist_debounce = debounce;
    self
  }
}

/// Everything that is written to storage.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
  #[serde(default)]
  data: Map<String, Value>,
  #[serde(default)]
  history: Vec<CacheHistoryEvent>,
  #[serde(default, rename = "lastRefreshTimestamp")]
  last_refresh_timestamp: Option<String>,
}

impl CacheState {
  fn fresh(message: impl Into<String>) -> Self {
    Self {
      history: vec![CacheHistoryEvent::now(message)],
      ..Self::default()
    }
  }
}

/// Entry count for one top-level slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceStats {
  pub name: String,
  pub entries: usize,
}

/// Size summary of the cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
  pub slices: Vec<SliceStats>,
  /// Size of the uncompressed JSON form
  pub serialized_bytes: usize,
  pub history_events: usize,
}

struct Inner {
  state: Mutex<CacheState>,
  backend: Arc<dyn StorageBackend>,
  storage_key: String,
  scheduler: PersistScheduler,
  /// Last failure of a background save, kept until someone asks for it
  persist_error: Mutex<Option<CacheError>>,
}

/// Handle to the session's cache. Cloning shares the same cache.
#[derive(Clone)]
pub struct DataCache {
  inner: Arc<Inner>,
}

impl DataCache {
  /// Create a cache over `backend`, loading whatever it holds.
  pub fn new(backend: Arc<dyn StorageBackend>, options: CacheOptions) -> Self {
    let state = load_state(backend.as_ref(), &options.storage_key);
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(state),
        backend,
        storage_key: options.storage_key,
        scheduler: PersistScheduler::new(options.persist_debounce),
        persist_error: Mutex::new(None),
      }),
    }
  }

  /// Cache backed by process memory only.
  pub fn in_memory() -> Self {
    Self::new(Arc::new(MemoryBackend::new()), CacheOptions::default())
  }

  fn state(&self) -> MutexGuard<'_, CacheState> {
    // State is plain data, a panic elsewhere cannot leave it half-updated
    // in a way that matters more than losing the cache.
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Value at `path`, or the whole store for the empty path.
  pub fn get(&self, path: impl Into<CachePath>) -> Option<Value> {
    let path = path.into();
    let state = self.state();
    if path.is_root() {
      return Some(Value::Object(state.data.clone()));
    }
    lookup(&state.data, path.segments()).cloned()
  }

  /// Write `value` at `path`, creating objects for missing intermediates.
  ///
  /// Writing at the root replaces the whole store and requires an object.
  pub fn put(&self, path: impl Into<CachePath>, value: Value, should_persist: bool) -> Result<()> {
    let path = path.into();
    {
      let mut state = self.state();
      match path.split_last() {
        None => match value {
          Value::Object(map) => state.data = map,
          other => {
            return Err(CacheError::contract(
              "cache",
              format!("the cache root must be an object, got {}", type_name(&other)),
            ))
          }
        },
        Some((parent, leaf)) => {
          let container = ensure_objects(&mut state.data, parent);
          container.insert(leaf.to_string(), value);
        }
      }
    }
    if should_persist {
      self.schedule_persist();
    }
    Ok(())
  }

  /// Remove the value at `path`. Returns whether something was removed.
  pub fn delete(&self, path: impl Into<CachePath>) -> bool {
    let path = path.into();
    let Some((parent, leaf)) = path.split_last() else {
      return false;
    };
    let removed = {
      let mut state = self.state();
      if parent.is_empty() {
        state.data.remove(leaf).is_some()
      } else {
        match lookup_mut(&mut state.data, parent) {
          Some(Value::Object(map)) => map.remove(leaf).is_some(),
          Some(Value::Array(items)) => match leaf.parse::<usize>() {
            Ok(index) if index < items.len() => {
              items.remove(index);
              true
            }
            _ => false,
          },
          _ => false,
        }
      }
    };
    if removed {
      self.schedule_persist();
    }
    removed
  }

  /// Discard everything in memory. Storage is overwritten by the next save,
  /// which is scheduled here.
  pub fn purge(&self) {
    {
      let mut state = self.state();
      let slices = state.data.len();
      state.data.clear();
      state.last_refresh_timestamp = None;
      state
        .history
        .push(CacheHistoryEvent::now(format!("purged cache ({} slices)", slices)));
      info!(slices, "Purged cache");
    }
    self.schedule_persist();
  }

  /// Serialize, compress and write the whole cache now.
  pub fn persist(&self) -> Result<()> {
    let text = {
      let state = self.state();
      serde_json::to_string(&*state)
        .map_err(|e| CacheError::StorageWrite(format!("failed to serialize cache: {}", e)))?
    };
    let stored = compress(&text)?;

    if let Err(e) = self.inner.backend.set_item(&self.inner.storage_key, &stored) {
      error!(error = %e, bytes = stored.len(), "Failed to save cache");
      return Err(e);
    }

    let message = history::saved_message(text.len(), stored.len());
    info!("{}", message);
    self.state().history.push(CacheHistoryEvent::now(message));
    Ok(())
  }

  /// Ask for a debounced save. Failures are logged and kept for
  /// [`DataCache::take_persist_error`].
  pub fn schedule_persist(&self) {
    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    let scheduled = self.inner.scheduler.schedule(move || {
      if let Some(inner) = weak.upgrade() {
        DataCache { inner }.persist_in_background();
      }
    });
    if !scheduled {
      debug!("No async runtime, saving cache immediately");
      self.persist_in_background();
    }
  }

  fn persist_in_background(&self) {
    if let Err(e) = self.persist() {
      let mut slot = self
        .inner
        .persist_error
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      *slot = Some(e);
    }
  }

  /// Error from the most recent failed background save, if any.
  pub fn take_persist_error(&self) -> Option<CacheError> {
    self
      .inner
      .persist_error
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .take()
  }

  /// Whether a debounced save is waiting to run.
  pub fn has_pending_persist(&self) -> bool {
    self.inner.scheduler.is_pending()
  }

  /// Cancel any pending debounced save and save now. Call on shutdown.
  pub fn flush(&self) -> Result<()> {
    self.inner.scheduler.cancel();
    self.persist()
  }

  /// Copy of the history log.
  pub fn history(&self) -> Vec<CacheHistoryEvent> {
    self.state().history.clone()
  }

  /// The server refresh timestamp recorded by the last purge check.
  pub fn last_refresh_timestamp(&self) -> Option<String> {
    self.state().last_refresh_timestamp.clone()
  }

  pub fn set_last_refresh_timestamp(&self, timestamp: impl Into<String>) {
    self.state().last_refresh_timestamp = Some(timestamp.into());
    self.schedule_persist();
  }

  /// Purge the cache if the server's data is newer than what we cached.
  ///
  /// The cache is purged when `server_timestamp` is strictly later than the
  /// recorded one, or when no usable timestamp is recorded. Returns whether
  /// a purge happened.
  pub fn apply_server_refresh(&self, server_timestamp: &str) -> Result<bool> {
    let server = parse_timestamp(server_timestamp).ok_or_else(|| {
      CacheError::server_shape(
        "last_refreshed",
        format!("unparseable timestamp {:?}", server_timestamp),
      )
    })?;
    let local = self
      .last_refresh_timestamp()
      .as_deref()
      .and_then(parse_timestamp);

    let stale = match local {
      Some(local) => server > local,
      None => true,
    };
    if stale {
      info!(server = %server, local = ?local, "Server data refreshed, purging cache");
      self.purge();
      self.set_last_refresh_timestamp(server_timestamp);
    } else {
      debug!(server = %server, "Cache is current with server");
    }
    Ok(stale)
  }

  /// Entry counts per slice and total serialized size.
  pub fn stats(&self) -> CacheStats {
    let state = self.state();
    let slices = state
      .data
      .iter()
      .map(|(name, value)| SliceStats {
        name: name.clone(),
        entries: match value {
          Value::Object(map) => map.len(),
          Value::Array(items) => items.len(),
          Value::Null => 0,
          _ => 1,
        },
      })
      .collect();
    let serialized_bytes = serde_json::to_string(&state.data)
      .map(|s| s.len())
      .unwrap_or(0);
    CacheStats {
      slices,
      serialized_bytes,
      history_events: state.history.len(),
    }
  }
}

fn load_state(backend: &dyn StorageBackend, key: &str) -> CacheState {
  match read_state(backend, key) {
    Ok(Some((mut state, stored_bytes))) => {
      let message = format!(
        "loaded cache: {} bytes, {} slices",
        stored_bytes,
        state.data.len()
      );
      info!("{}", message);
      state.history.push(CacheHistoryEvent::now(message));
      state
    }
    Ok(None) => {
      info!("No stored cache, starting empty");
      CacheState::fresh("new cache")
    }
    Err(e) => {
      warn!(error = %e, "Discarding unreadable stored cache");
      CacheState::fresh(format!("new cache (discarded unreadable stored cache: {})", e))
    }
  }
}

fn read_state(backend: &dyn StorageBackend, key: &str) -> Result<Option<(CacheState, usize)>> {
  let Some(stored) = backend.get_item(key)? else {
    return Ok(None);
  };
  let text = decompress(&stored)?;
  let state: CacheState = serde_json::from_str(&text)
    .map_err(|e| CacheError::StoreCorruption(format!("invalid JSON: {}", e)))?;
  Ok(Some((state, stored.len())))
}

fn lookup<'a>(data: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
  let (first, rest) = segments.split_first()?;
  let mut current = data.get(first)?;
  for segment in rest {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

fn lookup_mut<'a>(data: &'a mut Map<String, Value>, segments: &[String]) -> Option<&'a mut Value> {
  let (first, rest) = segments.split_first()?;
  let mut current = data.get_mut(first)?;
  for segment in rest {
    current = match current {
      Value::Object(map) => map.get_mut(segment)?,
      Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

/// Walk `segments`, creating objects where nothing usable exists.
fn ensure_objects<'a>(
  data: &'a mut Map<String, Value>,
  segments: &[String],
) -> &'a mut Map<String, Value> {
  let mut map = data;
  for segment in segments {
    let entry = map
      .entry(segment.clone())
      .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
      warn!(
        segment = %segment,
        found = type_name(entry),
        "Replacing non-object value on cache path"
      );
      *entry = Value::Object(Map::new());
    }
    let Value::Object(next) = entry else {
      unreachable!("entry was just made an object");
    };
    map = next;
  }
  map
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// Parse an RFC 3339 timestamp, or a naive ISO one taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
    .map(|dt| dt.and_utc())
}
