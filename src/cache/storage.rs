//! Persistent string key/value storage backends.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{CacheError, Result};

/// A string-valued key/value store that outlives the process.
///
/// The cache only ever uses a single key; the trait is kept general so other
/// local settings can share the same backend.
pub trait StorageBackend: Send + Sync {
  /// Read the value stored under `key`.
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory backend. Nothing survives the process.
///
/// Counts writes so tests can observe how often the cache was persisted.
#[derive(Default)]
pub struct MemoryBackend {
  items: Mutex<HashMap<String, String>>,
  writes: AtomicUsize,
  quota: Option<usize>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes whose value is longer than `quota` bytes.
  pub fn with_quota(quota: usize) -> Self {
    Self {
      quota: Some(quota),
      ..Self::default()
    }
  }

  /// Number of successful `set_item` calls.
  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::SeqCst)
  }
}

impl StorageBackend for MemoryBackend {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self
      .items
      .lock()
      .map_err(|e| CacheError::StorageRead(format!("Lock poisoned: {}", e)))?;
    Ok(items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    if let Some(quota) = self.quota {
      if value.len() > quota {
        return Err(CacheError::StorageWrite(format!(
          "quota exceeded: {} bytes > {} bytes",
          value.len(),
          quota
        )));
      }
    }
    let mut items = self
      .items
      .lock()
      .map_err(|e| CacheError::StorageWrite(format!("Lock poisoned: {}", e)))?;
    items.insert(key.to_string(), value.to_string());
    self.writes.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| CacheError::StorageWrite(format!("Lock poisoned: {}", e)))?;
    items.remove(key);
    Ok(())
  }
}

/// SQLite-backed local storage.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open the storage database at the default location.
  pub fn open() -> color_eyre::Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the storage database at `path`.
  pub fn open_at(path: &Path) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open storage database at {}: {}", path.display(), e))?;

    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> color_eyre::Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("vshub").join("storage.db"))
  }
}

const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl StorageBackend for SqliteBackend {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| CacheError::StorageRead(format!("Lock poisoned: {}", e)))?;

    conn
      .query_row(
        "SELECT value FROM local_storage WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| CacheError::StorageRead(format!("Failed to read {}: {}", key, e)))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| CacheError::StorageWrite(format!("Lock poisoned: {}", e)))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO local_storage (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| CacheError::StorageWrite(format!("Failed to store {}: {}", key, e)))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| CacheError::StorageWrite(format!("Lock poisoned: {}", e)))?;

    conn
      .execute("DELETE FROM local_storage WHERE key = ?", params![key])
      .map_err(|e| CacheError::StorageWrite(format!("Failed to remove {}: {}", key, e)))?;

    Ok(())
  }
}
