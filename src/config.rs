use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheOptions, SqliteBackend, DEFAULT_STORAGE_KEY};
use crate::fetch::DEFAULT_GET_THRESHOLD;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the VS-Hub REST API
  pub api_root: String,
  /// SQLite file holding the persisted cache (defaults to the data dir)
  pub storage_path: Option<PathBuf>,
  /// Key the compressed cache is stored under
  pub storage_key: String,
  /// Quiet period before a change is saved
  pub persist_debounce_ms: u64,
  /// Largest number of ids still sent with GET
  pub get_threshold: usize,
  pub request_timeout_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_root: "http://localhost:8000".to_string(),
      storage_path: None,
      storage_key: DEFAULT_STORAGE_KEY.to_string(),
      persist_debounce_ms: 400,
      get_threshold: DEFAULT_GET_THRESHOLD,
      request_timeout_secs: 60,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vshub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vshub/config.yaml
  ///
  /// Without a file the defaults are used. `VSHUB_API_ROOT` overrides the
  /// API root either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vshub.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vshub").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn with_env_overrides(self) -> Self {
    match std::env::var("VSHUB_API_ROOT") {
      Ok(api_root) if !api_root.trim().is_empty() => Self { api_root, ..self },
      _ => self,
    }
  }

  /// Location of the storage database.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage_path {
      Some(path) => Ok(path.clone()),
      None => SqliteBackend::default_path(),
    }
  }

  pub fn cache_options(&self) -> CacheOptions {
    CacheOptions::default()
      .with_storage_key(self.storage_key.clone())
      .with_debounce(Duration::from_millis(self.persist_debounce_ms))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_load_partial_file_fills_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api_root: https://vshub.example.org/api").unwrap();
    writeln!(file, "get_threshold: 250").unwrap();

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.api_root, "https://vshub.example.org/api");
    assert_eq!(config.get_threshold, 250);
    assert_eq!(config.storage_key, "dataCache");
    assert_eq!(config.persist_debounce_ms, 400);
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "get_threshold: [not, a, number]").unwrap();
    assert!(Config::load_from_path(file.path()).is_err());
  }

  #[test]
  fn test_cache_options_from_config() {
    let config = Config {
      storage_key: "otherCache".to_string(),
      persist_debounce_ms: 10,
      ..Config::default()
    };
    let options = config.cache_options();
    assert_eq!(options.storage_key, "otherCache");
    assert_eq!(options.persist_debounce, Duration::from_millis(10));
  }

  #[test]
  fn test_explicit_storage_path() {
    let config = Config {
      storage_path: Some(PathBuf::from("/tmp/vshub.db")),
      ..Config::default()
    };
    assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/vshub.db"));
  }
}
