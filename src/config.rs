use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::SqliteStore;
use crate::interceptor::{DEFAULT_OFFLINE_MESSAGE, DEFAULT_READY_TIMEOUT};
use crate::manifest::Manifest;
use crate::worker::WorkerSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Write logs to daily files in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Generation identifier, e.g. "v30". Bump it to invalidate old caches.
  pub name: String,
  /// Base URL the resources are resolved against
  pub scope: String,
  /// Resources that must be cached for the application to work offline
  pub resources: Vec<String>,
  /// How long a cache miss waits for the cache to become ready
  #[serde(default = "default_ready_timeout_ms")]
  pub ready_timeout_ms: u64,
  /// Timeout for each network request
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  /// Body of the placeholder served when offline and not cached
  pub offline_message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/offline-cache/cache.db)
  pub path: Option<PathBuf>,
}

fn default_ready_timeout_ms() -> u64 {
  DEFAULT_READY_TIMEOUT.as_millis() as u64
}

fn default_request_timeout_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-cache/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-cache/config.yaml\n\
                 See offline-cache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.cache.name.trim().is_empty() {
      return Err(eyre!("cache.name must not be empty"));
    }
    if self.cache.resources.is_empty() {
      return Err(eyre!("cache.resources must list at least one resource"));
    }
    if self.cache.request_timeout_secs == 0 {
      return Err(eyre!("cache.request_timeout_secs must be greater than zero"));
    }
    if self.cache.ready_timeout_ms == 0 {
      return Err(eyre!("cache.ready_timeout_ms must be greater than zero"));
    }
    self.manifest()?;
    Ok(())
  }

  pub fn scope(&self) -> Result<Url> {
    Url::parse(&self.cache.scope)
      .map_err(|e| eyre!("cache.scope '{}' is not a valid URL: {}", self.cache.scope, e))
  }

  pub fn manifest(&self) -> Result<Manifest> {
    Manifest::new(self.scope()?, &self.cache.resources).map_err(|e| eyre!("{}", e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.cache.request_timeout_secs)
  }

  pub fn worker_settings(&self) -> Result<WorkerSettings> {
    let mut settings = WorkerSettings::new(self.cache.name.clone(), self.manifest()?);
    settings.ready_timeout = Duration::from_millis(self.cache.ready_timeout_ms);
    settings.offline_message = self
      .cache
      .offline_message
      .clone()
      .unwrap_or_else(|| DEFAULT_OFFLINE_MESSAGE.to_string());
    Ok(settings)
  }

  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStore::default_path().map_err(|e| eyre!("{}", e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EXAMPLE: &str = r#"
cache:
  name: v30
  scope: http://localhost:8080/
  resources:
    - /
    - /index.html
    - gif.js
    - ./gif.worker.js
"#;

  #[test]
  fn test_parse_with_defaults() {
    let config = Config::from_yaml(EXAMPLE).unwrap();

    assert_eq!(config.cache.name, "v30");
    assert_eq!(config.cache.ready_timeout_ms, 10_000);
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert!(config.storage.path.is_none());
    assert!(config.log_dir.is_none());

    let settings = config.worker_settings().unwrap();
    assert_eq!(settings.generation, "v30");
    assert_eq!(settings.manifest.len(), 4);
    assert_eq!(settings.ready_timeout, Duration::from_secs(10));
    assert_eq!(settings.offline_message, DEFAULT_OFFLINE_MESSAGE);
  }

  #[test]
  fn test_parse_overrides() {
    let yaml = r#"
cache:
  name: V22
  scope: https://example.org/app/
  resources: [index.html]
  ready_timeout_ms: 250
  offline_message: Offline
storage:
  path: /tmp/offline-cache-test.db
log_dir: /tmp/offline-cache-logs
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let settings = config.worker_settings().unwrap();

    assert_eq!(settings.ready_timeout, Duration::from_millis(250));
    assert_eq!(settings.offline_message, "Offline");
    assert_eq!(
      settings.manifest.entries()[0].as_str(),
      "https://example.org/app/index.html"
    );
    assert_eq!(
      config.storage_path().unwrap(),
      PathBuf::from("/tmp/offline-cache-test.db")
    );
  }

  #[test]
  fn test_invalid_scope_is_rejected() {
    let yaml = "cache:\n  name: v1\n  scope: not a url\n  resources: [index.html]\n";
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("cache.scope"));
  }

  #[test]
  fn test_empty_manifest_is_rejected() {
    let yaml = "cache:\n  name: v1\n  scope: http://localhost/\n  resources: []\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_zero_timeouts_are_rejected() {
    let base = "cache:\n  name: v1\n  scope: http://localhost/\n  resources: [index.html]\n";

    let err = Config::from_yaml(&format!("{}  request_timeout_secs: 0\n", base)).unwrap_err();
    assert!(err.to_string().contains("cache.request_timeout_secs"));

    let err = Config::from_yaml(&format!("{}  ready_timeout_ms: 0\n", base)).unwrap_err();
    assert!(err.to_string().contains("cache.ready_timeout_ms"));
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
