use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub store: StoreConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  /// Environment variable holding the bearer token
  #[serde(default = "default_token_env")]
  pub token_env: String,
  /// Path probed for reachability, relative to base_url (empty = base_url)
  #[serde(default)]
  pub health_path: String,
}

fn default_token_env() -> String {
  "OFFSYNC_TOKEN".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
  /// Database file (defaults to $XDG_DATA_HOME/offsync/store.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_hours")]
  pub ttl_hours: i64,
}

fn default_ttl_hours() -> i64 {
  24
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_hours: default_ttl_hours(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
}

fn default_probe_interval() -> u64 {
  30
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/offsync/config.yaml\n\
         See offsync.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.cache_ttl()?;
    Ok(config)
  }

  /// Store location, falling back to the platform data directory.
  pub fn store_path(&self) -> Result<PathBuf> {
    self
      .store
      .path
      .clone()
      .or_else(offsync::store::default_path)
      .ok_or_else(|| eyre!("Could not determine a data directory; set store.path"))
  }

  /// Informational cache expiry. Rejects negative or unrepresentable hours.
  pub fn cache_ttl(&self) -> Result<Duration> {
    let hours = self.cache.ttl_hours;
    Duration::try_hours(hours)
      .filter(|_| hours >= 0)
      .ok_or_else(|| eyre!("cache.ttl_hours out of range: {}", hours))
  }

  pub fn probe_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }
}
