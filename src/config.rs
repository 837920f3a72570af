use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Jobs per paginated fetch
  pub page_size: usize,
  /// Capacity of the hydrated entity LRU
  pub entity_cache_capacity: usize,
  /// Quiet period before free-text search is applied
  pub search_debounce_ms: u64,
  /// Display name used when a counterpart can't be resolved
  pub placeholder_name: String,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      page_size: 20,
      entity_cache_capacity: 100,
      search_debounce_ms: 300,
      placeholder_name: "Unknown".to_string(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter directive, overridden by RUST_LOG
  pub level: String,
  /// Write daily-rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "jobfeed=info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jobfeed.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jobfeed/config.yaml
  ///
  /// Falls back to defaults when nothing is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("jobfeed.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jobfeed").join("config.yaml");
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
    if config.page_size == 0 {
      return Err(eyre!("page_size must be at least 1"));
    }
    if config.entity_cache_capacity == 0 {
      return Err(eyre!("entity_cache_capacity must be at least 1"));
    }
    Ok(config)
  }

  pub fn search_debounce(&self) -> Duration {
    Duration::from_millis(self.search_debounce_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse("page_size: 5\nlog:\n  level: debug\n").unwrap();
    assert_eq!(config.page_size, 5);
    assert_eq!(config.entity_cache_capacity, 100);
    assert_eq!(config.search_debounce(), Duration::from_millis(300));
    assert_eq!(config.log.level, "debug");
    assert!(config.log.directory.is_none());
  }

  #[test]
  fn test_zero_page_size_rejected() {
    assert!(Config::parse("page_size: 0").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/jobfeed.yaml"))).is_err());
  }
}
