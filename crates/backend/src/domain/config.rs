//! Configuration for the indexing service.
//!
//! Config priority: explicit path > user (~/.config/mailytics/config.toml) > defaults

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dirs;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Config file {0} does not exist")]
  NotFound(PathBuf),
  #[error("Failed to read config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Failed to render config: {0}")]
  Render(#[from] toml::ser::Error),
}

// ============================================================================
// Index Configuration
// ============================================================================

/// Indexing pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
  /// Root directory holding one index per mailbox (`<location>/<owner>/<mailbox>`)
  pub location: PathBuf,

  /// Number of index workers (default: 0 = one per CPU)
  pub indexer_threads: usize,

  /// Capacity of the message queue between the visitor and the workers (default: 1000)
  /// A full queue blocks the visitor; messages are never dropped.
  pub index_queue_size: usize,

  /// Capacity of the mailbox submission queue (default: 32)
  /// Submissions beyond this are rejected with a queue-full error.
  pub mailbox_queue_size: usize,

  /// Delay between finishing a traversal and committing its writer, in milliseconds (default: 5000)
  /// Gives workers time to drain messages still queued for the mailbox.
  pub commit_grace_ms: u64,

  /// Delay after signalling cancellation before tearing down tasks, in milliseconds (default: 1000)
  pub stop_grace_ms: u64,

  /// Bounded wait when offering stop sentinels to a full queue, in milliseconds (default: 1000)
  pub sentinel_timeout_ms: u64,

  /// How long shutdown waits for tasks before aborting them, in milliseconds (default: 2000)
  pub worker_join_timeout_ms: u64,

  /// Heap budget for each mailbox writer in megabytes (default: 50)
  pub writer_heap_mb: usize,

  /// Indexing threads used inside each mailbox writer (default: 1)
  pub writer_threads: usize,
}

impl Default for IndexConfig {
  fn default() -> Self {
    Self {
      location: dirs::default_index_dir(),
      indexer_threads: 0,
      index_queue_size: 1000,
      mailbox_queue_size: 32,
      commit_grace_ms: 5000,
      stop_grace_ms: 1000,
      sentinel_timeout_ms: 1000,
      worker_join_timeout_ms: 2000,
      writer_heap_mb: 50,
      writer_threads: 1,
    }
  }
}

impl IndexConfig {
  /// Effective worker count (resolves 0 to the number of CPUs)
  pub fn worker_count(&self) -> usize {
    if self.indexer_threads == 0 {
      num_cpus::get()
    } else {
      self.indexer_threads
    }
  }

  pub fn commit_grace(&self) -> Duration {
    Duration::from_millis(self.commit_grace_ms)
  }

  pub fn stop_grace(&self) -> Duration {
    Duration::from_millis(self.stop_grace_ms)
  }

  pub fn sentinel_timeout(&self) -> Duration {
    Duration::from_millis(self.sentinel_timeout_ms)
  }

  pub fn worker_join_timeout(&self) -> Duration {
    Duration::from_millis(self.worker_join_timeout_ms)
  }
}

// ============================================================================
// Log Configuration
// ============================================================================

/// Logging configuration (consumed by the CLI when installing the subscriber)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  /// Default: "info"
  pub level: String,

  /// Also write logs to a rolling file under the data directory (default: false)
  pub file: bool,

  /// Log file rotation: "daily", "hourly", "never"
  /// Default: "daily"
  pub rotation: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: false,
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub index: IndexConfig,
  pub log: LogConfig,
}

impl Config {
  /// Load configuration from an explicit file, which must exist.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load the user config if present, otherwise defaults
  pub fn load_default() -> Self {
    let (config, error) = Self::try_load_default();
    if let Some(e) = error {
      warn!(error = %e, "Ignoring user config, using defaults");
    }
    config
  }

  /// Like [`load_default`](Self::load_default), but hands back the reason an
  /// existing user config was ignored so callers can report it once logging is up.
  pub fn try_load_default() -> (Self, Option<ConfigError>) {
    Self::load_or_default(&Self::user_config_path())
  }

  fn load_or_default(path: &Path) -> (Self, Option<ConfigError>) {
    if !path.exists() {
      return (Self::default(), None);
    }

    match Self::load(path) {
      Ok(config) => (config, None),
      Err(e) => (Self::default(), Some(e)),
    }
  }

  pub fn user_config_path() -> PathBuf {
    dirs::default_config_dir().join("config.toml")
  }

  /// Render this configuration as a commented TOML document
  pub fn generate_template(&self) -> Result<String, ConfigError> {
    let body = toml::to_string_pretty(self)?;
    Ok(format!(
      "# Mailytics configuration\n# Place at {}\n\n{}",
      Self::user_config_path().display(),
      body
    ))
  }
}
