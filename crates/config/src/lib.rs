#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for warden
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/warden/config.toml)
//! - Environment variables

pub mod constants;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use warden_errors::{ConfigError, Error};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize, // 0 = auto-detect
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

/// Lock acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Emit a diagnostic when an inline job blocks the controller longer than this
    #[serde(default = "default_inline_block_warning_ms")]
    pub inline_block_warning_ms: u64,
}

/// Progress delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Collapse a backlog of progress events into the most recent one
    #[serde(default = "default_coalesce")]
    pub coalesce: bool,
}

/// Logging configuration, consumed by applications installing a subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

// Default implementations

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0, // 0 = auto-detect
            thread_name: default_thread_name(),
        }
    }
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            inline_block_warning_ms: default_inline_block_warning_ms(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { coalesce: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

// Default value functions for serde
fn default_worker_threads() -> usize {
    0 // 0 = auto-detect
}

fn default_thread_name() -> String {
    constants::DEFAULT_THREAD_NAME.to_string()
}

fn default_inline_block_warning_ms() -> u64 {
    50
}

fn default_coalesce() -> bool {
    true
}

fn default_log_filter() -> String {
    constants::DEFAULT_LOG_FILTER.to_string()
}

impl LockingConfig {
    #[must_use]
    pub fn inline_block_warning(&self) -> Duration {
        Duration::from_millis(self.inline_block_warning_ms)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("warden").join(constants::CONFIG_FILE_NAME))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.display().to_string(),
        })?;

        tracing::debug!(path = %path.display(), "loading configuration");
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or has mistyped fields.
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        toml::from_str(contents)
            .map_err(ConfigError::from)
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// If path is provided, loads from that file.
    /// If path is None, uses the default loading behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path),
            None => Self::load(),
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // WARDEN_WORKER_THREADS
        if let Ok(threads) = std::env::var(constants::ENV_WORKER_THREADS) {
            self.scheduler.worker_threads =
                threads.parse().map_err(|_| ConfigError::InvalidValue {
                    field: constants::ENV_WORKER_THREADS.to_string(),
                    value: threads,
                })?;
        }

        // WARDEN_INLINE_BLOCK_WARNING_MS
        if let Ok(ms) = std::env::var(constants::ENV_INLINE_BLOCK_WARNING_MS) {
            self.locking.inline_block_warning_ms =
                ms.parse().map_err(|_| ConfigError::InvalidValue {
                    field: constants::ENV_INLINE_BLOCK_WARNING_MS.to_string(),
                    value: ms,
                })?;
        }

        // WARDEN_PROGRESS_COALESCE
        if let Ok(coalesce) = std::env::var(constants::ENV_PROGRESS_COALESCE) {
            self.progress.coalesce = match coalesce.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: constants::ENV_PROGRESS_COALESCE.to_string(),
                        value: coalesce,
                    }
                    .into())
                }
            };
        }

        // WARDEN_LOG
        if let Ok(filter) = std::env::var(constants::ENV_LOG) {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: constants::ENV_LOG.to_string(),
                    value: filter,
                }
                .into());
            }
            self.logging.filter = filter;
        }

        Ok(())
    }

    /// Number of worker threads to start, resolving the auto-detect value
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        calculate_worker_threads(self.scheduler.worker_threads)
    }
}

/// Calculate worker threads based on CPU count
#[must_use]
pub fn calculate_worker_threads(config_value: usize) -> usize {
    if config_value > 0 {
        config_value // User override
    } else {
        // Compute phases mostly block inside the native library,
        // one thread per CPU keeps them all busy
        num_cpus::get().max(1)
    }
}
