//! Cache configuration
//!
//! Limits are resolved from built-in defaults, then an optional JSON file,
//! then environment variables (highest precedence).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default per-item limit: 20 MB, the largest content loaded for diffing
pub const DEFAULT_PER_ITEM_LIMIT: u64 = 20 * 1024 * 1024;

/// Default total ceiling: 256 MB
pub const DEFAULT_TOTAL_CEILING: u64 = 256 * 1024 * 1024;

/// Environment variable overriding the per-item limit
pub const ENV_MAX_ITEM_BYTES: &str = "REVCACHE_MAX_ITEM_BYTES";

/// Environment variable overriding the total ceiling
pub const ENV_MAX_TOTAL_BYTES: &str = "REVCACHE_MAX_TOTAL_BYTES";

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Size limits supplied to the cache at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Largest single content accepted into (or served through) the cache
    pub per_item_limit_bytes: u64,
    /// Upper bound on the sum of all cached content sizes
    pub total_ceiling_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            per_item_limit_bytes: DEFAULT_PER_ITEM_LIMIT,
            total_ceiling_bytes: DEFAULT_TOTAL_CEILING,
        }
    }
}

impl CacheConfig {
    pub fn new(per_item_limit_bytes: u64, total_ceiling_bytes: u64) -> Self {
        Self {
            per_item_limit_bytes,
            total_ceiling_bytes,
        }
    }

    /// Default location of the config file, `<config dir>/revcache/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("revcache").join("config.json"))
    }

    /// Resolve the effective configuration
    ///
    /// An explicit `path` must exist. Without one, the default path is used
    /// only if the file is present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Loaded cache config file");
        Ok(config)
    }

    /// Overlay values from the environment
    ///
    /// `lookup` abstracts `std::env::var` so tests do not mutate process state.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_ITEM_BYTES) {
            self.per_item_limit_bytes = parse_bytes(ENV_MAX_ITEM_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_TOTAL_BYTES) {
            self.total_ceiling_bytes = parse_bytes(ENV_MAX_TOTAL_BYTES, &value)?;
        }
        Ok(())
    }

    /// Reject limits the cache cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_item_limit_bytes == 0 || self.total_ceiling_bytes == 0 {
            return Err(ConfigError::Invalid("limits must be non-zero".to_string()));
        }
        if self.per_item_limit_bytes > self.total_ceiling_bytes {
            return Err(ConfigError::Invalid(format!(
                "per-item limit {} exceeds total ceiling {}",
                self.per_item_limit_bytes, self.total_ceiling_bytes
            )));
        }
        Ok(())
    }
}

fn parse_bytes(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::Env {
        name,
        value: value.to_string(),
    })
}
