//! Configuration management for Ratewarden.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{RatewardenError, Result};
use crate::ratelimit::{LimitConfig, Limiter, LockedRateLimiter, RateLimiter};
use crate::storage::{MemoryStorage, SqliteOptions, SqliteStorage, Storage, DEFAULT_TABLE};

/// Prefix of environment variables overriding file configuration.
///
/// Sections are separated by a double underscore, e.g.
/// `RATEWARDEN__LIMITS__MAX_REQUESTS=20`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for Ratewarden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Storage backend configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rate limit configuration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local table
    Memory,
    /// Named table in a SQLite file
    Sqlite {
        /// Database file path
        path: PathBuf,
        /// Table name
        #[serde(default = "default_table")]
        table: String,
        /// Drop existing rows on open
        #[serde(default)]
        overwrite: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

impl StorageConfig {
    /// Open the configured backend.
    pub async fn open(&self) -> Result<Arc<dyn Storage>> {
        match self {
            StorageConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
            StorageConfig::Sqlite {
                path,
                table,
                overwrite,
            } => {
                let options = SqliteOptions::file(path)
                    .table(table.clone())
                    .overwrite(*overwrite);
                Ok(Arc::new(SqliteStorage::connect(options).await?))
            }
        }
    }
}

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests admitted per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in seconds
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: f64,

    /// Serialize checks per key
    #[serde(default = "default_locking")]
    pub locking: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            time_window_secs: default_time_window_secs(),
            locking: default_locking(),
        }
    }
}

fn default_max_requests() -> u64 {
    10
}

fn default_time_window_secs() -> f64 {
    1.0
}

fn default_locking() -> bool {
    true
}

impl LimitsConfig {
    /// Validate into a [`LimitConfig`].
    pub fn limit_config(&self) -> Result<LimitConfig> {
        LimitConfig::from_secs_f64(self.max_requests, self.time_window_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RatewardenConfig {
    /// Load configuration from a YAML file, with environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RatewardenError::Config(format!(
                "configuration file {} not found",
                path.display()
            )));
        }

        config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RatewardenError::Config(format!("Failed to load configuration: {}", e)))
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Build the configured limiter over `storage`.
    pub fn build_limiter(&self, storage: Arc<dyn Storage>) -> Result<Arc<dyn Limiter>> {
        let limit = self.limits.limit_config()?;
        if self.limits.locking {
            Ok(Arc::new(LockedRateLimiter::with_config(storage, limit)))
        } else {
            Ok(Arc::new(RateLimiter::with_config(storage, limit)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateKey;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = RatewardenConfig::default();
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.limits.max_requests, 10);
        assert_eq!(config.limits.time_window_secs, 1.0);
        assert!(config.limits.locking);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_yaml() {
        let config = RatewardenConfig::from_yaml(
            r#"
storage:
  backend: sqlite
  path: /tmp/limits.db
  overwrite: true
limits:
  max_requests: 3
  time_window_secs: 0.5
  locking: false
"#,
        )
        .unwrap();

        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: PathBuf::from("/tmp/limits.db"),
                table: "storage".to_string(),
                overwrite: true,
            }
        );
        let limit = config.limits.limit_config().unwrap();
        assert_eq!(limit.max_requests, 3);
        assert_eq!(limit.time_window, Duration::from_millis(500));
        assert!(!config.limits.locking);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = RatewardenConfig::from_yaml("{}").unwrap();
        assert_eq!(config.limits, LimitsConfig::default());
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let config = RatewardenConfig::from_yaml("limits:\n  max_requests: 0\n").unwrap();
        assert!(config.limits.limit_config().is_err());
        assert!(config
            .build_limiter(Arc::new(MemoryStorage::new()))
            .is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = RatewardenConfig::from_yaml("storage:\n  backend: redis\n").unwrap_err();
        assert!(matches!(err, RatewardenError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = RatewardenConfig::from_file("/nonexistent/ratewarden.yaml").unwrap_err();
        assert!(matches!(err, RatewardenError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("ratewarden-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "limits:\n  max_requests: 7\n  time_window_secs: 2\n").unwrap();

        let config = RatewardenConfig::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.limits.max_requests, 7);
        assert_eq!(config.limits.time_window_secs, 2.0);
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[tokio::test]
    async fn test_build_limiter_from_config() {
        let config = RatewardenConfig::from_yaml("limits:\n  max_requests: 1\n").unwrap();
        let storage = config.storage.open().await.unwrap();
        let limiter = config.build_limiter(storage).unwrap();

        let key = RateKey::from("key");
        assert!(limiter.check_limit(&key).await.unwrap());
        assert!(!limiter.check_limit(&key).await.unwrap());
    }
}
