use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_LOG_FILTER: &str = "cronlatch=info";
/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CRONLATCH_CONFIG";

/// Top-level config (cronlatch.toml + CRONLATCH_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment, e.g.
/// `CRONLATCH_SCHEDULER__POLL_INTERVAL_SECS=5`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronlatchConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// Create the directory holding the database file if it is missing.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                debug!(dir = %parent.display(), "created database directory");
            }
        }
        Ok(())
    }
}

/// Dispatch behaviour of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due passes when running as a dedicated worker.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// When true (default) a failing job is logged and the pass continues.
    /// When false the first failing job aborts the pass.
    #[serde(default = "bool_true")]
    pub isolate_failures: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            isolate_failures: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronlatch/cronlatch.db", home)
}

impl CronlatchConfig {
    /// Load config from a TOML file with CRONLATCH_* env var overrides.
    ///
    /// The file is `config_path` when given, otherwise
    /// `~/.cronlatch/cronlatch.toml`. A missing file yields the defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronlatchConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONLATCH_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        if config.scheduler.poll_interval_secs == 0 {
            return Err(CoreError::Config(
                "scheduler.poll_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronlatch/cronlatch.toml", home)
}
