//! `cronlatch-core`: configuration and shared error types for the cronlatch
//! workspace.

pub mod config;
pub mod error;

pub use config::{
    CronlatchConfig, DatabaseConfig, LoggingConfig, SchedulerConfig, CONFIG_PATH_ENV,
};
pub use error::{CoreError, Result};
