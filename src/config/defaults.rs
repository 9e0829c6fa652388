//! Configuration default values
//!
//! This module contains all the default values for configuration options,
//! making them easily changeable in one central location.

use std::time::Duration;

// Processor defaults
pub const DEFAULT_PROCESSOR_TYPE: &str = "mapping";

// Pipeline defaults
pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Observability defaults
pub const DEFAULT_SERVICE_NAME: &str = "mapping-stage";

// Config file location
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";
pub const ENV_PREFIX: &str = "MAPPING_STAGE_";
