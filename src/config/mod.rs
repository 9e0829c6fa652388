use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub mod defaults;
pub mod duration_serde;

use crate::errors::{ConfigError, ConfigResult};
use defaults::*;

/// Settings for a single mapping stage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingStageConfig {
    /// Mapping text compiled once when the stage is built
    #[serde(default)]
    pub mapping: String,
}

impl MappingStageConfig {
    pub fn new(mapping: impl Into<String>) -> Self {
        Self {
            mapping: mapping.into(),
        }
    }
}

/// One entry of the processor chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    /// Registered stage type, looked up in the stage registry
    #[serde(rename = "type", default = "default_processor_type")]
    pub processor_type: String,
    #[serde(flatten)]
    pub mapping_stage: MappingStageConfig,
}

impl ProcessorConfig {
    pub fn mapping(mapping: impl Into<String>) -> Self {
        Self {
            processor_type: default_processor_type(),
            mapping_stage: MappingStageConfig::new(mapping),
        }
    }
}

/// Batching and shutdown behaviour of the runner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Records grouped into one batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Budget shared by all stages when closing
    #[serde(default = "default_shutdown_timeout", with = "duration_serde::duration")]
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP/HTTP collector, e.g. `http://localhost:4318/v1/traces`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_processor_type() -> String {
    DEFAULT_PROCESSOR_TYPE.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    /// Load from [`Config::config_path`] plus environment overrides
    pub fn load() -> ConfigResult<Self> {
        Self::load_from_file(Self::config_path())
    }

    /// `CONFIG_FILE` if set, otherwise `config.toml` in the working directory
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Defaults, then the TOML file if it exists, then `MAPPING_STAGE_*` variables.
    ///
    /// Nested keys use a double underscore, so `MAPPING_STAGE_PIPELINE__BATCH_SIZE=10`
    /// sets `pipeline.batch_size`.
    pub fn load_from_file(config_file: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = config_file.as_ref();
        if path.exists() {
            info!("Loading configuration from {}", path.display());
        } else {
            debug!("Config file {} not found, using defaults", path.display());
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// Parse a TOML document on top of the defaults, without environment overrides
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::string(contents))
            .extract()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::invalid("config", e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.processors.is_empty() {
            return Err(ConfigError::invalid(
                "processors",
                "at least one processor must be configured",
            ));
        }

        for (index, processor) in self.processors.iter().enumerate() {
            if processor.processor_type.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("processors[{index}].type"),
                    "must not be empty",
                ));
            }
            if processor.mapping_stage.mapping.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("processors[{index}].mapping"),
                    "mapping must not be empty",
                ));
            }
        }

        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::invalid(
                "pipeline.batch_size",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert!(config.processors.is_empty());
        assert_eq!(config.pipeline.batch_size, 64);
        assert_eq!(config.pipeline.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.observability.service_name, "mapping-stage");
        assert!(config.observability.otlp_endpoint.is_none());
        assert_eq!(config.pipeline.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert!(config.to_toml().unwrap().contains("shutdown_timeout = \"5s\""));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[processors]]
type = "mapping"
mapping = """
root = this
name = this.name.uppercase()
"""

[pipeline]
batch_size = 10
shutdown_timeout = "250ms"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();

        assert_eq!(config.processors.len(), 1);
        assert_eq!(config.processors[0].processor_type, "mapping");
        assert!(config.processors[0].mapping_stage.mapping.contains("uppercase"));
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_load_resolves_config_file_from_environment() {
        let path = Config::config_path();
        match std::env::var_os(CONFIG_FILE_ENV) {
            Some(configured) => assert_eq!(path, PathBuf::from(configured)),
            None => assert_eq!(path, PathBuf::from("config.toml")),
        }

        let loaded = Config::load().unwrap();
        if !path.exists() {
            assert!(loaded.processors.is_empty());
        }
    }

    #[test]
    fn test_processor_type_defaults_to_mapping() {
        let config = Config::from_toml_str("[[processors]]\nmapping = \"root = this\"").unwrap();
        assert_eq!(config.processors[0], ProcessorConfig::mapping("root = this"));
    }

    #[test]
    fn test_to_toml_round_trips_through_loader() {
        let mut config = Config::default();
        config.processors.push(ProcessorConfig::mapping("root = this"));
        config.pipeline.shutdown_timeout = Duration::from_millis(1500);

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("shutdown_timeout = \"1s 500ms\""));
        assert_eq!(Config::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let result = Config::from_toml_str("[pipeline]\nshutdown_timeout = \"whenever\"");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.processors.push(ProcessorConfig::mapping("   "));
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "processors[0].mapping"),
            other => panic!("Expected invalid mapping, got {other:?}"),
        }

        config.processors[0] = ProcessorConfig::mapping("root = this");
        config.pipeline.batch_size = 0;
        assert!(config.validate().is_err());

        config.pipeline.batch_size = 1;
        assert!(config.validate().is_ok());
    }
}
