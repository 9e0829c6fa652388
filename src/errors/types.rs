//! Error type definitions for the mapping stage

use crate::mapping::CompileError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or shutting down a stage
#[derive(Error, Debug)]
pub enum StageError {
    /// The mapping text could not be compiled
    #[error("failed to parse mapping: {0}")]
    Compile(#[from] CompileError),

    /// A stage did not finish closing before its deadline
    #[error("stage '{stage}' did not close within {}", humantime::format_duration(*timeout))]
    ShutdownTimeout { stage: String, timeout: Duration },

    /// No constructor registered under this name
    #[error("unknown processor type '{name}'")]
    UnknownStageType { name: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },
}

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl StageError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn shutdown_timeout<S: Into<String>>(stage: S, timeout: Duration) -> Self {
        Self::ShutdownTimeout {
            stage: stage.into(),
            timeout,
        }
    }
}

impl ConfigError {
    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Load(Box::new(error))
    }
}
