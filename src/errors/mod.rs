//! Error handling for the mapping stage
//!
//! Two layers of errors exist:
//!
//! - **Stage errors** ([`StageError`]): construction and lifecycle failures.
//!   A bad mapping stops the stage from being built; a missed shutdown
//!   deadline is reported by `wait_for_close`.
//! - **Configuration errors** ([`ConfigError`]): the config file or
//!   environment could not be loaded, or holds invalid values.
//!
//! Failures while mapping a single part never show up here. They are folded
//! into the outgoing batch as flagged parts.
//!
//! # Usage
//!
//! ```rust
//! use mapping_stage::errors::{StageError, StageResult};
//!
//! fn build() -> StageResult<()> {
//!     Err(StageError::configuration("no processors configured"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using StageError
pub type StageResult<T> = Result<T, StageError>;

/// Convenience type alias for configuration Results
pub type ConfigResult<T> = Result<T, ConfigError>;
