//! Mapping stage
//!
//! A streaming pipeline stage that applies a compiled mapping to every part of
//! a batch. Parts that fail to map are kept and flagged instead of failing the
//! batch, each part is traced in its own span, and the stage keeps counters
//! for batches received, parts sent, batches sent and errors.

pub mod config;
pub mod errors;
pub mod mapping;
pub mod message;
pub mod metrics;
pub mod observability;
pub mod pipeline;

pub use config::{Config, MappingStageConfig, ProcessorConfig};
pub use errors::{StageError, StageResult};
pub use mapping::{CompileError, EvaluationError, Executor, MapOutcome};
pub use message::{Batch, Part};
pub use pipeline::{MappingStage, PipelineRunner, Processor, StageRegistry};
