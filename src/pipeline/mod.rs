//! Pipeline infrastructure
//!
//! - **Core**: stage registration and the runner that chains processors
//! - **Engines**: per-part execution with tracing and error classification
//! - **Stages**: processor implementations

pub mod core;
pub mod engines;
pub mod stages;
pub mod traits;

// Re-export key types for easier access
pub use core::{PipelineRunner, ProcessorConstructor, StageRegistry};
pub use engines::{PartExecutor, PartOutcome};
pub use stages::MappingStage;
pub use traits::Processor;

/// Stage names for consistent naming across the system
pub mod stage_names {
    pub const MAPPING: &str = "mapping";
}
