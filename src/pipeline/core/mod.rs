pub mod factory;
pub mod orchestrator;

pub use factory::{ProcessorConstructor, StageRegistry};
pub use orchestrator::PipelineRunner;
