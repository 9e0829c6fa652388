//! Pipeline stage implementations

pub mod mapping;

pub use mapping::MappingStage;
