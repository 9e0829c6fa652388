//! Stage registry
//!
//! Maps a processor type name from configuration to the function that builds
//! it. The runner only ever sees `Box<dyn Processor>`.

use std::collections::HashMap;

use tracing::debug;

use crate::config::ProcessorConfig;
use crate::errors::{StageError, StageResult};
use crate::pipeline::stage_names;
use crate::pipeline::stages::MappingStage;
use crate::pipeline::traits::Processor;

/// Builds a processor from its configuration entry
pub type ProcessorConstructor = fn(&ProcessorConfig) -> StageResult<Box<dyn Processor>>;

#[derive(Clone, Default)]
pub struct StageRegistry {
    constructors: HashMap<&'static str, ProcessorConstructor>,
}

impl StageRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in stage type
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(stage_names::MAPPING, build_mapping_stage);
        registry
    }

    /// Register `constructor` under `name`, returning any constructor it replaces
    pub fn register(
        &mut self,
        name: &'static str,
        constructor: ProcessorConstructor,
    ) -> Option<ProcessorConstructor> {
        debug!("Registering processor type '{}'", name);
        self.constructors.insert(name, constructor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn create(&self, config: &ProcessorConfig) -> StageResult<Box<dyn Processor>> {
        let constructor = self
            .constructors
            .get(config.processor_type.as_str())
            .ok_or_else(|| StageError::UnknownStageType {
                name: config.processor_type.clone(),
            })?;
        constructor(config)
    }

    /// Registered names, sorted
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

fn build_mapping_stage(config: &ProcessorConfig) -> StageResult<Box<dyn Processor>> {
    Ok(Box::new(MappingStage::new(&config.mapping_stage)?))
}
