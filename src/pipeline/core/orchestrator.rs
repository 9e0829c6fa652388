//! Pipeline runner
//!
//! Feeds each batch through an ordered chain of processors and coordinates
//! their shutdown under a single deadline.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{StageError, StageResult};
use crate::message::Batch;
use crate::pipeline::core::factory::StageRegistry;
use crate::pipeline::traits::Processor;

#[derive(Default)]
pub struct PipelineRunner {
    processors: Vec<Box<dyn Processor>>,
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured processor, in order
    pub fn from_config(config: &Config, registry: &StageRegistry) -> StageResult<Self> {
        if config.processors.is_empty() {
            return Err(StageError::configuration("no processors configured"));
        }

        let mut runner = Self::new();
        for processor_config in &config.processors {
            runner.add_processor(registry.create(processor_config)?);
        }
        info!(
            "Pipeline built with {} processor(s): {}",
            runner.len(),
            runner.stage_ids().join(" -> ")
        );
        Ok(runner)
    }

    pub fn add_processor(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn stage_ids(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.stage_id()).collect()
    }

    /// Run `batch` through every processor; each yields exactly one batch
    pub fn run_batch(&self, batch: Batch) -> Batch {
        self.processors
            .iter()
            .fold(batch, |current, processor| processor.process_batch(&current))
    }

    /// Ask every processor to close, then wait for each within what is left
    /// of `timeout`. Returns the first timeout encountered.
    pub async fn shutdown(&self, timeout: Duration) -> StageResult<()> {
        for processor in &self.processors {
            processor.close_async();
        }

        let deadline = Instant::now() + timeout;
        let mut first_error = None;
        for processor in &self.processors {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match processor.wait_for_close(remaining).await {
                Ok(()) => debug!("Processor '{}' closed", processor.stage_id()),
                Err(e) => {
                    warn!("Processor '{}' failed to close: {}", processor.stage_id(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessorConfig;

    fn config_with(mappings: &[&str]) -> Config {
        Config {
            processors: mappings.iter().map(|m| ProcessorConfig::mapping(*m)).collect(),
            ..Config::default()
        }
    }

    #[test]
    fn test_chain_runs_in_order() {
        let config = config_with(&[
            "root = this\ncount = this.count + 1",
            "root = this\ncount = this.count * 10",
        ]);
        let runner = PipelineRunner::from_config(&config, &StageRegistry::with_defaults()).unwrap();
        assert_eq!(runner.stage_ids(), vec!["mapping", "mapping"]);

        let output = runner.run_batch(Batch::from_payloads([r#"{"count":1}"#]));
        assert_eq!(output.parts()[0].payload().as_ref(), br#"{"count":20}"#);
    }

    #[test]
    fn test_empty_config_is_rejected() {
        let result =
            PipelineRunner::from_config(&Config::default(), &StageRegistry::with_defaults());
        assert!(matches!(result, Err(StageError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let config = config_with(&["root = this", "root = this"]);
        let runner = PipelineRunner::from_config(&config, &StageRegistry::with_defaults()).unwrap();

        assert!(runner.shutdown(Duration::from_millis(50)).await.is_ok());
        // A second shutdown is harmless
        assert!(runner.shutdown(Duration::from_millis(50)).await.is_ok());
    }
}
