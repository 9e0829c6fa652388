//! Mapping stage
//!
//! Holds one compiled mapping for its whole lifetime and applies it to every
//! part of each incoming batch, in order. A part that fails to map is kept
//! unchanged and flagged; a part mapped to `deleted()` is dropped; every call
//! yields exactly one outgoing batch.

use std::time::Duration;

use opentelemetry::global::BoxedTracer;
use opentelemetry::metrics::Meter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::MappingStageConfig;
use crate::errors::StageResult;
use crate::mapping::Executor;
use crate::message::Batch;
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::observability::stage_tracer;
use crate::pipeline::engines::{PartExecutor, PartOutcome};
use crate::pipeline::stage_names;
use crate::pipeline::traits::Processor;

pub struct MappingStage {
    executor: Executor,
    tracer: BoxedTracer,
    metrics: StageMetrics,
    shutdown: CancellationToken,
}

impl MappingStage {
    pub fn new(config: &MappingStageConfig) -> StageResult<Self> {
        let executor = Executor::compile(&config.mapping)?;
        info!(
            statements = executor.statements().len(),
            "Mapping stage created"
        );

        Ok(Self {
            executor,
            tracer: stage_tracer(),
            metrics: StageMetrics::new(stage_names::MAPPING),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn from_mapping(mapping: &str) -> StageResult<Self> {
        Self::new(&MappingStageConfig::new(mapping))
    }

    /// Use a specific tracer instead of the global one
    pub fn with_tracer(mut self, tracer: BoxedTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Register counters on `meter` instead of the global meter
    pub fn with_meter(mut self, meter: &Meter) -> Self {
        self.metrics = StageMetrics::with_meter(meter, stage_names::MAPPING);
        self
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[async_trait::async_trait]
impl Processor for MappingStage {
    fn stage_id(&self) -> &'static str {
        stage_names::MAPPING
    }

    fn process_batch(&self, batch: &Batch) -> Batch {
        self.metrics.record_batch_received();

        let part_executor = PartExecutor::new(
            &self.executor,
            &self.tracer,
            &self.metrics,
            stage_names::MAPPING,
        );

        let mut output = Batch::with_capacity(batch.len());
        let mut deleted = 0usize;
        let mut failed = 0usize;

        for (index, part) in batch.iter().enumerate() {
            match part_executor.execute(index, part, batch) {
                PartOutcome::Replaced(mapped) => output.push(mapped),
                PartOutcome::Failed { part, .. } => {
                    failed += 1;
                    output.push(part);
                }
                PartOutcome::Deleted => deleted += 1,
            }
        }

        self.metrics.record_batch_sent(output.len());
        trace!(
            received = batch.len(),
            sent = output.len(),
            deleted,
            failed,
            "Processed batch"
        );

        output
    }

    fn close_async(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Closing mapping stage");
        }
        self.shutdown.cancel();
    }

    /// Nothing runs in the background, so there is never anything to wait for.
    async fn wait_for_close(&self, _timeout: Duration) -> StageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageError;
    use crate::mapping::CompileError;
    use crate::message::Part;
    use serde_json::{Value, json};
    use tracing_test::traced_test;

    const OBSESSION_FILTER: &str = "root = if this.obsession > 0.5 { this } else { deleted() }";

    fn payloads(batch: &Batch) -> Vec<Value> {
        batch
            .iter()
            .map(|p| serde_json::from_slice(p.payload()).unwrap())
            .collect()
    }

    #[test]
    fn test_keeps_only_obsessed_fans() {
        let stage = MappingStage::from_mapping(OBSESSION_FILTER).unwrap();
        let input = Batch::from_payloads([
            r#"{"obsession":0.57}"#,
            r#"{"obsession":0.21}"#,
            r#"{"obsession":0.89}"#,
            r#"{"obsession":0.43}"#,
        ]);

        let output = stage.process_batch(&input);

        assert_eq!(
            payloads(&output),
            vec![json!({"obsession": 0.57}), json!({"obsession": 0.89})]
        );
        assert!(output.iter().all(|p| !p.has_failed()));
        assert_eq!(
            stage.metrics(),
            MetricsSnapshot {
                batches_received: 1,
                errors: 0,
                parts_sent: 2,
                batches_sent: 1,
            }
        );
    }

    #[test]
    #[traced_test]
    fn test_malformed_number_flags_only_that_part() {
        let stage = MappingStage::from_mapping("root.price = this.price.number() * 2").unwrap();
        let input = Batch::from_payloads([
            r#"{"price":"1.5"}"#,
            r#"{"price":"one fifty"}"#,
            r#"{"price":"4"}"#,
        ]);

        let output = stage.process_batch(&input);

        assert_eq!(output.len(), 3);
        assert_eq!(output.parts()[0].payload().as_ref(), br#"{"price":3}"#);
        assert!(!output.parts()[0].has_failed());

        let failed = &output.parts()[1];
        assert_eq!(failed.payload().as_ref(), br#"{"price":"one fifty"}"#);
        assert_eq!(failed.error(), Some("failed to parse 'one fifty' as a number"));

        assert_eq!(output.parts()[2].payload().as_ref(), br#"{"price":8}"#);
        assert_eq!(stage.metrics().errors, 1);
        assert_eq!(stage.metrics().parts_sent, 3);

        assert!(logs_contain("Failed to map part"));
        assert!(logs_contain("part_index=1"));
    }

    #[test]
    fn test_empty_string_is_not_deletion() {
        let stage =
            MappingStage::from_mapping("root = if this.keep { \"\" } else { deleted() }").unwrap();
        let input = Batch::from_payloads([r#"{"keep":true}"#, r#"{"keep":false}"#]);

        let output = stage.process_batch(&input);

        assert_eq!(output.len(), 1);
        assert!(output.parts()[0].payload().is_empty());
        assert!(!output.parts()[0].has_failed());
    }

    #[test]
    fn test_input_batch_untouched_and_pure_mapping_repeatable() {
        let stage = MappingStage::from_mapping(
            "root = this\nname = this.name.uppercase()\nmeta seen = \"yes\"",
        )
        .unwrap();
        let input = Batch::from_parts(vec![
            Part::new(r#"{"name":"ada"}"#).with_metadata("origin", "test"),
            Part::new(r#"{"name":"grace"}"#),
        ]);
        let snapshot = input.clone();

        let first = stage.process_batch(&input);
        let second = stage.process_batch(&input);

        assert_eq!(input, snapshot);
        assert_eq!(first, second);
        assert_eq!(first.parts()[0].get_metadata("origin"), Some("test"));
        assert_eq!(first.parts()[0].get_metadata("seen"), Some("yes"));
        assert_eq!(payloads(&first)[1], json!({"name": "GRACE"}));
    }

    #[test]
    fn test_empty_batch_still_emits_a_batch() {
        let stage = MappingStage::from_mapping("root = this").unwrap();

        let output = stage.process_batch(&Batch::new());

        assert!(output.is_empty());
        assert_eq!(stage.metrics().batches_sent, 1);
        assert_eq!(stage.metrics().parts_sent, 0);
    }

    #[test]
    fn test_invalid_mapping_fails_construction() {
        match MappingStage::from_mapping("root = this.") {
            Err(StageError::Compile(CompileError { line, .. })) => assert_eq!(line, 1),
            Err(other) => panic!("Expected compile error, got {other}"),
            Ok(_) => panic!("Expected compile error"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_immediate() {
        let stage = MappingStage::from_mapping("root = this").unwrap();
        assert!(!stage.is_closing());

        stage.close_async();
        stage.close_async();

        assert!(stage.is_closing());
        assert!(stage.wait_for_close(Duration::from_millis(10)).await.is_ok());
        assert!(stage.wait_for_close(Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_without_close_succeeds_immediately() {
        let stage = MappingStage::from_mapping("root = this").unwrap();

        let started = std::time::Instant::now();
        let result = stage.wait_for_close(Duration::from_secs(30)).await;

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!stage.is_closing());
        assert!(stage.wait_for_close(Duration::ZERO).await.is_ok());
    }

    #[test]
    fn test_processing_continues_after_close() {
        let stage = MappingStage::from_mapping("root = this").unwrap();
        stage.close_async();
        tokio_test::block_on(async {
            stage.wait_for_close(Duration::from_secs(1)).await.unwrap();
        });

        let output = stage.process_batch(&Batch::from_payloads(["{}"]));
        assert_eq!(output.len(), 1);
    }
}
