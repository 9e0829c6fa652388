//! Integration tests for the pipeline assembly layer
//!
//! Covers building processors from configuration, chaining them through the
//! runner, span lineage across a batch, and bounded shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState, TracerProvider};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use serde_json::{Value, json};

use mapping_stage::{
    Batch, Config, MappingStage, Part, PipelineRunner, Processor, StageError, StageRegistry,
    StageResult,
};

/// Processor that never finishes closing
struct StuckProcessor {
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl Processor for StuckProcessor {
    fn stage_id(&self) -> &'static str {
        "stuck"
    }

    fn process_batch(&self, batch: &Batch) -> Batch {
        batch.clone()
    }

    fn close_async(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn wait_for_close(&self, timeout: Duration) -> StageResult<()> {
        tokio::time::sleep(timeout).await;
        Err(StageError::shutdown_timeout(self.stage_id(), timeout))
    }
}

fn json_payloads(batch: &Batch) -> Vec<Value> {
    batch
        .iter()
        .map(|p| serde_json::from_slice(p.payload()).unwrap())
        .collect()
}

#[test]
fn config_file_to_running_pipeline() {
    let config = Config::from_toml_str(
        r#"
[[processors]]
mapping = """
root = this
tags = this.tags.map_each(this.lowercase())
meta user = this.user
"""

[[processors]]
type = "mapping"
mapping = "root = if this.tags.length() > 0 { this } else { deleted() }"
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let runner = PipelineRunner::from_config(&config, &StageRegistry::with_defaults()).unwrap();
    let output = runner.run_batch(Batch::from_payloads([
        r#"{"user":"ada","tags":["Rust","OTEL"]}"#,
        r#"{"user":"bob","tags":[]}"#,
        r#"{"user":"cy","tags":"oops"}"#,
    ]));

    assert_eq!(output.len(), 2);
    assert_eq!(
        json_payloads(&output)[0],
        json!({"user": "ada", "tags": ["rust", "otel"]})
    );
    assert_eq!(output.parts()[0].get_metadata("user"), Some("ada"));

    // map_each on a string fails in the first stage; the second stage then
    // sees the flagged original and maps it on its own terms
    let flagged = &output.parts()[1];
    assert!(flagged.has_failed());
    assert_eq!(json_payloads(&output)[1], json!({"user": "cy", "tags": "oops"}));
}

#[test]
fn spans_follow_upstream_lineage() {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let stage = MappingStage::from_mapping("root = this.n.number()")
        .unwrap()
        .with_tracer(BoxedTracer::new(Box::new(provider.tracer("integration"))));

    let upstream = SpanContext::new(
        TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap(),
        SpanId::from_hex("b7ad6b7169203331").unwrap(),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    let input = Batch::from_parts(vec![
        Part::new(r#"{"n":"1"}"#).with_span_context(upstream.clone()),
        Part::new(r#"{"n":"x"}"#).with_span_context(upstream.clone()),
        Part::new(r#"{"n":"3"}"#),
    ]);

    let output = stage.process_batch(&input);
    assert_eq!(output.len(), 3);
    // Outgoing parts keep the lineage they arrived with
    assert_eq!(output.parts()[0].span_context(), Some(&upstream));
    assert_eq!(output.parts()[2].span_context(), None);

    let spans = exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 3);
    assert!(spans.iter().all(|s| s.name == "mapping"));
    assert_eq!(spans[0].parent_span_id, upstream.span_id());
    assert_eq!(spans[1].parent_span_id, upstream.span_id());
    assert_eq!(spans[2].parent_span_id, SpanId::INVALID);

    let errored: Vec<bool> = spans
        .iter()
        .map(|s| s.attributes.iter().any(|kv| kv.key.as_str() == "error"))
        .collect();
    assert_eq!(errored, vec![false, true, false]);
}

#[tokio::test]
async fn shutdown_reports_stuck_processor() {
    let mut runner = PipelineRunner::new();
    runner.add_processor(Box::new(MappingStage::from_mapping("root = this").unwrap()));
    let stuck = Arc::new(StuckProcessor {
        closed: AtomicBool::new(false),
    });
    runner.add_processor(Box::new(StuckProcessorHandle(stuck.clone())));

    let result = runner.shutdown(Duration::from_millis(30)).await;

    assert!(stuck.closed.load(Ordering::SeqCst));
    match result {
        Err(StageError::ShutdownTimeout { stage, .. }) => assert_eq!(stage, "stuck"),
        other => panic!("Expected shutdown timeout, got {other:?}"),
    }
}

/// Shares a `StuckProcessor` with the test body
struct StuckProcessorHandle(Arc<StuckProcessor>);

#[async_trait::async_trait]
impl Processor for StuckProcessorHandle {
    fn stage_id(&self) -> &'static str {
        self.0.stage_id()
    }

    fn process_batch(&self, batch: &Batch) -> Batch {
        self.0.process_batch(batch)
    }

    fn close_async(&self) {
        self.0.close_async();
    }

    async fn wait_for_close(&self, timeout: Duration) -> StageResult<()> {
        self.0.wait_for_close(timeout).await
    }
}

#[tokio::test]
async fn concurrent_batches_share_one_stage() {
    let stage = Arc::new(
        MappingStage::from_mapping("root = if this.i < 10 { this } else { deleted() }").unwrap(),
    );

    let mut handles = Vec::new();
    for worker in 0..4 {
        let stage = stage.clone();
        handles.push(tokio::spawn(async move {
            let batch =
                Batch::from_payloads((0..25).map(|i| format!(r#"{{"w":{worker},"i":{i}}}"#)));
            stage.process_batch(&batch).len()
        }));
    }

    let mut sent = 0u64;
    for handle in handles {
        let emitted = handle.await.unwrap();
        assert_eq!(emitted, 10);
        sent += emitted as u64;
    }

    let metrics = stage.metrics();
    assert_eq!(metrics.batches_received, 4);
    assert_eq!(metrics.batches_sent, 4);
    assert_eq!(metrics.parts_sent, sent);
}
