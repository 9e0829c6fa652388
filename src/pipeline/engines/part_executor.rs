//! Per-part execution
//!
//! Runs the mapping for one part inside its own span and turns the engine's
//! answer into a [`PartOutcome`]. Failures are recovered here: the original
//! part is kept, flagged, counted, logged and recorded on the span.

use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::{Span, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use tracing::error;

use crate::mapping::{Executor, MapOutcome};
use crate::message::{Batch, Part};
use crate::metrics::StageMetrics;

/// Terminal state of one part
#[derive(Debug, Clone, PartialEq)]
pub enum PartOutcome {
    /// Mapped part to carry forward
    Replaced(Part),
    /// Dropped from the batch on purpose
    Deleted,
    /// Unmodified copy of the input, flagged with `reason`
    Failed { reason: String, part: Part },
}

impl PartOutcome {
    /// Part to place in the outgoing batch, if any
    pub fn into_part(self) -> Option<Part> {
        match self {
            PartOutcome::Replaced(part) | PartOutcome::Failed { part, .. } => Some(part),
            PartOutcome::Deleted => None,
        }
    }
}

pub struct PartExecutor<'a> {
    executor: &'a Executor,
    tracer: &'a BoxedTracer,
    metrics: &'a StageMetrics,
    stage_name: &'static str,
}

impl<'a> PartExecutor<'a> {
    pub fn new(
        executor: &'a Executor,
        tracer: &'a BoxedTracer,
        metrics: &'a StageMetrics,
        stage_name: &'static str,
    ) -> Self {
        Self {
            executor,
            tracer,
            metrics,
            stage_name,
        }
    }

    /// Map the part at `index` of `batch`. The span is ended on every path.
    pub fn execute(&self, index: usize, part: &Part, batch: &Batch) -> PartOutcome {
        let parent_cx = match part.span_context() {
            Some(parent) if parent.is_valid() => {
                Context::new().with_remote_span_context(parent.clone())
            }
            _ => Context::new(),
        };
        let mut span = self.tracer.start_with_context(self.stage_name, &parent_cx);
        span.set_attribute(KeyValue::new("part_index", index as i64));

        let outcome = match self.executor.map_part(index, batch) {
            MapOutcome::Replaced(mapped) => PartOutcome::Replaced(mapped),
            MapOutcome::Deleted => PartOutcome::Deleted,
            MapOutcome::Failed(e) => {
                let reason = e.to_string();

                let mut preserved = part.clone();
                preserved.flag_error(reason.clone());
                self.metrics.record_error();
                error!(
                    stage = self.stage_name,
                    part_index = index,
                    error = %reason,
                    "Failed to map part"
                );

                span.set_attribute(KeyValue::new("error", true));
                span.add_event(
                    "error",
                    vec![
                        KeyValue::new("event", "error"),
                        KeyValue::new("type", reason.clone()),
                    ],
                );
                span.set_status(Status::error(reason.clone()));

                PartOutcome::Failed {
                    reason,
                    part: preserved,
                }
            }
        };

        span.end();
        outcome
    }
}
