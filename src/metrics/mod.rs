//! Stage metrics
//!
//! Each stage owns a [`StageMetrics`]: OpenTelemetry counters for export plus
//! atomic mirrors so the same numbers can be read back in-process.

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the meter used when no meter is supplied
pub const METER_NAME: &str = "mapping-stage";

/// Point-in-time copy of a stage's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub errors: u64,
    pub parts_sent: u64,
    pub batches_sent: u64,
}

#[derive(Debug, Default)]
struct Totals {
    batches_received: AtomicU64,
    errors: AtomicU64,
    parts_sent: AtomicU64,
    batches_sent: AtomicU64,
}

/// Counters for one stage instance.
///
/// Cloning shares the underlying totals.
#[derive(Clone)]
pub struct StageMetrics {
    attributes: [KeyValue; 1],
    batches_received: Counter<u64>,
    errors: Counter<u64>,
    parts_sent: Counter<u64>,
    batches_sent: Counter<u64>,
    totals: Arc<Totals>,
}

impl std::fmt::Debug for StageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMetrics")
            .field("stage", &self.attributes[0].value)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl StageMetrics {
    /// Instruments on the global meter provider
    pub fn new(stage: &str) -> Self {
        Self::with_meter(&global::meter(METER_NAME), stage)
    }

    pub fn with_meter(meter: &Meter, stage: &str) -> Self {
        Self {
            attributes: [KeyValue::new("stage", stage.to_string())],
            batches_received: meter
                .u64_counter("processor_batches_received_total")
                .with_description("Batches received by the processor")
                .build(),
            errors: meter
                .u64_counter("processor_errors_total")
                .with_description("Parts that failed to map and were flagged")
                .build(),
            parts_sent: meter
                .u64_counter("processor_parts_sent_total")
                .with_description("Parts emitted in outgoing batches")
                .build(),
            batches_sent: meter
                .u64_counter("processor_batches_sent_total")
                .with_description("Batches emitted by the processor")
                .build(),
            totals: Arc::new(Totals::default()),
        }
    }

    pub fn record_batch_received(&self) {
        self.totals.batches_received.fetch_add(1, Ordering::Relaxed);
        self.batches_received.add(1, &self.attributes);
    }

    pub fn record_error(&self) {
        self.totals.errors.fetch_add(1, Ordering::Relaxed);
        self.errors.add(1, &self.attributes);
    }

    /// One outgoing batch carrying `parts` parts
    pub fn record_batch_sent(&self, parts: usize) {
        let parts = parts as u64;
        self.totals.parts_sent.fetch_add(parts, Ordering::Relaxed);
        self.totals.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.parts_sent.add(parts, &self.attributes);
        self.batches_sent.add(1, &self.attributes);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_received: self.totals.batches_received.load(Ordering::Relaxed),
            errors: self.totals.errors.load(Ordering::Relaxed),
            parts_sent: self.totals.parts_sent.load(Ordering::Relaxed),
            batches_sent: self.totals.batches_sent.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    #[test]
    fn test_snapshot_tracks_counts() {
        let metrics = StageMetrics::new("mapping");
        metrics.record_batch_received();
        metrics.record_error();
        metrics.record_batch_sent(3);
        metrics.record_batch_received();
        metrics.record_batch_sent(0);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                batches_received: 2,
                errors: 1,
                parts_sent: 3,
                batches_sent: 2,
            }
        );
    }

    #[test]
    fn test_clones_share_totals() {
        let metrics = StageMetrics::new("mapping");
        let clone = metrics.clone();
        clone.record_error();
        assert_eq!(metrics.snapshot().errors, 1);
    }

    #[test]
    fn test_counters_are_exported_with_stage_attribute() {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        let metrics = StageMetrics::with_meter(&provider.meter("test"), "mapping");

        metrics.record_batch_received();
        metrics.record_batch_sent(4);
        provider.force_flush().unwrap();

        let exported = exporter.get_finished_metrics().unwrap();
        let parts_sent = exported
            .iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .find(|m| m.name() == "processor_parts_sent_total")
            .expect("parts sent counter exported");

        match parts_sent.data() {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                let point = sum.data_points().next().expect("one data point");
                assert_eq!(point.value(), 4);
                assert!(
                    point
                        .attributes()
                        .any(|kv| kv.key.as_str() == "stage" && kv.value.as_str() == "mapping")
                );
            }
            _ => panic!("Expected parts sent to be a u64 sum"),
        }
    }
}
