use anyhow::Result;
use opentelemetry::global;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Tracer and meter providers for the process
pub struct Observability {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Observability {
    /// Build providers and install them globally.
    ///
    /// Spans are exported over OTLP/HTTP when an endpoint is configured or
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` is set; otherwise they stay in-process.
    pub fn init(config: &ObservabilityConfig) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .build();

        let endpoint = config
            .otlp_endpoint
            .clone()
            .or_else(|| std::env::var(OTLP_ENDPOINT_ENV).ok());

        let mut tracer_builder = SdkTracerProvider::builder().with_resource(resource.clone());
        if let Some(endpoint) = endpoint.as_deref() {
            let exporter = SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint)
                .build()?;
            tracer_builder = tracer_builder.with_batch_exporter(exporter);
            info!("OpenTelemetry configured: OTLP tracing to {}", endpoint);
        } else {
            info!("OpenTelemetry configured: local tracing only (OTLP endpoint not configured)");
        }
        let tracer_provider = tracer_builder.build();
        global::set_tracer_provider(tracer_provider.clone());

        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
        global::set_meter_provider(meter_provider.clone());

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }

    /// Flush pending spans and metrics, then stop both providers
    pub fn shutdown(self) -> Result<()> {
        self.tracer_provider.force_flush()?;
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        info!("OpenTelemetry providers shut down");
        Ok(())
    }
}

/// Tracer used by stages when none is injected
pub fn stage_tracer() -> global::BoxedTracer {
    global::tracer(crate::metrics::METER_NAME)
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
///
/// Logs go to stderr so stdout stays free for records.
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}
