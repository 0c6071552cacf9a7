//! # Logging, tracing and metrics setup
//!
//! Every binary in the workspace calls [init_opentelemetry] once at startup.

mod fmt;
mod request;

use std::borrow::Cow;
use std::time::Duration;

use error_stack::{Result, ResultExt};
use opentelemetry::metrics::Meter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, InstrumentationScope};
use opentelemetry_otlp::{MetricExporter, SpanExporter};
use opentelemetry_sdk::metrics::{MeterProviderBuilder, PeriodicReader};
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter, Layer};

pub use opentelemetry::metrics::Counter;
pub use opentelemetry::KeyValue;

pub use self::request::{RecordRequest, RequestKind, RequestMetrics};

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const LOG_FORMAT: &str = "RUST_LOG_FORMAT";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct OpenTelemetryInitError;
impl error_stack::Context for OpenTelemetryInitError {}

impl std::fmt::Display for OpenTelemetryInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to initialize telemetry")
    }
}

/// Meter from the global provider. A no-op until export is enabled.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Install the global subscriber.
///
/// Logs go to stdout, filtered by `RUST_LOG` (default `info`). Set
/// `RUST_LOG_FORMAT=json` for one JSON object per line.
/// Spans and metrics are exported over OTLP only when `OTEL_SDK_DISABLED=false`.
///
/// ```rs
/// use rawtx_observability::init_opentelemetry;
///
/// init_opentelemetry(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).unwrap();
/// ```
pub fn init_opentelemetry(
    service_name: impl Into<Cow<'static, str>>,
    service_version: impl Into<Cow<'static, str>>,
) -> Result<(), OpenTelemetryInitError> {
    let export_enabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v == "false")
        .unwrap_or(false);

    let export = if export_enabled {
        Some(export_layer(service_name.into(), service_version.into())?)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(log_layer())
        .with(export)
        .try_init()
        .change_context(OpenTelemetryInitError)
        .attach_printable("a global subscriber is already installed")?;

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// OTLP span and metric export, tagged with the service name and version.
fn export_layer<S>(
    service_name: Cow<'static, str>,
    service_version: Cow<'static, str>,
) -> Result<Box<dyn Layer<S> + Send + Sync>, OpenTelemetryInitError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::new([
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", service_version.to_string()),
    ]);

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .change_context(OpenTelemetryInitError)
        .attach_printable("failed to create span exporter")?;

    let trace_provider = TracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter, opentelemetry_sdk::runtime::Tokio)
        .build();

    let scope = InstrumentationScope::builder(service_name)
        .with_version(service_version)
        .build();
    let tracer = trace_provider.tracer_with_scope(scope);

    let metric_exporter = MetricExporter::builder()
        .with_tonic()
        .build()
        .change_context(OpenTelemetryInitError)
        .attach_printable("failed to create metric exporter")?;

    let reader = PeriodicReader::builder(metric_exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();

    let meter_provider = MeterProviderBuilder::default()
        .with_resource(resource)
        .with_reader(reader)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(tracing_opentelemetry::layer()
        .with_tracer(tracer)
        .and_then(MetricsLayer::new(meter_provider))
        .with_filter(env_filter())
        .boxed())
}

/// Stdout logs: JSON lines for collectors, the compact format otherwise.
fn log_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let json = std::env::var(LOG_FORMAT)
        .map(|format| format == "json")
        .unwrap_or(false);

    if json {
        return tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(env_filter())
            .boxed();
    }

    tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .event_format(fmt::PipelineFormat::default())
        .fmt_fields(fmt::PipelineFormat::default())
        .with_filter(env_filter())
        .boxed()
}
