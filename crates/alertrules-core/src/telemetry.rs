use std::fmt as StdFmt;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracerProvider};
use serde_json::json;
use thiserror::Error;
use tracing::Subscriber;
use tracing_opentelemetry::{OpenTelemetrySpanExt, OtelData};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{self, FmtContext};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{AppConfig, TelemetryConfig};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Keeps the tracer provider alive; pending spans are flushed when dropped.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("failed to flush traces: {err}");
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
}

/// Install the global subscriber. `RUST_LOG` drives filtering, `dev`
/// environments get pretty stderr output and everything else gets one JSON
/// object per line. Spans are exported over OTLP/HTTP when configured.
///
/// Only the first call installs anything; later calls return an inert guard.
pub fn init_telemetry(
    app: &AppConfig,
    telemetry: &TelemetryConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    if INSTALLED.get().is_some() {
        return Ok(TelemetryGuard { provider: None });
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;

    let provider = build_provider(app, telemetry)?;
    let tracer = provider
        .as_ref()
        .map(|provider| provider.tracer(app.service_name.clone()));

    // The OpenTelemetry layer is typed by the stack beneath it, so each
    // branch builds its own.
    let result = if app.env.eq_ignore_ascii_case("dev") {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .pretty()
            .with_writer(std::io::stderr);
        let otel_layer = tracer
            .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(env_filter),
        )
    } else {
        let fmt_layer = fmt::layer().event_format(JsonLineFormatter);
        let otel_layer = tracer
            .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(env_filter),
        )
    };
    result.map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;
    let _ = INSTALLED.set(());

    Ok(TelemetryGuard { provider })
}

fn build_provider(
    app: &AppConfig,
    telemetry: &TelemetryConfig,
) -> Result<Option<SdkTracerProvider>, TelemetryError> {
    let endpoint = match telemetry.otlp_endpoint.as_deref() {
        Some(endpoint) if telemetry.export_traces && !endpoint.is_empty() => endpoint,
        _ => return Ok(None),
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_timeout(Duration::from_secs(3))
        .with_endpoint(endpoint)
        .build()
        .map_err(|err| TelemetryError::ExporterBuild(err.to_string()))?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", app.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", app.env.clone()),
        ])
        .build();
    let provider = SdkTracerProvider::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    Ok(Some(provider))
}

struct JsonLineFormatter;

impl<S, N> FormatEvent<S, N> for JsonLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> StdFmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let current = ctx.lookup_current();
        let trace_id = current
            .as_ref()
            .and_then(|span| {
                span.extensions()
                    .get::<OtelData>()
                    .and_then(|data| data.trace_id())
            })
            .or_else(|| {
                let span_ctx = tracing::Span::current().context().span().span_context().clone();
                span_ctx.is_valid().then(|| span_ctx.trace_id())
            })
            .map(|id| id.to_string());

        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": event.metadata().level().as_str().to_lowercase(),
            "target": event.metadata().target(),
            "span": current.map(|span| span.name()),
            "trace_id": trace_id,
            "fields": visitor.fields,
        });

        let serialized = serde_json::to_string(&payload).map_err(|_| StdFmt::Error)?;
        writer.write_str(&serialized)?;
        writer.write_str("\n")
    }
}

/// Field names whose values are never written to logs.
const REDACTED_FIELDS: &[&str] = &["token", "password", "routing_key", "authorization"];

#[derive(Default)]
struct FieldCollector {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &tracing::field::Field, value: serde_json::Value) {
        let name = field.name();
        let value = if REDACTED_FIELDS.contains(&name) {
            "[redacted]".into()
        } else {
            value
        };
        self.fields.insert(name.to_string(), value);
    }
}

impl tracing_subscriber::field::Visit for FieldCollector {
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn StdFmt::Debug) {
        self.insert(field, format!("{value:?}").into());
    }
}
