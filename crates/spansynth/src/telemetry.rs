use std::io::IsTerminal;
use std::sync::{Mutex, OnceLock};

use anyhow::Context as _;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{self as sdktrace, InMemorySpanExporter, SpanData};
use spansynth_core::config::Config;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// The tracer synthesized spans go through, and the in-memory copy of
/// everything it exported.
pub struct Telemetry {
    tracer: sdktrace::Tracer,
    preview: InMemorySpanExporter,
}

impl Telemetry {
    pub fn tracer(&self) -> &sdktrace::Tracer {
        &self.tracer
    }

    /// Flushes pending spans and returns every span ended so far.
    pub fn collect(&self) -> Vec<SpanData> {
        if let Some(provider) = provider_slot().lock().ok().and_then(|slot| slot.clone()) {
            let _ = provider.force_flush();
        }
        self.preview.get_finished_spans().unwrap_or_default()
    }
}

/// Installs the stderr log layer and the OpenTelemetry layer that makes the
/// CLI's own `tracing` spans available as ambient parents.
pub fn init_tracing(cfg: &Config) -> anyhow::Result<Telemetry> {
    let preview = InMemorySpanExporter::default();
    let mut builder = sdktrace::SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(cfg.service_name.clone())
                .build(),
        )
        .with_simple_exporter(preview.clone());
    if let Some(exporter) = build_otlp_exporter(cfg)? {
        builder = builder.with_batch_exporter(exporter);
    }
    let provider = builder.build();
    let tracer = provider.tracer("spansynth");

    if let Ok(mut slot) = provider_slot().lock() {
        *slot = Some(provider);
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .with_filter(EnvFilter::from_default_env());
    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer.clone())
        .with_filter(LevelFilter::INFO);

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .try_init();

    Ok(Telemetry { tracer, preview })
}

pub fn shutdown_tracing() {
    if let Some(provider) = provider_slot()
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
    {
        let _ = provider.shutdown();
    }
}

fn build_otlp_exporter(cfg: &Config) -> anyhow::Result<Option<opentelemetry_otlp::SpanExporter>> {
    let Some(endpoint) = cfg.otlp_endpoint.as_deref() else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(cfg.export_timeout)
        .with_metadata(build_grpc_metadata(&cfg.otlp_headers))
        .build()
        .with_context(|| format!("build otlp exporter for {endpoint}"))?;
    Ok(Some(exporter))
}

fn build_grpc_metadata(headers: &[(String, String)]) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (k, v) in headers {
        let key = MetadataKey::<Ascii>::from_bytes(k.as_bytes());
        let value = MetadataValue::try_from(v.as_str());
        match (key, value) {
            (Ok(key), Ok(value)) => {
                metadata.insert(key, value);
            }
            _ => {
                tracing::warn!(header = %k, "ignored invalid otlp header");
            }
        }
    }
    metadata
}

fn provider_slot() -> &'static Mutex<Option<sdktrace::SdkTracerProvider>> {
    static SLOT: OnceLock<Mutex<Option<sdktrace::SdkTracerProvider>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}
