//! Logging and span export for the fleetbridge process.
//!
//! Call [`init_tracing`] once at startup, before the tokio runtime is built,
//! and hold the returned guard until exit.
//!
//! # Environment variables
//!
//! Environment values win over the `[telemetry]` config section.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `FLEETBRIDGE_LOG_FORMAT=json` | Newline-delimited JSON logs. Any other value selects compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL; enables span export. |
//!
//! ```rust,no_run
//! use fleetbridge_runtime::telemetry::{init_tracing, TelemetrySettings};
//!
//! let _guard = init_tracing("fleetbridge", &TelemetrySettings::default());
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FORMAT_VAR: &str = "FLEETBRIDGE_LOG_FORMAT";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Configured telemetry defaults, before environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub json: bool,
    pub otlp_endpoint: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber.
///
/// With an OTLP endpoint configured, spans are also exported to the collector
/// through `tracing-opentelemetry`. Without one, only the console formatter is
/// installed.
pub fn init_tracing(service_name: &str, settings: &TelemetrySettings) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = resolve_json(std::env::var(LOG_FORMAT_VAR).ok().as_deref(), settings.json);
    let endpoint = resolve_endpoint(
        std::env::var(OTLP_ENDPOINT_VAR).ok(),
        settings.otlp_endpoint.as_deref(),
    );

    let provider = endpoint.and_then(|e| build_provider(service_name, e));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("fleetbridge")));

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);
    if use_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[fleetbridge] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn resolve_json(env_value: Option<&str>, configured: bool) -> bool {
    match env_value {
        Some(v) => v.eq_ignore_ascii_case("json"),
        None => configured,
    }
}

/// Environment first, then config. Blank values count as unset.
fn resolve_endpoint(env_value: Option<String>, configured: Option<&str>) -> Option<String> {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| configured.filter(|v| !v.trim().is_empty()).map(str::to_owned))
}

/// Build a provider for `endpoint`. Exporter errors are printed to stderr and
/// yield `None`; logging still works without export.
fn build_provider(service_name: &str, endpoint: String) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[fleetbridge] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Simple exporter: no tokio runtime exists yet when this runs.
            .with_simple_exporter(exporter)
            .build(),
    )
}
