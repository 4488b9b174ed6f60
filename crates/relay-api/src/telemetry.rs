//! Tracing subscriber setup with optional OTLP span export.
//!
//! Logs are always written as JSON, filtered by `RUST_LOG` (default `info`).
//! When an OTLP endpoint is configured, spans are also exported over gRPC.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::error::AppError;

const SERVICE_NAME: &str = "relay-api";

/// Holds the tracer provider so pending spans can be flushed on shutdown.
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush and shut down span export.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "failed to shut down tracer provider");
            }
        }
    }
}

fn otel_layer(
    endpoint: &str,
) -> Result<(SdkTracerProvider, OpenTelemetryLayer<Registry, SdkTracer>), AppError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| AppError::Telemetry(format!("failed to build OTLP exporter: {e}")))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build();
    let tracer = provider.tracer(SERVICE_NAME);
    Ok((provider, tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns `AppError::Telemetry` if the exporter cannot be built or a
/// subscriber is already installed.
pub fn init(otlp_endpoint: Option<&str>) -> Result<TelemetryGuard, AppError> {
    let (tracer_provider, layer) = match otlp_endpoint {
        Some(endpoint) => {
            let (provider, layer) = otel_layer(endpoint)?;
            (Some(provider), Some(layer))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| AppError::Telemetry(format!("failed to install subscriber: {e}")))?;

    match otlp_endpoint {
        Some(endpoint) => tracing::info!(endpoint, "OTLP span export enabled"),
        None => tracing::info!("OTLP span export disabled (OTEL_EXPORTER_OTLP_ENDPOINT unset)"),
    }
    Ok(TelemetryGuard { tracer_provider })
}
