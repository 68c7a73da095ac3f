//! OpenTelemetry export (optional)
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP/HTTP endpoint (e.g., http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name (default: dynpool)
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4318 \
//! OTEL_SERVICE_NAME=dynpool-dev \
//!     ./dynpool
//! ```

use anyhow::Result;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Whether this binary was built with OpenTelemetry export
pub const ENABLED: bool = cfg!(feature = "telemetry");

/// OTLP endpoint from the environment, if any
pub fn endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()
}

/// OpenTelemetry layer, if an endpoint is configured and the feature is on
pub fn otel_layer<S>() -> Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    let Some(endpoint) = endpoint() else {
        return Ok(None);
    };

    #[cfg(feature = "telemetry")]
    {
        otel_layer_impl(endpoint).map(Some)
    }

    #[cfg(not(feature = "telemetry"))]
    {
        let _ = endpoint;
        Ok(None)
    }
}

#[cfg(feature = "telemetry")]
fn otel_layer_impl<S>(endpoint: String) -> Result<BoxedLayer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let service_name = std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "dynpool".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new("service.name", service_name.clone())]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}
