use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "canvas_relay=debug,tower_http=debug,axum=info,warn";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
fn flag(name: &str) -> bool {
    env::var(name)
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false)
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter, `LOG_FORMAT=json` switches to
/// JSON lines and, with the `telemetry` feature, `ENABLE_TELEMETRY=true`
/// adds a Jaeger exporter.
pub fn init_telemetry(service_name: &'static str) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);
    let fmt_layer = if env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };

    let registry = Registry::default().with(env_filter).with(fmt_layer);

    #[cfg(feature = "telemetry")]
    if flag("ENABLE_TELEMETRY") {
        let jaeger_endpoint = env::var("JAEGER_ENDPOINT")
            .unwrap_or_else(|_| "http://jaeger:14268/api/traces".to_string());
        registry.with(jaeger::layer(service_name, &jaeger_endpoint)?).try_init()?;
        tracing::info!(%jaeger_endpoint, "Telemetry initialized");
        return Ok(());
    }

    registry.try_init()?;
    tracing::info!(service_name, "Telemetry disabled");
    Ok(())
}

pub fn shutdown_telemetry() {
    #[cfg(feature = "telemetry")]
    if flag("ENABLE_TELEMETRY") {
        // flush pending spans
        opentelemetry::global::shutdown_tracer_provider();
    }
}

#[cfg(feature = "telemetry")]
mod jaeger {
    use super::BoxError;
    use opentelemetry::sdk::propagation::TraceContextPropagator;
    use opentelemetry::sdk::{
        trace::{self, RandomIdGenerator, Sampler},
        Resource,
    };
    use opentelemetry::{global, KeyValue};

    pub fn layer<S>(
        service_name: &'static str,
        endpoint: &str,
    ) -> Result<tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry::sdk::trace::Tracer>, BoxError>
    where
        S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
    {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let tracer = opentelemetry_jaeger::new_collector_pipeline()
            .with_service_name(service_name)
            .with_endpoint(endpoint)
            .with_isahc()
            .with_trace_config(
                trace::config()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_max_events_per_span(64)
                    .with_max_attributes_per_span(16)
                    .with_resource(Resource::new(vec![
                        KeyValue::new("service.name", service_name),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ])),
            )
            .with_timeout(std::time::Duration::from_secs(2))
            .install_batch(opentelemetry::runtime::Tokio)?;

        Ok(tracing_opentelemetry::layer().with_tracer(tracer))
    }
}
