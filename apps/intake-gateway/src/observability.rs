use anyhow::Result;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, runtime, Resource};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Process-wide request counters, the gateway-side sibling of
/// `transcription-worker::observability::WorkerMetrics`.
#[derive(Clone)]
pub struct GatewayMetrics {
	pub submissions_accepted: Counter<u64>,
	pub submissions_rejected: Counter<u64>,
	pub ws_sessions_opened: Counter<u64>,
}

impl GatewayMetrics {
	pub fn new(meter: &Meter) -> Self {
		Self {
			submissions_accepted: meter.u64_counter("intake_gateway.submissions.accepted").with_description("Jobs accepted via /submit or /submit_url").init(),
			submissions_rejected: meter.u64_counter("intake_gateway.submissions.rejected").with_description("Submissions rejected at intake").init(),
			ws_sessions_opened: meter.u64_counter("intake_gateway.ws.sessions_opened").with_description("Gateway WebSocket sessions opened").init(),
		}
	}
}

/// Best-effort OTLP initialization: on failure, logging still works and
/// metrics are tracked locally without export, matching
/// `transcription-worker::observability::init_observability_with_fallback`.
pub async fn init_observability_with_fallback(config: &Config) -> (Option<SdkMeterProvider>, GatewayMetrics) {
	match init_observability(&config.service_name, &config.rust_log, config.log_json) {
		Ok((provider, metrics)) => {
			info!("observability initialized with OTLP export");
			(Some(provider), metrics)
		}
		Err(error) => {
			warn!(%error, "OTLP observability failed to initialize, falling back to local metrics only");
			(None, create_local_metrics(&config.rust_log, config.log_json))
		}
	}
}

fn init_observability(service_name: &str, rust_log: &str, log_json: bool) -> Result<(SdkMeterProvider, GatewayMetrics)> {
	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| "http://localhost:4317".to_string());

	let resource = Resource::new(vec![
		KeyValue::new("service.name", service_name.to_string()),
		KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
	]);

	let tracer = opentelemetry_otlp::new_pipeline()
		.tracing()
		.with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(&otlp_endpoint))
		.with_trace_config(opentelemetry_sdk::trace::Config::default().with_resource(resource.clone()))
		.install_batch(runtime::Tokio)
		.map_err(|e| anyhow::anyhow!("failed to initialize tracer: {e}"))?;
	let tracer = tracer.tracer("intake-gateway");

	let meter_provider = opentelemetry_otlp::new_pipeline()
		.metrics(runtime::Tokio)
		.with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(&otlp_endpoint))
		.with_resource(resource)
		.build()
		.map_err(|e| anyhow::anyhow!("failed to initialize metrics: {e}"))?;
	global::set_meter_provider(meter_provider.clone());

	let meter = global::meter(service_name.to_owned());
	let metrics = GatewayMetrics::new(&meter);

	let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
	let env_filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

	let registry = tracing_subscriber::registry().with(env_filter).with(telemetry_layer);
	if log_json {
		registry.with(tracing_subscriber::fmt::layer().json()).init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}

	Ok((meter_provider, metrics))
}

fn create_local_metrics(rust_log: &str, log_json: bool) -> GatewayMetrics {
	let env_filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(env_filter);
	if log_json {
		registry.with(tracing_subscriber::fmt::layer().json()).init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}

	let meter = global::meter("intake-gateway-local");
	GatewayMetrics::new(&meter)
}
