use anyhow::Result;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, runtime, Resource};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Process-wide job counters, mirrors `audio-transcriber::observability::TranscriberMetrics`
/// but scoped to pipeline stages instead of audio chunks.
#[derive(Clone)]
pub struct WorkerMetrics {
	pub jobs_completed: Counter<u64>,
	pub jobs_failed: Counter<u64>,
	pub job_duration_seconds: Histogram<f64>,
	pub split_depth: Histogram<u64>,
}

impl WorkerMetrics {
	pub fn new(meter: &Meter) -> Self {
		Self {
			jobs_completed: meter.u64_counter("transcription_worker.jobs.completed").with_description("Total jobs that reached COMPLETED").init(),
			jobs_failed: meter.u64_counter("transcription_worker.jobs.failed").with_description("Total jobs that reached FAILED").init(),
			job_duration_seconds: meter
				.f64_histogram("transcription_worker.job.duration_seconds")
				.with_description("Wall-clock time from LOG_OPEN to CLEANUP")
				.init(),
			split_depth: meter.u64_histogram("transcription_worker.job.split_depth").with_description("Recursion depth reached by transcribe_recursive").init(),
		}
	}
}

/// Best-effort OTLP initialization: on failure, logging still works and
/// metrics are tracked locally without export, matching
/// `audio-transcriber::init_observability_with_fallback`.
pub async fn init_observability_with_fallback(config: &Config) -> (Option<SdkMeterProvider>, WorkerMetrics) {
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

fn init_observability(service_name: &str, rust_log: &str, log_json: bool) -> Result<(SdkMeterProvider, WorkerMetrics)> {
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
	let tracer = tracer.tracer("transcription-worker");

	let meter_provider = opentelemetry_otlp::new_pipeline()
		.metrics(runtime::Tokio)
		.with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(&otlp_endpoint))
		.with_resource(resource)
		.build()
		.map_err(|e| anyhow::anyhow!("failed to initialize metrics: {e}"))?;
	global::set_meter_provider(meter_provider.clone());

	let meter = global::meter(service_name.to_owned());
	let metrics = WorkerMetrics::new(&meter);

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

fn create_local_metrics(rust_log: &str, log_json: bool) -> WorkerMetrics {
	let env_filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(env_filter);
	if log_json {
		registry.with(tracing_subscriber::fmt::layer().json()).init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}

	let meter = global::meter("transcription-worker-local");
	WorkerMetrics::new(&meter)
}
