use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "BROKER_URL", default_value = "redis://127.0.0.1/", help = "Redis URL backing the job queue and the progress event bus")]
	pub broker_url: String,

	#[arg(long, env = "DATABASE_URL", default_value = "sqlite://job_log.db", help = "SQLite URL backing the job log store")]
	pub database_url: String,

	#[arg(long, env = "SCRATCH_DIR", default_value = "./scratch", help = "Directory used for intermediate media artifacts")]
	pub scratch_dir: PathBuf,

	#[arg(long, env = "VAD_MODEL_CACHE_PATH", help = "Optional path to a cached VAD model; when unset the energy-gated default is used")]
	pub vad_model_cache_path: Option<PathBuf>,

	#[arg(long, env = "MODEL_PROVIDER_ID", default_value = "google", help = "Provider registry id used to build the model adapter for every job")]
	pub provider_id: String,

	#[arg(long, env = "GEMINI_BASE_URL", default_value = "https://generativelanguage.googleapis.com", help = "Base URL for the generative model provider")]
	pub provider_base_url: String,

	#[arg(long, env = "GEMINI_API_KEY", default_value = "", help = "API key for the generative model provider")]
	pub provider_api_key: String,

	#[arg(long, env = "WORKER_CONCURRENCY", default_value = "4", help = "Number of worker tasks draining the job queue concurrently")]
	pub num_workers: usize,

	#[arg(long, env = "RUST_LOG", default_value = "info,transcription_worker=debug", help = "tracing-subscriber EnvFilter directive")]
	pub rust_log: String,

	#[arg(long, env = "LOG_JSON", default_value = "false", help = "Emit structured JSON logs instead of pretty-printed text")]
	pub log_json: bool,

	#[arg(long, env = "SERVICE_NAME", default_value = "transcription-worker", help = "Service name reported to OpenTelemetry")]
	pub service_name: String,

	#[command(flatten)]
	pub queue: job_queue::Config,
}

impl Config {
	pub fn new() -> Self {
		Self::parse()
	}

	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			broker_url: "redis://127.0.0.1/".to_string(),
			database_url: "sqlite::memory:".to_string(),
			scratch_dir: std::env::temp_dir().join("transcription-worker-test"),
			vad_model_cache_path: None,
			provider_id: "mock".to_string(),
			provider_base_url: String::new(),
			provider_api_key: String::new(),
			num_workers: 1,
			rust_log: "debug".to_string(),
			log_json: false,
			service_name: "transcription-worker-test".to_string(),
			queue: job_queue::Config {
				max_retries: 1,
				retry_delay: std::time::Duration::from_millis(10),
				job_timeout: std::time::Duration::from_secs(5),
				poll_timeout: std::time::Duration::from_secs(1),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_from_cli_args() {
		let args = vec!["program", "--broker-url", "redis://example/", "--num-workers", "8"];
		let config = Config::try_parse_from(args).unwrap();
		assert_eq!(config.broker_url, "redis://example/");
		assert_eq!(config.num_workers, 8);
		assert_eq!(config.queue.max_retries, 3);
	}
}
