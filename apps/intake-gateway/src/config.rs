use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "intake-gateway", about = "HTTP/WS intake for transcription jobs")]
pub struct Config {
	#[arg(long, env = "BROKER_URL", default_value = "redis://127.0.0.1:6379")]
	pub broker_url: String,

	#[arg(long, env = "DATABASE_URL", default_value = "sqlite://./transcription.db")]
	pub database_url: String,

	#[arg(long, env = "UPLOAD_DIR", default_value = "./uploads")]
	pub upload_dir: PathBuf,

	#[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3100")]
	pub bind_addr: String,

	#[arg(long, env = "DEFAULT_MODEL", default_value = "gemini-2.5-flash")]
	pub default_model: String,

	#[arg(long, env = "MAX_REQUEST_MB", default_value_t = 500)]
	pub max_request_mb: u64,

	#[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value_t = 256)]
	pub max_concurrent_requests: usize,

	#[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
	pub request_timeout_ms: u64,

	#[arg(long, env = "URL_CHECK_CONCURRENCY", default_value_t = 8)]
	pub url_check_concurrency: usize,

	#[arg(long, env = "RUST_LOG", default_value = "info")]
	pub rust_log: String,

	#[arg(long, env = "LOG_JSON", default_value_t = false)]
	pub log_json: bool,

	#[arg(long, env = "SERVICE_NAME", default_value = "intake-gateway")]
	pub service_name: String,
}

impl Config {
	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			broker_url: "redis://127.0.0.1:6379".to_string(),
			database_url: "sqlite::memory:".to_string(),
			upload_dir: std::env::temp_dir(),
			bind_addr: "127.0.0.1:0".to_string(),
			default_model: "gemini-2.5-flash".to_string(),
			max_request_mb: 500,
			max_concurrent_requests: 256,
			request_timeout_ms: 30_000,
			url_check_concurrency: 8,
			rust_log: "info".to_string(),
			log_json: false,
			service_name: "intake-gateway-test".to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_from_cli_args() {
		let config = Config::parse_from([
			"intake-gateway",
			"--broker-url",
			"redis://example:6379",
			"--database-url",
			"sqlite://test.db",
			"--default-model",
			"gemini-2.5-pro",
		]);

		assert_eq!(config.broker_url, "redis://example:6379");
		assert_eq!(config.database_url, "sqlite://test.db");
		assert_eq!(config.default_model, "gemini-2.5-pro");
		assert_eq!(config.max_concurrent_requests, 256);
	}
}
