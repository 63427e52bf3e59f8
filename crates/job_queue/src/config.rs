use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
pub struct Config {
	#[arg(long, env = "JOB_MAX_RETRIES", default_value = "3", help = "Maximum retry attempts before a job is moved to the dead-letter list")]
	pub max_retries: u32,

	#[arg(
        long,
        env = "JOB_RETRY_DELAY_SECS",
        default_value = "30",
        value_parser = parse_duration,
        help = "Delay before a failed job is requeued"
    )]
	pub retry_delay: Duration,

	#[arg(
        long,
        env = "JOB_TIMEOUT_SECS",
        default_value = "3600",
        value_parser = parse_duration,
        help = "Maximum wall-clock time allotted to a single job"
    )]
	pub job_timeout: Duration,

	#[arg(
        long,
        env = "QUEUE_POLL_TIMEOUT_SECS",
        default_value = "5",
        value_parser = parse_duration,
        help = "Blocking-pop timeout used while polling the queue for work"
    )]
	pub poll_timeout: Duration,
}

impl Config {
	pub fn new() -> Self {
		Self::parse()
	}

	pub fn default() -> Self {
		Self {
			max_retries: 3,
			retry_delay: Duration::from_secs(30),
			job_timeout: Duration::from_secs(3600),
			poll_timeout: Duration::from_secs(5),
		}
	}

	#[cfg(test)]
	pub fn test() -> Self {
		Self {
			max_retries: 1,
			retry_delay: Duration::from_millis(10),
			job_timeout: Duration::from_secs(5),
			poll_timeout: Duration::from_secs(1),
		}
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_matches_documented_values() {
		let config = Config::default();
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.retry_delay, Duration::from_secs(30));
		assert_eq!(config.job_timeout, Duration::from_secs(3600));
	}

	#[test]
	fn parses_from_cli_args() {
		let args = vec!["program", "--max-retries", "5", "--retry-delay-secs", "10", "--job-timeout-secs", "600", "--queue-poll-timeout-secs", "2"];
		let config = Config::try_parse_from(args).unwrap();
		assert_eq!(config.max_retries, 5);
		assert_eq!(config.job_timeout, Duration::from_secs(600));
	}
}
