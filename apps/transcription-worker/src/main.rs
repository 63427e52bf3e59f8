mod config;
mod observability;
mod pipeline;
mod prompt;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use job_queue::{JobQueue, PoolMetrics, WorkerPool};
use job_store::JobLogStore;
use model_adapter::ProviderRegistry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use transcription_events::RedisEventBus;
use vad_engine::SileroLikeVad;

use config::Config;
use pipeline::{Pipeline, PipelineHandler, ReqwestUrlFetcher};

const QUEUE_MAX_RETRIES: u32 = 5;
const QUEUE_INITIAL_BACKOFF_MS: u64 = 500;
const SHUTDOWN_GRACE_PERIOD_MS: u64 = 200;

#[tokio::main]
async fn main() -> Result<()> {
	dotenvy::dotenv().ok();

	let config = Config::parse();

	let (_meter_provider, metrics) = observability::init_observability_with_fallback(&config).await;

	info!(service = %config.service_name, provider = %config.provider_id, "starting transcription worker");

	let queue = connect_queue_with_retry(&config).await?;
	let job_store = Arc::new(JobLogStore::connect(&config.database_url).await?);
	let event_bus = Arc::new(RedisEventBus::connect(&config.broker_url).await?);

	let registry = prometheus::Registry::new();
	let pool_metrics = PoolMetrics::register(&registry)?;

	let providers = Arc::new(ProviderRegistry::with_defaults(config.provider_base_url.clone(), config.provider_api_key.clone()));
	let vad = Arc::new(SileroLikeVad::default());

	let pipeline = Pipeline::new(
		job_store,
		event_bus,
		vad,
		providers,
		Arc::new(ReqwestUrlFetcher::new()),
		config.scratch_dir.clone(),
		config.provider_id.clone(),
	);
	let handler = Arc::new(PipelineHandler::new(pipeline));

	let cancellation_token = CancellationToken::new();
	let pool = WorkerPool::new(queue, config.queue.clone(), pool_metrics);

	let worker = Worker {
		pool,
		handler,
		num_workers: config.num_workers,
		cancellation_token: cancellation_token.clone(),
	};

	run_with_shutdown(worker, cancellation_token).await;
	let _ = metrics;
	Ok(())
}

struct Worker {
	pool: WorkerPool,
	handler: Arc<PipelineHandler>,
	num_workers: usize,
	cancellation_token: CancellationToken,
}

impl Worker {
	async fn run(self) {
		self.pool.run(self.num_workers, self.handler, self.cancellation_token).await;
	}
}

async fn run_with_shutdown(worker: Worker, cancellation_token: CancellationToken) {
	tokio::select! {
		() = worker.run() => {
			error!("worker pool exited unexpectedly");
		}
		() = wait_for_shutdown_signal() => {
			info!("shutdown signal received (SIGTERM/SIGINT)");
			cancellation_token.cancel();
			tokio::time::sleep(std::time::Duration::from_millis(SHUTDOWN_GRACE_PERIOD_MS)).await;
			info!("exiting process");
			std::process::exit(0);
		}
	}
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

async fn connect_queue_with_retry(config: &Config) -> Result<JobQueue> {
	for attempt in 1..=QUEUE_MAX_RETRIES {
		match JobQueue::connect(&config.broker_url) {
			Ok(queue) => {
				info!(url = %config.broker_url, "connected to job queue");
				return Ok(queue);
			}
			Err(e) => {
				if attempt == QUEUE_MAX_RETRIES {
					error!(error = %e, url = %config.broker_url, "failed to connect to job queue after {} attempts", QUEUE_MAX_RETRIES);
					return Err(e.into());
				}

				let backoff = QUEUE_INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
				warn!(attempt, max_retries = QUEUE_MAX_RETRIES, backoff_ms = backoff, error = %e, "job queue connection failed, retrying");
				tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
			}
		}
	}

	unreachable!()
}
