mod config;
mod error;
mod handlers;
mod mime;
mod observability;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::error_handling::HandleErrorLayer;
use axum::middleware::from_fn_with_state;
use axum::Router;
use clap::Parser;
use job_queue::JobQueue;
use job_store::JobLogStore;
use some_services::rate_limiter::token_bucket::rate_limit_middleware;
use some_services::rate_limiter::TokenBucketRateLimiter;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::{limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use transcription_events::RedisEventBus;

use config::Config;
use error::handle_tower_error;
use routes::status::status_routes;
use routes::submit::submit_routes;
use routes::submit_url::submit_url_routes;
use routes::ws::ws_routes;
use state::AppState;

const QUEUE_MAX_RETRIES: u32 = 5;
const QUEUE_INITIAL_BACKOFF_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
	dotenvy::dotenv().ok();

	let config = Config::parse();
	let (_meter_provider, metrics) = observability::init_observability_with_fallback(&config).await;

	info!(service = %config.service_name, bind_addr = %config.bind_addr, "starting intake gateway");

	let queue = connect_queue_with_retry(&config).await?;
	let job_store = Arc::new(JobLogStore::connect(&config.database_url).await?);
	let event_bus = Arc::new(RedisEventBus::connect(&config.broker_url).await?);

	tokio::fs::create_dir_all(&config.upload_dir).await?;

	let max_requests = u32::try_from(config.max_concurrent_requests)?;
	let config = Arc::new(config);

	let state = AppState {
		config: config.clone(),
		queue: Arc::new(queue),
		job_store: job_store.clone(),
		event_bus,
		connection_guard: ws_conn_manager::ConnectionGuard::new(),
		http_client: reqwest::Client::new(),
		url_check_semaphore: Arc::new(Semaphore::new(config.url_check_concurrency)),
		metrics,
	};

	let mut app = Router::new().merge(submit_routes()).merge(submit_url_routes()).merge(status_routes()).merge(ws_routes());

	app = app.layer(from_fn_with_state(Arc::new(TokenBucketRateLimiter::new(max_requests)), rate_limit_middleware));

	let app = app.with_state(state).layer(
		ServiceBuilder::new()
			.layer(TraceLayer::new_for_http())
			.layer(HandleErrorLayer::new(|error: tower::BoxError| async move { handle_tower_error(error).await }))
			.layer(RequestBodyLimitLayer::new(config.max_request_mb as usize * 1024 * 1024))
			.layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
			.layer(TimeoutLayer::new(Duration::from_millis(config.request_timeout_ms)))
			.layer(LoadShedLayer::new()),
	);

	let listener = TcpListener::bind(&config.bind_addr).await?;
	info!(addr = %listener.local_addr()?, "listening");

	let shutdown_token = CancellationToken::new();
	let signal_token = shutdown_token.clone();
	tokio::spawn(async move {
		wait_for_shutdown_signal().await;
		info!("shutdown signal received (SIGTERM/SIGINT)");
		signal_token.cancel();
	});

	let server_token = shutdown_token.clone();
	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(async move {
			server_token.cancelled().await;
		})
		.await?;

	info!("server stopped, starting cleanup");
	let cleanup = async {
		job_store.close().await;
		info!("database pool closed");
	};

	match tokio::time::timeout(Duration::from_secs(5), cleanup).await {
		Ok(()) => info!("graceful shutdown complete"),
		Err(_) => error!("shutdown timeout, forcing exit"),
	}

	Ok(())
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
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
				tokio::time::sleep(Duration::from_millis(backoff)).await;
			}
		}
	}

	unreachable!()
}
