use std::sync::Arc;

use axum::extract::FromRef;
use job_queue::JobQueue;
use job_store::JobLogStore;
use tokio::sync::Semaphore;
use transcription_events::RedisEventBus;
use ws_conn_manager::ConnectionGuard;

use crate::config::Config;
use crate::observability::GatewayMetrics;

/// Everything a handler needs, built once at startup in `main`. Mirrors
/// `apps/servers/file_host`'s single-struct-built-in-one-place `AppState`,
/// minus the sub-context split that app uses for its many unrelated
/// external integrations — this gateway has one job, so one flat struct.
#[derive(Clone)]
pub struct AppState {
	pub config: Arc<Config>,
	pub queue: Arc<JobQueue>,
	pub job_store: Arc<JobLogStore>,
	pub event_bus: Arc<RedisEventBus>,
	pub connection_guard: ConnectionGuard,
	pub http_client: reqwest::Client,
	pub url_check_semaphore: Arc<Semaphore>,
	pub metrics: GatewayMetrics,
}

impl FromRef<AppState> for Arc<Config> {
	fn from_ref(state: &AppState) -> Self {
		state.config.clone()
	}
}

impl FromRef<AppState> for ConnectionGuard {
	fn from_ref(state: &AppState) -> Self {
		state.connection_guard.clone()
	}
}
