//! Per-job progress fan-out. The worker publishes [`ProgressEvent`]s onto a
//! single Redis channel; the gateway subscribes per job and forwards them to
//! whatever WebSocket clients are attached to that job.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const TOPIC: &str = "transcription_updates";
const PER_JOB_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),
	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Mirrors the pipeline stage names from `LOG_OPEN` through `CLEANUP`. Used
/// for internal tracing/logging only — never put on the wire, since
/// subscribers outside the Worker only need to know `StageCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	LogOpen,
	Probe,
	AdapterInit,
	PromptPrep,
	TranscribeRecursive,
	Remap,
	Translate,
	Convert,
	Account,
	LogClose,
	Cleanup,
}

/// Coarse, client-facing status a `ProgressEvent` carries. Collapses the
/// eleven internal [`Stage`]s down to the three states a WS subscriber
/// actually needs to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageCode {
	Processing,
	Completed,
	Failed,
}

/// Final transcripts in every format the Converter produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcripts {
	pub lrc: String,
	pub srt: String,
	pub vtt: String,
	pub txt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdownItem {
	pub task_name: String,
	pub content_type: String,
	pub input_tokens: u64,
	pub output_tokens: u64,
	pub cost: f64,
}

/// Terminal payload delivered once a job reaches `COMPLETED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
	pub job_id: Uuid,
	pub transcripts: Transcripts,
	pub tokens_used: u64,
	pub cost: f64,
	pub model: String,
	pub source_language: Option<String>,
	pub processing_time_seconds: f64,
	pub audio_duration_seconds: Option<f64>,
	pub cost_breakdown: Vec<CostBreakdownItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
	pub job_id: Uuid,
	pub client_id: String,
	pub stage_code: StageCode,
	pub stage_text: String,
	pub result: Option<JobResult>,
}

impl ProgressEvent {
	#[must_use]
	pub fn processing(job_id: Uuid, client_id: impl Into<String>, stage_text: impl Into<String>) -> Self {
		Self {
			job_id,
			client_id: client_id.into(),
			stage_code: StageCode::Processing,
			stage_text: stage_text.into(),
			result: None,
		}
	}

	#[must_use]
	pub fn completed(client_id: impl Into<String>, result: JobResult) -> Self {
		Self {
			job_id: result.job_id,
			client_id: client_id.into(),
			stage_code: StageCode::Completed,
			stage_text: "job completed".to_string(),
			result: Some(result),
		}
	}

	#[must_use]
	pub fn failed(job_id: Uuid, client_id: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			job_id,
			client_id: client_id.into(),
			stage_code: StageCode::Failed,
			stage_text: message.into(),
			result: None,
		}
	}
}

#[async_trait]
pub trait EventBus: Send + Sync {
	async fn publish(&self, event: &ProgressEvent) -> Result<(), EventBusError>;
}

/// Broadcasts [`ProgressEvent`]s published on [`TOPIC`] to per-job
/// subscribers. A background task owns the Redis subscription; callers
/// never see raw pub/sub plumbing.
pub struct RedisEventBus {
	publisher: ConnectionManager,
	subscribers: Arc<DashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
	listener: JoinHandle<()>,
}

impl RedisEventBus {
	/// # Errors
	/// Returns [`EventBusError`] if the Redis client cannot be constructed or
	/// the initial connection fails.
	pub async fn connect(redis_url: &str) -> Result<Self, EventBusError> {
		let client = redis::Client::open(redis_url)?;
		let publisher = ConnectionManager::new(client.clone()).await?;
		let subscribers: Arc<DashMap<Uuid, broadcast::Sender<ProgressEvent>>> = Arc::new(DashMap::new());

		let listener = {
			let subscribers = Arc::clone(&subscribers);
			let client = client.clone();
			tokio::spawn(async move {
				if let Err(error) = run_listener(client, subscribers).await {
					tracing::error!(%error, "transcription event listener exited");
				}
			})
		};

		Ok(Self {
			publisher,
			subscribers,
			listener,
		})
	}

	/// Returns a receiver that observes every future [`ProgressEvent`] for
	/// `job_id`. Multiple gateway connections may subscribe to the same job.
	#[must_use]
	pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
		self.subscribers
			.entry(job_id)
			.or_insert_with(|| broadcast::channel(PER_JOB_CHANNEL_CAPACITY).0)
			.subscribe()
	}

	/// Drops the per-job channel once a worker has reported `CLEANUP`, so
	/// long-lived jobs don't accumulate dead entries.
	pub fn forget(&self, job_id: Uuid) {
		self.subscribers.remove(&job_id);
	}
}

impl Drop for RedisEventBus {
	fn drop(&mut self) {
		self.listener.abort();
	}
}

#[async_trait]
impl EventBus for RedisEventBus {
	async fn publish(&self, event: &ProgressEvent) -> Result<(), EventBusError> {
		let payload = serde_json::to_string(event)?;
		let mut conn = self.publisher.clone();
		let _: i64 = conn.publish(TOPIC, payload).await?;
		Ok(())
	}
}

async fn run_listener(client: redis::Client, subscribers: Arc<DashMap<Uuid, broadcast::Sender<ProgressEvent>>>) -> Result<(), EventBusError> {
	let mut pubsub = client.get_async_pubsub().await?;
	pubsub.subscribe(TOPIC).await?;
	let mut stream = pubsub.on_message();

	use futures::StreamExt;
	while let Some(msg) = stream.next().await {
		let payload: String = match msg.get_payload() {
			Ok(p) => p,
			Err(error) => {
				tracing::warn!(%error, "dropping malformed transcription event payload");
				continue;
			}
		};

		let event: ProgressEvent = match serde_json::from_str(&payload) {
			Ok(e) => e,
			Err(error) => {
				tracing::warn!(%error, "dropping undeserializable transcription event");
				continue;
			}
		};

		if let Some(sender) = subscribers.get(&event.job_id) {
			let _ = sender.send(event);
		}
	}

	Ok(())
}

/// In-process [`EventBus`] used by worker/gateway tests that don't stand up
/// Redis.
#[derive(Default)]
pub struct InMemoryEventBus {
	subscribers: DashMap<Uuid, broadcast::Sender<ProgressEvent>>,
}

impl InMemoryEventBus {
	#[must_use]
	pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<ProgressEvent> {
		self.subscribers
			.entry(job_id)
			.or_insert_with(|| broadcast::channel(PER_JOB_CHANNEL_CAPACITY).0)
			.subscribe()
	}
}

#[async_trait]
impl EventBus for InMemoryEventBus {
	async fn publish(&self, event: &ProgressEvent) -> Result<(), EventBusError> {
		if let Some(sender) = self.subscribers.get(&event.job_id) {
			let _ = sender.send(event.clone());
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn in_memory_bus_delivers_to_subscriber() {
		let bus = InMemoryEventBus::default();
		let job_id = Uuid::new_v4();
		let mut rx = bus.subscribe(job_id);

		bus.publish(&ProgressEvent::processing(job_id, "client-1", "probing container")).await.unwrap();

		let received = rx.recv().await.unwrap();
		assert_eq!(received.job_id, job_id);
		assert_eq!(received.stage_code, StageCode::Processing);
	}

	#[tokio::test]
	async fn in_memory_bus_ignores_events_for_other_jobs() {
		let bus = InMemoryEventBus::default();
		let job_id = Uuid::new_v4();
		let other_job_id = Uuid::new_v4();
		let mut rx = bus.subscribe(job_id);

		bus.publish(&ProgressEvent::processing(other_job_id, "client-1", "probing container")).await.unwrap();
		bus.publish(&ProgressEvent::processing(job_id, "client-1", "converting formats")).await.unwrap();

		let received = rx.recv().await.unwrap();
		assert_eq!(received.job_id, job_id);
		assert_eq!(received.stage_text, "converting formats");
	}

	#[tokio::test]
	async fn in_memory_bus_delivers_terminal_result_on_completion() {
		let bus = InMemoryEventBus::default();
		let job_id = Uuid::new_v4();
		let mut rx = bus.subscribe(job_id);

		let result = JobResult {
			job_id,
			transcripts: Transcripts::default(),
			tokens_used: 100,
			cost: 0.01,
			model: "gemini-2.5-flash".to_string(),
			source_language: Some("en".to_string()),
			processing_time_seconds: 1.5,
			audio_duration_seconds: Some(3.0),
			cost_breakdown: vec![],
		};
		bus.publish(&ProgressEvent::completed("client-1", result)).await.unwrap();

		let received = rx.recv().await.unwrap();
		assert_eq!(received.stage_code, StageCode::Completed);
		assert_eq!(received.result.unwrap().tokens_used, 100);
	}

	#[test]
	fn failed_event_carries_no_result() {
		let event = ProgressEvent::failed(Uuid::new_v4(), "client-1", "adapter timed out");
		assert_eq!(event.stage_code, StageCode::Failed);
		assert!(event.result.is_none());
		assert_eq!(event.stage_text, "adapter timed out");
	}
}
