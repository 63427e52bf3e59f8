use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::{Client, Commands, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::JobQueueError;

const PENDING_KEY: &str = "job_queue:pending";
const DEAD_LETTER_KEY: &str = "job_queue:dead_letter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MediaSource {
	Upload { path: PathBuf },
	RemoteUrl { url: String },
}

/// Everything the Worker needs to process one job, supplied at admission
/// time by the Intake API. `job_id` is caller-supplied (the client's
/// `file_uid`) rather than generated here, so the Intake API's response and
/// every downstream status/event lookup key on the same id the client chose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
	pub job_id: Uuid,
	pub client_id: String,
	pub source: MediaSource,
	pub original_filename: String,
	pub model: String,
	pub provider: String,
	#[serde(default)]
	pub api_keys: HashMap<String, String>,
	pub source_lang: Option<String>,
	pub target_language: Option<String>,
	pub prompt: Option<String>,
	pub reference_text: Option<String>,
	pub speech_intervals: Option<Vec<(f64, f64)>>,
	pub enqueued_at: DateTime<Utc>,
	#[serde(default)]
	pub attempt: u32,
}

impl JobDescriptor {
	#[must_use]
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		job_id: Uuid,
		client_id: impl Into<String>,
		source: MediaSource,
		original_filename: impl Into<String>,
		model: impl Into<String>,
		provider: impl Into<String>,
		api_keys: HashMap<String, String>,
		source_lang: Option<String>,
		target_language: Option<String>,
		prompt: Option<String>,
		reference_text: Option<String>,
		speech_intervals: Option<Vec<(f64, f64)>>,
	) -> Self {
		Self {
			job_id,
			client_id: client_id.into(),
			source,
			original_filename: original_filename.into(),
			model: model.into(),
			provider: provider.into(),
			api_keys,
			source_lang,
			target_language,
			prompt,
			reference_text,
			speech_intervals,
			enqueued_at: Utc::now(),
			attempt: 0,
		}
	}
}

/// Durable FIFO job queue backed by a single Redis list. Workers block on
/// `BLPOP`; failed jobs that exhaust their retry budget are pushed onto a
/// separate dead-letter list rather than dropped.
#[derive(Clone)]
pub struct JobQueue {
	conn: Arc<Mutex<Connection>>,
}

impl JobQueue {
	/// # Errors
	/// Returns [`JobQueueError`] if the Redis connection cannot be established.
	pub fn connect(redis_url: &str) -> Result<Self, JobQueueError> {
		let client = Client::open(redis_url)?;
		let conn = client.get_connection()?;
		Ok(Self { conn: Arc::new(Mutex::new(conn)) })
	}

	/// # Errors
	/// Returns [`JobQueueError`] on Redis or serialization failure.
	pub async fn enqueue(&self, job: &JobDescriptor) -> Result<(), JobQueueError> {
		let serialized = serde_json::to_string(job)?;
		let mut conn = self.conn.lock().await;
		conn.rpush(PENDING_KEY, serialized)?;
		Ok(())
	}

	/// Blocks up to `timeout` waiting for a job to become available.
	///
	/// # Errors
	/// Returns [`JobQueueError`] on Redis or deserialization failure.
	pub async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<JobDescriptor>, JobQueueError> {
		let mut conn = self.conn.lock().await;
		let result: Option<(String, String)> = conn.blpop(PENDING_KEY, timeout.as_secs_f64())?;
		drop(conn);
		Ok(result.map(|(_, serialized)| serde_json::from_str(&serialized)).transpose()?)
	}

	/// # Errors
	/// Returns [`JobQueueError`] on Redis failure.
	pub async fn len(&self) -> Result<usize, JobQueueError> {
		let mut conn = self.conn.lock().await;
		Ok(conn.llen(PENDING_KEY)?)
	}

	/// Pushes a job that exhausted its retry budget onto the dead-letter
	/// list, alongside the error that finally killed it.
	///
	/// # Errors
	/// Returns [`JobQueueError`] on Redis or serialization failure.
	pub async fn dead_letter(&self, job: &JobDescriptor, error: &str) -> Result<(), JobQueueError> {
		let entry = DeadLetterEntry {
			job: job.clone(),
			error: error.to_string(),
			failed_at: Utc::now(),
		};
		let serialized = serde_json::to_string(&entry)?;
		let mut conn = self.conn.lock().await;
		conn.rpush(DEAD_LETTER_KEY, serialized)?;
		Ok(())
	}

	/// # Errors
	/// Returns [`JobQueueError`] on Redis failure.
	pub async fn dead_letter_len(&self) -> Result<usize, JobQueueError> {
		let mut conn = self.conn.lock().await;
		Ok(conn.llen(DEAD_LETTER_KEY)?)
	}
}

/// A bounded media byte sequence owned by the Worker for the lifetime of one
/// job. `cleanup` is explicit rather than `Drop`-based (matching
/// `ws-conn-manager::ConnectionPermit::release`) because deleting it is
/// fallible I/O that callers must be able to await and observe.
#[derive(Debug, Clone)]
pub struct MediaArtifact {
	pub path: PathBuf,
	pub sample_rate: u32,
	pub duration_secs: f64,
	pub container: String,
}

impl MediaArtifact {
	#[must_use]
	pub fn new(path: PathBuf, sample_rate: u32, duration_secs: f64, container: impl Into<String>) -> Self {
		Self {
			path,
			sample_rate,
			duration_secs,
			container: container.into(),
		}
	}

	/// Deletes the on-disk file backing this artifact, if it still exists.
	///
	/// # Errors
	/// Returns [`JobQueueError`] if the file exists but could not be removed.
	pub async fn cleanup(&self) -> Result<(), JobQueueError> {
		match tokio::fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(JobQueueError::HandlerFailed(format!("failed to remove scratch file {}: {e}", self.path.display()))),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeadLetterEntry {
	job: JobDescriptor,
	error: String,
	failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn clear(conn: &mut Connection) {
		let _: () = redis::cmd("FLUSHDB").query(conn).unwrap();
	}

	#[tokio::test]
	async fn enqueue_then_dequeue_round_trips() {
		let queue = JobQueue::connect("redis://127.0.0.1/").unwrap();
		{
			let mut conn = queue.conn.lock().await;
			clear(&mut conn);
		}

		let job = JobDescriptor::new(
			Uuid::new_v4(),
			"client-1",
			MediaSource::Upload { path: PathBuf::from("/tmp/clip.mp3") },
			"clip.mp3",
			"gemini-2.5-flash",
			"mock",
			HashMap::new(),
			None,
			None,
			None,
			None,
			None,
		);
		let job_id = job.job_id;
		queue.enqueue(&job).await.unwrap();

		let dequeued = queue.dequeue_blocking(Duration::from_secs(1)).await.unwrap().unwrap();
		assert_eq!(dequeued.job_id, job_id);
	}

	#[tokio::test]
	async fn dequeue_times_out_on_empty_queue() {
		let queue = JobQueue::connect("redis://127.0.0.1/").unwrap();
		{
			let mut conn = queue.conn.lock().await;
			clear(&mut conn);
		}

		let dequeued = queue.dequeue_blocking(Duration::from_millis(500)).await.unwrap();
		assert!(dequeued.is_none());
	}

	#[tokio::test]
	async fn dead_letter_records_failed_jobs() {
		let queue = JobQueue::connect("redis://127.0.0.1/").unwrap();
		{
			let mut conn = queue.conn.lock().await;
			clear(&mut conn);
		}

		let job = JobDescriptor::new(
			Uuid::new_v4(),
			"client-1",
			MediaSource::RemoteUrl { url: "https://example.com/a.mp4".into() },
			"a.mp4",
			"gemini-2.5-flash",
			"mock",
			HashMap::new(),
			None,
			None,
			None,
			None,
			None,
		);
		queue.dead_letter(&job, "adapter unreachable").await.unwrap();
		assert_eq!(queue.dead_letter_len().await.unwrap(), 1);
	}
}
