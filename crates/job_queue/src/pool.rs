//! Generic N-workers-draining-one-queue pool. The pool knows nothing about
//! transcription; it dequeues a [`JobDescriptor`], hands it to a
//! [`JobHandler`], and requeues or dead-letters on failure.

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::{Counter, Registry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::JobQueueError;
use crate::queue::{JobDescriptor, JobQueue};

/// Implemented by the application that actually knows how to execute a job
/// (the transcription pipeline). The pool only needs a single entry point;
/// everything pipeline-shaped lives outside this crate.
#[async_trait]
pub trait JobHandler: Send + Sync {
	async fn handle(&self, job: JobDescriptor) -> Result<(), String>;
}

#[derive(Clone)]
pub struct PoolMetrics {
	pub active_workers: Counter,
	pub tasks_processed: Counter,
	pub task_errors: Counter,
}

impl PoolMetrics {
	/// # Errors
	/// Returns [`JobQueueError`] if a metric with the same name is already
	/// registered on `registry`.
	pub fn register(registry: &Registry) -> Result<Self, JobQueueError> {
		let active_workers = Counter::new("job_pool_active_workers", "Number of active worker tasks").map_err(JobQueueError::from)?;
		let tasks_processed = Counter::new("job_pool_tasks_processed", "Total jobs processed to a terminal state").map_err(JobQueueError::from)?;
		let task_errors = Counter::new("job_pool_task_errors", "Total jobs that returned a handler error").map_err(JobQueueError::from)?;

		registry.register(Box::new(active_workers.clone())).map_err(JobQueueError::from)?;
		registry.register(Box::new(tasks_processed.clone())).map_err(JobQueueError::from)?;
		registry.register(Box::new(task_errors.clone())).map_err(JobQueueError::from)?;

		Ok(Self {
			active_workers,
			tasks_processed,
			task_errors,
		})
	}
}

pub struct WorkerPool {
	queue: Arc<JobQueue>,
	config: Config,
	metrics: PoolMetrics,
}

impl WorkerPool {
	#[must_use]
	pub fn new(queue: JobQueue, config: Config, metrics: PoolMetrics) -> Self {
		Self { queue: Arc::new(queue), config, metrics }
	}

	/// Spawns `num_workers` tasks, each blocking on the queue in a loop until
	/// `shutdown` is cancelled. Each task's job, on a handler error, is
	/// requeued up to `Config::max_retries` times before being moved to the
	/// dead-letter list.
	pub async fn run<H: JobHandler + 'static>(&self, num_workers: usize, handler: Arc<H>, shutdown: CancellationToken) {
		let mut workers = Vec::with_capacity(num_workers);

		for worker_id in 0..num_workers {
			let queue = Arc::clone(&self.queue);
			let handler = Arc::clone(&handler);
			let config = self.config.clone();
			let metrics = self.metrics.clone();
			let shutdown = shutdown.clone();

			metrics.active_workers.inc();
			workers.push(tokio::spawn(async move {
				worker_loop(worker_id, queue, handler, config, metrics, shutdown).await;
			}));
		}

		for worker in workers {
			let _ = worker.await;
		}
	}
}

async fn worker_loop<H: JobHandler>(worker_id: usize, queue: Arc<JobQueue>, handler: Arc<H>, config: Config, metrics: PoolMetrics, shutdown: CancellationToken) {
	loop {
		let job = tokio::select! {
			() = shutdown.cancelled() => {
				info!(worker_id, "worker stopping on shutdown signal");
				break;
			}
			dequeued = queue.dequeue_blocking(config.poll_timeout) => {
				match dequeued {
					Ok(Some(job)) => job,
					Ok(None) => continue,
					Err(e) => {
						error!(worker_id, error = %e, "failed to dequeue job, backing off");
						tokio::time::sleep(config.retry_delay).await;
						continue;
					}
				}
			}
		};

		run_with_retries(worker_id, &queue, &handler, &config, &metrics, job).await;
	}

	metrics.active_workers.dec();
}

async fn run_with_retries<H: JobHandler>(worker_id: usize, queue: &JobQueue, handler: &Arc<H>, config: &Config, metrics: &PoolMetrics, mut job: JobDescriptor) {
	loop {
		let job_id = job.job_id;
		match handler.handle(job.clone()).await {
			Ok(()) => {
				metrics.tasks_processed.inc();
				return;
			}
			Err(message) => {
				metrics.task_errors.inc();
				if job.attempt >= config.max_retries {
					error!(worker_id, %job_id, attempts = job.attempt + 1, error = %message, "job exhausted retries, moving to dead letter");
					if let Err(e) = queue.dead_letter(&job, &message).await {
						error!(worker_id, %job_id, error = %e, "failed to record dead-lettered job");
					}
					return;
				}

				job.attempt += 1;
				warn!(worker_id, %job_id, attempt = job.attempt, error = %message, "job failed, retrying after delay");
				tokio::time::sleep(config.retry_delay).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::queue::MediaSource;
	use std::collections::HashMap;
	use std::path::PathBuf;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use uuid::Uuid;

	struct CountingHandler {
		calls: AtomicUsize,
		fail_first: usize,
	}

	#[async_trait]
	impl JobHandler for CountingHandler {
		async fn handle(&self, _job: JobDescriptor) -> Result<(), String> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			if call < self.fail_first {
				Err("simulated transient failure".to_string())
			} else {
				Ok(())
			}
		}
	}

	fn sample_job() -> JobDescriptor {
		JobDescriptor::new(
			Uuid::new_v4(),
			"client-1",
			MediaSource::Upload { path: PathBuf::from("/tmp/a.wav") },
			"a.wav",
			"gemini-2.5-flash",
			"mock",
			HashMap::new(),
			None,
			None,
			None,
			None,
			None,
		)
	}

	#[tokio::test]
	async fn run_with_retries_succeeds_after_transient_failures() {
		let queue = JobQueue::connect("redis://127.0.0.1/").unwrap();
		let registry = Registry::new();
		let metrics = PoolMetrics::register(&registry).unwrap();
		let config = Config::test();
		let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first: 1 });

		run_with_retries(0, &queue, &handler, &config, &metrics, sample_job()).await;
		assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn run_with_retries_dead_letters_after_exhausting_budget() {
		let queue = JobQueue::connect("redis://127.0.0.1/").unwrap();
		let before = queue.dead_letter_len().await.unwrap();

		let registry = Registry::new();
		let metrics = PoolMetrics::register(&registry).unwrap();
		let config = Config::test();
		let handler = Arc::new(CountingHandler {
			calls: AtomicUsize::new(0),
			fail_first: usize::MAX,
		});

		run_with_retries(0, &queue, &handler, &config, &metrics, sample_job()).await;
		assert_eq!(queue.dead_letter_len().await.unwrap(), before + 1);
	}
}
