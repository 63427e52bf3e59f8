//! Durable job log: two write operations (insert at `LOG_OPEN`, field-wise
//! update at `LOG_CLOSE`) against a SQLite-backed table.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),
	#[error("no job log row found for job_id {0}")]
	NotFound(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
	Queued,
	Processing,
	Completed,
	Failed,
}

impl JobStatus {
	const fn as_str(self) -> &'static str {
		match self {
			Self::Queued => "QUEUED",
			Self::Processing => "PROCESSING",
			Self::Completed => "COMPLETED",
			Self::Failed => "FAILED",
		}
	}

	fn from_str(s: &str) -> Self {
		match s {
			"PROCESSING" => Self::Processing,
			"COMPLETED" => Self::Completed,
			"FAILED" => Self::Failed,
			_ => Self::Queued,
		}
	}
}

#[derive(Debug, Clone)]
pub struct JobLogRow {
	pub job_id: Uuid,
	pub submitted_at: DateTime<Utc>,
	pub status: JobStatus,
	pub original_filename: String,
	pub model_used: String,
	pub source_language: Option<String>,
	pub split_depth: Option<i32>,
	pub audio_duration_seconds: Option<f64>,
	pub processing_time_seconds: Option<f64>,
	pub total_tokens: Option<i64>,
	pub cost: Option<f64>,
	pub error_message: Option<String>,
	/// Opaque, pre-serialized JSON of the final result payload (spec §6's
	/// `transcripts`/`cost_breakdown` shape). Stored as a plain string so this
	/// crate stays serialization-agnostic about what the Worker puts in it.
	pub result_json: Option<String>,
}

impl FromRow<'_, sqlx::sqlite::SqliteRow> for JobLogRow {
	fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
		let job_id: String = row.try_get("job_id")?;
		let submitted_at: String = row.try_get("submitted_at")?;
		let status: String = row.try_get("status")?;

		Ok(Self {
			job_id: Uuid::parse_str(&job_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
			submitted_at: submitted_at.parse::<DateTime<Utc>>().map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
			status: JobStatus::from_str(&status),
			original_filename: row.try_get("original_filename")?,
			model_used: row.try_get("model_used")?,
			source_language: row.try_get("source_language")?,
			split_depth: row.try_get("split_depth")?,
			audio_duration_seconds: row.try_get("audio_duration_seconds")?,
			processing_time_seconds: row.try_get("processing_time_seconds")?,
			total_tokens: row.try_get("total_tokens")?,
			cost: row.try_get("cost")?,
			error_message: row.try_get("error_message")?,
			result_json: row.try_get("result_json")?,
		})
	}
}

#[derive(Debug, Clone)]
pub struct NewJobLog {
	pub job_id: Uuid,
	pub original_filename: String,
	pub model_used: String,
	pub source_language: Option<String>,
}

/// Field-wise update: only `Some` fields are written, matching the
/// reference repository's setattr-merge behavior.
#[derive(Debug, Clone, Default)]
pub struct JobLogUpdate {
	pub status: Option<JobStatus>,
	pub split_depth: Option<i32>,
	pub audio_duration_seconds: Option<f64>,
	pub processing_time_seconds: Option<f64>,
	pub total_tokens: Option<i64>,
	pub cost: Option<f64>,
	pub error_message: Option<String>,
	pub result_json: Option<String>,
}

#[derive(Clone)]
pub struct JobLogStore {
	pool: SqlitePool,
}

impl JobLogStore {
	/// Connects to `database_url` and applies embedded migrations.
	///
	/// # Errors
	/// Returns [`JobStoreError`] if the connection or migration fails.
	pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
		let pool = SqlitePoolOptions::new().max_connections(5).connect(database_url).await?;
		sqlx::migrate!("./migrations").run(&pool).await?;
		Ok(Self { pool })
	}

	#[must_use]
	pub fn from_pool(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// # Errors
	/// Returns [`JobStoreError`] on database failure.
	pub async fn insert_log(&self, new_log: NewJobLog) -> Result<JobLogRow, JobStoreError> {
		let submitted_at = Utc::now();
		sqlx::query(
			"INSERT INTO job_log (job_id, submitted_at, status, original_filename, model_used, source_language) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
		)
		.bind(new_log.job_id.to_string())
		.bind(submitted_at.to_rfc3339())
		.bind(JobStatus::Processing.as_str())
		.bind(&new_log.original_filename)
		.bind(&new_log.model_used)
		.bind(&new_log.source_language)
		.execute(&self.pool)
		.await?;

		Ok(JobLogRow {
			job_id: new_log.job_id,
			submitted_at,
			status: JobStatus::Processing,
			original_filename: new_log.original_filename,
			model_used: new_log.model_used,
			source_language: new_log.source_language,
			split_depth: None,
			audio_duration_seconds: None,
			processing_time_seconds: None,
			total_tokens: None,
			cost: None,
			error_message: None,
			result_json: None,
		})
	}

	/// # Errors
	/// Returns [`JobStoreError::NotFound`] if `job_id` has no row, or a database error.
	pub async fn update_log(&self, job_id: Uuid, update: JobLogUpdate) -> Result<(), JobStoreError> {
		let existing = self.get(job_id).await?.ok_or(JobStoreError::NotFound(job_id))?;

		let status = update.status.unwrap_or(existing.status);
		let split_depth = update.split_depth.or(existing.split_depth);
		let audio_duration_seconds = update.audio_duration_seconds.or(existing.audio_duration_seconds);
		let processing_time_seconds = update.processing_time_seconds.or(existing.processing_time_seconds);
		let total_tokens = update.total_tokens.or(existing.total_tokens);
		let cost = update.cost.or(existing.cost);
		let error_message = update.error_message.or(existing.error_message);
		let result_json = update.result_json.or(existing.result_json);

		sqlx::query(
			"UPDATE job_log SET status = ?1, split_depth = ?2, audio_duration_seconds = ?3, processing_time_seconds = ?4, total_tokens = ?5, cost = ?6, error_message = ?7, result_json = ?8 WHERE job_id = ?9",
		)
		.bind(status.as_str())
		.bind(split_depth)
		.bind(audio_duration_seconds)
		.bind(processing_time_seconds)
		.bind(total_tokens)
		.bind(cost)
		.bind(error_message)
		.bind(result_json)
		.bind(job_id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// # Errors
	/// Returns [`JobStoreError`] on database failure.
	pub async fn get(&self, job_id: Uuid) -> Result<Option<JobLogRow>, JobStoreError> {
		let row = sqlx::query_as::<_, JobLogRow>("SELECT * FROM job_log WHERE job_id = ?1")
			.bind(job_id.to_string())
			.fetch_optional(&self.pool)
			.await?;
		Ok(row)
	}

	pub async fn close(&self) {
		self.pool.close().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	async fn in_memory_store() -> JobLogStore {
		JobLogStore::connect("sqlite::memory:").await.unwrap()
	}

	#[tokio::test]
	async fn insert_then_get_round_trips() {
		let store = in_memory_store().await;
		let job_id = Uuid::new_v4();
		store
			.insert_log(NewJobLog {
				job_id,
				original_filename: "clip.mp3".to_string(),
				model_used: "gemini-2.5-flash".to_string(),
				source_language: None,
			})
			.await
			.unwrap();

		let row = store.get(job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Processing);
		assert_eq!(row.original_filename, "clip.mp3");
	}

	#[tokio::test]
	async fn update_log_merges_fields_without_clobbering() {
		let store = in_memory_store().await;
		let job_id = Uuid::new_v4();
		store
			.insert_log(NewJobLog {
				job_id,
				original_filename: "clip.mp3".to_string(),
				model_used: "gemini-2.5-flash".to_string(),
				source_language: Some("en".to_string()),
			})
			.await
			.unwrap();

		store
			.update_log(
				job_id,
				JobLogUpdate {
					audio_duration_seconds: Some(12.5),
					..Default::default()
				},
			)
			.await
			.unwrap();

		store
			.update_log(
				job_id,
				JobLogUpdate {
					status: Some(JobStatus::Completed),
					total_tokens: Some(500),
					cost: Some(0.002),
					..Default::default()
				},
			)
			.await
			.unwrap();

		let row = store.get(job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Completed);
		assert_eq!(row.source_language.as_deref(), Some("en"));
		assert!((row.audio_duration_seconds.unwrap() - 12.5).abs() < 1e-9);
		assert_eq!(row.total_tokens, Some(500));
	}

	#[tokio::test]
	async fn update_log_persists_result_json() {
		let store = in_memory_store().await;
		let job_id = Uuid::new_v4();
		store
			.insert_log(NewJobLog {
				job_id,
				original_filename: "clip.mp3".to_string(),
				model_used: "gemini-2.5-flash".to_string(),
				source_language: None,
			})
			.await
			.unwrap();

		store
			.update_log(
				job_id,
				JobLogUpdate {
					status: Some(JobStatus::Completed),
					result_json: Some(r#"{"lrc":"[00:00.00]hi\n"}"#.to_string()),
					..Default::default()
				},
			)
			.await
			.unwrap();

		let row = store.get(job_id).await.unwrap().unwrap();
		assert_eq!(row.result_json.as_deref(), Some(r#"{"lrc":"[00:00.00]hi\n"}"#));
	}

	#[tokio::test]
	async fn update_unknown_job_id_fails() {
		let store = in_memory_store().await;
		let result = store.update_log(Uuid::new_v4(), JobLogUpdate::default()).await;
		assert!(matches!(result, Err(JobStoreError::NotFound(_))));
	}
}
