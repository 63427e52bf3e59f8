use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use job_store::JobStatus;
use serde::Serialize;
use uuid::Uuid;

use crate::error::IntakeError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
	pub job_id: Uuid,
	pub status: &'static str,
	pub submitted_at: DateTime<Utc>,
	pub original_filename: String,
	pub model_used: String,
	pub source_language: Option<String>,
	pub split_depth: Option<i32>,
	pub audio_duration_seconds: Option<f64>,
	pub processing_time_seconds: Option<f64>,
	pub total_tokens: Option<i64>,
	pub cost: Option<f64>,
	pub error_message: Option<String>,
	pub result: Option<serde_json::Value>,
}

const fn status_label(status: JobStatus) -> &'static str {
	match status {
		JobStatus::Queued => "QUEUED",
		JobStatus::Processing => "PROCESSING",
		JobStatus::Completed => "COMPLETED",
		JobStatus::Failed => "FAILED",
	}
}

/// `GET /status/:job_id` — a thin read over the job log, mirroring the
/// reference `get_task_status` endpoint.
pub async fn status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Result<Json<JobStatusResponse>, IntakeError> {
	let row = state.job_store.get(job_id).await?.ok_or(IntakeError::JobNotFound(job_id))?;
	let result = row.result_json.as_deref().and_then(|s| serde_json::from_str(s).ok());

	Ok(Json(JobStatusResponse {
		job_id: row.job_id,
		status: status_label(row.status),
		submitted_at: row.submitted_at,
		original_filename: row.original_filename,
		model_used: row.model_used,
		source_language: row.source_language,
		split_depth: row.split_depth,
		audio_duration_seconds: row.audio_duration_seconds,
		processing_time_seconds: row.processing_time_seconds,
		total_tokens: row.total_tokens,
		cost: row.cost,
		error_message: row.error_message,
		result,
	}))
}
