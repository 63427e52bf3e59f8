use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use job_queue::{JobDescriptor, MediaSource};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::IntakeError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitUrlRequest {
	pub url: String,
	pub file_uid: String,
	pub client_id: String,
	pub provider: String,
	#[serde(default)]
	pub api_keys: HashMap<String, String>,
	pub source_lang: String,
	pub original_filename: Option<String>,
	pub model: Option<String>,
	pub target_lang: Option<String>,
	pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitUrlResponse {
	pub job_id: Uuid,
	pub message: String,
}

/// `POST /submit_url` — resolves reachability off the request path (bounded
/// by `url_check_semaphore`, matching SPEC_FULL's "admission never stalls"
/// requirement) and hands the bare URL to the queue. Downloading the bytes
/// themselves happens later, in the worker's `resolve_source` stage. `job_id`
/// is the client's `file_uid`, matching `/submit`'s contract.
pub async fn submit_url(State(state): State<AppState>, Json(request): Json<SubmitUrlRequest>) -> Result<Json<SubmitUrlResponse>, IntakeError> {
	if !(request.url.starts_with("http://") || request.url.starts_with("https://")) {
		state.metrics.submissions_rejected.add(1, &[]);
		return Err(IntakeError::InvalidUrl(request.url));
	}

	if !url_is_reachable(&state, request.url.clone()).await {
		state.metrics.submissions_rejected.add(1, &[]);
		return Err(IntakeError::InvalidUrl(request.url));
	}

	let job_id = Uuid::parse_str(&request.file_uid).map_err(|_| IntakeError::InvalidFileUid(request.file_uid.clone()))?;

	let original_filename = request.original_filename.unwrap_or_else(|| request.url.rsplit('/').next().unwrap_or("remote").to_string());
	let model = request.model.unwrap_or_else(|| state.config.default_model.clone());

	let job = JobDescriptor::new(
		job_id,
		request.client_id,
		MediaSource::RemoteUrl { url: request.url },
		original_filename,
		model,
		request.provider,
		request.api_keys,
		Some(request.source_lang),
		request.target_lang,
		request.prompt,
		None,
		None,
	);
	state.queue.enqueue(&job).await?;
	state.metrics.submissions_accepted.add(1, &[]);

	info!(%job_id, "accepted remote url submission");
	Ok(Json(SubmitUrlResponse {
		job_id,
		message: "job accepted".to_string(),
	}))
}

async fn url_is_reachable(state: &AppState, url: String) -> bool {
	let Ok(permit) = state.url_check_semaphore.clone().acquire_owned().await else {
		return false;
	};
	let client = state.http_client.clone();

	tokio::spawn(async move {
		let _permit = permit;
		client.head(&url).send().await.map(|response| response.status().is_success() || response.status().is_redirection()).unwrap_or(false)
	})
	.await
	.unwrap_or(false)
}
