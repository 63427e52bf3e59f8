use std::collections::HashMap;

use axum::extract::{Multipart, State};
use axum::Json;
use job_queue::{JobDescriptor, MediaSource};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::IntakeError;
use crate::mime;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
	pub job_id: Uuid,
	pub message: String,
}

/// `POST /submit` — multipart upload, mirrors the reference `upload_file`
/// handler's validate-then-save-to-disk flow. `job_id` is the client's
/// `file_uid`, not a server-generated id, so the response always echoes back
/// the id the caller will poll/subscribe on.
pub async fn submit(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<SubmitResponse>, IntakeError> {
	let mut saved_path = None;
	let mut original_filename = None;
	let mut model = state.config.default_model.clone();
	let mut target_lang = None;
	let mut file_uid = None;
	let mut client_id = None;
	let mut provider = None;
	let mut source_lang = None;
	let mut prompt = None;
	let mut api_keys: HashMap<String, String> = HashMap::new();

	while let Some(field) = multipart.next_field().await? {
		match field.name().unwrap_or_default() {
			"file" => {
				let filename = field.file_name().ok_or(IntakeError::EmptyFilename)?.to_string();
				if filename.trim().is_empty() {
					state.metrics.submissions_rejected.add(1, &[]);
					return Err(IntakeError::EmptyFilename);
				}

				let content_type = field.content_type().unwrap_or_default().to_string();
				if !mime::is_supported(&content_type) {
					state.metrics.submissions_rejected.add(1, &[]);
					return Err(IntakeError::UnsupportedMimeType(content_type));
				}

				let bytes = field.bytes().await?;
				tokio::fs::create_dir_all(&state.config.upload_dir).await?;
				let dest = state.config.upload_dir.join(format!("{}_{filename}", Uuid::new_v4()));
				tokio::fs::write(&dest, &bytes).await?;

				saved_path = Some(dest);
				original_filename = Some(filename);
			}
			"model" => model = field.text().await?,
			"target_lang" => {
				let value = field.text().await?;
				if !value.trim().is_empty() {
					target_lang = Some(value);
				}
			}
			"file_uid" => file_uid = Some(field.text().await?),
			"client_id" => client_id = Some(field.text().await?),
			"provider" => provider = Some(field.text().await?),
			"source_lang" => source_lang = Some(field.text().await?),
			"prompt" => {
				let value = field.text().await?;
				if !value.trim().is_empty() {
					prompt = Some(value);
				}
			}
			"api_keys" => {
				let value = field.text().await?;
				if !value.trim().is_empty() {
					api_keys = serde_json::from_str(&value).map_err(|_| IntakeError::InvalidApiKeys)?;
				}
			}
			_ => {}
		}
	}

	let Some(path) = saved_path else {
		state.metrics.submissions_rejected.add(1, &[]);
		return Err(IntakeError::MissingFile);
	};
	let original_filename = original_filename.unwrap_or_else(|| "upload".to_string());

	let file_uid = file_uid.ok_or(IntakeError::MissingField("file_uid"))?;
	let job_id = Uuid::parse_str(&file_uid).map_err(|_| IntakeError::InvalidFileUid(file_uid))?;
	let client_id = client_id.ok_or(IntakeError::MissingField("client_id"))?;
	let provider = provider.ok_or(IntakeError::MissingField("provider"))?;
	let source_lang = source_lang.ok_or(IntakeError::MissingField("source_lang"))?;

	let job = JobDescriptor::new(
		job_id,
		client_id,
		MediaSource::Upload { path },
		original_filename,
		model,
		provider,
		api_keys,
		Some(source_lang),
		target_lang,
		prompt,
		None,
		None,
	);
	state.queue.enqueue(&job).await?;
	state.metrics.submissions_accepted.add(1, &[]);

	info!(%job_id, "accepted upload submission");
	Ok(Json(SubmitResponse {
		job_id,
		message: "job accepted".to_string(),
	}))
}
