//! Remote generative speech model adapter: upload-then-poll-until-terminal,
//! transcribe/translate, and tracked-handle release.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ModelAdapterError {
	#[error("http request to provider failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("provider rejected the uploaded file: {0}")]
	UploadFailed(String),
	#[error("timed out waiting for uploaded file to become ready")]
	PollTimeout,
	#[error("provider response could not be parsed: {0}")]
	Json(#[from] serde_json::Error),
	#[error("unknown provider id '{0}'")]
	UnknownProvider(String),
	#[error("missing API key for provider '{0}'")]
	MissingApiKey(String),
}

#[derive(Debug, Clone)]
pub struct TranscribeRequest {
	pub audio_path: std::path::PathBuf,
	pub model: String,
	pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct TranscribeResult {
	pub success: bool,
	pub text: String,
	pub input_tokens: u64,
	pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct TranslateRequest {
	pub model: String,
	pub prompt: String,
	pub text: String,
}

#[derive(Debug, Clone)]
pub struct TranslateResult {
	pub success: bool,
	pub text: String,
	pub input_tokens: u64,
	pub output_tokens: u64,
}

/// Opaque collaborator speaking to a remote generative speech model. A
/// provider implementation internally tracks every remote blob handle it
/// creates during `transcribe`/`translate` so `release` can delete them.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
	async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscribeResult, ModelAdapterError>;

	async fn translate(&self, req: TranslateRequest) -> Result<TranslateResult, ModelAdapterError>;

	/// Deletes every remote blob handle created since the adapter was built
	/// (or since the last `release`).
	async fn release(&self) -> Result<(), ModelAdapterError>;
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
	name: String,
	uri: String,
	state: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
	file: UploadedFile,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
	contents: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
struct ContentPart<'a> {
	parts: Vec<PartPayload<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PartPayload<'a> {
	Text { text: &'a str },
	FileData { file_data: FileDataRef<'a> },
}

#[derive(Debug, Serialize)]
struct FileDataRef<'a> {
	file_uri: &'a str,
	mime_type: &'a str,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateContentResponse {
	#[serde(default)]
	candidates: Vec<Candidate>,
	#[serde(default)]
	prompt_feedback: Option<PromptFeedback>,
	#[serde(default)]
	usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
	content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
	#[serde(default)]
	parts: Vec<TextOnlyPart>,
}

#[derive(Debug, Deserialize)]
struct TextOnlyPart {
	#[serde(default)]
	text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
	#[serde(default)]
	block_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UsageMetadata {
	#[serde(default)]
	prompt_token_count: u64,
	#[serde(default)]
	candidates_token_count: u64,
}

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_MAX_ATTEMPTS: u32 = 30;

/// Speaks to a Gemini-shaped generateContent/files HTTP API: upload the
/// media, poll until the provider reports it ACTIVE, then call
/// generateContent referencing the uploaded file.
pub struct GenerativeModelAdapter {
	http: reqwest::Client,
	base_url: String,
	api_key: String,
	uploaded_handles: Arc<Mutex<Vec<String>>>,
}

impl GenerativeModelAdapter {
	#[must_use]
	pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: base_url.into(),
			api_key: api_key.into(),
			uploaded_handles: Arc::new(Mutex::new(Vec::new())),
		}
	}

	async fn upload_and_wait_ready(&self, path: &Path) -> Result<UploadedFile, ModelAdapterError> {
		let bytes = tokio::fs::read(path).await.map_err(|e| ModelAdapterError::UploadFailed(e.to_string()))?;

		let response = self
			.http
			.post(format!("{}/v1beta/files?key={}", self.base_url, self.api_key))
			.body(bytes)
			.send()
			.await?
			.error_for_status()?;

		let uploaded: UploadResponse = response.json().await?;
		self.uploaded_handles.lock().await.push(uploaded.file.name.clone());

		let mut file = uploaded.file;
		for attempt in 0..POLL_MAX_ATTEMPTS {
			match file.state.as_str() {
				"ACTIVE" => return Ok(file),
				"FAILED" => return Err(ModelAdapterError::UploadFailed(format!("provider reported FAILED for {}", file.name))),
				_ => {
					tokio::time::sleep(POLL_INTERVAL).await;
					let poll_url = format!("{}/v1beta/{}?key={}", self.base_url, file.name, self.api_key);
					let polled: UploadedFile = self.http.get(poll_url).send().await?.error_for_status()?.json().await?;
					info!(attempt, state = %polled.state, "polled uploaded file status");
					file = polled;
				}
			}
		}

		Err(ModelAdapterError::PollTimeout)
	}

	async fn generate_content(&self, model: &str, prompt: &str, file_uri: Option<&str>, mime_type: &str) -> Result<GenerateContentResponse, ModelAdapterError> {
		let mut parts = vec![PartPayload::Text { text: prompt }];
		if let Some(uri) = file_uri {
			parts.push(PartPayload::FileData {
				file_data: FileDataRef { file_uri: uri, mime_type },
			});
		}

		let body = GenerateContentRequest { contents: vec![ContentPart { parts }] };
		let url = format!("{}/v1beta/models/{model}:generateContent?key={}", self.base_url, self.api_key);

		let response = self.http.post(url).json(&body).send().await?.error_for_status()?;
		Ok(response.json().await?)
	}
}

fn extract_text_or_block_reason(response: &GenerateContentResponse) -> (bool, String) {
	if let Some(candidate) = response.candidates.first() {
		let text = candidate.content.parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join("");
		return (true, text);
	}

	let reason = response.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone()).unwrap_or_else(|| "UNKNOWN".to_string());
	(false, format!("[content blocked by provider: {reason}]"))
}

#[async_trait]
impl ModelAdapter for GenerativeModelAdapter {
	async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscribeResult, ModelAdapterError> {
		let file = self.upload_and_wait_ready(&req.audio_path).await?;
		let response = self.generate_content(&req.model, &req.prompt, Some(&file.uri), "audio/wav").await?;

		let (success, text) = extract_text_or_block_reason(&response);
		let usage = response.usage_metadata.unwrap_or_default();

		if !success {
			warn!(reason = %text, "transcription blocked by provider, still reporting prompt tokens");
		}

		Ok(TranscribeResult {
			success,
			text,
			input_tokens: usage.prompt_token_count,
			output_tokens: usage.candidates_token_count,
		})
	}

	async fn translate(&self, req: TranslateRequest) -> Result<TranslateResult, ModelAdapterError> {
		let full_prompt = format!("{}\n\n{}", req.prompt, req.text);
		let response = self.generate_content(&req.model, &full_prompt, None, "text/plain").await?;

		let (success, text) = extract_text_or_block_reason(&response);
		let usage = response.usage_metadata.unwrap_or_default();

		Ok(TranslateResult {
			success,
			text,
			input_tokens: usage.prompt_token_count,
			output_tokens: usage.candidates_token_count,
		})
	}

	async fn release(&self) -> Result<(), ModelAdapterError> {
		let mut handles = self.uploaded_handles.lock().await;
		for handle in handles.drain(..) {
			let url = format!("{}/v1beta/{}?key={}", self.base_url, handle, self.api_key);
			if let Err(e) = self.http.delete(url).send().await {
				warn!(handle, error = %e, "failed to release remote file handle");
			}
		}
		Ok(())
	}
}

/// In-memory adapter for tests: returns fixed, configurable results without
/// making network calls.
pub struct MockAdapter {
	pub transcribe_result: TranscribeResult,
	pub translate_result: TranslateResult,
}

impl Default for MockAdapter {
	fn default() -> Self {
		Self {
			transcribe_result: TranscribeResult {
				success: true,
				text: "[00:00.00]mock transcript\n".to_string(),
				input_tokens: 100,
				output_tokens: 20,
			},
			translate_result: TranslateResult {
				success: true,
				text: "[00:00.00]mock translation\n".to_string(),
				input_tokens: 100,
				output_tokens: 20,
			},
		}
	}
}

#[async_trait]
impl ModelAdapter for MockAdapter {
	async fn transcribe(&self, _req: TranscribeRequest) -> Result<TranscribeResult, ModelAdapterError> {
		Ok(self.transcribe_result.clone())
	}

	async fn translate(&self, _req: TranslateRequest) -> Result<TranslateResult, ModelAdapterError> {
		Ok(self.translate_result.clone())
	}

	async fn release(&self) -> Result<(), ModelAdapterError> {
		Ok(())
	}
}

type AdapterFactory = Box<dyn Fn() -> Arc<dyn ModelAdapter> + Send + Sync>;

/// Maps a provider id string to a constructor, so the Worker never needs to
/// know concrete provider types.
pub struct ProviderRegistry {
	factories: HashMap<String, AdapterFactory>,
}

impl ProviderRegistry {
	#[must_use]
	pub fn with_defaults(base_url: String, api_key: String) -> Self {
		let mut registry = Self { factories: HashMap::new() };
		registry.register("google", move || Arc::new(GenerativeModelAdapter::new(base_url.clone(), api_key.clone())) as Arc<dyn ModelAdapter>);
		registry
	}

	#[must_use]
	pub fn test() -> Self {
		let mut registry = Self { factories: HashMap::new() };
		registry.register("mock", || Arc::new(MockAdapter::default()) as Arc<dyn ModelAdapter>);
		registry
	}

	pub fn register(&mut self, provider_id: impl Into<String>, factory: impl Fn() -> Arc<dyn ModelAdapter> + Send + Sync + 'static) {
		self.factories.insert(provider_id.into(), Box::new(factory));
	}

	/// # Errors
	/// Returns [`ModelAdapterError::UnknownProvider`] if `provider_id` was never registered.
	pub fn build(&self, provider_id: &str) -> Result<Arc<dyn ModelAdapter>, ModelAdapterError> {
		self.factories.get(provider_id).map(|f| f()).ok_or_else(|| ModelAdapterError::UnknownProvider(provider_id.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn mock_adapter_returns_fixed_results() {
		let adapter = MockAdapter::default();
		let result = adapter
			.transcribe(TranscribeRequest {
				audio_path: "/tmp/does-not-matter.wav".into(),
				model: "gemini-2.5-flash".to_string(),
				prompt: "transcribe".to_string(),
			})
			.await
			.unwrap();
		assert!(result.success);
		assert_eq!(result.input_tokens, 100);
	}

	#[test]
	fn extract_text_reports_block_reason_without_candidates() {
		let response = GenerateContentResponse {
			candidates: vec![],
			prompt_feedback: Some(PromptFeedback { block_reason: Some("SAFETY".to_string()) }),
			usage_metadata: Some(UsageMetadata {
				prompt_token_count: 42,
				candidates_token_count: 0,
			}),
		};
		let (success, text) = extract_text_or_block_reason(&response);
		assert!(!success);
		assert!(text.contains("SAFETY"));
		assert_eq!(response.usage_metadata.unwrap().prompt_token_count, 42);
	}

	#[test]
	fn provider_registry_rejects_unknown_provider() {
		let registry = ProviderRegistry::test();
		assert!(registry.build("google").is_err());
		assert!(registry.build("mock").is_ok());
	}
}
