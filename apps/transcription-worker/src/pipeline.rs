//! The eleven-stage pipeline state machine: `LOG_OPEN -> PROBE -> ADAPTER_INIT
//! -> PROMPT_PREP -> TRANSCRIBE_RECURSIVE -> REMAP -> TRANSLATE -> CONVERT ->
//! ACCOUNT -> LOG_CLOSE -> CLEANUP`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cost_model::{CostItem, ContentType};
use job_queue::{JobDescriptor, JobHandler, MediaArtifact, MediaSource};
use job_store::{JobLogStore, JobLogUpdate, JobStatus, JobStoreError, NewJobLog};
use model_adapter::{ModelAdapter, ProviderRegistry, TranscribeRequest, TranslateRequest};
use subtitle_format::SubtitleArtifacts;
use tokio::sync::Mutex;
use tracing::{info, warn};
use transcription_events::{CostBreakdownItem, EventBus, JobResult, ProgressEvent, Stage, Transcripts};
use uuid::Uuid;
use vad_engine::VadEngine;

use crate::prompt::{transcribe_prompt, translate_prompt};

/// Clips at or above this duration are eligible for VAD-assisted splitting;
/// matches the reference's `max_duration_seconds = 180` (original_source
/// `transcription/flows.py`).
const T_SPLIT_SECS: f64 = 180.0;
/// Bounded recursion: Rust async fns cannot recurse unboundedly without
/// risking runaway stack/heap growth, so depth is capped explicitly (unlike
/// the Python original, which relies on shrinking segment duration alone).
const MAX_SPLIT_DEPTH: u32 = 5;
const MIN_SILENCE_SECS: f64 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
	#[error("{0}")]
	Fatal(String),
	#[error("{0}")]
	NonFatal(String),
}

impl From<JobStoreError> for PipelineError {
	fn from(e: JobStoreError) -> Self {
		Self::Fatal(e.to_string())
	}
}

impl From<vad_engine::VadError> for PipelineError {
	fn from(e: vad_engine::VadError) -> Self {
		Self::Fatal(e.to_string())
	}
}

impl From<model_adapter::ModelAdapterError> for PipelineError {
	fn from(e: model_adapter::ModelAdapterError) -> Self {
		Self::Fatal(e.to_string())
	}
}

impl From<subtitle_format::SubtitleFormatError> for PipelineError {
	fn from(e: subtitle_format::SubtitleFormatError) -> Self {
		Self::Fatal(e.to_string())
	}
}

impl From<cost_model::CostModelError> for PipelineError {
	fn from(e: cost_model::CostModelError) -> Self {
		Self::Fatal(e.to_string())
	}
}

impl From<std::io::Error> for PipelineError {
	fn from(e: std::io::Error) -> Self {
		Self::Fatal(e.to_string())
	}
}

/// Downloads the media behind a `MediaSource::RemoteUrl` into the scratch
/// directory. `submit_url` admission is the Intake API's job; this trait is
/// the Worker-side counterpart that actually fetches the bytes before PROBE.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
	async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, PipelineError>;
}

pub struct ReqwestUrlFetcher {
	http: reqwest::Client,
}

impl ReqwestUrlFetcher {
	#[must_use]
	pub fn new() -> Self {
		Self { http: reqwest::Client::new() }
	}
}

impl Default for ReqwestUrlFetcher {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl UrlFetcher for ReqwestUrlFetcher {
	async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, PipelineError> {
		let response = self.http.get(url).send().await.map_err(|e| PipelineError::Fatal(format!("remote fetch failed: {e}")))?;
		let response = response.error_for_status().map_err(|e| PipelineError::Fatal(format!("remote fetch returned error status: {e}")))?;
		let bytes = response.bytes().await.map_err(|e| PipelineError::Fatal(format!("remote fetch body read failed: {e}")))?;

		let filename = url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("remote-media");
		let dest = dest_dir.join(format!("{}-{filename}", Uuid::new_v4()));
		tokio::fs::write(&dest, &bytes).await?;
		Ok(dest)
	}
}

/// Reports progress both to the structured logs and to the Event Bus, the
/// REDESIGN FLAG's explicit status callback (see `SPEC_FULL.md` §4.3)
/// instead of a cross-cutting logging hook.
pub struct StatusCallback<'a> {
	job_id: Uuid,
	client_id: String,
	event_bus: &'a dyn EventBus,
}

impl<'a> StatusCallback<'a> {
	#[must_use]
	pub fn new(job_id: Uuid, client_id: impl Into<String>, event_bus: &'a dyn EventBus) -> Self {
		Self {
			job_id,
			client_id: client_id.into(),
			event_bus,
		}
	}

	pub async fn report(&self, stage: Stage, message: impl Into<String>) {
		let message = message.into();
		info!(job_id = %self.job_id, stage = ?stage, %message, "pipeline stage");
		if let Err(error) = self.event_bus.publish(&ProgressEvent::processing(self.job_id, self.client_id.clone(), message)).await {
			warn!(job_id = %self.job_id, %error, "failed to publish progress event");
		}
	}

	pub async fn completed(&self, result: JobResult) {
		info!(job_id = %self.job_id, "pipeline stage completed");
		if let Err(error) = self.event_bus.publish(&ProgressEvent::completed(self.client_id.clone(), result)).await {
			warn!(job_id = %self.job_id, %error, "failed to publish completion event");
		}
	}

	pub async fn failed(&self, message: impl Into<String>) {
		let message = message.into();
		warn!(job_id = %self.job_id, %message, "pipeline stage failed");
		if let Err(error) = self.event_bus.publish(&ProgressEvent::failed(self.job_id, self.client_id.clone(), message)).await {
			warn!(job_id = %self.job_id, %error, "failed to publish failure event");
		}
	}
}

enum ProbeResult {
	Pcm { sample_rate: u32, samples: Vec<f32>, duration_secs: f64 },
	/// A container this worker cannot decode locally (mp3/flac/aac/...). The
	/// provider itself accepts compressed audio directly, so such clips skip
	/// VAD speech extraction and the recursive split and are sent whole.
	Opaque,
}

struct RecursiveTranscript {
	lrc_text: String,
	input_tokens: u64,
	output_tokens: u64,
	depth_reached: u32,
}

pub struct Pipeline {
	job_store: Arc<JobLogStore>,
	event_bus: Arc<dyn EventBus>,
	vad: Arc<dyn VadEngine>,
	providers: Arc<ProviderRegistry>,
	fetcher: Arc<dyn UrlFetcher>,
	scratch_dir: PathBuf,
	provider_id: String,
}

impl Pipeline {
	#[must_use]
	pub fn new(job_store: Arc<JobLogStore>, event_bus: Arc<dyn EventBus>, vad: Arc<dyn VadEngine>, providers: Arc<ProviderRegistry>, fetcher: Arc<dyn UrlFetcher>, scratch_dir: PathBuf, provider_id: impl Into<String>) -> Self {
		Self {
			job_store,
			event_bus,
			vad,
			providers,
			fetcher,
			scratch_dir,
			provider_id: provider_id.into(),
		}
	}

	pub async fn run_job(&self, job: &JobDescriptor) -> Result<(), PipelineError> {
		let started_at = Instant::now();
		let status = StatusCallback::new(job.job_id, job.client_id.clone(), self.event_bus.as_ref());
		let cleanup_list: Mutex<Vec<MediaArtifact>> = Mutex::new(Vec::new());

		let result = self.run_stages(job, &status, &cleanup_list).await;

		self.cleanup(job.job_id, &status, &cleanup_list).await;

		match result {
			Ok(job_result) => {
				info!(job_id = %job.job_id, elapsed_ms = started_at.elapsed().as_millis(), "job completed");
				status.completed(job_result).await;
				Ok(())
			}
			Err(error) => {
				warn!(job_id = %job.job_id, %error, "job failed, recording LOG_CLOSE(FAILED)");
				if let Err(store_error) = self
					.job_store
					.update_log(
						job.job_id,
						JobLogUpdate {
							status: Some(JobStatus::Failed),
							processing_time_seconds: Some(started_at.elapsed().as_secs_f64()),
							error_message: Some(error.to_string()),
							..Default::default()
						},
					)
					.await
				{
					warn!(job_id = %job.job_id, error = %store_error, "failed to record job failure");
				}
				status.failed(error.to_string()).await;
				Err(error)
			}
		}
	}

	async fn run_stages(&self, job: &JobDescriptor, status: &StatusCallback<'_>, cleanup_list: &Mutex<Vec<MediaArtifact>>) -> Result<JobResult, PipelineError> {
		let started_at = Instant::now();

		self.log_open(job, status).await?;

		let local_path = self.resolve_source(job, status).await?;
		let probe = self.probe(&local_path, status).await?;

		let adapter = self.init_adapter(job, status).await?;

		let transcribe_prompt = transcribe_prompt(job.reference_text.as_deref(), job.prompt.as_deref());
		status.report(Stage::PromptPrep, "prompts ready").await;

		let (remapped_lrc, input_tokens, output_tokens, split_depth, audio_duration_secs) = match probe {
			ProbeResult::Pcm { sample_rate, samples, duration_secs } => {
				let (concatenated, intervals) = self.vad.speech_only(&samples, sample_rate)?;
				let working_samples = if concatenated.is_empty() { samples } else { concatenated };

				let transcript = self
					.transcribe_recursive(adapter.as_ref(), &transcribe_prompt, &job.model, working_samples, sample_rate, 0, status, cleanup_list)
					.await?;

				status.report(Stage::TranscribeRecursive, format!("transcription reached split depth {}", transcript.depth_reached)).await;

				let interval_pairs: Vec<(f64, f64)> = intervals.iter().map(|i| (i.start_secs, i.end_secs)).collect();
				let remapped = if interval_pairs.is_empty() {
					transcript.lrc_text
				} else {
					subtitle_format::remap_concatenated_timestamps(&transcript.lrc_text, &interval_pairs)?
				};
				status.report(Stage::Remap, "timestamps remapped onto original timeline").await;

				(remapped, transcript.input_tokens, transcript.output_tokens, transcript.depth_reached, Some(duration_secs))
			}
			ProbeResult::Opaque => {
				let result = adapter
					.transcribe(TranscribeRequest {
						audio_path: local_path.clone(),
						model: job.model.clone(),
						prompt: transcribe_prompt,
					})
					.await?;
				if !result.success {
					return Err(PipelineError::Fatal(format!("transcription failed: {}", result.text)));
				}
				status.report(Stage::TranscribeRecursive, "transcribed without local splitting (opaque container)").await;
				status.report(Stage::Remap, "no remap needed for opaque container").await;
				info!(job_id = %job.job_id, "opaque container: audio duration unknown, recording 0.0");
				(result.text, result.input_tokens, result.output_tokens, 0, Some(0.0))
			}
		};

		let (final_lrc, translate_input_tokens, translate_output_tokens) = self.translate(&remapped_lrc, job, adapter.as_ref(), status).await;

		let artifacts = self.convert(&final_lrc, status).await?;

		let cost = self.account(job, input_tokens, output_tokens, translate_input_tokens, translate_output_tokens, status).await?;

		let processing_time_seconds = started_at.elapsed().as_secs_f64();
		let cost_breakdown = cost
			.line_items
			.iter()
			.map(|item| CostBreakdownItem {
				task_name: item.task_name.clone(),
				content_type: item.content_type.as_str().to_string(),
				input_tokens: item.input_tokens,
				output_tokens: item.output_tokens,
				cost: item.cost,
			})
			.collect();

		let job_result = JobResult {
			job_id: job.job_id,
			transcripts: Transcripts {
				lrc: artifacts.lrc.clone(),
				srt: artifacts.srt.clone(),
				vtt: artifacts.vtt.clone(),
				txt: artifacts.txt.clone(),
			},
			tokens_used: cost.total_tokens,
			cost: cost.cost,
			model: job.model.clone(),
			source_language: job.source_lang.clone(),
			processing_time_seconds,
			audio_duration_seconds: audio_duration_secs,
			cost_breakdown,
		};

		let result_json = serde_json::to_string(&job_result).map_err(|e| PipelineError::Fatal(e.to_string()))?;
		self.log_close(job, split_depth, audio_duration_secs, started_at, &cost, &result_json, status).await?;

		Ok(job_result)
	}

	async fn resolve_source(&self, job: &JobDescriptor, status: &StatusCallback<'_>) -> Result<PathBuf, PipelineError> {
		match &job.source {
			MediaSource::Upload { path } => Ok(path.clone()),
			MediaSource::RemoteUrl { url } => {
				status.report(Stage::Probe, format!("downloading remote media from {url}")).await;
				tokio::fs::create_dir_all(&self.scratch_dir).await?;
				self.fetcher.fetch(url, &self.scratch_dir).await
			}
		}
	}

	async fn probe(&self, path: &Path, status: &StatusCallback<'_>) -> Result<ProbeResult, PipelineError> {
		let is_wav = path.extension().and_then(|e| e.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));

		if !is_wav {
			status.report(Stage::Probe, "container is not locally decodable wav, skipping VAD").await;
			return Ok(ProbeResult::Opaque);
		}

		let path = path.to_path_buf();
		let (samples, sample_rate) = tokio::task::spawn_blocking(move || read_wav_samples(&path)).await.map_err(|e| PipelineError::Fatal(e.to_string()))??;

		let duration_secs = samples.len() as f64 / f64::from(sample_rate);
		status.report(Stage::Probe, format!("probed wav: {sample_rate}Hz, {duration_secs:.2}s")).await;

		Ok(ProbeResult::Pcm { sample_rate, samples, duration_secs })
	}

	async fn init_adapter(&self, job: &JobDescriptor, status: &StatusCallback<'_>) -> Result<Arc<dyn ModelAdapter>, PipelineError> {
		let provider_id = if job.provider.is_empty() { self.provider_id.as_str() } else { job.provider.as_str() };
		let adapter = self.providers.build(provider_id).map_err(|e| PipelineError::Fatal(e.to_string()))?;
		status.report(Stage::AdapterInit, format!("provider '{provider_id}' ready")).await;
		Ok(adapter)
	}

	#[allow(clippy::too_many_arguments)]
	fn transcribe_recursive<'a>(
		&'a self,
		adapter: &'a dyn ModelAdapter,
		prompt: &'a str,
		model: &'a str,
		samples: Vec<f32>,
		sample_rate: u32,
		depth: u32,
		status: &'a StatusCallback<'a>,
		cleanup_list: &'a Mutex<Vec<MediaArtifact>>,
	) -> Pin<Box<dyn Future<Output = Result<RecursiveTranscript, PipelineError>> + Send + 'a>> {
		Box::pin(async move {
			let duration_secs = samples.len() as f64 / f64::from(sample_rate);
			let base_case = duration_secs < T_SPLIT_SECS || depth >= MAX_SPLIT_DEPTH;

			if base_case {
				let path = self.write_segment_wav(&samples, sample_rate, cleanup_list).await?;
				let result = adapter
					.transcribe(TranscribeRequest {
						audio_path: path,
						model: model.to_string(),
						prompt: prompt.to_string(),
					})
					.await?;
				if !result.success {
					return Err(PipelineError::Fatal(format!("transcription failed (content blocked or empty): {}", result.text)));
				}
				return Ok(RecursiveTranscript {
					lrc_text: result.text,
					input_tokens: result.input_tokens,
					output_tokens: result.output_tokens,
					depth_reached: depth,
				});
			}

			// Try the whole segment first; only split on failure, matching
			// `TranscriptionTask._transcribe_with_splitting`.
			let whole_path = self.write_segment_wav(&samples, sample_rate, cleanup_list).await?;
			let attempt = adapter
				.transcribe(TranscribeRequest {
					audio_path: whole_path,
					model: model.to_string(),
					prompt: prompt.to_string(),
				})
				.await?;
			if attempt.success {
				return Ok(RecursiveTranscript {
					lrc_text: attempt.text,
					input_tokens: attempt.input_tokens,
					output_tokens: attempt.output_tokens,
					depth_reached: depth,
				});
			}

			status.report(Stage::TranscribeRecursive, format!("depth {depth}: whole-segment attempt failed, splitting near midpoint")).await;

			let split_point = self.vad.split_near_middle(&samples, sample_rate, MIN_SILENCE_SECS)?;
			let split_idx = ((split_point * f64::from(sample_rate)) as usize).min(samples.len());
			let (left_samples, right_samples) = samples.split_at(split_idx);

			let left = self.transcribe_recursive(adapter, prompt, model, left_samples.to_vec(), sample_rate, depth + 1, status, cleanup_list).await?;
			let right = self.transcribe_recursive(adapter, prompt, model, right_samples.to_vec(), sample_rate, depth + 1, status, cleanup_list).await?;

			let shifted_right = subtitle_format::adjust_lrc_timestamps(&right.lrc_text, split_point);
			let merged_lrc = format!("{}{shifted_right}", left.lrc_text);

			Ok(RecursiveTranscript {
				lrc_text: merged_lrc,
				input_tokens: left.input_tokens + right.input_tokens,
				output_tokens: left.output_tokens + right.output_tokens,
				depth_reached: left.depth_reached.max(right.depth_reached),
			})
		})
	}

	async fn write_segment_wav(&self, samples: &[f32], sample_rate: u32, cleanup_list: &Mutex<Vec<MediaArtifact>>) -> Result<PathBuf, PipelineError> {
		tokio::fs::create_dir_all(&self.scratch_dir).await?;
		let path = self.scratch_dir.join(format!("segment-{}.wav", Uuid::new_v4()));

		let samples_owned = samples.to_vec();
		let write_path = path.clone();
		tokio::task::spawn_blocking(move || write_wav_segment(&write_path, &samples_owned, sample_rate))
			.await
			.map_err(|e| PipelineError::Fatal(e.to_string()))??;

		let duration_secs = samples.len() as f64 / f64::from(sample_rate);
		cleanup_list.lock().await.push(MediaArtifact::new(path.clone(), sample_rate, duration_secs, "wav"));

		Ok(path)
	}

	/// Absorbs translation failures as `NonFatal`: the job keeps the
	/// untranslated transcript rather than failing the whole pipeline, per
	/// spec.md §7's propagation rule.
	async fn translate(&self, lrc_text: &str, job: &JobDescriptor, adapter: &dyn ModelAdapter, status: &StatusCallback<'_>) -> (String, u64, u64) {
		let Some(target_language) = job.target_language.as_deref() else {
			status.report(Stage::Translate, "no target language requested, skipping translation").await;
			return (lrc_text.to_string(), 0, 0);
		};

		if let Some(source_lang) = job.source_lang.as_deref() {
			if primary_subtag(source_lang) == primary_subtag(target_language) {
				status.report(Stage::Translate, format!("source and target language both '{target_language}', skipping translation")).await;
				return (lrc_text.to_string(), 0, 0);
			}
		}

		let prompt = translate_prompt(target_language);
		match adapter
			.translate(TranslateRequest {
				model: job.model.clone(),
				prompt,
				text: lrc_text.to_string(),
			})
			.await
		{
			Ok(result) if result.success => {
				status.report(Stage::Translate, format!("translated to {target_language}")).await;
				(result.text, result.input_tokens, result.output_tokens)
			}
			Ok(result) => {
				let non_fatal = PipelineError::NonFatal(format!("translation blocked by provider: {}", result.text));
				warn!(job_id = %job.job_id, error = %non_fatal, "translation failed non-fatally, keeping source-language transcript");
				status.report(Stage::Translate, "translation failed, keeping original transcript").await;
				(lrc_text.to_string(), result.input_tokens, 0)
			}
			Err(error) => {
				let non_fatal = PipelineError::NonFatal(error.to_string());
				warn!(job_id = %job.job_id, error = %non_fatal, "translation request errored non-fatally, keeping source-language transcript");
				status.report(Stage::Translate, "translation request failed, keeping original transcript").await;
				(lrc_text.to_string(), 0, 0)
			}
		}
	}

	async fn convert(&self, lrc_text: &str, status: &StatusCallback<'_>) -> Result<SubtitleArtifacts, PipelineError> {
		let artifacts = subtitle_format::convert_from_lrc(lrc_text);
		status.report(Stage::Convert, "converted transcript into srt/vtt/txt artifacts").await;
		Ok(artifacts)
	}

	#[allow(clippy::too_many_arguments)]
	async fn account(&self, job: &JobDescriptor, transcribe_input: u64, transcribe_output: u64, translate_input: u64, translate_output: u64, status: &StatusCallback<'_>) -> Result<cost_model::CostBreakdown, PipelineError> {
		let mut items = vec![CostItem {
			model: job.model.clone(),
			task_name: "total_transcription".to_string(),
			content_type: ContentType::Audio,
			input_tokens: transcribe_input,
			output_tokens: transcribe_output,
		}];
		if translate_input > 0 || translate_output > 0 {
			items.push(CostItem {
				model: job.model.clone(),
				task_name: "total_translation".to_string(),
				content_type: ContentType::Text,
				input_tokens: translate_input,
				output_tokens: translate_output,
			});
		}

		let breakdown = cost_model::calculate_cost(&items)?;
		status.report(Stage::Account, format!("total cost ${:.4} over {} tokens", breakdown.cost, breakdown.total_tokens)).await;
		Ok(breakdown)
	}

	#[allow(clippy::too_many_arguments)]
	async fn log_close(&self, job: &JobDescriptor, split_depth: u32, audio_duration_secs: Option<f64>, started_at: Instant, cost: &cost_model::CostBreakdown, result_json: &str, status: &StatusCallback<'_>) -> Result<(), PipelineError> {
		status.report(Stage::LogClose, "recording completion").await;
		self.job_store
			.update_log(
				job.job_id,
				JobLogUpdate {
					status: Some(JobStatus::Completed),
					split_depth: Some(i32::try_from(split_depth).unwrap_or(i32::MAX)),
					audio_duration_seconds: audio_duration_secs,
					processing_time_seconds: Some(started_at.elapsed().as_secs_f64()),
					total_tokens: Some(i64::try_from(cost.total_tokens).unwrap_or(i64::MAX)),
					cost: Some(cost.cost),
					error_message: None,
					result_json: Some(result_json.to_string()),
				},
			)
			.await?;
		Ok(())
	}

	async fn cleanup(&self, job_id: Uuid, status: &StatusCallback<'_>, cleanup_list: &Mutex<Vec<MediaArtifact>>) {
		status.report(Stage::Cleanup, "removing scratch artifacts").await;
		let artifacts = cleanup_list.lock().await;
		for artifact in artifacts.iter() {
			if let Err(error) = artifact.cleanup().await {
				warn!(job_id = %job_id, %error, path = %artifact.path.display(), "failed to clean up scratch artifact");
			}
		}
	}
}

/// The primary subtag of a BCP-47-ish language tag, e.g. `"en-US"` -> `"en"`.
fn primary_subtag(lang: &str) -> String {
	lang.split('-').next().unwrap_or(lang).to_ascii_lowercase()
}

fn read_wav_samples(path: &Path) -> Result<(Vec<f32>, u32), PipelineError> {
	let mut reader = hound::WavReader::open(path).map_err(|e| PipelineError::Fatal(format!("failed to open wav: {e}")))?;
	let spec = reader.spec();
	let sample_rate = spec.sample_rate;

	let samples: Vec<f32> = match spec.sample_format {
		hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>().map_err(|e| PipelineError::Fatal(e.to_string()))?,
		hound::SampleFormat::Int => {
			let max = f32::from(1u16 << (spec.bits_per_sample.min(16) - 1));
			reader
				.samples::<i32>()
				.map(|s| s.map(|v| v as f32 / max))
				.collect::<Result<_, _>>()
				.map_err(|e| PipelineError::Fatal(e.to_string()))?
		}
	};

	Ok((samples, sample_rate))
}

fn write_wav_segment(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), PipelineError> {
	let spec = hound::WavSpec {
		channels: 1,
		sample_rate,
		bits_per_sample: 32,
		sample_format: hound::SampleFormat::Float,
	};
	let mut writer = hound::WavWriter::create(path, spec).map_err(|e| PipelineError::Fatal(format!("failed to create wav writer: {e}")))?;
	for sample in samples {
		writer.write_sample(*sample).map_err(|e| PipelineError::Fatal(e.to_string()))?;
	}
	writer.finalize().map_err(|e| PipelineError::Fatal(e.to_string()))?;
	Ok(())
}

/// Bridges the generic `job_queue::WorkerPool` to the pipeline: the pool only
/// understands `Result<(), String>`.
pub struct PipelineHandler {
	pipeline: Pipeline,
}

impl PipelineHandler {
	#[must_use]
	pub fn new(pipeline: Pipeline) -> Self {
		Self { pipeline }
	}
}

#[async_trait]
impl JobHandler for PipelineHandler {
	async fn handle(&self, job: JobDescriptor) -> Result<(), String> {
		self.pipeline.run_job(&job).await.map_err(|e| e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use model_adapter::{MockAdapter, TranscribeResult, TranslateResult};
	use std::collections::HashMap;
	use std::path::PathBuf;
	use transcription_events::InMemoryEventBus;
	use vad_engine::NullVad;

	#[allow(clippy::too_many_arguments)]
	fn test_job(source: MediaSource, original_filename: &str, model: &str, target_language: Option<String>) -> JobDescriptor {
		JobDescriptor::new(
			Uuid::new_v4(),
			"client-1",
			source,
			original_filename,
			model,
			"mock",
			HashMap::new(),
			Some("en".to_string()),
			target_language,
			None,
			None,
			None,
		)
	}

	struct StubFetcher;

	#[async_trait]
	impl UrlFetcher for StubFetcher {
		async fn fetch(&self, _url: &str, _dest_dir: &Path) -> Result<PathBuf, PipelineError> {
			Err(PipelineError::Fatal("remote fetch not exercised in this test".to_string()))
		}
	}

	async fn test_store() -> Arc<JobLogStore> {
		Arc::new(JobLogStore::connect("sqlite::memory:").await.unwrap())
	}

	fn write_silence_wav(path: &Path, sample_rate: u32, secs: f64) {
		let spec = hound::WavSpec {
			channels: 1,
			sample_rate,
			bits_per_sample: 32,
			sample_format: hound::SampleFormat::Float,
		};
		let mut writer = hound::WavWriter::create(path, spec).unwrap();
		for _ in 0..((sample_rate as f64 * secs) as usize) {
			writer.write_sample(0.0f32).unwrap();
		}
		writer.finalize().unwrap();
	}

	fn test_pipeline(job_store: Arc<JobLogStore>, adapter_result: TranscribeResult, translate_result: TranslateResult, scratch_dir: PathBuf) -> Pipeline {
		let mut registry = ProviderRegistry::test();
		registry.register("mock", move || {
			Arc::new(MockAdapter {
				transcribe_result: adapter_result.clone(),
				translate_result: translate_result.clone(),
			}) as Arc<dyn ModelAdapter>
		});

		Pipeline::new(
			job_store,
			Arc::new(InMemoryEventBus::default()),
			Arc::new(NullVad),
			Arc::new(registry),
			Arc::new(StubFetcher),
			scratch_dir,
			"mock",
		)
	}

	#[tokio::test]
	async fn short_clip_transcribes_successfully() {
		let dir = tempfile::tempdir().unwrap();
		let audio_path = dir.path().join("clip.wav");
		write_silence_wav(&audio_path, 16000, 2.0);

		let store = test_store().await;
		let pipeline = test_pipeline(
			store.clone(),
			TranscribeResult {
				success: true,
				text: "[00:00.00]hello world\n".to_string(),
				input_tokens: 50,
				output_tokens: 10,
			},
			TranslateResult {
				success: true,
				text: String::new(),
				input_tokens: 0,
				output_tokens: 0,
			},
			dir.path().to_path_buf(),
		);

		let job = test_job(MediaSource::Upload { path: audio_path }, "clip.wav", "gemini-2.5-flash", None);
		pipeline.run_job(&job).await.unwrap();

		let row = store.get(job.job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Completed);
		assert_eq!(row.split_depth, Some(0));
	}

	#[tokio::test]
	async fn unsplittable_short_clip_failure_is_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let audio_path = dir.path().join("clip.wav");
		write_silence_wav(&audio_path, 16000, 2.0);

		let store = test_store().await;
		let pipeline = test_pipeline(
			store.clone(),
			TranscribeResult {
				success: false,
				text: "[content blocked by provider: SAFETY]".to_string(),
				input_tokens: 5,
				output_tokens: 0,
			},
			TranslateResult {
				success: true,
				text: String::new(),
				input_tokens: 0,
				output_tokens: 0,
			},
			dir.path().to_path_buf(),
		);

		let job = test_job(MediaSource::Upload { path: audio_path }, "clip.wav", "gemini-2.5-flash", None);
		let result = pipeline.run_job(&job).await;
		assert!(matches!(result, Err(PipelineError::Fatal(_))));

		let row = store.get(job.job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Failed);
	}

	#[tokio::test]
	async fn translation_happy_path_records_translated_text() {
		let dir = tempfile::tempdir().unwrap();
		let audio_path = dir.path().join("clip.wav");
		write_silence_wav(&audio_path, 16000, 2.0);

		let store = test_store().await;
		let pipeline = test_pipeline(
			store.clone(),
			TranscribeResult {
				success: true,
				text: "[00:00.00]hello\n".to_string(),
				input_tokens: 20,
				output_tokens: 5,
			},
			TranslateResult {
				success: true,
				text: "[00:00.00]hola\n".to_string(),
				input_tokens: 20,
				output_tokens: 5,
			},
			dir.path().to_path_buf(),
		);

		let job = test_job(MediaSource::Upload { path: audio_path }, "clip.wav", "gemini-2.5-flash", Some("es".to_string()));
		pipeline.run_job(&job).await.unwrap();

		let row = store.get(job.job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Completed);
		assert!(row.total_tokens.unwrap() > 0);
	}

	#[tokio::test]
	async fn translation_failure_is_absorbed_as_non_fatal() {
		let dir = tempfile::tempdir().unwrap();
		let audio_path = dir.path().join("clip.wav");
		write_silence_wav(&audio_path, 16000, 2.0);

		let store = test_store().await;
		let pipeline = test_pipeline(
			store.clone(),
			TranscribeResult {
				success: true,
				text: "[00:00.00]hello\n".to_string(),
				input_tokens: 20,
				output_tokens: 5,
			},
			TranslateResult {
				success: false,
				text: "[content blocked by provider: SAFETY]".to_string(),
				input_tokens: 20,
				output_tokens: 0,
			},
			dir.path().to_path_buf(),
		);

		let job = test_job(MediaSource::Upload { path: audio_path }, "clip.wav", "gemini-2.5-flash", Some("es".to_string()));
		pipeline.run_job(&job).await.unwrap();

		let row = store.get(job.job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Completed);
	}

	#[tokio::test]
	async fn long_clip_splits_once_when_whole_segment_attempt_fails() {
		let dir = tempfile::tempdir().unwrap();
		let audio_path = dir.path().join("clip.wav");
		write_silence_wav(&audio_path, 16000, 200.0);

		let store = test_store().await;

		struct SplitOnceAdapter {
			calls: std::sync::atomic::AtomicUsize,
		}

		#[async_trait]
		impl ModelAdapter for SplitOnceAdapter {
			async fn transcribe(&self, _req: TranscribeRequest) -> Result<model_adapter::TranscribeResult, model_adapter::ModelAdapterError> {
				let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
				if call == 0 {
					return Ok(model_adapter::TranscribeResult {
						success: false,
						text: "[content blocked by provider: SAFETY]".to_string(),
						input_tokens: 10,
						output_tokens: 0,
					});
				}
				Ok(model_adapter::TranscribeResult {
					success: true,
					text: "[00:00.00]segment\n".to_string(),
					input_tokens: 30,
					output_tokens: 8,
				})
			}

			async fn translate(&self, _req: TranslateRequest) -> Result<model_adapter::TranslateResult, model_adapter::ModelAdapterError> {
				Ok(model_adapter::TranslateResult {
					success: true,
					text: String::new(),
					input_tokens: 0,
					output_tokens: 0,
				})
			}

			async fn release(&self) -> Result<(), model_adapter::ModelAdapterError> {
				Ok(())
			}
		}

		let mut registry = ProviderRegistry::test();
		registry.register("mock", || {
			Arc::new(SplitOnceAdapter { calls: std::sync::atomic::AtomicUsize::new(0) }) as Arc<dyn ModelAdapter>
		});

		let pipeline = Pipeline::new(
			store.clone(),
			Arc::new(InMemoryEventBus::default()),
			Arc::new(NullVad),
			Arc::new(registry),
			Arc::new(StubFetcher),
			dir.path().to_path_buf(),
			"mock",
		);

		let job = test_job(MediaSource::Upload { path: audio_path }, "clip.wav", "gemini-2.5-flash", None);
		pipeline.run_job(&job).await.unwrap();

		let row = store.get(job.job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Completed);
		assert_eq!(row.split_depth, Some(1));
	}

	#[tokio::test]
	async fn opaque_container_skips_local_splitting() {
		let dir = tempfile::tempdir().unwrap();
		let audio_path = dir.path().join("clip.mp3");
		tokio::fs::write(&audio_path, b"not a real mp3, opaque path only").await.unwrap();

		let store = test_store().await;
		let pipeline = test_pipeline(
			store.clone(),
			TranscribeResult {
				success: true,
				text: "[00:00.00]hello\n".to_string(),
				input_tokens: 20,
				output_tokens: 5,
			},
			TranslateResult {
				success: true,
				text: String::new(),
				input_tokens: 0,
				output_tokens: 0,
			},
			dir.path().to_path_buf(),
		);

		let job = test_job(MediaSource::Upload { path: audio_path }, "clip.mp3", "gemini-2.5-flash", None);
		pipeline.run_job(&job).await.unwrap();

		let row = store.get(job.job_id).await.unwrap().unwrap();
		assert_eq!(row.status, JobStatus::Completed);
		assert_eq!(row.audio_duration_seconds, Some(0.0));
	}
}
