//! Voice activity detection: speech-interval extraction, silence-gap-aware
//! midpoint splitting, and speech-only concatenation.

use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum VadError {
	#[error("invalid sample rate {0}, must be greater than zero")]
	InvalidSampleRate(u32),
	#[error("audio is empty, nothing to analyze")]
	EmptyAudio,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechInterval {
	pub start_secs: f64,
	pub end_secs: f64,
}

impl SpeechInterval {
	#[must_use]
	pub fn duration_secs(&self) -> f64 {
		(self.end_secs - self.start_secs).max(0.0)
	}

	fn is_valid(&self) -> bool {
		self.start_secs >= 0.0 && self.end_secs >= self.start_secs
	}
}

pub trait VadEngine: Send + Sync {
	/// Returns the ordered, non-overlapping speech intervals found in `samples`.
	///
	/// # Errors
	/// Returns [`VadError`] if `sample_rate` is unsupported or `samples` is empty.
	fn intervals(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeechInterval>, VadError>;

	/// Picks a split point near the midpoint of the clip, preferring a
	/// silence gap of at least `min_silence_secs` whose center is closest to
	/// the midpoint. Falls back to the exact midpoint if no such gap exists.
	///
	/// # Errors
	/// Propagates errors from [`VadEngine::intervals`].
	fn split_near_middle(&self, samples: &[f32], sample_rate: u32, min_silence_secs: f64) -> Result<f64, VadError> {
		if samples.is_empty() {
			return Err(VadError::EmptyAudio);
		}
		let duration_secs = samples.len() as f64 / f64::from(sample_rate);
		let midpoint = duration_secs / 2.0;

		let speech = self.intervals(samples, sample_rate)?;
		let gaps = silence_gaps(&speech, duration_secs);

		let best_gap = gaps
			.iter()
			.filter(|g| g.duration_secs() >= min_silence_secs)
			.min_by(|a, b| {
				let da = (gap_center(a) - midpoint).abs();
				let db = (gap_center(b) - midpoint).abs();
				da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
			});

		match best_gap {
			Some(gap) => {
				let split_at = gap_center(gap);
				debug!(split_at, midpoint, "split point chosen from silence gap");
				Ok(split_at)
			}
			None => {
				debug!(midpoint, "no silence gap met threshold, falling back to midpoint");
				Ok(midpoint)
			}
		}
	}

	/// Concatenates only the speech-bearing portions of `samples`, returning
	/// the concatenated audio plus the original-timeline intervals that were
	/// kept (needed later to remap transcribed timestamps back).
	///
	/// # Errors
	/// Propagates errors from [`VadEngine::intervals`].
	fn speech_only(&self, samples: &[f32], sample_rate: u32) -> Result<(Vec<f32>, Vec<SpeechInterval>), VadError> {
		let speech = self.intervals(samples, sample_rate)?;
		let mut concatenated = Vec::new();

		for interval in &speech {
			let start_idx = (interval.start_secs * f64::from(sample_rate)) as usize;
			let end_idx = ((interval.end_secs * f64::from(sample_rate)) as usize).min(samples.len());
			if start_idx < end_idx {
				concatenated.extend_from_slice(&samples[start_idx..end_idx]);
			}
		}

		Ok((concatenated, speech))
	}
}

fn gap_center(gap: &SpeechInterval) -> f64 {
	gap.start_secs + gap.duration_secs() / 2.0
}

/// Complement of `speech` within `[0, duration_secs)`.
fn silence_gaps(speech: &[SpeechInterval], duration_secs: f64) -> Vec<SpeechInterval> {
	let mut gaps = Vec::new();
	let mut cursor = 0.0;

	for interval in speech {
		if interval.start_secs > cursor {
			gaps.push(SpeechInterval {
				start_secs: cursor,
				end_secs: interval.start_secs,
			});
		}
		cursor = cursor.max(interval.end_secs);
	}

	if cursor < duration_secs {
		gaps.push(SpeechInterval { start_secs: cursor, end_secs: duration_secs });
	}

	gaps
}

/// Guards the `f64::from(sample_rate)` divisions used throughout this module
/// against division by zero. Nothing in this system restricts which sample
/// rate a source clip was recorded at.
fn validate_sample_rate(sample_rate: u32) -> Result<(), VadError> {
	if sample_rate == 0 {
		Err(VadError::InvalidSampleRate(sample_rate))
	} else {
		Ok(())
	}
}

/// Energy-gated speech detector: splits audio into fixed-duration frames and
/// classifies a frame as speech when its RMS energy exceeds `energy_threshold`.
/// Adjacent speech frames are merged into a single interval.
///
/// This stands in for the reference deployment's Silero VAD model (a Torch
/// model loaded via `torch.hub`), which has no equivalent pure-Rust artifact
/// to embed here without introducing an ML runtime dependency the rest of
/// this workspace does not otherwise need. See `DESIGN.md`.
pub struct SileroLikeVad {
	frame_duration_ms: u32,
	energy_threshold: f32,
}

impl SileroLikeVad {
	#[must_use]
	pub fn new(energy_threshold: f32) -> Self {
		info!(energy_threshold, "initializing energy-gated VAD");
		Self { frame_duration_ms: 30, energy_threshold }
	}
}

impl Default for SileroLikeVad {
	fn default() -> Self {
		Self::new(0.01)
	}
}

impl VadEngine for SileroLikeVad {
	fn intervals(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeechInterval>, VadError> {
		validate_sample_rate(sample_rate)?;
		if samples.is_empty() {
			return Err(VadError::EmptyAudio);
		}

		let frame_samples = (f64::from(sample_rate) * f64::from(self.frame_duration_ms) / 1000.0) as usize;
		let frame_samples = frame_samples.max(1);

		let mut intervals = Vec::new();
		let mut run_start: Option<usize> = None;

		for (frame_idx, chunk) in samples.chunks(frame_samples).enumerate() {
			let rms = rms_energy(chunk);
			let is_speech = rms >= self.energy_threshold;
			let frame_start_sample = frame_idx * frame_samples;

			match (is_speech, run_start) {
				(true, None) => run_start = Some(frame_start_sample),
				(false, Some(start)) => {
					intervals.push(make_interval(start, frame_start_sample, sample_rate));
					run_start = None;
				}
				_ => {}
			}
		}

		if let Some(start) = run_start {
			intervals.push(make_interval(start, samples.len(), sample_rate));
		}

		Ok(intervals)
	}
}

fn make_interval(start_sample: usize, end_sample: usize, sample_rate: u32) -> SpeechInterval {
	let interval = SpeechInterval {
		start_secs: start_sample as f64 / f64::from(sample_rate),
		end_secs: end_sample as f64 / f64::from(sample_rate),
	};
	debug_assert!(interval.is_valid());
	interval
}

fn rms_energy(frame: &[f32]) -> f32 {
	if frame.is_empty() {
		return 0.0;
	}
	let sum_sq: f32 = frame.iter().map(|s| s * s).sum();
	(sum_sq / frame.len() as f32).sqrt()
}

/// Treats the entire clip as one speech interval. Used when no VAD model is
/// configured — every operation degrades to a no-op over the full clip.
#[derive(Debug, Default)]
pub struct NullVad;

impl VadEngine for NullVad {
	fn intervals(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<SpeechInterval>, VadError> {
		validate_sample_rate(sample_rate)?;
		if samples.is_empty() {
			return Err(VadError::EmptyAudio);
		}
		Ok(vec![SpeechInterval {
			start_secs: 0.0,
			end_secs: samples.len() as f64 / f64::from(sample_rate),
		}])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn silence(sample_rate: u32, secs: f64) -> Vec<f32> {
		vec![0.0; (sample_rate as f64 * secs) as usize]
	}

	fn tone(sample_rate: u32, secs: f64, amplitude: f32) -> Vec<f32> {
		vec![amplitude; (sample_rate as f64 * secs) as usize]
	}

	#[test]
	fn accepts_uncommon_sample_rate() {
		let vad = SileroLikeVad::default();
		assert!(vad.intervals(&[0.0; 100], 44100).is_ok());
	}

	#[test]
	fn rejects_zero_sample_rate() {
		let vad = SileroLikeVad::default();
		assert!(matches!(vad.intervals(&[0.0; 100], 0), Err(VadError::InvalidSampleRate(0))));
	}

	#[test]
	fn detects_a_single_speech_run() {
		let sample_rate = 16000;
		let mut samples = silence(sample_rate, 1.0);
		samples.extend(tone(sample_rate, 1.0, 0.5));
		samples.extend(silence(sample_rate, 1.0));

		let vad = SileroLikeVad::new(0.1);
		let intervals = vad.intervals(&samples, sample_rate).unwrap();
		assert_eq!(intervals.len(), 1);
		assert!(intervals[0].start_secs >= 0.9 && intervals[0].start_secs <= 1.1);
	}

	#[test]
	fn split_near_middle_prefers_silence_gap_closest_to_midpoint() {
		let sample_rate = 16000;
		let mut samples = tone(sample_rate, 2.0, 0.5);
		samples.extend(silence(sample_rate, 2.0));
		samples.extend(tone(sample_rate, 2.0, 0.5));

		let vad = SileroLikeVad::new(0.1);
		let split = vad.split_near_middle(&samples, sample_rate, 1.0).unwrap();
		// total duration 6s, midpoint 3s; silence gap spans [2,4), center 3.0
		assert!((split - 3.0).abs() < 0.2);
	}

	#[test]
	fn split_near_middle_falls_back_to_exact_midpoint_without_gap() {
		let sample_rate = 16000;
		let samples = tone(sample_rate, 4.0, 0.5);
		let vad = SileroLikeVad::new(0.1);
		let split = vad.split_near_middle(&samples, sample_rate, 1.0).unwrap();
		assert!((split - 2.0).abs() < 0.2);
	}

	#[test]
	fn speech_only_concatenates_and_reports_kept_intervals() {
		let sample_rate = 16000;
		let mut samples = tone(sample_rate, 1.0, 0.5);
		samples.extend(silence(sample_rate, 1.0));
		samples.extend(tone(sample_rate, 1.0, 0.5));

		let vad = SileroLikeVad::new(0.1);
		let (concatenated, intervals) = vad.speech_only(&samples, sample_rate).unwrap();
		assert_eq!(intervals.len(), 2);
		assert!(concatenated.len() < samples.len());
	}

	#[test]
	fn null_vad_treats_whole_clip_as_one_interval() {
		let vad = NullVad;
		let samples = tone(16000, 3.0, 0.0);
		let intervals = vad.intervals(&samples, 16000).unwrap();
		assert_eq!(intervals.len(), 1);
		assert!((intervals[0].end_secs - 3.0).abs() < 1e-6);
	}
}
