//! LRC parsing and SRT/VTT/TXT rendering, plus the timestamp-remap helpers
//! the recursive transcription pipeline needs to stitch split segments back
//! together on the original timeline.

use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

static LRC_LINE: OnceLock<Regex> = OnceLock::new();

fn lrc_line_re() -> &'static Regex {
	LRC_LINE.get_or_init(|| Regex::new(r"^\[(\d{2}):(\d{2})\.(\d{2,3})\](.*)$").expect("static LRC regex is valid"))
}

/// Seconds added after the last subtitle line's own timestamp when no
/// following line exists to derive an end time from.
pub const TRAILING_LINE_PADDING_SECS: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct LrcLine {
	pub start_secs: f64,
	pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleDocument {
	pub lines: Vec<LrcLine>,
}

#[derive(Debug, Clone)]
pub struct SubtitleArtifacts {
	pub lrc: String,
	pub srt: String,
	pub vtt: String,
	pub txt: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SubtitleFormatError {
	#[error("speech interval list is empty, cannot remap timestamps")]
	EmptyIntervals,
}

/// Parses LRC text into timestamped lines. Lines that don't match the
/// `[MM:SS.fff] text` shape are silently skipped rather than rejected, and a
/// leading `Speaker N:` label (if present) is stripped from the text.
#[must_use]
pub fn parse_lrc(text: &str) -> Vec<LrcLine> {
	let re = lrc_line_re();
	let mut lines = Vec::new();

	for raw_line in text.lines() {
		let Some(caps) = re.captures(raw_line.trim_end()) else {
			continue;
		};
		let minutes: f64 = caps[1].parse().unwrap_or(0.0);
		let seconds: f64 = caps[2].parse().unwrap_or(0.0);
		let frac_str = &caps[3];
		let frac_scale = 10f64.powi(frac_str.len() as i32);
		let frac: f64 = frac_str.parse().unwrap_or(0.0) / frac_scale;
		let start_secs = minutes * 60.0 + seconds + frac;

		let text = strip_speaker_prefix(caps[4].trim());
		if text.is_empty() {
			continue;
		}

		lines.push(LrcLine { start_secs, text });
	}

	lines
}

fn strip_speaker_prefix(text: &str) -> String {
	if let Some(rest) = text.strip_prefix("Speaker ") {
		if let Some(colon_idx) = rest.find(':') {
			let (label, body) = rest.split_at(colon_idx);
			if label.chars().all(|c| c.is_ascii_digit()) {
				return body[1..].trim().to_string();
			}
		}
	}
	text.to_string()
}

fn seconds_to_timestamp(total_secs: f64, millis_separator: char) -> String {
	let total_secs = total_secs.max(0.0);
	let hours = (total_secs / 3600.0) as u64;
	let minutes = ((total_secs % 3600.0) / 60.0) as u64;
	let seconds = (total_secs % 60.0) as u64;
	let millis = ((total_secs.fract()) * 1000.0).round() as u64;
	format!("{hours:02}:{minutes:02}:{seconds:02}{millis_separator}{millis:03}")
}

fn line_end_secs(lines: &[LrcLine], idx: usize) -> f64 {
	lines.get(idx + 1).map_or(lines[idx].start_secs + TRAILING_LINE_PADDING_SECS, |next| next.start_secs)
}

#[must_use]
pub fn to_srt(lines: &[LrcLine]) -> String {
	let mut out = String::new();
	for (idx, line) in lines.iter().enumerate() {
		let end = line_end_secs(lines, idx);
		let _ = writeln!(out, "{}", idx + 1);
		let _ = writeln!(out, "{} --> {}", seconds_to_timestamp(line.start_secs, ','), seconds_to_timestamp(end, ','));
		let _ = writeln!(out, "{}\n", line.text);
	}
	out
}

#[must_use]
pub fn to_vtt(lines: &[LrcLine]) -> String {
	let mut out = String::from("WEBVTT\n\n");
	for (idx, line) in lines.iter().enumerate() {
		let end = line_end_secs(lines, idx);
		let _ = writeln!(out, "{} --> {}", seconds_to_timestamp(line.start_secs, '.'), seconds_to_timestamp(end, '.'));
		let _ = writeln!(out, "{}\n", line.text);
	}
	out
}

#[must_use]
pub fn to_txt(lines: &[LrcLine]) -> String {
	lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
}

/// Converts raw LRC text into SRT/VTT/TXT. Empty or fully-unparseable input
/// yields empty artifacts rather than an error, matching the reference
/// converter's tolerant behavior.
#[must_use]
pub fn convert_from_lrc(lrc_text: &str) -> SubtitleArtifacts {
	let lines = parse_lrc(lrc_text);
	SubtitleArtifacts {
		lrc: lrc_text.to_string(),
		srt: to_srt(&lines),
		vtt: to_vtt(&lines),
		txt: to_txt(&lines),
	}
}

/// Shifts every timestamp in `lrc_text` by a constant `offset_secs`. Used to
/// merge the second half of a recursively-split transcription back onto the
/// original timeline.
#[must_use]
pub fn adjust_lrc_timestamps(lrc_text: &str, offset_secs: f64) -> String {
	rewrite_lrc(lrc_text, |start| start + offset_secs)
}

/// Remaps timestamps produced against a concatenated speech-only timeline
/// back onto the original (pre-VAD) timeline, given the ordered list of
/// `(original_start, original_end)` speech intervals that were concatenated.
///
/// # Errors
/// Returns [`SubtitleFormatError::EmptyIntervals`] if `intervals` is empty.
pub fn remap_concatenated_timestamps(lrc_text: &str, intervals: &[(f64, f64)]) -> Result<String, SubtitleFormatError> {
	if intervals.is_empty() {
		return Err(SubtitleFormatError::EmptyIntervals);
	}

	// Cumulative speech-duration boundaries in the concatenated timeline.
	let mut cumulative = Vec::with_capacity(intervals.len());
	let mut acc = 0.0;
	for (start, end) in intervals {
		let dur = (end - start).max(0.0);
		acc += dur;
		cumulative.push(acc);
	}

	let remapped = rewrite_lrc(lrc_text, |concat_time| {
		let mut prev_boundary = 0.0;
		for (idx, boundary) in cumulative.iter().enumerate() {
			if concat_time < *boundary || idx == cumulative.len() - 1 {
				let (orig_start, _) = intervals[idx];
				return orig_start + (concat_time - prev_boundary);
			}
			prev_boundary = *boundary;
		}
		unreachable!("loop always returns on its last iteration")
	});

	Ok(remapped)
}

fn rewrite_lrc(lrc_text: &str, remap: impl Fn(f64) -> f64) -> String {
	let re = lrc_line_re();
	let mut out = String::new();

	for raw_line in lrc_text.lines() {
		let Some(caps) = re.captures(raw_line) else {
			out.push_str(raw_line);
			out.push('\n');
			continue;
		};
		let minutes: f64 = caps[1].parse().unwrap_or(0.0);
		let seconds: f64 = caps[2].parse().unwrap_or(0.0);
		let frac_str = &caps[3];
		let frac_scale = 10f64.powi(frac_str.len() as i32);
		let frac: f64 = frac_str.parse().unwrap_or(0.0) / frac_scale;
		let original_secs = minutes * 60.0 + seconds + frac;

		let new_secs = remap(original_secs).max(0.0);
		let new_minutes = (new_secs / 60.0) as u64;
		let new_seconds_frac = new_secs - (new_minutes as f64) * 60.0;
		let _ = writeln!(out, "[{new_minutes:02}:{new_seconds_frac:05.2}]{}", &caps[4]);
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_basic_lrc_lines() {
		let input = "[00:01.50]Hello there\n[00:03.20]Second line\n";
		let lines = parse_lrc(input);
		assert_eq!(lines.len(), 2);
		assert!((lines[0].start_secs - 1.5).abs() < 1e-9);
		assert_eq!(lines[0].text, "Hello there");
	}

	#[test]
	fn strips_speaker_prefix() {
		let input = "[00:00.00]Speaker 1: hi\n";
		let lines = parse_lrc(input);
		assert_eq!(lines[0].text, "hi");
	}

	#[test]
	fn skips_unparseable_lines() {
		let input = "not a subtitle line\n[00:01.00]ok\n";
		let lines = parse_lrc(input);
		assert_eq!(lines.len(), 1);
		assert_eq!(lines[0].text, "ok");
	}

	#[test]
	fn srt_end_time_is_next_lines_start() {
		let lines = vec![
			LrcLine { start_secs: 1.0, text: "a".into() },
			LrcLine { start_secs: 4.0, text: "b".into() },
		];
		let srt = to_srt(&lines);
		assert!(srt.contains("00:00:01,000 --> 00:00:04,000"));
	}

	#[test]
	fn srt_last_line_gets_trailing_padding() {
		let lines = vec![LrcLine { start_secs: 1.0, text: "only".into() }];
		let srt = to_srt(&lines);
		assert!(srt.contains("00:00:01,000 --> 00:00:06,000"));
	}

	#[test]
	fn vtt_has_header_and_dot_separator() {
		let lines = vec![LrcLine { start_secs: 0.0, text: "hi".into() }];
		let vtt = to_vtt(&lines);
		assert!(vtt.starts_with("WEBVTT\n\n"));
		assert!(vtt.contains("00:00:00.000 -->"));
	}

	#[test]
	fn convert_from_lrc_handles_empty_input() {
		let artifacts = convert_from_lrc("");
		assert!(artifacts.lrc.is_empty());
		assert!(artifacts.srt.is_empty());
		assert!(artifacts.vtt.starts_with("WEBVTT"));
		assert!(artifacts.txt.is_empty());
	}

	#[test]
	fn convert_from_lrc_preserves_source_lrc_text() {
		let input = "[00:01.50]Hello there\n";
		let artifacts = convert_from_lrc(input);
		assert_eq!(artifacts.lrc, input);
	}

	#[test]
	fn adjust_lrc_timestamps_shifts_by_offset() {
		let input = "[00:01.00]hi\n";
		let out = adjust_lrc_timestamps(input, 60.0);
		let lines = parse_lrc(&out);
		assert!((lines[0].start_secs - 61.0).abs() < 1e-6);
	}

	#[test]
	fn remap_concatenated_timestamps_maps_into_correct_interval() {
		// Speech-only timeline concatenates [10,15) and [30,40): 5s + 10s.
		let intervals = [(10.0, 15.0), (30.0, 40.0)];
		let input = "[00:02.00]in first gap\n[00:07.00]in second gap\n";
		let out = remap_concatenated_timestamps(input, &intervals).unwrap();
		let lines = parse_lrc(&out);
		// concat t=2 -> within first interval: 10 + 2 = 12
		assert!((lines[0].start_secs - 12.0).abs() < 1e-6);
		// concat t=7 -> past first boundary (5): 30 + (7-5) = 32
		assert!((lines[1].start_secs - 32.0).abs() < 1e-6);
	}

	#[test]
	fn remap_concatenated_timestamps_assigns_exact_boundary_to_following_interval() {
		// Boundary between the two intervals sits at concat_time 5.0 exactly;
		// spec's strict `t < boundary` test means it belongs to the interval
		// that starts there, not the one that ends there.
		let intervals = [(10.0, 15.0), (30.0, 40.0)];
		let input = "[00:05.00]right at the boundary\n";
		let out = remap_concatenated_timestamps(input, &intervals).unwrap();
		let lines = parse_lrc(&out);
		assert!((lines[0].start_secs - 30.0).abs() < 1e-6);
	}

	#[test]
	fn remap_rejects_empty_intervals() {
		let err = remap_concatenated_timestamps("[00:01.00]x\n", &[]).unwrap_err();
		assert!(matches!(err, SubtitleFormatError::EmptyIntervals));
	}
}
