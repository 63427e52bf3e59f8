//! Stage-4 prompt composition: a default transcription prompt, a job-supplied
//! custom prompt, or an alignment-aware variant when the job carries verbatim
//! reference text the transcript should stay aligned to.

const DEFAULT_TRANSCRIBE_PROMPT: &str = "Transcribe this audio clip verbatim. Format the output as LRC, one line per \
utterance as [MM:SS.fff]text, prefixing each line with \"Speaker N: \" when more than one speaker is audible.";

const ALIGNMENT_TRANSCRIBE_PROMPT_SUFFIX: &str =
	"The transcript will later be aligned against a known reference text; keep each LRC line to a single short utterance so line-level alignment stays accurate.";

/// Picks the transcription prompt for a job: verbatim reference text takes
/// priority (it drives the alignment-aware variant), then a job-supplied
/// custom prompt, then the default.
#[must_use]
pub fn transcribe_prompt(reference_text: Option<&str>, custom_prompt: Option<&str>) -> String {
	if let Some(reference) = reference_text {
		return format!("{DEFAULT_TRANSCRIBE_PROMPT} {ALIGNMENT_TRANSCRIBE_PROMPT_SUFFIX} Reference text to align against:\n{reference}");
	}
	if let Some(custom) = custom_prompt {
		return custom.to_string();
	}
	DEFAULT_TRANSCRIBE_PROMPT.to_string()
}

#[must_use]
pub fn translate_prompt(target_language: &str) -> String {
	format!("Translate the text of each LRC line into {target_language}. Preserve every [MM:SS.fff] timestamp exactly and keep one output line per input line.")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_prompt_has_no_alignment_suffix() {
		let prompt = transcribe_prompt(None, None);
		assert!(!prompt.contains("aligned"));
		assert_eq!(prompt, DEFAULT_TRANSCRIBE_PROMPT);
	}

	#[test]
	fn alignment_prompt_added_when_reference_text_present() {
		let prompt = transcribe_prompt(Some("hello there"), None);
		assert!(prompt.contains("aligned"));
		assert!(prompt.contains("hello there"));
	}

	#[test]
	fn custom_prompt_used_when_no_reference_text() {
		let prompt = transcribe_prompt(None, Some("a custom prompt"));
		assert_eq!(prompt, "a custom prompt");
	}

	#[test]
	fn reference_text_takes_priority_over_custom_prompt() {
		let prompt = transcribe_prompt(Some("ref"), Some("custom"));
		assert!(prompt.contains("ref"));
		assert!(!prompt.contains("custom"));
	}

	#[test]
	fn translate_prompt_names_target_language() {
		let prompt = translate_prompt("es");
		assert!(prompt.contains("es"));
	}
}
