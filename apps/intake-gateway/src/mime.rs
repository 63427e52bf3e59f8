//! MIME allow-list for `/submit`, mirrored from the reference upload
//! handler's `SUPPORTED_MIME_TYPES` set.

use std::collections::HashSet;

use once_cell::sync::Lazy;

pub static SUPPORTED_MIME_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
	[
		"audio/wav",
		"audio/x-wav",
		"audio/wave",
		"audio/mpeg",
		"audio/mp3",
		"audio/flac",
		"audio/opus",
		"audio/m4a",
		"audio/x-m4a",
		"audio/mp4",
		"audio/aac",
		"audio/webm",
		"video/mp4",
		"video/mpeg",
		"video/webm",
		"video/quicktime",
		"video/x-flv",
		"video/x-ms-wmv",
		"video/3gpp",
	]
	.into_iter()
	.collect()
});

#[must_use]
pub fn is_supported(content_type: &str) -> bool {
	SUPPORTED_MIME_TYPES.contains(content_type)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_known_audio_types() {
		assert!(is_supported("audio/mpeg"));
		assert!(is_supported("audio/wav"));
	}

	#[test]
	fn accepts_known_video_types() {
		assert!(is_supported("video/mp4"));
	}

	#[test]
	fn rejects_unknown_types() {
		assert!(!is_supported("application/pdf"));
		assert!(!is_supported(""));
	}
}
