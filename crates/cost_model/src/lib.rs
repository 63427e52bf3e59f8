//! Price book and cost accounting for model-adapter token usage.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
	Text,
	Audio,
}

impl ContentType {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Text => "text",
			Self::Audio => "audio",
		}
	}
}

#[derive(Debug, Clone)]
pub struct CostItem {
	pub model: String,
	pub task_name: String,
	pub content_type: ContentType,
	pub input_tokens: u64,
	pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
	pub input_text_per_million: f64,
	pub input_audio_per_million: f64,
	pub output_text_per_million: f64,
}

impl ModelPrice {
	const fn input_rate(&self, content_type: ContentType) -> f64 {
		match content_type {
			ContentType::Text => self.input_text_per_million,
			ContentType::Audio => self.input_audio_per_million,
		}
	}
}

/// Price book, one row per supported model id. There is deliberately no
/// "default" fallback row: a model id with no entry here is a configuration
/// error, rejected at admission time rather than silently under/over-billed.
static PRICE_BOOK: Lazy<HashMap<&'static str, ModelPrice>> = Lazy::new(|| {
	HashMap::from([
		(
			"gemini-2.5-flash",
			ModelPrice {
				input_text_per_million: 0.30,
				input_audio_per_million: 1.00,
				output_text_per_million: 2.50,
			},
		),
		(
			"gemini-1.5-pro-latest",
			ModelPrice {
				input_text_per_million: 1.25,
				input_audio_per_million: 1.25,
				output_text_per_million: 5.00,
			},
		),
	])
});

#[derive(Debug, thiserror::Error)]
pub enum CostModelError {
	#[error("no price book entry for model '{0}'")]
	UnknownModel(String),
}

/// Returns `Ok(())` if `model` has a price book entry, used by the Intake
/// API to reject a submission before it is ever enqueued.
pub fn validate_model(model: &str) -> Result<(), CostModelError> {
	if PRICE_BOOK.contains_key(model) {
		Ok(())
	} else {
		Err(CostModelError::UnknownModel(model.to_string()))
	}
}

#[derive(Debug, Clone)]
pub struct LineItem {
	pub task_name: String,
	pub content_type: ContentType,
	pub input_tokens: u64,
	pub output_tokens: u64,
	pub tokens: u64,
	pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct CostBreakdown {
	pub total_tokens: u64,
	pub cost: f64,
	pub line_items: Vec<LineItem>,
}

/// Sums `items` into a total cost and per-task breakdown.
///
/// # Errors
/// Returns [`CostModelError::UnknownModel`] if any item names a model with
/// no price book entry.
pub fn calculate_cost(items: &[CostItem]) -> Result<CostBreakdown, CostModelError> {
	let mut line_items = Vec::with_capacity(items.len());
	let mut total_tokens = 0u64;
	let mut total_cost = 0.0;

	for item in items {
		let price = PRICE_BOOK.get(item.model.as_str()).ok_or_else(|| CostModelError::UnknownModel(item.model.clone()))?;

		let input_cost = (item.input_tokens as f64 / 1_000_000.0) * price.input_rate(item.content_type);
		let output_cost = (item.output_tokens as f64 / 1_000_000.0) * price.output_text_per_million;
		let item_cost = input_cost + output_cost;
		let item_tokens = item.input_tokens + item.output_tokens;

		total_tokens += item_tokens;
		total_cost += item_cost;
		line_items.push(LineItem {
			task_name: item.task_name.clone(),
			content_type: item.content_type,
			input_tokens: item.input_tokens,
			output_tokens: item.output_tokens,
			tokens: item_tokens,
			cost: item_cost,
		});
	}

	Ok(CostBreakdown {
		total_tokens,
		cost: total_cost,
		line_items,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_unknown_model() {
		assert!(validate_model("not-a-real-model").is_err());
		assert!(validate_model("gemini-2.5-flash").is_ok());
	}

	#[test]
	fn computes_cost_for_audio_transcription_item() {
		let items = vec![CostItem {
			model: "gemini-2.5-flash".to_string(),
			task_name: "total_transcription".to_string(),
			content_type: ContentType::Audio,
			input_tokens: 1_000_000,
			output_tokens: 500_000,
		}];
		let result = calculate_cost(&items).unwrap();
		assert!((result.cost - (1.00 + 1.25)).abs() < 1e-9);
		assert_eq!(result.total_tokens, 1_500_000);
	}

	#[test]
	fn sums_multiple_line_items() {
		let items = vec![
			CostItem {
				model: "gemini-2.5-flash".to_string(),
				task_name: "total_transcription".to_string(),
				content_type: ContentType::Audio,
				input_tokens: 1_000_000,
				output_tokens: 0,
			},
			CostItem {
				model: "gemini-2.5-flash".to_string(),
				task_name: "total_translation".to_string(),
				content_type: ContentType::Text,
				input_tokens: 1_000_000,
				output_tokens: 0,
			},
		];
		let result = calculate_cost(&items).unwrap();
		assert_eq!(result.line_items.len(), 2);
		assert!((result.cost - (1.00 + 0.30)).abs() < 1e-9);
	}

	#[test]
	fn fails_fast_on_unknown_model_in_batch() {
		let items = vec![CostItem {
			model: "unknown-model".to_string(),
			task_name: "x".to_string(),
			content_type: ContentType::Text,
			input_tokens: 1,
			output_tokens: 1,
		}];
		assert!(calculate_cost(&items).is_err());
	}
}
