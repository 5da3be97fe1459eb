use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extractor::ExtractorConfig;
use crate::rubric::{Rubric, RubricType};

/// Named collection of default rubrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Benchmark {
	pub id: String,
	pub identifier: String,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default)]
	pub rubrics: Vec<Rubric>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extractor: Option<ExtractorConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reference_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

/// Eval-mode configuration on a dataset or test case.
///
/// Every known key is a named field; anything else lands in `extra` and is kept
/// as-is without being interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub values: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pattern: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub case_sensitive: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tolerance: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub threshold: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schema: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub criteria: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system_role: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extractor: Option<ExtractorConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inner_matcher: Option<RubricType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rubrics: Option<Vec<Rubric>>,
	/// System prompt handed to the agent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub env_prompt: Option<String>,
	/// Fallback criteria for LLM-judged modes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub judge_prompt: Option<String>,
	#[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
	pub extra: BTreeMap<String, Value>,
}

/// A benchmark instance bound to an owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
	pub id: String,
	#[serde(default)]
	pub benchmark_id: String,
	#[serde(default)]
	pub identifier: String,
	#[serde(default)]
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub eval_mode: Option<RubricType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub eval_config: Option<EvalConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseContent {
	pub input: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub choices: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category: Option<String>,
}

impl TestCaseContent {
	pub fn new(input: impl Into<String>) -> Self {
		Self {
			input: input.into(),
			..Self::default()
		}
	}

	pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
		self.expected = Some(expected.into());
		self
	}

	pub fn with_choices<I, S>(mut self, choices: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.choices = Some(choices.into_iter().map(Into::into).collect());
		self
	}
}

/// One evaluable item within a dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
	pub id: String,
	#[serde(default)]
	pub dataset_id: String,
	pub content: TestCaseContent,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub eval_mode: Option<RubricType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub eval_config: Option<EvalConfig>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sort_order: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<DateTime<Utc>>,
}

impl TestCase {
	pub fn new(id: impl Into<String>, content: TestCaseContent) -> Self {
		Self {
			id: id.into(),
			content,
			..Self::default()
		}
	}

	pub fn with_sort_order(mut self, sort_order: i64) -> Self {
		self.sort_order = Some(sort_order);
		self
	}

	pub fn with_eval_mode(mut self, mode: RubricType, config: EvalConfig) -> Self {
		self.eval_mode = Some(mode);
		self.eval_config = Some(config);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_eval_config_keeps_unknown_keys() {
		let cfg: EvalConfig = serde_json::from_value(json!({
			"value": "42",
			"caseSensitive": true,
			"vendorHint": { "x": 1 }
		}))
		.unwrap();
		assert_eq!(cfg.value.as_deref(), Some("42"));
		assert_eq!(cfg.case_sensitive, Some(true));
		assert_eq!(cfg.extra.get("vendorHint"), Some(&json!({ "x": 1 })));

		let back = serde_json::to_value(&cfg).unwrap();
		assert_eq!(back["vendorHint"]["x"], 1);
	}

	#[test]
	fn test_test_case_wire_shape() {
		let tc: TestCase = serde_json::from_value(json!({
			"id": "tc-1",
			"content": { "input": "2+2?", "expected": "4" },
			"evalMode": "numeric",
			"sortOrder": 3
		}))
		.unwrap();
		assert_eq!(tc.eval_mode, Some(RubricType::Numeric));
		assert_eq!(tc.sort_order, Some(3));
		assert_eq!(tc.content.expected.as_deref(), Some("4"));
	}
}
