use anyhow::Result;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::scorer::{config_mismatch, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// Parses the answer as JSON and validates it against a JSON schema.
pub struct JsonSchemaScorer;

#[async_trait]
impl Scorer for JsonSchemaScorer {
	fn name(&self) -> &'static str {
		"json_schema"
	}

	async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
		let RubricConfig::JsonSchema(cfg) = config else {
			return Err(config_mismatch(self.name(), config));
		};
		let schema = compile_schema(&cfg.schema)?;

		let parsed: Value = match serde_json::from_str(strip_code_fence(input.answer)) {
			Ok(v) => v,
			Err(e) => return Ok(Score::binary(false).with_reason(format!("answer is not valid JSON: {e}"))),
		};

		let score = match schema.validate(&parsed) {
			Ok(()) => Score::binary(true),
			Err(errors) => {
				let error_msgs: Vec<String> = errors
					.map(|e| format!("{}: {}", e.instance_path, e))
					.collect();
				Score::binary(false).with_reason(error_msgs.join("; "))
			}
		};
		Ok(score)
	}
}

pub(crate) fn compile_schema(schema: &Value) -> Result<JSONSchema> {
	JSONSchema::compile(schema).map_err(|e| anyhow::anyhow!("Invalid JSON schema: {}", e))
}

/// Agents often wrap JSON in a markdown fence.
fn strip_code_fence(answer: &str) -> &str {
	let trimmed = answer.trim();
	let Some(rest) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let body = match rest.find('\n') {
		Some(idx) => &rest[idx + 1..],
		None => rest,
	};
	body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{JsonSchemaConfig, TestCaseContent};

	fn person_schema() -> RubricConfig {
		RubricConfig::JsonSchema(JsonSchemaConfig {
			schema: serde_json::json!({
				"type": "object",
				"properties": {
					"name": {"type": "string"},
					"age": {"type": "number"}
				},
				"required": ["name", "age"]
			}),
		})
	}

	#[tokio::test]
	async fn test_json_with_schema() {
		let content = TestCaseContent::new("q");
		let input = ScoreInput::new(r#"{"name": "John", "age": 30}"#, &content);
		let score = JsonSchemaScorer.score(&person_schema(), &input).await.unwrap();
		assert_eq!(score.value, 1.0);
	}

	#[tokio::test]
	async fn test_json_schema_fail() {
		let content = TestCaseContent::new("q");
		let input = ScoreInput::new(r#"{"name": "John"}"#, &content);
		let score = JsonSchemaScorer.score(&person_schema(), &input).await.unwrap();
		assert_eq!(score.value, 0.0);
		assert!(score.reason.is_some());
	}

	#[tokio::test]
	async fn test_json_not_parseable() {
		let content = TestCaseContent::new("q");
		let input = ScoreInput::new("name: John", &content);
		let score = JsonSchemaScorer.score(&person_schema(), &input).await.unwrap();
		assert_eq!(score.value, 0.0);
	}

	#[tokio::test]
	async fn test_json_inside_code_fence() {
		let content = TestCaseContent::new("q");
		let input = ScoreInput::new("```json\n{\"name\": \"Ada\", \"age\": 36}\n```", &content);
		let score = JsonSchemaScorer.score(&person_schema(), &input).await.unwrap();
		assert_eq!(score.value, 1.0);
	}

	#[test]
	fn test_strip_code_fence() {
		assert_eq!(strip_code_fence("  {}  "), "{}");
		assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
	}
}
