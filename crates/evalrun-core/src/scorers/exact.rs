use anyhow::Result;
use async_trait::async_trait;

use crate::scorer::{config_mismatch, normalize, reference, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// `equals`, `starts-with` and `ends-with`.
pub struct ExactMatchScorer;

#[async_trait]
impl Scorer for ExactMatchScorer {
	fn name(&self) -> &'static str {
		"exact_match"
	}

	async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
		let (cfg, anchor) = match config {
			RubricConfig::Equals(c) => (c, Anchor::Whole),
			RubricConfig::StartsWith(c) => (c, Anchor::Start),
			RubricConfig::EndsWith(c) => (c, Anchor::End),
			other => return Err(config_mismatch(self.name(), other)),
		};
		let expected = reference(cfg.value.as_deref(), input.content)?;
		let answer = normalize(input.answer, cfg.case_sensitive);
		let expected = normalize(expected, cfg.case_sensitive);
		let hit = match anchor {
			Anchor::Whole => answer == expected,
			Anchor::Start => answer.starts_with(expected.as_str()),
			Anchor::End => answer.ends_with(expected.as_str()),
		};
		Ok(Score::binary(hit))
	}
}

enum Anchor {
	Whole,
	Start,
	End,
}

/// `any-of`: the answer equals one of the listed values.
pub struct AnyOfScorer;

#[async_trait]
impl Scorer for AnyOfScorer {
	fn name(&self) -> &'static str {
		"any_of"
	}

	async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
		let RubricConfig::AnyOf(cfg) = config else {
			return Err(config_mismatch(self.name(), config));
		};
		let answer = normalize(input.answer, cfg.case_sensitive);
		let hit = cfg
			.values
			.iter()
			.find(|v| normalize(v, cfg.case_sensitive) == answer);
		Ok(match hit {
			Some(v) => Score::binary(true).with_reason(format!("matched `{v}`")),
			None => Score::binary(false),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{AnyOfConfig, TestCaseContent, ValueConfig};

	fn value(v: Option<&str>, case_sensitive: bool) -> ValueConfig {
		ValueConfig {
			value: v.map(str::to_string),
			case_sensitive,
		}
	}

	#[tokio::test]
	async fn test_equals_value() {
		let content = TestCaseContent::new("q");
		let cfg = RubricConfig::Equals(value(Some("42"), false));
		let score = ExactMatchScorer.score(&cfg, &ScoreInput::new(" 42\n", &content)).await.unwrap();
		assert_eq!(score.value, 1.0);
	}

	#[tokio::test]
	async fn test_equals_falls_back_to_expected() {
		let content = TestCaseContent::new("q").with_expected("Paris");
		let cfg = RubricConfig::Equals(value(None, false));
		let score = ExactMatchScorer.score(&cfg, &ScoreInput::new("paris", &content)).await.unwrap();
		assert_eq!(score.value, 1.0);

		let strict = RubricConfig::Equals(value(None, true));
		let score = ExactMatchScorer.score(&strict, &ScoreInput::new("paris", &content)).await.unwrap();
		assert_eq!(score.value, 0.0);
	}

	#[tokio::test]
	async fn test_missing_reference_is_a_fault() {
		let content = TestCaseContent::new("q");
		let cfg = RubricConfig::Equals(value(None, false));
		assert!(ExactMatchScorer.score(&cfg, &ScoreInput::new("x", &content)).await.is_err());
	}

	#[tokio::test]
	async fn test_starts_and_ends_with() {
		let content = TestCaseContent::new("q");
		let starts = RubricConfig::StartsWith(value(Some("the answer"), false));
		let ends = RubricConfig::EndsWith(value(Some("42."), false));
		let input = ScoreInput::new("The answer is 42.", &content);
		assert_eq!(ExactMatchScorer.score(&starts, &input).await.unwrap().value, 1.0);
		assert_eq!(ExactMatchScorer.score(&ends, &input).await.unwrap().value, 1.0);
	}

	#[tokio::test]
	async fn test_any_of() {
		let content = TestCaseContent::new("q");
		let cfg = RubricConfig::AnyOf(AnyOfConfig {
			values: vec!["yes".into(), "true".into()],
			case_sensitive: false,
		});
		assert_eq!(AnyOfScorer.score(&cfg, &ScoreInput::new("TRUE", &content)).await.unwrap().value, 1.0);
		assert_eq!(AnyOfScorer.score(&cfg, &ScoreInput::new("no", &content)).await.unwrap().value, 0.0);
	}

	#[tokio::test]
	async fn test_wrong_config_is_rejected() {
		let content = TestCaseContent::new("q");
		let cfg = RubricConfig::Contains(value(Some("x"), false));
		assert!(ExactMatchScorer.score(&cfg, &ScoreInput::new("x", &content)).await.is_err());
	}
}
