use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::scorer::{config_mismatch, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// Checks if the answer matches a regex pattern.
pub struct RegexScorer;

#[async_trait]
impl Scorer for RegexScorer {
	fn name(&self) -> &'static str {
		"regex"
	}

	async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
		let RubricConfig::Regex(cfg) = config else {
			return Err(config_mismatch(self.name(), config));
		};
		let pattern = Regex::new(&cfg.pattern)?;

		match pattern.find(input.answer) {
			Some(m) => Ok(Score::binary(true).with_reason(format!("matched `{}`", m.as_str()))),
			None => Ok(Score::binary(false)),
		}
	}
}
