use anyhow::Result;
use async_trait::async_trait;

use crate::scorer::{config_mismatch, reference, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// Checks if the answer contains the reference substring.
pub struct ContainsScorer;

#[async_trait]
impl Scorer for ContainsScorer {
    fn name(&self) -> &'static str {
        "contains"
    }

    async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
        let RubricConfig::Contains(cfg) = config else {
            return Err(config_mismatch(self.name(), config));
        };
        let needle = reference(cfg.value.as_deref(), input.content)?.trim();

        let contains = if cfg.case_sensitive {
            input.answer.contains(needle)
        } else {
            input.answer.to_lowercase().contains(&needle.to_lowercase())
        };

        Ok(Score::binary(contains))
    }
}
