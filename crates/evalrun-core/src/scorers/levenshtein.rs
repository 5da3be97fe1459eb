use anyhow::Result;
use async_trait::async_trait;
use strsim::normalized_levenshtein;

use crate::scorer::{config_mismatch, reference, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// Normalized Levenshtein similarity, 1.0 for identical strings.
pub struct LevenshteinScorer;

#[async_trait]
impl Scorer for LevenshteinScorer {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
        let RubricConfig::Levenshtein(cfg) = config else {
            return Err(config_mismatch(self.name(), config));
        };
        let e = reference(cfg.value.as_deref(), input.content)?.trim();
        let o = input.answer.trim();
        Ok(Score::new(normalized_levenshtein(e, o)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SimilarityConfig, TestCaseContent};

    #[tokio::test]
    async fn test_levenshtein_similarity() {
        let content = TestCaseContent::new("q").with_expected("kitten");
        let cfg = RubricConfig::Levenshtein(SimilarityConfig::default());
        let same = LevenshteinScorer.score(&cfg, &ScoreInput::new("kitten", &content)).await.unwrap();
        assert_eq!(same.value, 1.0);
        let near = LevenshteinScorer.score(&cfg, &ScoreInput::new("sitting", &content)).await.unwrap();
        assert!(near.value > 0.5 && near.value < 0.6, "got {}", near.value);
    }
}
