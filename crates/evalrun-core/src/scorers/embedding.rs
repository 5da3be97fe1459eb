use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use strsim::sorensen_dice;

use crate::scorer::{bounded, config_mismatch, reference, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// Text embedding backend used by `similar` rubrics.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// `similar`: cosine similarity of embeddings when an embedder is configured,
/// Sørensen–Dice bigram similarity otherwise.
pub struct SimilarScorer {
    embedder: Option<Arc<dyn Embedder>>,
}

impl SimilarScorer {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Scorer for SimilarScorer {
    fn name(&self) -> &'static str {
        "similar"
    }

    async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
        let RubricConfig::Similar(cfg) = config else {
            return Err(config_mismatch(self.name(), config));
        };
        let expected = reference(cfg.value.as_deref(), input.content)?.trim();
        let output = input.answer.trim();

        let Some(embedder) = &self.embedder else {
            return Ok(Score::new(sorensen_dice(expected, output)).with_reason("dice similarity"));
        };

        let e_vec = bounded(input.call_timeout, "embedding call", embedder.embed(expected)).await?;
        let o_vec = bounded(input.call_timeout, "embedding call", embedder.embed(output)).await?;
        let similarity = cosine_similarity(&e_vec, &o_vec).clamp(0.0, 1.0);
        Ok(Score::new(similarity).with_reason("embedding cosine similarity"))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (a_val, b_val) in a.iter().zip(b.iter()) {
        let x = *a_val as f64;
        let y = *b_val as f64;

        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SimilarityConfig, TestCaseContent};

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn similar(value: &str) -> RubricConfig {
        RubricConfig::Similar(SimilarityConfig {
            value: Some(value.to_string()),
            threshold: Some(0.8),
        })
    }

    #[tokio::test]
    async fn test_dice_fallback() {
        let content = TestCaseContent::new("q");
        let scorer = SimilarScorer::new(None);
        let same = scorer.score(&similar("night"), &ScoreInput::new("night", &content)).await.unwrap();
        assert_eq!(same.value, 1.0);
        let other = scorer.score(&similar("night"), &ScoreInput::new("zzz", &content)).await.unwrap();
        assert_eq!(other.value, 0.0);
    }

    #[tokio::test]
    async fn test_embedding_cosine() {
        let content = TestCaseContent::new("q");
        let scorer = SimilarScorer::new(Some(Arc::new(LengthEmbedder)));
        let score = scorer.score(&similar("abc"), &ScoreInput::new("xyz", &content)).await.unwrap();
        assert!((score.value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
