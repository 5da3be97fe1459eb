use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::judge::{default_criteria, JudgeRequest, LlmJudge};
use crate::scorer::{bounded, config_mismatch, Score, ScoreInput, Scorer};
use crate::types::{RubricConfig, RubricType};

/// `llm-rubric`, `factuality` and `answer-relevance`, delegated to a judge.
pub struct LlmScorer {
    judge: Arc<dyn LlmJudge>,
}

impl LlmScorer {
    pub fn new(judge: Arc<dyn LlmJudge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl Scorer for LlmScorer {
    fn name(&self) -> &'static str {
        "llm_judge"
    }

    async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
        let cfg = match config {
            RubricConfig::LlmRubric(c) | RubricConfig::Factuality(c) | RubricConfig::AnswerRelevance(c) => c,
            other => return Err(config_mismatch(self.name(), other)),
        };
        let kind = config.kind();
        let criteria = match cfg.criteria.as_deref() {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => default_criteria(kind)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("`{kind}` rubric has no criteria"))?,
        };
        if kind == RubricType::Factuality && input.content.expected.is_none() {
            bail!("factuality needs an expected answer");
        }

        let request = JudgeRequest {
            kind,
            criteria,
            answer: input.answer.to_string(),
            expected: input.content.expected.clone(),
            input: input.content.input.clone(),
            model: cfg.model.clone().or_else(|| input.judge_model.map(str::to_string)),
            provider: cfg.provider.clone().or_else(|| input.judge_provider.map(str::to_string)),
            system_role: cfg.system_role.clone(),
        };
        let verdict = bounded(input.call_timeout, "judge call", self.judge.judge(request)).await?;
        if verdict.score.is_nan() {
            bail!("judge returned NaN");
        }

        let score = Score::new(verdict.score.clamp(0.0, 1.0));
        Ok(match verdict.reason {
            Some(reason) => score.with_reason(reason),
            None => score,
        })
    }
}
