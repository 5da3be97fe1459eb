use anyhow::Result;
use async_trait::async_trait;

use crate::types::RubricType;

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeRequest {
    /// `llm-rubric`, `factuality` or `answer-relevance`.
    pub kind: RubricType,
    pub criteria: String,
    pub answer: String,
    pub expected: Option<String>,
    /// The question the agent was asked.
    pub input: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub system_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub score: f64,
    pub reason: Option<String>,
}

/// External LLM judge.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    async fn judge(&self, request: JudgeRequest) -> Result<JudgeVerdict>;
}

pub(crate) fn default_criteria(kind: RubricType) -> Option<&'static str> {
    match kind {
        RubricType::Factuality => Some(
            "Is the answer factually consistent with the reference answer? \
             Score 1 when consistent, 0 when it contradicts the reference.",
        ),
        RubricType::AnswerRelevance => Some(
            "Does the answer directly address the question that was asked? \
             Score 1 for a fully relevant answer, 0 for an unrelated one.",
        ),
        _ => None,
    }
}
