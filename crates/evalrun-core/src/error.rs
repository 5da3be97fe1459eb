use thiserror::Error;

use crate::types::RunStatus;

/// Errors raised by the engine itself. Failures of external collaborators are
/// `anyhow::Error` and get contained at the rubric or thread level.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid run config: {0}")]
    InvalidConfig(String),

    #[error("invalid rubric `{rubric}`: {reason}")]
    InvalidRubric { rubric: String, reason: String },

    #[error("dataset unavailable: {0}")]
    Dataset(#[source] anyhow::Error),

    #[error("illegal run transition {from} -> {to}")]
    IllegalTransition { from: RunStatus, to: RunStatus },

    #[error("run cancelled")]
    Cancelled,
}

impl EvalError {
    pub fn invalid_rubric(rubric: impl Into<String>, reason: impl Into<String>) -> Self {
        EvalError::InvalidRubric {
            rubric: rubric.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid extractor pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("pattern `{0}` did not match")]
    NoMatch(String),

    #[error("capture group {0} is empty")]
    EmptyGroup(usize),

    #[error("no non-empty segment around delimiter `{0}`")]
    NoSegment(String),

    #[error("output is empty")]
    EmptyOutput,

    #[error("no choice label found")]
    NoChoice,
}
