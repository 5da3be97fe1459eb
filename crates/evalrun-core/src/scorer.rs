use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::types::{RubricConfig, TestCaseContent};

/// Everything a matcher may look at for one answer.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    /// Answer after extraction.
    pub answer: &'a str,
    /// Unmodified agent output.
    pub raw_output: &'a str,
    pub content: &'a TestCaseContent,
    pub judge_model: Option<&'a str>,
    pub judge_provider: Option<&'a str>,
    /// Bound on calls to a judge, sandbox or embedder.
    pub call_timeout: Option<Duration>,
}

impl<'a> ScoreInput<'a> {
    pub fn new(answer: &'a str, content: &'a TestCaseContent) -> Self {
        Self {
            answer,
            raw_output: answer,
            content,
            judge_model: None,
            judge_provider: None,
            call_timeout: None,
        }
    }

    pub fn with_answer(&self, answer: &'a str) -> Self {
        Self { answer, ..*self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub value: f64,
    pub reason: Option<String>,
}

impl Score {
    pub fn new(value: f64) -> Self {
        Self { value, reason: None }
    }

    pub fn binary(ok: bool) -> Self {
        Self::new(if ok { 1.0 } else { 0.0 })
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A matching strategy registered for one or more rubric types.
///
/// An `Err` is a scoring fault: the engine records it as a zero score with the
/// error as reason.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score>;
}

/// Explicit reference value, else the test case's `expected`.
pub(crate) fn reference<'a>(explicit: Option<&'a str>, content: &'a TestCaseContent) -> Result<&'a str> {
    explicit
        .or(content.expected.as_deref())
        .ok_or_else(|| anyhow!("no reference value: rubric has no value and test case has no expected"))
}

pub(crate) fn normalize(s: &str, case_sensitive: bool) -> String {
    let trimmed = s.trim();
    if case_sensitive {
        trimmed.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Runs one external scoring call under `limit`. Expiry is a scoring fault.
pub(crate) async fn bounded<T>(
    limit: Option<Duration>,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| anyhow!("{what} timed out after {}ms", limit.as_millis()))?,
        None => call.await,
    }
}

pub(crate) fn config_mismatch(scorer: &str, config: &RubricConfig) -> anyhow::Error {
    anyhow!("scorer `{}` cannot handle `{}` rubrics", scorer, config.kind())
}
