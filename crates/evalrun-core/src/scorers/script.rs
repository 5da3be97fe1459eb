use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::sandbox::{ScriptLanguage, ScriptRequest, ScriptSandbox};
use crate::scorer::{bounded, config_mismatch, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

/// `javascript` and `python`: user code run in an external sandbox.
pub struct ScriptScorer {
	sandbox: Arc<dyn ScriptSandbox>,
}

impl ScriptScorer {
	pub fn new(sandbox: Arc<dyn ScriptSandbox>) -> Self {
		Self { sandbox }
	}
}

#[async_trait]
impl Scorer for ScriptScorer {
	fn name(&self) -> &'static str {
		"script"
	}

	async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
		let (cfg, language) = match config {
			RubricConfig::Javascript(c) => (c, ScriptLanguage::Javascript),
			RubricConfig::Python(c) => (c, ScriptLanguage::Python),
			other => return Err(config_mismatch(self.name(), other)),
		};
		let request = ScriptRequest {
			language,
			code: cfg.code.clone(),
			answer: input.answer.to_string(),
			expected: input.content.expected.clone(),
		};
		let value = bounded(input.call_timeout, "sandbox call", self.sandbox.execute(request)).await?;
		if value.is_nan() {
			bail!("script returned NaN");
		}
		Ok(Score::new(value.clamp(0.0, 1.0)))
	}
}
