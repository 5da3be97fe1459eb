use chrono::Utc;
use uuid::Uuid;

use crate::error::EvalError;
use crate::types::{EvalRun, RunConfig, RunStatus, RunSubmission};

/// Accepts a run request and creates the run in `idle`.
pub fn submit(submission: RunSubmission) -> Result<EvalRun, EvalError> {
	if submission.dataset_id.trim().is_empty() {
		return Err(EvalError::InvalidConfig("datasetId is required".to_string()));
	}
	let config = RunConfig::from(submission.config);
	validate_run_config(&config)?;

	Ok(EvalRun {
		id: Uuid::new_v4().to_string(),
		dataset_id: submission.dataset_id,
		target_agent_id: submission.target_agent_id,
		name: submission.name,
		status: RunStatus::Idle,
		config,
		metrics: None,
		started_at: None,
		created_at: Utc::now(),
	})
}

pub fn validate_run_config(config: &RunConfig) -> Result<(), EvalError> {
	if config.k == Some(0) {
		return Err(EvalError::InvalidConfig("k must be at least 1".to_string()));
	}
	if config.max_concurrency == Some(0) {
		return Err(EvalError::InvalidConfig("maxConcurrency must be at least 1".to_string()));
	}
	if config.timeout == Some(0) {
		return Err(EvalError::InvalidConfig("timeout must be positive".to_string()));
	}
	if config.scorer_timeout == Some(0) {
		return Err(EvalError::InvalidConfig("scorerTimeout must be positive".to_string()));
	}
	if let Some(t) = config.pass_threshold {
		if !(0.0..=1.0).contains(&t) {
			return Err(EvalError::InvalidConfig(format!(
				"passThreshold must be within [0, 1], got {t}"
			)));
		}
	}
	Ok(())
}
