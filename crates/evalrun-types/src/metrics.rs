use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Run-level statistics.
///
/// `cost`, `tokens`, `duration`, `steps`, `llm_calls` and `tool_calls` sum the
/// per-case means; `total_cost`, `total_tokens` and `total_duration` sum the raw
/// K-thread totals. The `per_case_*` fields are only filled in when the run is
/// finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRunMetrics {
	pub total_cases: usize,
	pub completed_cases: usize,
	pub passed_cases: usize,
	pub failed_cases: usize,
	pub error_cases: usize,
	pub timeout_cases: usize,
	pub pass_rate: f64,
	pub average_score: f64,
	/// Fraction of completed cases where at least one thread passed.
	pub pass_at_k: f64,
	/// Fraction of completed cases where every thread passed.
	pub pass_all_k: f64,
	pub cost: f64,
	pub tokens: f64,
	pub duration: f64,
	pub steps: f64,
	pub llm_calls: f64,
	pub tool_calls: f64,
	pub total_cost: f64,
	pub total_tokens: f64,
	pub total_duration: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub per_case_cost: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub per_case_tokens: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub per_case_steps: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub per_case_llm_calls: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub per_case_tool_calls: Option<f64>,
	/// Mean score per rubric id across scored threads.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub rubric_scores: BTreeMap<String, f64>,
}

impl EvalRunMetrics {
	pub fn new(total_cases: usize) -> Self {
		Self {
			total_cases,
			..Self::default()
		}
	}
}
