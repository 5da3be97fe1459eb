use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extractor::ExtractorConfig;
use crate::metrics::EvalRunMetrics;

/// Lifecycle of an evaluation run. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
	#[default]
	Idle,
	Pending,
	Running,
	Completed,
	Failed,
	Aborted,
}

impl RunStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunStatus::Idle => "idle",
			RunStatus::Pending => "pending",
			RunStatus::Running => "running",
			RunStatus::Completed => "completed",
			RunStatus::Failed => "failed",
			RunStatus::Aborted => "aborted",
		}
	}

	/// Position in the lifecycle; all terminal states share the last rank.
	pub fn rank(&self) -> u8 {
		match self {
			RunStatus::Idle => 0,
			RunStatus::Pending => 1,
			RunStatus::Running => 2,
			RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted => 3,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.rank() == 3
	}

	pub fn to_u8(self) -> u8 {
		match self {
			RunStatus::Idle => 0,
			RunStatus::Pending => 1,
			RunStatus::Running => 2,
			RunStatus::Completed => 3,
			RunStatus::Failed => 4,
			RunStatus::Aborted => 5,
		}
	}

	pub fn from_u8(v: u8) -> Option<Self> {
		Some(match v {
			0 => RunStatus::Idle,
			1 => RunStatus::Pending,
			2 => RunStatus::Running,
			3 => RunStatus::Completed,
			4 => RunStatus::Failed,
			5 => RunStatus::Aborted,
			_ => return None,
		})
	}
}

impl fmt::Display for RunStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Which K-sample predicate decides a test case's top-level `passed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassPolicy {
	/// At least one of K threads passed.
	#[default]
	PassAtK,
	/// Every one of K threads passed.
	PassAllK,
}

/// Frozen copy of the target agent's settings taken when the run starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system_role: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub plugins: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub chat_config: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub few_shots: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system: Option<String>,
	pub user: String,
}

/// Configuration of one evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
	/// Executions per test case, default 1.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub k: Option<u32>,
	/// Parallel test cases, default 1.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_concurrency: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_steps: Option<u32>,
	/// Agent call timeout in milliseconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
	/// Bound on each judge, sandbox or embedder call in milliseconds.
	/// Falls back to `timeout`, then to 60s.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scorer_timeout: Option<u64>,
	/// Score needed to pass, default 0.6.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pass_threshold: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pass_policy: Option<PassPolicy>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub agent_snapshot: Option<AgentSnapshot>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub judge_model: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub judge_provider: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prompt_template: Option<PromptTemplate>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extractor: Option<ExtractorConfig>,
	#[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
	pub extra: BTreeMap<String, Value>,
}

impl RunConfig {
	pub const DEFAULT_PASS_THRESHOLD: f64 = 0.6;
	pub const DEFAULT_SCORER_TIMEOUT_MS: u64 = 60_000;

	pub fn k(&self) -> u32 {
		self.k.unwrap_or(1)
	}

	pub fn max_concurrency(&self) -> usize {
		self.max_concurrency.unwrap_or(1)
	}

	pub fn pass_threshold(&self) -> f64 {
		self.pass_threshold.unwrap_or(Self::DEFAULT_PASS_THRESHOLD)
	}

	pub fn pass_policy(&self) -> PassPolicy {
		self.pass_policy.unwrap_or_default()
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.timeout.map(Duration::from_millis)
	}

	pub fn scorer_timeout(&self) -> Duration {
		Duration::from_millis(
			self.scorer_timeout
				.or(self.timeout)
				.unwrap_or(Self::DEFAULT_SCORER_TIMEOUT_MS),
		)
	}
}

/// User-facing subset of [`RunConfig`] accepted at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInputConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub k: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_concurrency: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_steps: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
}

impl From<RunInputConfig> for RunConfig {
	fn from(input: RunInputConfig) -> Self {
		RunConfig {
			k: input.k,
			max_concurrency: input.max_concurrency,
			max_steps: input.max_steps,
			timeout: input.timeout,
			..RunConfig::default()
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSubmission {
	pub dataset_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_agent_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default)]
	pub config: RunInputConfig,
}

/// One evaluation execution over a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRun {
	pub id: String,
	pub dataset_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_agent_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default)]
	pub status: RunStatus,
	#[serde(default)]
	pub config: RunConfig,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metrics: Option<EvalRunMetrics>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub started_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

impl EvalRun {
	pub fn new(id: impl Into<String>, dataset_id: impl Into<String>, config: RunConfig) -> Self {
		Self {
			id: id.into(),
			dataset_id: dataset_id.into(),
			target_agent_id: None,
			name: None,
			status: RunStatus::Idle,
			config,
			metrics: None,
			started_at: None,
			created_at: Utc::now(),
		}
	}
}
