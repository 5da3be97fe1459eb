use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricScore {
	pub rubric_id: String,
	pub score: f64,
	pub passed: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
	Passed,
	Failed,
	Error,
	Timeout,
}

impl ThreadStatus {
	/// The thread produced an answer that went through scoring.
	pub fn is_scored(&self) -> bool {
		matches!(self, ThreadStatus::Passed | ThreadStatus::Failed)
	}
}

/// One of the K repeated executions of a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResult {
	pub thread_id: String,
	pub status: ThreadStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub score: Option<f64>,
	pub passed: bool,
	#[serde(default)]
	pub cost: f64,
	#[serde(default)]
	pub tokens: u64,
	/// Wall time in milliseconds.
	#[serde(default)]
	pub duration: u64,
	#[serde(default)]
	pub steps: u32,
	#[serde(default)]
	pub llm_calls: u32,
	#[serde(default)]
	pub tool_calls: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extracted_answer: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub rubric_scores: Vec<RubricScore>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub completion_reason: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub operation_id: Option<String>,
}

impl ThreadResult {
	/// A thread that never reached scoring.
	pub fn unscored(thread_id: impl Into<String>, status: ThreadStatus, error: impl Into<String>) -> Self {
		Self {
			thread_id: thread_id.into(),
			status,
			score: None,
			passed: false,
			cost: 0.0,
			tokens: 0,
			duration: 0,
			steps: 0,
			llm_calls: 0,
			tool_calls: 0,
			extracted_answer: None,
			rubric_scores: Vec::new(),
			error: Some(error.into()),
			completion_reason: None,
			operation_id: None,
		}
	}
}

/// Per-test-case status within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
	Pending,
	Running,
	Passed,
	Failed,
	Error,
	Timeout,
}

impl TopicStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			TopicStatus::Pending => "pending",
			TopicStatus::Running => "running",
			TopicStatus::Passed => "passed",
			TopicStatus::Failed => "failed",
			TopicStatus::Error => "error",
			TopicStatus::Timeout => "timeout",
		}
	}
}

/// Evaluation detail stored on a run topic once its threads are done.
///
/// `cost`, `tokens`, `duration`, `steps`, `llm_calls` and `tool_calls` are means
/// over the K threads; the `total_*` fields carry the raw sums and are only set
/// when K > 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicEvalResult {
	pub cost: f64,
	pub tokens: f64,
	pub duration: f64,
	pub steps: f64,
	pub llm_calls: f64,
	pub tool_calls: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_cost: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_tokens: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_duration: Option<f64>,
	pub threads: Vec<ThreadResult>,
	/// pass@k: at least one thread passed.
	pub pass_at_k: bool,
	/// pass^k: every thread passed.
	pub pass_all_k: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extracted_answer: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub completion_reason: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub rubric_scores: Vec<RubricScore>,
}

/// Outcome of one test case within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTopicResult {
	pub run_id: String,
	pub test_case_id: String,
	pub status: TopicStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub score: Option<f64>,
	pub passed: bool,
	pub eval_result: TopicEvalResult,
}
