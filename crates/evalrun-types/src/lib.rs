//! Shared data model for evalrun: datasets, rubrics, runs, per-case results and
//! run metrics. Everything here is plain serde data; the engine lives in
//! `evalrun-core`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled};

pub mod dataset;
pub mod extractor;
pub mod metrics;
pub mod result;
pub mod rubric;
pub mod run;

pub use dataset::{Benchmark, Dataset, EvalConfig, TestCase, TestCaseContent};
pub use extractor::{ChoiceOutput, DelimiterPosition, ExtractorConfig};
pub use metrics::EvalRunMetrics;
pub use result::{RubricScore, RunTopicResult, ThreadResult, ThreadStatus, TopicEvalResult, TopicStatus};
pub use rubric::{
	AnyOfConfig, CompositeConfig, ExtractMatchConfig, JsonSchemaConfig, LlmConfig, NumericConfig,
	RegexConfig, Rubric, RubricConfig, RubricType, ScriptConfig, SimilarityConfig, ValueConfig,
};
pub use run::{
	AgentSnapshot, EvalRun, PassPolicy, PromptTemplate, RunConfig, RunInputConfig, RunStatus,
	RunSubmission,
};

/// Final state of a run: the run record and its results keyed by test case id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
	pub run: EvalRun,
	pub results: BTreeMap<String, RunTopicResult>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SummaryRow {
	id: String,
	status: String,
	score: String,
	#[tabled(rename = "pass@k")]
	pass_at_k: String,
	#[tabled(rename = "pass^k")]
	pass_all_k: String,
	cost: String,
	tokens: String,
	answer: String,
}

impl RunOutcome {
	pub fn metrics(&self) -> EvalRunMetrics {
		self.run.metrics.clone().unwrap_or_default()
	}

	pub fn summary_table(&self) -> String {
		let rows: Vec<SummaryRow> = self
			.results
			.values()
			.map(|r| SummaryRow {
				id: r.test_case_id.clone(),
				status: r.status.as_str().to_string(),
				score: r.score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "-".to_string()),
				pass_at_k: tick(r.eval_result.pass_at_k),
				pass_all_k: tick(r.eval_result.pass_all_k),
				cost: format!("{:.4}", r.eval_result.cost),
				tokens: format!("{:.0}", r.eval_result.tokens),
				answer: truncate(r.eval_result.extracted_answer.clone().unwrap_or_default(), 48),
			})
			.collect();

		let table = Table::new(rows);
		let m = self.metrics();

		let mut summary_text = format!(
			"Run {} [{}]  Total: {}  Completed: {}  Passed: {}  Failed: {}  Error: {}  Timeout: {}\nPass rate: {:.1}%  Avg score: {:.3}  pass@k: {:.1}%  pass^k: {:.1}%  Cost: {:.4}  Tokens: {:.0}",
			self.run.id,
			self.run.status,
			m.total_cases,
			m.completed_cases,
			m.passed_cases,
			m.failed_cases,
			m.error_cases,
			m.timeout_cases,
			m.pass_rate * 100.0,
			m.average_score,
			m.pass_at_k * 100.0,
			m.pass_all_k * 100.0,
			m.total_cost,
			m.total_tokens,
		);
		if let Some(err) = &self.error {
			summary_text.push_str(&format!("\nError: {err}"));
		}

		format!("{}\n\n{}\n", table, summary_text)
	}
}

fn tick(b: bool) -> String {
	let mark = if b { "✓" } else { " " };
	mark.to_string()
}

fn truncate(s: String, max_len: usize) -> String {
	let s = s.replace('\n', " ");
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}
