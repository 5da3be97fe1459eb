use std::collections::BTreeMap;

use crate::types::{EvalRunMetrics, RunTopicResult, TopicStatus};

/// Folds per-case results into run metrics.
///
/// Results are kept keyed by test case id and every snapshot is recomputed in
/// key order, so the metrics do not depend on arrival order. Accumulating the
/// same id twice replaces the earlier result.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    total_cases: usize,
    results: BTreeMap<String, RunTopicResult>,
}

impl MetricsAggregator {
    pub fn new(total_cases: usize) -> Self {
        Self {
            total_cases,
            results: BTreeMap::new(),
        }
    }

    pub fn accumulate(&mut self, result: RunTopicResult) -> EvalRunMetrics {
        self.results.insert(result.test_case_id.clone(), result);
        self.snapshot()
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn results(&self) -> &BTreeMap<String, RunTopicResult> {
        &self.results
    }

    pub fn into_results(self) -> BTreeMap<String, RunTopicResult> {
        self.results
    }

    /// Running metrics, without the per-case averages.
    pub fn snapshot(&self) -> EvalRunMetrics {
        let mut m = EvalRunMetrics::new(self.total_cases);
        let mut score_sum = 0.0;
        let mut scored_cases = 0usize;
        let mut pass_at_k = 0usize;
        let mut pass_all_k = 0usize;
        let mut rubric_sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();

        for result in self.results.values() {
            m.completed_cases += 1;
            match result.status {
                TopicStatus::Passed => m.passed_cases += 1,
                TopicStatus::Failed => m.failed_cases += 1,
                TopicStatus::Error => m.error_cases += 1,
                TopicStatus::Timeout => m.timeout_cases += 1,
                TopicStatus::Pending | TopicStatus::Running => {}
            }
            if let Some(score) = result.score {
                score_sum += score;
                scored_cases += 1;
            }

            let eval = &result.eval_result;
            pass_at_k += usize::from(eval.pass_at_k);
            pass_all_k += usize::from(eval.pass_all_k);

            m.cost += eval.cost;
            m.tokens += eval.tokens;
            m.duration += eval.duration;
            m.steps += eval.steps;
            m.llm_calls += eval.llm_calls;
            m.tool_calls += eval.tool_calls;
            m.total_cost += eval.total_cost.unwrap_or(eval.cost);
            m.total_tokens += eval.total_tokens.unwrap_or(eval.tokens);
            m.total_duration += eval.total_duration.unwrap_or(eval.duration);

            for thread in eval.threads.iter().filter(|t| t.status.is_scored()) {
                for rs in &thread.rubric_scores {
                    let entry = rubric_sums.entry(rs.rubric_id.as_str()).or_insert((0.0, 0));
                    entry.0 += rs.score;
                    entry.1 += 1;
                }
            }
        }

        if m.completed_cases > 0 {
            let completed = m.completed_cases as f64;
            m.pass_rate = m.passed_cases as f64 / completed;
            m.pass_at_k = pass_at_k as f64 / completed;
            m.pass_all_k = pass_all_k as f64 / completed;
        }
        if scored_cases > 0 {
            m.average_score = score_sum / scored_cases as f64;
        }
        m.rubric_scores = rubric_sums
            .into_iter()
            .map(|(id, (sum, n))| (id.to_string(), sum / n as f64))
            .collect();
        m
    }

    /// Final metrics, including the per-case averages over `total_cases`.
    pub fn finalize(&self) -> EvalRunMetrics {
        let mut m = self.snapshot();
        if m.total_cases > 0 {
            let n = m.total_cases as f64;
            m.per_case_cost = Some(m.cost / n);
            m.per_case_tokens = Some(m.tokens / n);
            m.per_case_steps = Some(m.steps / n);
            m.per_case_llm_calls = Some(m.llm_calls / n);
            m.per_case_tool_calls = Some(m.tool_calls / n);
        }
        m
    }
}
