//! Runs one test case K times and folds the threads into a per-case result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentExecutor, AgentOutput, AgentRequest};
use crate::error::EvalError;
use crate::extractor;
use crate::rubric::{ResolvedRubrics, RubricEngine, ScoreOptions};
use crate::types::{
	PassPolicy, PromptTemplate, RunConfig, RunTopicResult, TestCase, TestCaseContent, ThreadResult, ThreadStatus,
	TopicEvalResult, TopicStatus,
};

pub struct TestCaseExecutor {
	agent: Arc<dyn AgentExecutor>,
	engine: Arc<RubricEngine>,
}

enum AgentCall {
	Finished(Result<AgentOutput>),
	TimedOut(Duration),
}

impl TestCaseExecutor {
	pub fn new(agent: Arc<dyn AgentExecutor>, engine: Arc<RubricEngine>) -> Self {
		Self { agent, engine }
	}

	/// Runs `config.k()` threads in parallel. Returns `EvalError::Cancelled` when
	/// `cancel` fires before every thread has finished.
	pub async fn run(
		&self,
		run_id: &str,
		case: &TestCase,
		plan: &ResolvedRubrics,
		config: &RunConfig,
		cancel: &CancellationToken,
	) -> Result<RunTopicResult, EvalError> {
		let k = config.k();
		let (input, template_system) = render_prompt(&case.content, config.prompt_template.as_ref());
		let system_prompt = template_system.or_else(|| plan.system_prompt.clone());
		let options = ScoreOptions::from_run_config(config);

		let threads = join_all((1..=k).map(|n| {
			let request = AgentRequest {
				test_case_id: case.id.clone(),
				thread_id: format!("{}-t{}", case.id, n),
				input: input.clone(),
				system_prompt: system_prompt.clone(),
				agent: config.agent_snapshot.clone(),
				max_steps: config.max_steps,
				timeout: config.timeout(),
			};
			self.run_thread(request, case, plan, config, &options, cancel)
		}))
		.await;

		let threads: Vec<ThreadResult> = threads
			.into_iter()
			.collect::<Option<_>>()
			.ok_or(EvalError::Cancelled)?;
		let result = aggregate(run_id, &case.id, threads, config.pass_policy());
		tracing::debug!(
			run_id,
			test_case_id = %case.id,
			status = result.status.as_str(),
			score = ?result.score,
			"test case finished"
		);
		Ok(result)
	}

	/// `None` when the run was cancelled mid-thread.
	async fn run_thread(
		&self,
		request: AgentRequest,
		case: &TestCase,
		plan: &ResolvedRubrics,
		config: &RunConfig,
		options: &ScoreOptions,
		cancel: &CancellationToken,
	) -> Option<ThreadResult> {
		let thread_id = request.thread_id.clone();
		let timeout = request.timeout;
		let agent_cancel = cancel.child_token();
		let started = Instant::now();

		let invoke = self.agent.invoke(request, agent_cancel.clone());
		let call = async {
			match timeout {
				Some(limit) => match tokio::time::timeout(limit, invoke).await {
					Ok(res) => AgentCall::Finished(res),
					Err(_) => AgentCall::TimedOut(limit),
				},
				None => AgentCall::Finished(invoke.await),
			}
		};
		let call = tokio::select! {
			biased;
			_ = cancel.cancelled() => return None,
			call = call => call,
		};

		let output = match call {
			AgentCall::Finished(Ok(output)) => output,
			AgentCall::Finished(Err(err)) => {
				tracing::warn!(thread_id = %thread_id, error = %err, "agent execution failed");
				let mut thread = ThreadResult::unscored(thread_id, ThreadStatus::Error, format!("{err:#}"));
				thread.duration = elapsed_ms(started);
				return Some(thread);
			}
			AgentCall::TimedOut(limit) => {
				agent_cancel.cancel();
				tracing::warn!(thread_id = %thread_id, timeout_ms = limit.as_millis() as u64, "agent call timed out");
				let mut thread = ThreadResult::unscored(
					thread_id,
					ThreadStatus::Timeout,
					format!("agent call exceeded {}ms", limit.as_millis()),
				);
				thread.duration = elapsed_ms(started);
				return Some(thread);
			}
		};

		let answer = match config.extractor.as_ref().or(plan.extractor.as_ref()) {
			Some(cfg) => extractor::extract_with_choices(&output.output, cfg, case.content.choices.as_deref()),
			None => output.output.trim().to_string(),
		};
		let scored = tokio::select! {
			biased;
			_ = cancel.cancelled() => return None,
			scored = self.engine.score(&answer, &output.output, &case.content, &plan.rubrics, options) => scored,
		};

		tracing::trace!(thread_id = %thread_id, score = scored.score, passed = scored.passed, "thread scored");
		Some(ThreadResult {
			thread_id,
			status: if scored.passed {
				ThreadStatus::Passed
			} else {
				ThreadStatus::Failed
			},
			score: Some(scored.score),
			passed: scored.passed,
			cost: output.cost,
			tokens: output.tokens,
			duration: elapsed_ms(started),
			steps: output.steps,
			llm_calls: output.llm_calls,
			tool_calls: output.tool_calls,
			extracted_answer: Some(answer),
			rubric_scores: scored.per_rubric,
			error: scored.reason.filter(|_| !scored.passed),
			completion_reason: output.completion_reason,
			operation_id: output.operation_id,
		})
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	started.elapsed().as_millis() as u64
}

/// Renders the agent input and an optional system prompt. Without a template the
/// input is the case input followed by its labelled choices.
pub fn render_prompt(content: &TestCaseContent, template: Option<&PromptTemplate>) -> (String, Option<String>) {
	let choices = content
		.choices
		.as_deref()
		.filter(|c| !c.is_empty())
		.map(|choices| {
			extractor::default_labels()
				.iter()
				.zip(choices)
				.map(|(label, text)| format!("{label}. {text}"))
				.collect::<Vec<_>>()
				.join("\n")
		});

	let Some(template) = template else {
		let input = match &choices {
			Some(choices) => format!("{}\n\n{}", content.input, choices),
			None => content.input.clone(),
		};
		return (input, None);
	};

	let fill = |text: &str| {
		text.replace("{{input}}", &content.input)
			.replace("{{choices}}", choices.as_deref().unwrap_or(""))
			.replace("{{category}}", content.category.as_deref().unwrap_or(""))
	};
	(fill(&template.user), template.system.as_deref().map(fill))
}

/// Folds K thread results into one per-case result.
pub fn aggregate(run_id: &str, test_case_id: &str, threads: Vec<ThreadResult>, policy: PassPolicy) -> RunTopicResult {
	let k = threads.len();
	let pass_at_k = threads.iter().any(|t| t.passed);
	let pass_all_k = k > 0 && threads.iter().all(|t| t.passed);
	let passed = match policy {
		PassPolicy::PassAtK => pass_at_k,
		PassPolicy::PassAllK => pass_all_k,
	};

	let scored: Vec<&ThreadResult> = threads.iter().filter(|t| t.status.is_scored()).collect();
	let status = if passed {
		TopicStatus::Passed
	} else if !scored.is_empty() {
		TopicStatus::Failed
	} else if k > 0 && threads.iter().all(|t| t.status == ThreadStatus::Timeout) {
		TopicStatus::Timeout
	} else {
		TopicStatus::Error
	};
	let score = (!scored.is_empty())
		.then(|| scored.iter().filter_map(|t| t.score).sum::<f64>() / scored.len() as f64);

	let sum = |f: fn(&ThreadResult) -> f64| threads.iter().map(f).sum::<f64>();
	let mean = |f: fn(&ThreadResult) -> f64| if k == 0 { 0.0 } else { sum(f) / k as f64 };
	let total = |f: fn(&ThreadResult) -> f64| (k > 1).then(|| sum(f));

	let display = scored.first().copied().or(threads.first());
	let error = scored
		.is_empty()
		.then(|| threads.iter().find_map(|t| t.error.clone()))
		.flatten();

	let eval_result = TopicEvalResult {
		cost: mean(|t| t.cost),
		tokens: mean(|t| t.tokens as f64),
		duration: mean(|t| t.duration as f64),
		steps: mean(|t| t.steps as f64),
		llm_calls: mean(|t| t.llm_calls as f64),
		tool_calls: mean(|t| t.tool_calls as f64),
		total_cost: total(|t| t.cost),
		total_tokens: total(|t| t.tokens as f64),
		total_duration: total(|t| t.duration as f64),
		pass_at_k,
		pass_all_k,
		error,
		extracted_answer: display.and_then(|t| t.extracted_answer.clone()),
		completion_reason: display.and_then(|t| t.completion_reason.clone()),
		rubric_scores: display.map(|t| t.rubric_scores.clone()).unwrap_or_default(),
		threads,
	};

	RunTopicResult {
		run_id: run_id.to_string(),
		test_case_id: test_case_id.to_string(),
		status,
		score,
		passed,
		eval_result,
	}
}
