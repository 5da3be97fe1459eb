use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::future::{self, FutureExt};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::agent::AgentExecutor;
use crate::datasource::{DatasetBundle, DatasetSource};
use crate::error::EvalError;
use crate::events::{EventSink, NullSink, RunEvent};
use crate::executor::{aggregate, TestCaseExecutor};
use crate::judge::LlmJudge;
use crate::metrics::MetricsAggregator;
use crate::rubric::{resolve_rubrics, validate_rubric, ResolvedRubrics, RubricEngine};
use crate::sandbox::ScriptSandbox;
use crate::scorers::embedding::Embedder;
use crate::state::RunStateMachine;
use crate::submission::validate_run_config;
use crate::types::{
	EvalRun, PassPolicy, RunOutcome, RunStatus, RunTopicResult, TestCase, ThreadResult, ThreadStatus,
};

pub struct RunSchedulerBuilder {
	agent: Option<Arc<dyn AgentExecutor>>,
	engine: Option<Arc<RubricEngine>>,
	judge: Option<Arc<dyn LlmJudge>>,
	sandbox: Option<Arc<dyn ScriptSandbox>>,
	embedder: Option<Arc<dyn Embedder>>,
	sink: Arc<dyn EventSink>,
}

impl Default for RunSchedulerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl RunSchedulerBuilder {
	pub fn new() -> Self {
		Self {
			agent: None,
			engine: None,
			judge: None,
			sandbox: None,
			embedder: None,
			sink: Arc::new(NullSink),
		}
	}

	pub fn agent(mut self, agent: Arc<dyn AgentExecutor>) -> Self {
		self.agent = Some(agent);
		self
	}

	/// Use a prebuilt engine; `judge`, `sandbox` and `embedder` are then ignored.
	pub fn engine(mut self, engine: Arc<RubricEngine>) -> Self {
		self.engine = Some(engine);
		self
	}

	pub fn judge(mut self, judge: Arc<dyn LlmJudge>) -> Self {
		self.judge = Some(judge);
		self
	}

	pub fn sandbox(mut self, sandbox: Arc<dyn ScriptSandbox>) -> Self {
		self.sandbox = Some(sandbox);
		self
	}

	pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
		self.embedder = Some(embedder);
		self
	}

	pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
		self.sink = sink;
		self
	}

	pub fn build(self) -> Result<RunScheduler> {
		let agent = self.agent.ok_or_else(|| anyhow::anyhow!("agent must be set"))?;
		let engine = match self.engine {
			Some(engine) => engine,
			None => {
				let mut builder = RubricEngine::builder();
				if let Some(judge) = self.judge {
					builder = builder.judge(judge);
				}
				if let Some(sandbox) = self.sandbox {
					builder = builder.sandbox(sandbox);
				}
				if let Some(embedder) = self.embedder {
					builder = builder.embedder(embedder);
				}
				Arc::new(builder.build())
			}
		};
		Ok(RunScheduler {
			executor: Arc::new(TestCaseExecutor::new(agent, engine)),
			sink: self.sink,
		})
	}
}

/// Fans a dataset's test cases out over a bounded worker pool and drives the
/// run to a terminal status.
pub struct RunScheduler {
	executor: Arc<TestCaseExecutor>,
	sink: Arc<dyn EventSink>,
}

struct Job {
	case: TestCase,
	plan: ResolvedRubrics,
}

impl RunScheduler {
	pub fn builder() -> RunSchedulerBuilder {
		RunSchedulerBuilder::new()
	}

	/// Loads the dataset from `source`, then behaves like [`RunScheduler::execute`].
	/// A load failure fails the run.
	pub async fn execute_source(
		&self,
		run: EvalRun,
		source: &dyn DatasetSource,
		cancel: CancellationToken,
	) -> RunOutcome {
		let state = RunStateMachine::new(run.status);
		if let Err(err) = self.accept(&run, &state).await {
			return reject(run, err);
		}
		match source.load().await {
			Ok(bundle) => self.run_accepted(run, state, bundle, cancel).await,
			Err(err) => {
				let err = EvalError::Dataset(err);
				self.fail(run, &state, MetricsAggregator::new(0), err).await
			}
		}
	}

	/// Runs every test case of `bundle` and returns the final run record with all
	/// reported results. Never returns early on per-case failures.
	pub async fn execute(&self, run: EvalRun, bundle: DatasetBundle, cancel: CancellationToken) -> RunOutcome {
		let state = RunStateMachine::new(run.status);
		if let Err(err) = self.accept(&run, &state).await {
			return reject(run, err);
		}
		self.run_accepted(run, state, bundle, cancel).await
	}

	async fn accept(&self, run: &EvalRun, state: &RunStateMachine) -> Result<(), EvalError> {
		if state.status() == RunStatus::Pending {
			return Ok(());
		}
		self.transition(run, state, RunStatus::Pending).await
	}

	async fn run_accepted(
		&self,
		mut run: EvalRun,
		state: RunStateMachine,
		bundle: DatasetBundle,
		cancel: CancellationToken,
	) -> RunOutcome {
		let total = bundle.test_cases.len();
		if let Err(err) = validate_run_config(&run.config) {
			return self.fail(run, &state, MetricsAggregator::new(total), err).await;
		}
		let jobs = match plan_jobs(bundle) {
			Ok(jobs) => jobs,
			Err(err) => return self.fail(run, &state, MetricsAggregator::new(total), err).await,
		};

		let mut aggregator = MetricsAggregator::new(total);
		if cancel.is_cancelled() {
			return self.finish(run, &state, RunStatus::Aborted, aggregator).await;
		}
		if let Err(err) = self.transition(&run, &state, RunStatus::Running).await {
			return self.fail(run, &state, aggregator, err).await;
		}
		run.started_at = state.started_at();

		let concurrency = run.config.max_concurrency().min(total).max(1);
		tracing::info!(run_id = %run.id, total_cases = total, concurrency, k = run.config.k(), "run started");

		let config = &run.config;
		let run_id = run.id.as_str();
		let executor = &self.executor;
		let cancel_ref = &cancel;
		let stop = cancel.clone();
		// Workers run in place: dropping this future drops every in-flight case.
		let mut results = stream::iter(jobs)
			.take_while(move |_| future::ready(!stop.is_cancelled()))
			.map(move |job| {
				let cancel = cancel_ref;
				async move {
					tracing::debug!(run_id, test_case_id = %job.case.id, "dispatching test case");
					let outcome = AssertUnwindSafe(executor.run(run_id, &job.case, &job.plan, config, cancel))
						.catch_unwind()
						.await;
					(job.case.id, outcome)
				}
			})
			.buffer_unordered(concurrency);

		while let Some((case_id, outcome)) = results.next().await {
			let topic = match outcome {
				Ok(Ok(topic)) => topic,
				Ok(Err(EvalError::Cancelled)) => {
					tracing::debug!(run_id, test_case_id = %case_id, "test case interrupted by cancellation");
					continue;
				}
				Ok(Err(err)) => worker_fault(run_id, &case_id, err.to_string(), config.pass_policy()),
				Err(panic) => {
					let message = panic_message(panic.as_ref());
					tracing::error!(run_id, test_case_id = %case_id, error = %message, "worker panicked");
					worker_fault(run_id, &case_id, message, config.pass_policy())
				}
			};
			self.record(run_id, &mut aggregator, topic).await;
		}
		drop(results);

		let status = if cancel.is_cancelled() && aggregator.completed() < total {
			RunStatus::Aborted
		} else {
			RunStatus::Completed
		};
		self.finish(run, &state, status, aggregator).await
	}

	async fn record(&self, run_id: &str, aggregator: &mut MetricsAggregator, topic: RunTopicResult) {
		tracing::info!(
			run_id,
			test_case_id = %topic.test_case_id,
			status = topic.status.as_str(),
			completed = aggregator.completed() + 1,
			"test case completed"
		);
		let metrics = aggregator.accumulate(topic.clone());
		self.emit(RunEvent::TopicUpserted(topic)).await;
		self.emit(RunEvent::MetricsUpdated {
			run_id: run_id.to_string(),
			metrics,
			is_final: false,
		})
		.await;
	}

	async fn finish(
		&self,
		mut run: EvalRun,
		state: &RunStateMachine,
		status: RunStatus,
		aggregator: MetricsAggregator,
	) -> RunOutcome {
		let error = self.transition(&run, state, status).await.err().map(|e| e.to_string());
		let metrics = aggregator.finalize();
		run.status = state.status();
		run.started_at = state.started_at();
		run.metrics = Some(metrics.clone());

		self.emit(RunEvent::MetricsUpdated {
			run_id: run.id.clone(),
			metrics: metrics.clone(),
			is_final: true,
		})
		.await;
		tracing::info!(
			run_id = %run.id,
			status = run.status.as_str(),
			completed = metrics.completed_cases,
			passed = metrics.passed_cases,
			pass_rate = metrics.pass_rate,
			"run finished"
		);

		RunOutcome {
			run,
			results: aggregator.into_results(),
			error,
		}
	}

	async fn fail(
		&self,
		run: EvalRun,
		state: &RunStateMachine,
		aggregator: MetricsAggregator,
		err: EvalError,
	) -> RunOutcome {
		tracing::error!(run_id = %run.id, error = %err, "run failed");
		let mut outcome = self.finish(run, state, RunStatus::Failed, aggregator).await;
		outcome.error.get_or_insert_with(|| err.to_string());
		outcome
	}

	async fn transition(&self, run: &EvalRun, state: &RunStateMachine, to: RunStatus) -> Result<(), EvalError> {
		let from = state.transition(to)?;
		tracing::info!(run_id = %run.id, from = from.as_str(), to = to.as_str(), "run status changed");
		self.emit(RunEvent::StatusChanged {
			run_id: run.id.clone(),
			from,
			to,
		})
		.await;
		Ok(())
	}

	async fn emit(&self, event: RunEvent) {
		if let Err(err) = self.sink.emit(event).await {
			tracing::warn!(error = %err, "event sink failed");
		}
	}
}

fn reject(mut run: EvalRun, err: EvalError) -> RunOutcome {
	tracing::warn!(run_id = %run.id, status = run.status.as_str(), error = %err, "run not accepted");
	run.metrics.get_or_insert_with(Default::default);
	RunOutcome {
		run,
		results: BTreeMap::new(),
		error: Some(err.to_string()),
	}
}

/// Resolves and validates every case's rubrics, then puts the cases in
/// dispatch order: `sortOrder` ascending with nulls last, then creation time,
/// then dataset order.
fn plan_jobs(bundle: DatasetBundle) -> Result<Vec<Job>, EvalError> {
	let DatasetBundle {
		benchmark,
		dataset,
		mut test_cases,
	} = bundle;
	let mut seen = HashSet::with_capacity(test_cases.len());
	if let Some(dup) = test_cases.iter().find(|c| !seen.insert(c.id.as_str())) {
		return Err(EvalError::InvalidConfig(format!("duplicate test case id `{}`", dup.id)));
	}
	test_cases.sort_by_key(|c| (c.sort_order.is_none(), c.sort_order, c.created_at.is_none(), c.created_at));

	test_cases
		.into_iter()
		.map(|case| {
			let plan = resolve_rubrics(&case, &dataset, benchmark.as_ref())?;
			for rubric in &plan.rubrics {
				validate_rubric(rubric)?;
			}
			if let Some(extractor) = &plan.extractor {
				crate::extractor::validate(extractor).map_err(|e| {
					EvalError::InvalidConfig(format!("test case `{}`: {}", case.id, e))
				})?;
			}
			Ok(Job { case, plan })
		})
		.collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	let detail = panic
		.downcast_ref::<&str>()
		.map(|s| s.to_string())
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown cause".to_string());
	format!("worker panicked: {detail}")
}

/// A case whose worker died counts as an errored case.
fn worker_fault(run_id: &str, case_id: &str, error: String, policy: PassPolicy) -> RunTopicResult {
	let thread = ThreadResult::unscored(format!("{case_id}-t1"), ThreadStatus::Error, error);
	aggregate(run_id, case_id, vec![thread], policy)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::TestCaseContent;

	#[test]
	fn test_dispatch_order() {
		let earlier = chrono::Utc::now() - chrono::Duration::seconds(10);
		let mut late_created = TestCase::new("no-order-new", TestCaseContent::new("q"));
		late_created.created_at = Some(chrono::Utc::now());
		let mut early_created = TestCase::new("no-order-old", TestCaseContent::new("q"));
		early_created.created_at = Some(earlier);
		let bundle = DatasetBundle {
			test_cases: vec![
				TestCase::new("bare", TestCaseContent::new("q")),
				late_created,
				TestCase::new("second", TestCaseContent::new("q")).with_sort_order(2),
				early_created,
				TestCase::new("first", TestCaseContent::new("q")).with_sort_order(1),
			],
			..Default::default()
		};
		let ids: Vec<String> = plan_jobs(bundle).unwrap().into_iter().map(|j| j.case.id).collect();
		assert_eq!(ids, ["first", "second", "no-order-old", "no-order-new", "bare"]);
	}

	#[test]
	fn test_build_requires_agent() {
		assert!(RunScheduler::builder().build().is_err());
	}
}
