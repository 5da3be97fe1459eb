use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use evalrun_core::testing::{assert_run_all_passed, assert_run_pass_rate, assert_run_status};
use evalrun_core::{
    from_async_fn, AgentOutput, AgentRequest, CancellationToken, ChannelSink, Dataset, DatasetBundle, EvalRun,
    JsonlDatasetSource, JudgeRequest, JudgeVerdict, LlmJudge, Rubric, RubricConfig, RubricType, RunConfig, RunEvent,
    RunScheduler, RunStatus, TestCase, TestCaseContent, ThreadStatus, TopicStatus,
};
use evalrun_core::types::LlmConfig;

fn cases(ids: &[&str]) -> Vec<TestCase> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            TestCase::new(*id, TestCaseContent::new(format!("question {id}")).with_expected("42"))
                .with_sort_order(i as i64)
        })
        .collect()
}

fn bundle(test_cases: Vec<TestCase>) -> DatasetBundle {
    DatasetBundle {
        benchmark: None,
        dataset: Dataset {
            id: "ds-1".to_string(),
            ..Dataset::default()
        },
        test_cases,
    }
}

fn run(config: RunConfig) -> EvalRun {
    EvalRun::new("run-1", "ds-1", config)
}

#[tokio::test]
async fn agent_error_is_contained_to_its_case() {
    let agent = from_async_fn(|req: AgentRequest| async move {
        match req.test_case_id.as_str() {
            "c2" => Err(anyhow!("agent crashed")),
            "c3" => Ok(AgentOutput::text("41")),
            _ => Ok(AgentOutput::text("42").with_usage(0.01, 20)),
        }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        max_concurrency: Some(3),
        ..Default::default()
    };

    let outcome = scheduler
        .execute(run(config), bundle(cases(&["c1", "c2", "c3"])), CancellationToken::new())
        .await;

    assert_run_status(&outcome, RunStatus::Completed).unwrap();
    let m = outcome.metrics();
    assert_eq!(m.total_cases, 3);
    assert_eq!(m.completed_cases, 3);
    assert_eq!(m.error_cases, 1);
    assert_eq!(m.passed_cases + m.failed_cases, 2);
    assert_eq!(m.passed_cases, 1);
    assert!(m.per_case_cost.is_some());

    let errored = &outcome.results["c2"];
    assert_eq!(errored.status, TopicStatus::Error);
    assert!(errored.score.is_none());
    assert!(errored.eval_result.error.as_deref().unwrap().contains("agent crashed"));
    assert!(outcome.run.started_at.is_some());
}

#[tokio::test]
async fn equals_rubric_on_extracted_answer() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("Reasoning...\nAnswer: 42")) });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        extractor: Some(evalrun_core::ExtractorConfig::Regex {
            pattern: r"Answer:\s*(\S+)".to_string(),
            group: Some(1),
        }),
        ..Default::default()
    };
    let mut dataset = bundle(vec![TestCase::new("c1", TestCaseContent::new("6*7?"))]);
    dataset.benchmark = Some(evalrun_core::Benchmark {
        id: "b".to_string(),
        identifier: "b".to_string(),
        name: "b".to_string(),
        description: None,
        rubrics: vec![Rubric::equals("r1", "42")],
        extractor: None,
        reference_url: None,
        metadata: None,
    });

    let outcome = scheduler.execute(run(config), dataset, CancellationToken::new()).await;
    let result = &outcome.results["c1"];
    assert_eq!(result.score, Some(1.0));
    assert!(result.passed);
    assert_eq!(result.eval_result.extracted_answer.as_deref(), Some("42"));
    assert_run_all_passed(&outcome).unwrap();
}

#[tokio::test]
async fn cancellation_keeps_only_completed_cases() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let agent = from_async_fn(move |req: AgentRequest| {
        let trigger = trigger.clone();
        async move {
            if req.test_case_id == "c3" {
                trigger.cancel();
                std::future::pending::<()>().await;
            }
            Ok(AgentOutput::text("42"))
        }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();

    let outcome = scheduler
        .execute(
            run(RunConfig::default()),
            bundle(cases(&["c1", "c2", "c3", "c4", "c5"])),
            cancel,
        )
        .await;

    assert_run_status(&outcome, RunStatus::Aborted).unwrap();
    let m = outcome.metrics();
    assert_eq!(m.total_cases, 5);
    assert_eq!(m.completed_cases, 2);
    assert_eq!(m.passed_cases, 2);
    let ids: Vec<&str> = outcome.results.keys().map(String::as_str).collect();
    assert_eq!(ids, ["c1", "c2"]);
}

#[tokio::test(start_paused = true)]
async fn slow_agent_times_out() {
    let agent = from_async_fn(|req: AgentRequest| async move {
        if req.test_case_id == "slow" {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(AgentOutput::text("42"))
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        timeout: Some(5000),
        max_concurrency: Some(2),
        ..Default::default()
    };

    let outcome = scheduler
        .execute(run(config), bundle(cases(&["fast", "slow"])), CancellationToken::new())
        .await;

    assert_run_status(&outcome, RunStatus::Completed).unwrap();
    let m = outcome.metrics();
    assert_eq!(m.timeout_cases, 1);
    assert_eq!(m.passed_cases, 1);
    let slow = &outcome.results["slow"];
    assert_eq!(slow.status, TopicStatus::Timeout);
    assert_eq!(slow.eval_result.threads[0].status, ThreadStatus::Timeout);
    assert_eq!(slow.eval_result.threads[0].duration, 5000);
}

#[tokio::test]
async fn pass_at_k_and_pass_all_k_rates() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // "steady" always answers right, "flaky" only on its first thread
    let agent = from_async_fn(move |req: AgentRequest| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let answer = if req.test_case_id == "flaky" && !req.thread_id.ends_with("-t1") {
                "nope"
            } else {
                "42"
            };
            Ok(AgentOutput::text(answer).with_usage(0.5, 10))
        }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        k: Some(3),
        max_concurrency: Some(2),
        ..Default::default()
    };

    let outcome = scheduler
        .execute(run(config), bundle(cases(&["steady", "flaky"])), CancellationToken::new())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 6);
    let m = outcome.metrics();
    assert_eq!(m.pass_at_k, 1.0);
    assert_eq!(m.pass_all_k, 0.5);
    assert_eq!(m.passed_cases, 2);
    assert!((m.cost - 1.0).abs() < 1e-12);
    assert!((m.total_cost - 3.0).abs() < 1e-12);
    assert_run_pass_rate(&outcome, 1.0).unwrap();

    let flaky = &outcome.results["flaky"];
    assert!(flaky.eval_result.pass_at_k);
    assert!(!flaky.eval_result.pass_all_k);
    assert!((flaky.score.unwrap() - 1.0 / 3.0).abs() < 1e-12);
}

#[tokio::test]
async fn pass_all_k_policy_fails_flaky_case() {
    let agent = from_async_fn(|req: AgentRequest| async move {
        let answer = if req.thread_id.ends_with("-t2") { "nope" } else { "42" };
        Ok(AgentOutput::text(answer))
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        k: Some(2),
        pass_policy: Some(evalrun_core::PassPolicy::PassAllK),
        ..Default::default()
    };

    let outcome = scheduler
        .execute(run(config), bundle(cases(&["c1"])), CancellationToken::new())
        .await;
    let result = &outcome.results["c1"];
    assert!(!result.passed);
    assert_eq!(result.status, TopicStatus::Failed);
    assert!(result.eval_result.pass_at_k);
}

#[tokio::test]
async fn invalid_run_config_fails_before_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let agent = from_async_fn(move |_req: AgentRequest| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(AgentOutput::text("42")) }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        k: Some(0),
        ..Default::default()
    };

    let outcome = scheduler
        .execute(run(config), bundle(cases(&["c1"])), CancellationToken::new())
        .await;
    assert_run_status(&outcome, RunStatus::Failed).unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("k must be at least 1"));
    assert!(outcome.run.started_at.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_rubric_fails_run() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("42")) });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let case = TestCase::new("c1", TestCaseContent::new("q")).with_eval_mode(RubricType::Regex, Default::default());

    let outcome = scheduler
        .execute(run(RunConfig::default()), bundle(vec![case]), CancellationToken::new())
        .await;
    assert_run_status(&outcome, RunStatus::Failed).unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("evalConfig.pattern"));
}

#[tokio::test]
async fn unreadable_dataset_fails_run() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("42")) });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let source = JsonlDatasetSource::new("/definitely/missing.jsonl", Dataset::default());

    let outcome = scheduler
        .execute_source(run(RunConfig::default()), &source, CancellationToken::new())
        .await;
    assert_run_status(&outcome, RunStatus::Failed).unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("dataset unavailable"));
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn empty_dataset_completes() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("42")) });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();

    let outcome = scheduler
        .execute(run(RunConfig::default()), bundle(Vec::new()), CancellationToken::new())
        .await;
    assert_run_status(&outcome, RunStatus::Completed).unwrap();
    assert_eq!(outcome.metrics().total_cases, 0);
}

#[tokio::test]
async fn terminal_run_is_not_rerun() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("42")) });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let mut done = run(RunConfig::default());
    done.status = RunStatus::Completed;

    let outcome = scheduler
        .execute(done, bundle(cases(&["c1"])), CancellationToken::new())
        .await;
    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert!(outcome.results.is_empty());
    assert!(outcome.error.as_deref().unwrap().contains("illegal run transition"));
}

#[tokio::test]
async fn events_stream_status_and_topics() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("42")) });
    let (sink, mut rx) = ChannelSink::new();
    let scheduler = RunScheduler::builder()
        .agent(agent)
        .sink(Arc::new(sink))
        .build()
        .unwrap();

    scheduler
        .execute(run(RunConfig::default()), bundle(cases(&["c1", "c2"])), CancellationToken::new())
        .await;
    drop(scheduler);

    let mut statuses = Vec::new();
    let mut topics = 0;
    let mut finals = 0;
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::StatusChanged { to, .. } => statuses.push(to),
            RunEvent::TopicUpserted(_) => topics += 1,
            RunEvent::MetricsUpdated { is_final, .. } => finals += usize::from(is_final),
        }
    }
    assert_eq!(statuses, [RunStatus::Pending, RunStatus::Running, RunStatus::Completed]);
    assert_eq!(topics, 2);
    assert_eq!(finals, 1);
}

#[tokio::test]
async fn duplicate_case_ids_fail_before_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let agent = from_async_fn(move |_req: AgentRequest| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(AgentOutput::text("42")) }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();

    let outcome = scheduler
        .execute(
            run(RunConfig::default()),
            bundle(cases(&["dup", "dup", "c3"])),
            CancellationToken::new(),
        )
        .await;
    assert_run_status(&outcome, RunStatus::Failed).unwrap();
    assert!(outcome.error.as_deref().unwrap().contains("duplicate test case id `dup`"));
    assert!(outcome.results.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct HangingJudge;

#[async_trait]
impl LlmJudge for HangingJudge {
    async fn judge(&self, _request: JudgeRequest) -> anyhow::Result<JudgeVerdict> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn hung_judge_is_bounded_per_call() {
    let agent = from_async_fn(|_req: AgentRequest| async move { Ok(AgentOutput::text("42")) });
    let scheduler = RunScheduler::builder()
        .agent(agent)
        .judge(Arc::new(HangingJudge))
        .build()
        .unwrap();
    let config = RunConfig {
        timeout: Some(5000),
        ..Default::default()
    };
    let judged = Rubric::new(
        "judged",
        RubricConfig::LlmRubric(LlmConfig {
            criteria: Some("Is the answer 42?".to_string()),
            ..Default::default()
        }),
    );
    let mut dataset = bundle(cases(&["c1"]));
    dataset.benchmark = Some(evalrun_core::Benchmark {
        id: "b".to_string(),
        identifier: "b".to_string(),
        name: "b".to_string(),
        description: None,
        rubrics: vec![judged],
        extractor: None,
        reference_url: None,
        metadata: None,
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(3600),
        scheduler.execute(run(config), dataset, CancellationToken::new()),
    )
    .await
    .expect("run finishes despite a judge that never answers");

    assert_run_status(&outcome, RunStatus::Completed).unwrap();
    let result = &outcome.results["c1"];
    assert_eq!(result.status, TopicStatus::Failed);
    assert_eq!(result.score, Some(0.0));
    let reason = result.eval_result.rubric_scores[0].reason.as_deref().unwrap();
    assert!(reason.contains("judge call timed out after 5000ms"), "{reason}");
}

async fn peak_in_flight(total: usize, max_concurrency: usize) -> usize {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (current, highest) = (in_flight.clone(), peak.clone());
    let agent = from_async_fn(move |_req: AgentRequest| {
        let (current, highest) = (current.clone(), highest.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(AgentOutput::text("42"))
        }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        max_concurrency: Some(max_concurrency),
        ..Default::default()
    };
    let ids: Vec<String> = (0..total).map(|i| format!("c{i}")).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();

    let outcome = scheduler
        .execute(run(config), bundle(cases(&ids)), CancellationToken::new())
        .await;
    assert_run_status(&outcome, RunStatus::Completed).unwrap();
    assert_eq!(outcome.metrics().completed_cases, total);
    peak.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn pool_never_exceeds_max_concurrency() {
    assert_eq!(peak_in_flight(6, 2).await, 2);
}

#[tokio::test(start_paused = true)]
async fn pool_is_sized_by_remaining_cases() {
    assert_eq!(peak_in_flight(3, 8).await, 3);
}

#[tokio::test]
async fn worker_panic_becomes_error_case() {
    let agent = from_async_fn(|req: AgentRequest| async move {
        if req.test_case_id == "boom" {
            panic!("agent blew up");
        }
        Ok(AgentOutput::text("42"))
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();

    let outcome = scheduler
        .execute(run(RunConfig::default()), bundle(cases(&["boom", "ok"])), CancellationToken::new())
        .await;
    assert_run_status(&outcome, RunStatus::Completed).unwrap();
    let boom = &outcome.results["boom"];
    assert_eq!(boom.status, TopicStatus::Error);
    assert!(boom.eval_result.error.as_deref().unwrap().contains("agent blew up"));
    assert!(outcome.results["ok"].passed);
}

struct CountOnDrop(Arc<AtomicUsize>);

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn dropping_the_run_drops_in_flight_agent_calls() {
    let started = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));
    let (on_start, on_drop) = (started.clone(), dropped.clone());
    let agent = from_async_fn(move |_req: AgentRequest| {
        on_start.fetch_add(1, Ordering::SeqCst);
        let guard = CountOnDrop(on_drop.clone());
        async move {
            let _guard = guard;
            std::future::pending::<()>().await;
            Ok(AgentOutput::text("42"))
        }
    });
    let scheduler = RunScheduler::builder().agent(agent).build().unwrap();
    let config = RunConfig {
        max_concurrency: Some(2),
        ..Default::default()
    };

    let execution = scheduler.execute(run(config), bundle(cases(&["c1", "c2"])), CancellationToken::new());
    assert!(tokio::time::timeout(Duration::from_millis(20), execution).await.is_err());

    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
}
