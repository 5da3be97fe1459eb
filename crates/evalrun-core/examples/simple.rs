use std::sync::Arc;

use evalrun_core::{
    from_async_fn, AgentOutput, AgentRequest, CancellationToken, Dataset, DatasetBundle, EvalRun,
    JsonlDatasetSource, RunConfig, RunScheduler, TestCase, TestCaseContent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Example 1: Inline cases, scored with `equals` against `expected`
    let cases = vec![
        TestCase::new("0", TestCaseContent::new("Hello").with_expected("Hello World!")),
        TestCase::new("1", TestCaseContent::new("Hi").with_expected("Hi World!")),
    ];
    let bundle = DatasetBundle {
        benchmark: None,
        dataset: Dataset::default(),
        test_cases: cases,
    };

    // Agent: append " World!" to the prompt
    let agent = from_async_fn(|req: AgentRequest| async move {
        Ok(AgentOutput::text(format!("{} World!", req.input)).with_usage(0.0001, 12))
    });

    let scheduler = RunScheduler::builder().agent(agent.clone()).build()?;
    let config = RunConfig {
        k: Some(2),
        max_concurrency: Some(8),
        ..Default::default()
    };

    let outcome = scheduler
        .execute(EvalRun::new("example-1", "inline", config), bundle, CancellationToken::new())
        .await;
    println!("{}", outcome.summary_table());

    // Example 2: Load from JSONL file if provided
    if let Some(path) = std::env::args().nth(1) {
        let source = JsonlDatasetSource::new(path, Dataset::default());
        let scheduler = RunScheduler::builder().agent(Arc::clone(&agent)).build()?;
        let outcome = scheduler
            .execute_source(
                EvalRun::new("example-2", "jsonl", RunConfig::default()),
                &source,
                CancellationToken::new(),
            )
            .await;
        println!("{}", outcome.summary_table());
    }

    Ok(())
}
