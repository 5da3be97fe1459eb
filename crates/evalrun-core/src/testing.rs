use crate::types::{RunOutcome, RunStatus};
use anyhow::Result;

/// Helper to assert a run's pass rate meets a threshold.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_my_agent() -> Result<()> {
///     let scheduler = RunScheduler::builder().agent(agent).build()?;
///     let run = EvalRun::new("run-1", "ds-1", RunConfig::default());
///     let outcome = scheduler.execute(run, bundle, CancellationToken::new()).await;
///
///     // Assert 80% pass rate
///     assert_run_pass_rate(&outcome, 0.8)?;
///
///     Ok(())
/// }
/// ```
pub fn assert_run_pass_rate(outcome: &RunOutcome, min_pass_rate: f64) -> Result<()> {
    let metrics = outcome.metrics();
    if metrics.pass_rate < min_pass_rate {
        anyhow::bail!(
            "Run failed: pass rate {:.1}% is below threshold {:.1}%\n{}",
            metrics.pass_rate * 100.0,
            min_pass_rate * 100.0,
            outcome.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert the average case score meets a threshold.
pub fn assert_run_avg_score(outcome: &RunOutcome, min_avg_score: f64) -> Result<()> {
    let metrics = outcome.metrics();
    if metrics.average_score < min_avg_score {
        anyhow::bail!(
            "Run failed: avg score {:.3} is below threshold {:.3}\n{}",
            metrics.average_score,
            min_avg_score,
            outcome.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert every case of the run passed.
pub fn assert_run_all_passed(outcome: &RunOutcome) -> Result<()> {
    let metrics = outcome.metrics();
    if metrics.passed_cases != metrics.total_cases {
        anyhow::bail!(
            "Run failed: {}/{} cases passed\n{}",
            metrics.passed_cases,
            metrics.total_cases,
            outcome.summary_table()
        );
    }
    Ok(())
}

pub fn assert_run_status(outcome: &RunOutcome, expected: RunStatus) -> Result<()> {
    if outcome.run.status != expected {
        anyhow::bail!(
            "Run {} ended {} instead of {}{}",
            outcome.run.id,
            outcome.run.status,
            expected,
            outcome.error.as_deref().map(|e| format!(": {e}")).unwrap_or_default()
        );
    }
    Ok(())
}
