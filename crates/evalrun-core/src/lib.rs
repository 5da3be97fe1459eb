//! evalrun-core: agent evaluation run engine.
//! Runs every test case of a dataset K times against an agent, scores answers
//! with weighted rubrics and folds the results into run metrics.
//! See `examples/simple.rs` for a quickstart.

pub mod agent;
pub mod config;
pub mod datasource;
pub mod error;
pub mod events;
pub mod executor;
pub mod extractor;
pub mod judge;
pub mod metrics;
pub mod rubric;
pub mod runner;
pub mod sandbox;
pub mod scorer;
pub mod state;
pub mod submission;
pub mod testing;
pub mod types;

pub mod scorers {
    pub mod contains;
    pub mod embedding;
    pub mod exact;
    pub mod json;
    pub mod levenshtein;
    pub mod llm;
    pub mod numeric;
    pub mod regex;
    pub mod script;
}

pub use agent::{from_async_fn, AgentExecutor, AgentOutput, AgentRequest};
pub use datasource::{DatasetBundle, DatasetSource, JsonlDatasetSource, VecDatasetSource};
pub use error::{EvalError, ExtractionError};
pub use events::{ChannelSink, EventSink, NullSink, RunEvent};
pub use executor::TestCaseExecutor;
pub use judge::{JudgeRequest, JudgeVerdict, LlmJudge};
pub use metrics::MetricsAggregator;
pub use rubric::{resolve_rubrics, validate_rubric, ResolvedRubrics, RubricEngine, ScoreOptions, ScoreResult};
pub use runner::{RunScheduler, RunSchedulerBuilder};
pub use sandbox::{ScriptLanguage, ScriptRequest, ScriptSandbox};
pub use scorer::{Score, ScoreInput, Scorer};
pub use scorers::{
    contains::ContainsScorer,
    embedding::{Embedder, SimilarScorer},
    exact::{AnyOfScorer, ExactMatchScorer},
    json::JsonSchemaScorer,
    levenshtein::LevenshteinScorer,
    llm::LlmScorer,
    numeric::NumericScorer,
    regex::RegexScorer,
    script::ScriptScorer,
};
pub use state::RunStateMachine;
pub use submission::{submit, validate_run_config};
pub use types::{
    Benchmark, Dataset, EvalConfig, EvalRun, EvalRunMetrics, ExtractorConfig, PassPolicy, Rubric, RubricConfig,
    RubricType, RunConfig, RunOutcome, RunStatus, RunTopicResult, TestCase, TestCaseContent, ThreadStatus,
    TopicStatus,
};
pub use tokio_util::sync::CancellationToken;
