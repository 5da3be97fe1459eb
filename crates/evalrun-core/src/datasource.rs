use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Benchmark, Dataset, EvalConfig, RubricType, TestCase, TestCaseContent};

/// Everything a run reads from the dataset side.
#[derive(Debug, Clone, Default)]
pub struct DatasetBundle {
    pub benchmark: Option<Benchmark>,
    pub dataset: Dataset,
    pub test_cases: Vec<TestCase>,
}

#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn load(&self) -> Result<DatasetBundle>;
}

pub struct VecDatasetSource {
    bundle: DatasetBundle,
}

impl VecDatasetSource {
    pub fn new(dataset: Dataset, test_cases: Vec<TestCase>) -> Self {
        Self {
            bundle: DatasetBundle {
                benchmark: None,
                dataset,
                test_cases,
            },
        }
    }

    pub fn with_benchmark(mut self, benchmark: Benchmark) -> Self {
        self.bundle.benchmark = Some(benchmark);
        self
    }
}

#[async_trait]
impl DatasetSource for VecDatasetSource {
    async fn load(&self) -> Result<DatasetBundle> {
        Ok(self.bundle.clone())
    }
}

/// One test case per line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonlCase {
    #[serde(default)]
    id: Option<String>,
    input: String,
    #[serde(default)]
    expected: Option<Value>,
    #[serde(default)]
    choices: Option<Vec<String>>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    eval_mode: Option<RubricType>,
    #[serde(default)]
    eval_config: Option<EvalConfig>,
    #[serde(default)]
    sort_order: Option<i64>,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Read JSONL where each line is a test case:
/// - {"id": "...", "input": "...", "expected": "..."}
/// - {"input": "...", "choices": ["...", "..."], "expected": "B", "evalMode": "extract-match", ...}
///
/// Lines without an id get `case-<line number>`.
pub struct JsonlDatasetSource {
    path: PathBuf,
    dataset: Dataset,
    benchmark: Option<Benchmark>,
}

impl JsonlDatasetSource {
    pub fn new(path: impl Into<PathBuf>, dataset: Dataset) -> Self {
        Self {
            path: path.into(),
            dataset,
            benchmark: None,
        }
    }

    pub fn with_benchmark(mut self, benchmark: Option<Benchmark>) -> Self {
        self.benchmark = benchmark;
        self
    }
}

#[async_trait]
impl DatasetSource for JsonlDatasetSource {
    async fn load(&self) -> Result<DatasetBundle> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        let test_cases = parse_jsonl(&content, &self.dataset.id)?;
        Ok(DatasetBundle {
            benchmark: self.benchmark.clone(),
            dataset: self.dataset.clone(),
            test_cases,
        })
    }
}

pub(crate) fn parse_jsonl(content: &str, dataset_id: &str) -> Result<Vec<TestCase>> {
    let mut cases = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: JsonlCase =
            serde_json::from_str(line).with_context(|| format!("Invalid test case on line {}", idx + 1))?;
        let expected = raw.expected.map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        });
        cases.push(TestCase {
            id: raw.id.unwrap_or_else(|| format!("case-{}", idx + 1)),
            dataset_id: dataset_id.to_string(),
            content: TestCaseContent {
                input: raw.input,
                expected,
                choices: raw.choices,
                category: raw.category,
            },
            eval_mode: raw.eval_mode,
            eval_config: raw.eval_config,
            metadata: raw.metadata,
            sort_order: raw.sort_order,
            created_at: None,
        });
    }
    Ok(cases)
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    Ok(fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?)
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .context("Blocking read task failed")??;
    Ok(content)
}
