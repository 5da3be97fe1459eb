//! YAML run file consumed by the `evalrun` CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::datasource::JsonlDatasetSource;
use crate::types::{Benchmark, Dataset, EvalConfig, ExtractorConfig, Rubric, RubricType, RunConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFile {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub benchmark: Option<BenchmarkConfig>,
    pub agent: AgentConfig,
    #[serde(default)]
    pub judge: Option<EndpointConfig>,
    #[serde(default)]
    pub sandbox: Option<EndpointConfig>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub json_out: Option<PathBuf>,
    #[serde(default)]
    pub events_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    /// JSONL file, relative to the run file.
    pub path: PathBuf,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub eval_mode: Option<RubricType>,
    #[serde(default)]
    pub eval_config: Option<EvalConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkConfig {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub rubrics: Vec<Rubric>,
    #[serde(default)]
    pub extractor: Option<ExtractorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum AgentConfig {
    /// Answers with the prompt itself. Handy for wiring checks.
    Echo,
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Reported as the run's target agent.
        #[serde(default)]
        id: Option<String>,
        /// HTTP request timeout in milliseconds; defaults to `run.timeout`.
        #[serde(default)]
        timeout: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// HTTP request timeout in milliseconds; defaults to the run's scorer timeout.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl RunFile {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid run file")
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_yaml_str(&content).with_context(|| format!("in {:?}", path))
    }

    pub fn dataset(&self) -> Dataset {
        let cfg = &self.dataset;
        let id = cfg.id.clone().unwrap_or_else(|| {
            cfg.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dataset".to_string())
        });
        Dataset {
            name: cfg.name.clone().unwrap_or_else(|| id.clone()),
            identifier: id.clone(),
            id,
            eval_mode: cfg.eval_mode,
            eval_config: cfg.eval_config.clone(),
            ..Dataset::default()
        }
    }

    pub fn benchmark(&self) -> Option<Benchmark> {
        let cfg = self.benchmark.as_ref()?;
        let identifier = cfg.identifier.clone().unwrap_or_else(|| "default".to_string());
        Some(Benchmark {
            id: identifier.clone(),
            name: identifier.clone(),
            identifier,
            description: None,
            rubrics: cfg.rubrics.clone(),
            extractor: cfg.extractor.clone(),
            reference_url: None,
            metadata: None,
        })
    }

    /// Dataset source with the path resolved against `base_dir`.
    pub fn source(&self, base_dir: &Path) -> JsonlDatasetSource {
        let path = if self.dataset.path.is_absolute() {
            self.dataset.path.clone()
        } else {
            base_dir.join(&self.dataset.path)
        };
        JsonlDatasetSource::new(path, self.dataset()).with_benchmark(self.benchmark())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PassPolicy;

    const SAMPLE: &str = r#"
dataset:
  path: data/mmlu.jsonl
  evalMode: extract-match
  evalConfig:
    extractor:
      type: choice-index
benchmark:
  identifier: mmlu
  rubrics:
    - id: exact
      type: equals
      config: {}
agent:
  type: http
  url: http://localhost:8080/agent
judge:
  url: http://localhost:8080/judge
  timeout: 20000
run:
  k: 3
  maxConcurrency: 4
  timeout: 5000
  passPolicy: passAllK
jsonOut: out/results.json
"#;

    #[test]
    fn test_parse_run_file() {
        let file = RunFile::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(file.run.k(), 3);
        assert_eq!(file.run.max_concurrency(), 4);
        assert_eq!(file.run.pass_policy(), PassPolicy::PassAllK);
        assert!(matches!(file.agent, AgentConfig::Http { .. }));
        assert!(file.sandbox.is_none());
        assert_eq!(file.judge.as_ref().and_then(|j| j.timeout), Some(20000));

        let dataset = file.dataset();
        assert_eq!(dataset.id, "mmlu");
        assert_eq!(dataset.eval_mode, Some(RubricType::ExtractMatch));

        let benchmark = file.benchmark().unwrap();
        assert_eq!(benchmark.rubrics.len(), 1);
        assert_eq!(benchmark.rubrics[0].kind(), RubricType::Equals);
    }

    #[test]
    fn test_echo_agent_and_defaults() {
        let file = RunFile::from_yaml_str("dataset:\n  path: cases.jsonl\nagent:\n  type: echo\n").unwrap();
        assert!(matches!(file.agent, AgentConfig::Echo));
        assert_eq!(file.run.k(), 1);
        assert!(file.benchmark().is_none());
    }

    #[test]
    fn test_invalid_run_file() {
        assert!(RunFile::from_yaml_str("agent: {type: telepathy}").is_err());
    }
}
