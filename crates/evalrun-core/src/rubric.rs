//! Scores an answer against a weighted rubric set.
//!
//! Each rubric type is dispatched through a strategy table of [`Scorer`]s.
//! `extract-match` and composite `rubric` are handled here because they wrap
//! other strategies. A scorer error never escapes: it becomes a zero score with
//! the error as reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::{join_all, BoxFuture, FutureExt};
use regex::Regex;

use crate::error::EvalError;
use crate::extractor;
use crate::judge::LlmJudge;
use crate::sandbox::ScriptSandbox;
use crate::scorer::{Score, ScoreInput, Scorer};
use crate::scorers::contains::ContainsScorer;
use crate::scorers::embedding::{Embedder, SimilarScorer};
use crate::scorers::exact::{AnyOfScorer, ExactMatchScorer};
use crate::scorers::json::{compile_schema, JsonSchemaScorer};
use crate::scorers::levenshtein::LevenshteinScorer;
use crate::scorers::llm::LlmScorer;
use crate::scorers::numeric::{parse_number, NumericScorer};
use crate::scorers::regex::RegexScorer;
use crate::scorers::script::ScriptScorer;
use crate::types::{
	AnyOfConfig, Benchmark, CompositeConfig, Dataset, EvalConfig, ExtractMatchConfig, ExtractorConfig,
	JsonSchemaConfig, LlmConfig, NumericConfig, RegexConfig, Rubric, RubricConfig, RubricScore, RubricType,
	RunConfig, ScriptConfig, SimilarityConfig, TestCase, TestCaseContent, ValueConfig,
};

/// Run-level knobs that affect scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOptions {
	pub pass_threshold: f64,
	pub judge_model: Option<String>,
	pub judge_provider: Option<String>,
	/// Bound on each external scoring call.
	pub call_timeout: Duration,
}

impl Default for ScoreOptions {
	fn default() -> Self {
		Self {
			pass_threshold: RunConfig::DEFAULT_PASS_THRESHOLD,
			judge_model: None,
			judge_provider: None,
			call_timeout: Duration::from_millis(RunConfig::DEFAULT_SCORER_TIMEOUT_MS),
		}
	}
}

impl ScoreOptions {
	pub fn from_run_config(config: &RunConfig) -> Self {
		Self {
			pass_threshold: config.pass_threshold(),
			judge_model: config.judge_model.clone(),
			judge_provider: config.judge_provider.clone(),
			call_timeout: config.scorer_timeout(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
	pub score: f64,
	pub passed: bool,
	pub per_rubric: Vec<RubricScore>,
	pub reason: Option<String>,
}

impl ScoreResult {
	fn empty() -> Self {
		Self {
			score: 0.0,
			passed: false,
			per_rubric: Vec::new(),
			reason: Some("no rubrics".to_string()),
		}
	}
}

/// Weighted mean of `(score, weight)` pairs with scores clamped to [0, 1].
/// Zero when the weights do not sum to a positive number.
pub fn weighted_mean<I>(pairs: I) -> f64
where
	I: IntoIterator<Item = (f64, f64)>,
{
	let (sum, total_weight) = pairs
		.into_iter()
		.fold((0.0, 0.0), |(sum, total), (score, weight)| {
			(sum + score.clamp(0.0, 1.0) * weight, total + weight)
		});
	if total_weight > 0.0 {
		(sum / total_weight).clamp(0.0, 1.0)
	} else {
		0.0
	}
}

pub struct RubricEngine {
	scorers: HashMap<RubricType, Arc<dyn Scorer>>,
}

#[derive(Default)]
pub struct RubricEngineBuilder {
	judge: Option<Arc<dyn LlmJudge>>,
	sandbox: Option<Arc<dyn ScriptSandbox>>,
	embedder: Option<Arc<dyn Embedder>>,
	overrides: Vec<(RubricType, Arc<dyn Scorer>)>,
}

impl RubricEngineBuilder {
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

	/// Replace the strategy for one rubric type.
	pub fn scorer(mut self, kind: RubricType, scorer: Arc<dyn Scorer>) -> Self {
		self.overrides.push((kind, scorer));
		self
	}

	pub fn build(self) -> RubricEngine {
		let mut scorers: HashMap<RubricType, Arc<dyn Scorer>> = HashMap::new();

		let exact: Arc<dyn Scorer> = Arc::new(ExactMatchScorer);
		for kind in [RubricType::Equals, RubricType::StartsWith, RubricType::EndsWith] {
			scorers.insert(kind, exact.clone());
		}
		scorers.insert(RubricType::Contains, Arc::new(ContainsScorer));
		scorers.insert(RubricType::AnyOf, Arc::new(AnyOfScorer));
		scorers.insert(RubricType::Regex, Arc::new(RegexScorer));
		scorers.insert(RubricType::Numeric, Arc::new(NumericScorer));
		scorers.insert(RubricType::JsonSchema, Arc::new(JsonSchemaScorer));
		scorers.insert(RubricType::Levenshtein, Arc::new(LevenshteinScorer));
		scorers.insert(RubricType::Similar, Arc::new(SimilarScorer::new(self.embedder)));

		if let Some(judge) = self.judge {
			let llm: Arc<dyn Scorer> = Arc::new(LlmScorer::new(judge));
			for kind in RubricType::ALL.into_iter().filter(RubricType::is_llm) {
				scorers.insert(kind, llm.clone());
			}
		}
		if let Some(sandbox) = self.sandbox {
			let script: Arc<dyn Scorer> = Arc::new(ScriptScorer::new(sandbox));
			for kind in RubricType::ALL.into_iter().filter(RubricType::is_script) {
				scorers.insert(kind, script.clone());
			}
		}

		for (kind, scorer) in self.overrides {
			scorers.insert(kind, scorer);
		}
		RubricEngine { scorers }
	}
}

impl Default for RubricEngine {
	fn default() -> Self {
		Self::builder().build()
	}
}

impl RubricEngine {
	pub fn builder() -> RubricEngineBuilder {
		RubricEngineBuilder::default()
	}

	/// Whether rubrics of this type can be scored without a fault for a
	/// missing collaborator.
	pub fn supports(&self, kind: RubricType) -> bool {
		matches!(kind, RubricType::ExtractMatch | RubricType::Rubric) || self.scorers.contains_key(&kind)
	}

	/// Scores one answer. `answer` is the thread-level extracted answer and
	/// `raw_output` the unmodified agent output, used by per-rubric extractors.
	pub async fn score(
		&self,
		answer: &str,
		raw_output: &str,
		content: &TestCaseContent,
		rubrics: &[Rubric],
		options: &ScoreOptions,
	) -> ScoreResult {
		let input = ScoreInput {
			answer,
			raw_output,
			content,
			judge_model: options.judge_model.as_deref(),
			judge_provider: options.judge_provider.as_deref(),
			call_timeout: Some(options.call_timeout),
		};
		self.score_set(rubrics, input, options.pass_threshold, options.pass_threshold, false)
			.await
	}

	/// `member_threshold` is the default pass mark of each member, `set_threshold`
	/// the pass mark of the weighted set.
	fn score_set<'a>(
		&'a self,
		rubrics: &'a [Rubric],
		input: ScoreInput<'a>,
		member_threshold: f64,
		set_threshold: f64,
		nested: bool,
	) -> BoxFuture<'a, ScoreResult> {
		async move {
			if rubrics.is_empty() {
				return ScoreResult::empty();
			}
			let per_rubric =
				join_all(rubrics.iter().map(|r| self.score_rubric(r, input, member_threshold))).await;

			let score = weighted_mean(rubrics.iter().zip(&per_rubric).map(|(r, s)| (s.score, r.weight)));
			let gates_hold = rubrics
				.iter()
				.zip(&per_rubric)
				.filter(|(r, _)| r.threshold.is_some() && (nested || r.is_composite()))
				.all(|(_, s)| s.passed);
			let passed = score >= set_threshold && gates_hold;

			let reason = (!gates_hold).then(|| {
				let failed: Vec<&str> = rubrics
					.iter()
					.zip(&per_rubric)
					.filter(|(r, s)| r.threshold.is_some() && (nested || r.is_composite()) && !s.passed)
					.map(|(r, _)| r.id.as_str())
					.collect();
				format!("gating rubric failed: {}", failed.join(", "))
			});

			ScoreResult {
				score,
				passed,
				per_rubric,
				reason,
			}
		}
		.boxed()
	}

	async fn score_rubric(&self, rubric: &Rubric, input: ScoreInput<'_>, member_threshold: f64) -> RubricScore {
		let extracted;
		let input = match &rubric.extractor {
			Some(config) => {
				extracted =
					extractor::extract_with_choices(input.raw_output, config, input.content.choices.as_deref());
				ScoreInput {
					answer: &extracted,
					..input
				}
			}
			None => input,
		};

		if let RubricConfig::Rubric(CompositeConfig { rubrics }) = &rubric.config {
			let set_threshold = rubric.threshold.unwrap_or(member_threshold);
			let inner = self
				.score_set(rubrics, input, member_threshold, set_threshold, true)
				.await;
			return RubricScore {
				rubric_id: rubric.id.clone(),
				score: inner.score,
				passed: inner.passed,
				reason: inner.reason,
			};
		}

		let threshold = rubric
			.threshold
			.or_else(|| rubric.config.threshold_hint())
			.unwrap_or(member_threshold);
		let outcome = self
			.score_leaf(&rubric.config, &input)
			.await
			.and_then(|score| {
				if score.value.is_finite() {
					Ok(score)
				} else {
					Err(anyhow!("non-finite score {}", score.value))
				}
			});

		match outcome {
			Ok(Score { value, reason }) => {
				let value = value.clamp(0.0, 1.0);
				tracing::trace!(rubric_id = %rubric.id, kind = %rubric.kind(), score = value, "rubric scored");
				RubricScore {
					rubric_id: rubric.id.clone(),
					score: value,
					passed: value >= threshold,
					reason,
				}
			}
			Err(err) => {
				tracing::warn!(rubric_id = %rubric.id, kind = %rubric.kind(), error = %err, "rubric scoring fault");
				RubricScore {
					rubric_id: rubric.id.clone(),
					score: 0.0,
					passed: false,
					reason: Some(format!("{err:#}")),
				}
			}
		}
	}

	async fn score_leaf(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
		match config {
			RubricConfig::ExtractMatch(cfg) => {
				let inner_kind = cfg.inner_matcher.unwrap_or(RubricType::Equals);
				let inner = RubricConfig::reference_only(inner_kind)
					.ok_or_else(|| anyhow!("`{inner_kind}` cannot be used as an inner matcher"))?;
				let extracted = extractor::extract_with_choices(
					input.raw_output,
					&cfg.extractor,
					input.content.choices.as_deref(),
				);
				let inner_input = ScoreInput {
					answer: &extracted,
					..*input
				};
				let score = self.lookup(inner_kind)?.score(&inner, &inner_input).await?;
				let reason = match score.reason.as_deref() {
					Some(reason) => format!("extracted `{extracted}`: {reason}"),
					None => format!("extracted `{extracted}`"),
				};
				Ok(score.with_reason(reason))
			}
			RubricConfig::Rubric(_) => Err(anyhow!("composite rubric reached a leaf scorer")),
			other => self.lookup(other.kind())?.score(other, input).await,
		}
	}

	fn lookup(&self, kind: RubricType) -> Result<&Arc<dyn Scorer>> {
		self.scorers
			.get(&kind)
			.ok_or_else(|| anyhow!("no scorer configured for `{kind}` rubrics"))
	}
}

/// Checks a rubric before any case is dispatched.
pub fn validate_rubric(rubric: &Rubric) -> Result<(), EvalError> {
	let invalid = |reason: String| EvalError::invalid_rubric(rubric.id.clone(), reason);

	if !(rubric.weight.is_finite() && rubric.weight > 0.0) {
		return Err(invalid(format!("weight must be positive, got {}", rubric.weight)));
	}
	if let Some(t) = rubric.threshold {
		check_unit("threshold", t).map_err(invalid)?;
	}
	if let Some(config) = &rubric.extractor {
		extractor::validate(config).map_err(|e| invalid(e.to_string()))?;
	}

	match &rubric.config {
		RubricConfig::Regex(c) => {
			Regex::new(&c.pattern).map_err(|e| invalid(e.to_string()))?;
		}
		RubricConfig::AnyOf(c) if c.values.is_empty() => {
			return Err(invalid("any-of needs at least one value".to_string()));
		}
		RubricConfig::Numeric(NumericConfig { value, tolerance }) => {
			if value.is_some_and(|v| !v.is_finite()) || tolerance.is_some_and(|t| !t.is_finite()) {
				return Err(invalid("numeric value and tolerance must be finite".to_string()));
			}
		}
		RubricConfig::ExtractMatch(c) => {
			extractor::validate(&c.extractor).map_err(|e| invalid(e.to_string()))?;
			let inner = c.inner_matcher.unwrap_or(RubricType::Equals);
			if RubricConfig::reference_only(inner).is_none() {
				return Err(invalid(format!("`{inner}` cannot be used as an inner matcher")));
			}
		}
		RubricConfig::JsonSchema(c) => {
			compile_schema(&c.schema).map_err(|e| invalid(e.to_string()))?;
		}
		RubricConfig::Javascript(c) | RubricConfig::Python(c) if c.code.trim().is_empty() => {
			return Err(invalid("script code is empty".to_string()));
		}
		RubricConfig::LlmRubric(c) if c.criteria.as_deref().map_or(true, |s| s.trim().is_empty()) => {
			return Err(invalid("llm-rubric needs criteria".to_string()));
		}
		RubricConfig::Similar(c) | RubricConfig::Levenshtein(c) => {
			if let Some(t) = c.threshold {
				check_unit("threshold", t).map_err(invalid)?;
			}
		}
		RubricConfig::Rubric(c) => {
			if c.rubrics.is_empty() {
				return Err(invalid("composite rubric has no members".to_string()));
			}
			for member in &c.rubrics {
				validate_rubric(member)?;
			}
		}
		_ => {}
	}
	Ok(())
}

fn check_unit(field: &str, value: f64) -> Result<(), String> {
	if (0.0..=1.0).contains(&value) {
		Ok(())
	} else {
		Err(format!("{field} must be within [0, 1], got {value}"))
	}
}

/// Rubrics and answer handling for one test case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRubrics {
	pub rubrics: Vec<Rubric>,
	pub extractor: Option<ExtractorConfig>,
	/// `envPrompt`, sent to the agent as its system prompt.
	pub system_prompt: Option<String>,
}

/// Picks the rubric set for a test case: the case's eval mode, else the
/// dataset's, else the benchmark rubrics, else `equals` against `expected`.
pub fn resolve_rubrics(
	case: &TestCase,
	dataset: &Dataset,
	benchmark: Option<&Benchmark>,
) -> Result<ResolvedRubrics, EvalError> {
	let case_cfg = case.eval_config.as_ref();
	let dataset_cfg = dataset.eval_config.as_ref();
	let lookup = |get: fn(&EvalConfig) -> Option<&String>| {
		case_cfg
			.and_then(get)
			.or_else(|| dataset_cfg.and_then(get))
			.cloned()
	};
	let system_prompt = lookup(|c| c.env_prompt.as_ref());
	let judge_prompt = lookup(|c| c.judge_prompt.as_ref());
	let benchmark_extractor = benchmark.and_then(|b| b.extractor.clone());

	let mode = match (case.eval_mode, dataset.eval_mode) {
		(Some(mode), _) => Some((mode, case_cfg)),
		(None, Some(mode)) => Some((mode, case_cfg.or(dataset_cfg))),
		(None, None) => None,
	};

	let (rubrics, extractor) = match mode {
		Some((mode, cfg)) => {
			let cfg = cfg.cloned().unwrap_or_default();
			let rubric = rubric_from_mode(mode, &cfg, judge_prompt.as_deref())?;
			let extractor = match mode {
				RubricType::ExtractMatch => None,
				_ => cfg.extractor,
			};
			(vec![rubric], extractor.or(benchmark_extractor))
		}
		None => match benchmark.filter(|b| !b.rubrics.is_empty()) {
			Some(b) => (b.rubrics.clone(), benchmark_extractor),
			None if case.content.expected.is_some() => (
				vec![Rubric::new("equals", RubricConfig::Equals(ValueConfig::default()))],
				benchmark_extractor,
			),
			None => (Vec::new(), benchmark_extractor),
		},
	};

	Ok(ResolvedRubrics {
		rubrics,
		extractor,
		system_prompt,
	})
}

/// Builds the single rubric an `evalMode` + `evalConfig` pair stands for.
pub fn rubric_from_mode(mode: RubricType, cfg: &EvalConfig, judge_prompt: Option<&str>) -> Result<Rubric, EvalError> {
	let id = mode.as_str();
	let missing = |field: &str| EvalError::invalid_rubric(id, format!("evalConfig.{field} is required for `{mode}`"));
	let case_sensitive = cfg.case_sensitive.unwrap_or(false);
	let value = || ValueConfig {
		value: cfg.value.clone(),
		case_sensitive,
	};
	let llm = || LlmConfig {
		criteria: cfg.criteria.clone().or_else(|| judge_prompt.map(str::to_string)),
		model: cfg.model.clone(),
		provider: cfg.provider.clone(),
		system_role: cfg.system_role.clone(),
	};
	let similarity = || SimilarityConfig {
		value: cfg.value.clone(),
		threshold: cfg.threshold,
	};

	let config = match mode {
		RubricType::Equals => RubricConfig::Equals(value()),
		RubricType::Contains => RubricConfig::Contains(value()),
		RubricType::StartsWith => RubricConfig::StartsWith(value()),
		RubricType::EndsWith => RubricConfig::EndsWith(value()),
		RubricType::AnyOf => RubricConfig::AnyOf(AnyOfConfig {
			values: cfg.values.clone().ok_or_else(|| missing("values"))?,
			case_sensitive,
		}),
		RubricType::Regex => RubricConfig::Regex(RegexConfig {
			pattern: cfg.pattern.clone().ok_or_else(|| missing("pattern"))?,
		}),
		RubricType::Numeric => {
			let value = match cfg.value.as_deref() {
				Some(raw) => Some(
					parse_number(raw)
						.ok_or_else(|| EvalError::invalid_rubric(id, format!("`{raw}` is not a number")))?,
				),
				None => None,
			};
			RubricConfig::Numeric(NumericConfig {
				value,
				tolerance: cfg.tolerance,
			})
		}
		RubricType::ExtractMatch => RubricConfig::ExtractMatch(ExtractMatchConfig {
			extractor: cfg.extractor.clone().ok_or_else(|| missing("extractor"))?,
			inner_matcher: cfg.inner_matcher,
		}),
		RubricType::JsonSchema => RubricConfig::JsonSchema(JsonSchemaConfig {
			schema: cfg.schema.clone().ok_or_else(|| missing("schema"))?,
		}),
		RubricType::Javascript => RubricConfig::Javascript(ScriptConfig {
			code: cfg.code.clone().ok_or_else(|| missing("code"))?,
		}),
		RubricType::Python => RubricConfig::Python(ScriptConfig {
			code: cfg.code.clone().ok_or_else(|| missing("code"))?,
		}),
		RubricType::LlmRubric => RubricConfig::LlmRubric(llm()),
		RubricType::Factuality => RubricConfig::Factuality(llm()),
		RubricType::AnswerRelevance => RubricConfig::AnswerRelevance(llm()),
		RubricType::Similar => RubricConfig::Similar(similarity()),
		RubricType::Levenshtein => RubricConfig::Levenshtein(similarity()),
		RubricType::Rubric => RubricConfig::Rubric(CompositeConfig {
			rubrics: cfg.rubrics.clone().ok_or_else(|| missing("rubrics"))?,
		}),
	};

	let mut rubric = Rubric::new(id, config);
	if rubric.config.threshold_hint().is_none() {
		rubric.threshold = cfg.threshold;
	}
	Ok(rubric)
}
