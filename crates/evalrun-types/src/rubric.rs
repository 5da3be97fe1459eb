use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extractor::ExtractorConfig;

/// Matching strategy of a rubric. Also used as the dataset/test-case `evalMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RubricType {
	Equals,
	Contains,
	Regex,
	StartsWith,
	EndsWith,
	AnyOf,
	Numeric,
	ExtractMatch,
	JsonSchema,
	Javascript,
	Python,
	LlmRubric,
	Factuality,
	AnswerRelevance,
	Similar,
	Levenshtein,
	Rubric,
}

impl RubricType {
	pub const ALL: [RubricType; 17] = [
		RubricType::Equals,
		RubricType::Contains,
		RubricType::Regex,
		RubricType::StartsWith,
		RubricType::EndsWith,
		RubricType::AnyOf,
		RubricType::Numeric,
		RubricType::ExtractMatch,
		RubricType::JsonSchema,
		RubricType::Javascript,
		RubricType::Python,
		RubricType::LlmRubric,
		RubricType::Factuality,
		RubricType::AnswerRelevance,
		RubricType::Similar,
		RubricType::Levenshtein,
		RubricType::Rubric,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			RubricType::Equals => "equals",
			RubricType::Contains => "contains",
			RubricType::Regex => "regex",
			RubricType::StartsWith => "starts-with",
			RubricType::EndsWith => "ends-with",
			RubricType::AnyOf => "any-of",
			RubricType::Numeric => "numeric",
			RubricType::ExtractMatch => "extract-match",
			RubricType::JsonSchema => "json-schema",
			RubricType::Javascript => "javascript",
			RubricType::Python => "python",
			RubricType::LlmRubric => "llm-rubric",
			RubricType::Factuality => "factuality",
			RubricType::AnswerRelevance => "answer-relevance",
			RubricType::Similar => "similar",
			RubricType::Levenshtein => "levenshtein",
			RubricType::Rubric => "rubric",
		}
	}

	/// Scored by an external LLM judge.
	pub fn is_llm(&self) -> bool {
		matches!(
			self,
			RubricType::LlmRubric | RubricType::Factuality | RubricType::AnswerRelevance
		)
	}

	/// Scored by the external script sandbox.
	pub fn is_script(&self) -> bool {
		matches!(self, RubricType::Javascript | RubricType::Python)
	}
}

impl fmt::Display for RubricType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Reference value for the string matchers. A missing value falls back to the
/// test case's `expected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	#[serde(default)]
	pub case_sensitive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyOfConfig {
	pub values: Vec<String>,
	#[serde(default)]
	pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexConfig {
	pub pattern: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractMatchConfig {
	pub extractor: ExtractorConfig,
	/// Matcher applied to the extracted value. Defaults to `equals`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inner_matcher: Option<RubricType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaConfig {
	pub schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
	pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub criteria: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub provider: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub system_role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeConfig {
	pub rubrics: Vec<Rubric>,
}

/// Type-specific rubric payload, tagged by `type` with the payload under `config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "kebab-case")]
pub enum RubricConfig {
	Equals(ValueConfig),
	Contains(ValueConfig),
	Regex(RegexConfig),
	StartsWith(ValueConfig),
	EndsWith(ValueConfig),
	AnyOf(AnyOfConfig),
	Numeric(NumericConfig),
	ExtractMatch(ExtractMatchConfig),
	JsonSchema(JsonSchemaConfig),
	Javascript(ScriptConfig),
	Python(ScriptConfig),
	LlmRubric(LlmConfig),
	Factuality(LlmConfig),
	AnswerRelevance(LlmConfig),
	Similar(SimilarityConfig),
	Levenshtein(SimilarityConfig),
	Rubric(CompositeConfig),
}

impl RubricConfig {
	pub fn kind(&self) -> RubricType {
		match self {
			RubricConfig::Equals(_) => RubricType::Equals,
			RubricConfig::Contains(_) => RubricType::Contains,
			RubricConfig::Regex(_) => RubricType::Regex,
			RubricConfig::StartsWith(_) => RubricType::StartsWith,
			RubricConfig::EndsWith(_) => RubricType::EndsWith,
			RubricConfig::AnyOf(_) => RubricType::AnyOf,
			RubricConfig::Numeric(_) => RubricType::Numeric,
			RubricConfig::ExtractMatch(_) => RubricType::ExtractMatch,
			RubricConfig::JsonSchema(_) => RubricType::JsonSchema,
			RubricConfig::Javascript(_) => RubricType::Javascript,
			RubricConfig::Python(_) => RubricType::Python,
			RubricConfig::LlmRubric(_) => RubricType::LlmRubric,
			RubricConfig::Factuality(_) => RubricType::Factuality,
			RubricConfig::AnswerRelevance(_) => RubricType::AnswerRelevance,
			RubricConfig::Similar(_) => RubricType::Similar,
			RubricConfig::Levenshtein(_) => RubricType::Levenshtein,
			RubricConfig::Rubric(_) => RubricType::Rubric,
		}
	}

	/// Pass threshold carried inside the payload (similarity rubrics only).
	pub fn threshold_hint(&self) -> Option<f64> {
		match self {
			RubricConfig::Similar(c) | RubricConfig::Levenshtein(c) => c.threshold,
			_ => None,
		}
	}

	/// Payload for a matcher that needs nothing beyond the test case's `expected`.
	/// `None` for types that require explicit configuration.
	pub fn reference_only(kind: RubricType) -> Option<RubricConfig> {
		let config = match kind {
			RubricType::Equals => RubricConfig::Equals(ValueConfig::default()),
			RubricType::Contains => RubricConfig::Contains(ValueConfig::default()),
			RubricType::StartsWith => RubricConfig::StartsWith(ValueConfig::default()),
			RubricType::EndsWith => RubricConfig::EndsWith(ValueConfig::default()),
			RubricType::Numeric => RubricConfig::Numeric(NumericConfig::default()),
			RubricType::Similar => RubricConfig::Similar(SimilarityConfig::default()),
			RubricType::Levenshtein => RubricConfig::Levenshtein(SimilarityConfig::default()),
			_ => return None,
		};
		Some(config)
	}
}

fn default_weight() -> f64 {
	1.0
}

/// A weighted scoring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
	pub id: String,
	#[serde(default)]
	pub name: String,
	#[serde(flatten)]
	pub config: RubricConfig,
	/// Applied to the raw agent output for this rubric only.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extractor: Option<ExtractorConfig>,
	#[serde(default = "default_weight")]
	pub weight: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub threshold: Option<f64>,
}

impl Rubric {
	pub fn new(id: impl Into<String>, config: RubricConfig) -> Self {
		let id = id.into();
		Self {
			name: id.clone(),
			id,
			config,
			extractor: None,
			weight: default_weight(),
			threshold: None,
		}
	}

	pub fn with_weight(mut self, weight: f64) -> Self {
		self.weight = weight;
		self
	}

	pub fn with_threshold(mut self, threshold: f64) -> Self {
		self.threshold = Some(threshold);
		self
	}

	pub fn with_extractor(mut self, extractor: ExtractorConfig) -> Self {
		self.extractor = Some(extractor);
		self
	}

	pub fn kind(&self) -> RubricType {
		self.config.kind()
	}

	pub fn is_composite(&self) -> bool {
		matches!(self.config, RubricConfig::Rubric(_))
	}

	/// Shorthand for an `equals` rubric against a fixed value.
	pub fn equals(id: impl Into<String>, value: impl Into<String>) -> Self {
		Self::new(
			id,
			RubricConfig::Equals(ValueConfig {
				value: Some(value.into()),
				case_sensitive: false,
			}),
		)
	}
}
