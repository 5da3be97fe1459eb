use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelimiterPosition {
	First,
	#[default]
	Last,
}

/// What a choice-index extractor returns once a label is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceOutput {
	#[default]
	Label,
	Text,
}

fn default_trim() -> bool {
	true
}

/// Strategy for isolating the answer from raw agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExtractorConfig {
	Regex {
		pattern: String,
		/// Capture group to return; the whole match when absent.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		group: Option<usize>,
	},
	Delimiter {
		delimiter: String,
		#[serde(default)]
		position: DelimiterPosition,
	},
	LastLine {
		#[serde(default = "default_trim")]
		trim: bool,
	},
	ChoiceIndex {
		/// Candidate labels, `A`..`Z` when absent.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		labels: Option<Vec<String>>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		pattern: Option<String>,
		#[serde(default)]
		output: ChoiceOutput,
	},
}
