use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::scorer::{config_mismatch, reference, Score, ScoreInput, Scorer};
use crate::types::RubricConfig;

const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Numeric comparison within an absolute tolerance.
pub struct NumericScorer;

#[async_trait]
impl Scorer for NumericScorer {
    fn name(&self) -> &'static str {
        "numeric"
    }

    async fn score(&self, config: &RubricConfig, input: &ScoreInput<'_>) -> Result<Score> {
        let RubricConfig::Numeric(cfg) = config else {
            return Err(config_mismatch(self.name(), config));
        };
        let expected = match cfg.value {
            Some(v) => v,
            None => {
                let raw = reference(None, input.content)?;
                parse_number(raw).ok_or_else(|| anyhow!("expected value `{raw}` is not a number"))?
            }
        };
        let tolerance = cfg.tolerance.unwrap_or(DEFAULT_TOLERANCE).abs();

        let Some(actual) = parse_number(input.answer) else {
            return Ok(Score::binary(false).with_reason("answer contains no number"));
        };
        let within = (actual - expected).abs() <= tolerance;
        Ok(Score::binary(within).with_reason(format!("{actual} vs {expected} (±{tolerance})")))
    }
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?")
            .expect("number pattern is valid")
    })
}

fn grouped_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d{1,3}(?:,\d{3})+(?:\.\d+)?$").expect("grouping pattern is valid"))
}

/// The whole text as a number, else the last number found in it. Commas are
/// only dropped when they group thousands.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('.');
    let whole = if grouped_pattern().is_match(trimmed) {
        trimmed.replace(',', "")
    } else {
        trimmed.to_string()
    };
    if let Ok(v) = whole.parse::<f64>() {
        if v.is_finite() {
            return Some(v);
        }
    }
    number_pattern()
        .find_iter(text)
        .last()
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
