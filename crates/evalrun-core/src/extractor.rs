//! Pulls a candidate answer out of raw agent output.
//!
//! Extraction never fails a test case: [`extract`] falls back to the raw output
//! and lets the rubric decide.

use regex::Regex;

use crate::error::ExtractionError;
use crate::types::{ChoiceOutput, DelimiterPosition, ExtractorConfig};

pub fn extract(raw: &str, config: &ExtractorConfig) -> String {
    extract_with_choices(raw, config, None)
}

/// Like [`extract`], with the test case's choices so that choice-index
/// extractors can return the choice text.
pub fn extract_with_choices(raw: &str, config: &ExtractorConfig, choices: Option<&[String]>) -> String {
    match try_extract(raw, config, choices) {
        Ok(answer) => answer,
        Err(err) => {
            tracing::debug!(error = %err, "extraction failed, passing raw output through");
            raw.to_string()
        }
    }
}

pub fn try_extract(
    raw: &str,
    config: &ExtractorConfig,
    choices: Option<&[String]>,
) -> Result<String, ExtractionError> {
    match config {
        ExtractorConfig::Regex { pattern, group } => extract_regex(raw, pattern, group.unwrap_or(0)),
        ExtractorConfig::Delimiter { delimiter, position } => extract_delimited(raw, delimiter, *position),
        ExtractorConfig::LastLine { trim } => extract_last_line(raw, *trim),
        ExtractorConfig::ChoiceIndex { labels, pattern, output } => {
            let labels = labels.clone().unwrap_or_else(default_labels);
            let label = find_choice(raw, &labels, pattern.as_deref())?;
            if *output == ChoiceOutput::Text {
                let text = labels
                    .iter()
                    .position(|l| *l == label)
                    .and_then(|idx| choices.and_then(|c| c.get(idx)));
                if let Some(text) = text {
                    return Ok(text.clone());
                }
            }
            Ok(label)
        }
    }
}

pub fn default_labels() -> Vec<String> {
    ('A'..='Z').map(|c| c.to_string()).collect()
}

/// Checks that every pattern in the config compiles.
pub fn validate(config: &ExtractorConfig) -> Result<(), ExtractionError> {
    match config {
        ExtractorConfig::Regex { pattern, .. } => {
            Regex::new(pattern)?;
        }
        ExtractorConfig::ChoiceIndex {
            pattern: Some(pattern), ..
        } => {
            Regex::new(pattern)?;
        }
        ExtractorConfig::Delimiter { delimiter, .. } if delimiter.is_empty() => {
            return Err(ExtractionError::NoSegment(String::new()));
        }
        _ => {}
    }
    Ok(())
}

fn extract_regex(raw: &str, pattern: &str, group: usize) -> Result<String, ExtractionError> {
    let re = Regex::new(pattern)?;
    let caps = re
        .captures(raw)
        .ok_or_else(|| ExtractionError::NoMatch(pattern.to_string()))?;
    caps.get(group)
        .map(|m| m.as_str().trim().to_string())
        .ok_or(ExtractionError::EmptyGroup(group))
}

fn extract_delimited(raw: &str, delimiter: &str, position: DelimiterPosition) -> Result<String, ExtractionError> {
    if delimiter.is_empty() || !raw.contains(delimiter) {
        return Err(ExtractionError::NoSegment(delimiter.to_string()));
    }
    let mut segments = raw.split(delimiter).map(str::trim).filter(|s| !s.is_empty());
    let found = match position {
        DelimiterPosition::First => segments.next(),
        DelimiterPosition::Last => segments.last(),
    };
    found
        .map(str::to_string)
        .ok_or_else(|| ExtractionError::NoSegment(delimiter.to_string()))
}

fn extract_last_line(raw: &str, trim: bool) -> Result<String, ExtractionError> {
    let line = raw
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or(ExtractionError::EmptyOutput)?;
    Ok(if trim { line.trim().to_string() } else { line.to_string() })
}

/// Finds the chosen label, trying progressively weaker signals: an explicit
/// pattern, an "answer is X" phrase, a leading label, a parenthesised label and
/// finally the last standalone label.
fn find_choice(raw: &str, labels: &[String], pattern: Option<&str>) -> Result<String, ExtractionError> {
    if labels.is_empty() {
        return Err(ExtractionError::NoChoice);
    }
    let matches_label = |candidate: &str| {
        labels
            .iter()
            .find(|l| l.eq_ignore_ascii_case(candidate.trim()))
            .cloned()
    };

    if let Some(pattern) = pattern {
        let re = Regex::new(pattern)?;
        return re
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .filter_map(|m| matches_label(m.as_str()))
            .last()
            .ok_or(ExtractionError::NoChoice);
    }

    let mut sorted: Vec<&String> = labels.iter().collect();
    sorted.sort_by_key(|l| std::cmp::Reverse(l.len()));
    let alternation = sorted
        .iter()
        .map(|l| regex::escape(l))
        .collect::<Vec<_>>()
        .join("|");

    let candidates = [
        format!(r"(?i:answer)(?:\s+is)?\s*[:：]?\s*\**\(?({alternation})\)?(?:[^\w]|$)"),
        format!(r"^\s*\**\(?({alternation})(?:[.):\]]|\s|$)"),
        format!(r"\(({alternation})\)"),
    ];
    for candidate in candidates.iter() {
        let re = Regex::new(candidate)?;
        if let Some(label) = re
            .captures_iter(raw)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| matches_label(m.as_str()))
            .last()
        {
            return Ok(label);
        }
    }

    let standalone = Regex::new(&format!(r"\b({alternation})\b"))?;
    standalone
        .find_iter(raw)
        .filter(|m| !is_prose_word(m.as_str(), &raw[m.end()..]))
        .filter_map(|m| matches_label(m.as_str()))
        .last()
        .ok_or(ExtractionError::NoChoice)
}

/// "I" and "A" that run on into a lowercase word are prose, not labels.
fn is_prose_word(word: &str, rest: &str) -> bool {
    if !matches!(word, "I" | "A") {
        return false;
    }
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c == ' ' || c == '\'' => chars
            .find(|c| !c.is_whitespace())
            .is_some_and(|c| c.is_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(output: ChoiceOutput) -> ExtractorConfig {
        ExtractorConfig::ChoiceIndex {
            labels: None,
            pattern: None,
            output,
        }
    }

    #[test]
    fn test_regex_group() {
        let cfg = ExtractorConfig::Regex {
            pattern: r"Final answer: (\d+)".into(),
            group: Some(1),
        };
        assert_eq!(extract("work...\nFinal answer: 42", &cfg), "42");
    }

    #[test]
    fn test_regex_whole_match_by_default() {
        let cfg = ExtractorConfig::Regex {
            pattern: r"\d+".into(),
            group: None,
        };
        assert_eq!(extract("about 17 apples", &cfg), "17");
    }

    #[test]
    fn test_regex_no_match_passes_raw_through() {
        let cfg = ExtractorConfig::Regex {
            pattern: r"\d+".into(),
            group: None,
        };
        assert_eq!(extract("no digits", &cfg), "no digits");
        assert!(matches!(
            try_extract("no digits", &cfg, None),
            Err(ExtractionError::NoMatch(_))
        ));
    }

    #[test]
    fn test_invalid_pattern_passes_raw_through() {
        let cfg = ExtractorConfig::Regex {
            pattern: "(".into(),
            group: None,
        };
        assert_eq!(extract("raw", &cfg), "raw");
    }

    #[test]
    fn test_delimiter_first_and_last() {
        let raw = "reasoning #### 18 ####";
        let last = ExtractorConfig::Delimiter {
            delimiter: "####".into(),
            position: DelimiterPosition::Last,
        };
        let first = ExtractorConfig::Delimiter {
            delimiter: "####".into(),
            position: DelimiterPosition::First,
        };
        assert_eq!(extract(raw, &last), "18");
        assert_eq!(extract(raw, &first), "reasoning");
    }

    #[test]
    fn test_delimiter_missing() {
        let cfg = ExtractorConfig::Delimiter {
            delimiter: "####".into(),
            position: DelimiterPosition::Last,
        };
        assert_eq!(extract("plain", &cfg), "plain");
    }

    #[test]
    fn test_last_line() {
        let raw = "line one\n  the answer  \n\n";
        assert_eq!(extract(raw, &ExtractorConfig::LastLine { trim: true }), "the answer");
        assert_eq!(extract(raw, &ExtractorConfig::LastLine { trim: false }), "  the answer  ");
    }

    #[test]
    fn test_choice_answer_phrase() {
        let raw = "A is tempting, but the answer is (C).";
        assert_eq!(extract(raw, &choice(ChoiceOutput::Label)), "C");
    }

    #[test]
    fn test_choice_leading_label() {
        assert_eq!(extract("B. Because of gravity", &choice(ChoiceOutput::Label)), "B");
    }

    #[test]
    fn test_choice_returns_text() {
        let choices = vec!["Paris".to_string(), "Rome".to_string(), "Oslo".to_string()];
        let answer = extract_with_choices("Answer: B", &choice(ChoiceOutput::Text), Some(&choices));
        assert_eq!(answer, "Rome");
    }

    #[test]
    fn test_choice_numeric_labels() {
        let cfg = ExtractorConfig::ChoiceIndex {
            labels: Some(vec!["1".into(), "2".into(), "3".into()]),
            pattern: None,
            output: ChoiceOutput::Label,
        };
        assert_eq!(extract("I pick option (2)", &cfg), "2");
    }

    #[test]
    fn test_choice_custom_pattern() {
        let cfg = ExtractorConfig::ChoiceIndex {
            labels: None,
            pattern: Some(r"<choice>(\w)</choice>".into()),
            output: ChoiceOutput::Label,
        };
        assert_eq!(extract("<choice>d</choice>", &cfg), "D");
    }

    #[test]
    fn test_choice_not_found() {
        let raw = "i do not know";
        assert_eq!(extract(raw, &choice(ChoiceOutput::Label)), raw);
    }

    #[test]
    fn test_choice_skips_pronoun_and_article() {
        let label = choice(ChoiceOutput::Label);
        assert_eq!(extract("The best option is B, I think", &label), "B");
        assert_eq!(extract("I'd go with D", &label), "D");
        assert_eq!(extract("Probably C, though A case could be made", &label), "C");
        // a bare "I" still counts as a label
        assert_eq!(extract("My pick: I", &label), "I");
    }
}
