//! Instruction extraction: lightweight, lexicon-driven NLP over the raw text.
//!
//! Everything found here is advisory context for the model prompt. Nothing
//! is executed from it, and extraction cannot fail: text that matches
//! nothing is simply dropped.

use crate::RawInstruction;
use datainsight_table::ColumnMeta;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<date>\d{4}-\d{1,2}-\d{1,2}(?:[T ]\d{1,2}:\d{2}(?::\d{2})?)?)|(?P<num>-?\d+(?:\.\d+)?)%?|(?P<word>[A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("token pattern is valid")
});

static WORD_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("split pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordHint {
    Correlation,
    Regression,
    Trend,
    Distribution,
    Compare,
    Quantiles,
    Summary,
}

/// Fixed keyword lexicon. Matching is on whole lower-cased words.
const LEXICON: &[(&str, KeywordHint)] = &[
    ("correlation", KeywordHint::Correlation),
    ("correlate", KeywordHint::Correlation),
    ("correlated", KeywordHint::Correlation),
    ("relationship", KeywordHint::Correlation),
    ("regression", KeywordHint::Regression),
    ("regress", KeywordHint::Regression),
    ("predict", KeywordHint::Regression),
    ("fit", KeywordHint::Regression),
    ("trend", KeywordHint::Trend),
    ("trends", KeywordHint::Trend),
    ("over", KeywordHint::Trend),
    ("distribution", KeywordHint::Distribution),
    ("histogram", KeywordHint::Distribution),
    ("spread", KeywordHint::Distribution),
    ("compare", KeywordHint::Compare),
    ("comparison", KeywordHint::Compare),
    ("versus", KeywordHint::Compare),
    ("vs", KeywordHint::Compare),
    ("by", KeywordHint::Compare),
    ("quantile", KeywordHint::Quantiles),
    ("quantiles", KeywordHint::Quantiles),
    ("percentile", KeywordHint::Quantiles),
    ("percentiles", KeywordHint::Quantiles),
    ("quartile", KeywordHint::Quantiles),
    ("quartiles", KeywordHint::Quantiles),
    ("median", KeywordHint::Quantiles),
    ("summary", KeywordHint::Summary),
    ("summarize", KeywordHint::Summary),
    ("summarise", KeywordHint::Summary),
    ("describe", KeywordHint::Summary),
    ("overview", KeywordHint::Summary),
];

/// Words that mark an instruction as analytic even when it looks like noise.
const ANALYTIC_WORDS: &[&str] = &[
    "sum", "min", "max", "mean", "avg", "average", "median", "mode", "count", "std", "var",
    "quantile", "percentile", "correlation", "regression", "describe", "summary", "trend",
    "distribution", "chart", "plot", "graph", "bar", "line", "hist", "histogram", "scatter",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Exact column names mentioned in the instruction.
    pub candidate_columns: BTreeSet<String>,
    /// Standalone numbers, in order of appearance.
    pub numeric_literals: Vec<f64>,
    pub keyword_hints: BTreeSet<KeywordHint>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.candidate_columns.is_empty()
            && self.numeric_literals.is_empty()
            && self.keyword_hints.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstructionExtractor;

impl InstructionExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, instruction: &RawInstruction, columns: &[ColumnMeta]) -> ExtractedEntities {
        let mut entities = ExtractedEntities::default();
        let mut words: HashSet<String> = HashSet::new();

        for cap in TOKEN_RE.captures_iter(&instruction.text) {
            if cap.name("date").is_some() {
                continue;
            }
            if let Some(num) = cap.name("num") {
                if let Ok(value) = literal_text(&instruction.text, num).parse::<f64>() {
                    entities.numeric_literals.push(value);
                }
            } else if let Some(word) = cap.name("word") {
                let lower = word.as_str().to_lowercase();
                if let Some((_, hint)) = LEXICON.iter().find(|(w, _)| *w == lower) {
                    entities.keyword_hints.insert(*hint);
                }
                // `unit_price` also contributes `unit` and `price`.
                for part in lower.split('_').filter(|p| !p.is_empty()) {
                    words.insert(part.to_string());
                }
                words.insert(lower);
            }
        }

        for column in columns {
            if mentions_column(&column.name, &words) {
                entities.candidate_columns.insert(column.name.clone());
            }
        }

        entities
    }
}

/// A `-` glued to a preceding letter or digit is a separator (`q1-2`,
/// `2024-01`), not a sign.
fn literal_text<'t>(text: &'t str, num: regex::Match<'t>) -> &'t str {
    let glued = text[..num.start()]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric());
    match num.as_str().strip_prefix('-') {
        Some(unsigned) if glued => unsigned,
        _ => num.as_str(),
    }
}

/// A column is mentioned when its full lower-cased name appears as a word, or
/// when every token of its name appears somewhere in the instruction.
fn mentions_column(name: &str, words: &HashSet<String>) -> bool {
    let lower = name.to_lowercase();
    if words.contains(&lower) {
        return true;
    }
    let tokens: Vec<&str> = WORD_SPLIT_RE
        .split(&lower)
        .filter(|t| !t.is_empty())
        .collect();
    !tokens.is_empty() && tokens.iter().all(|t| words.contains(*t))
}

/// True if the text names at least one analytic operation or chart.
pub fn contains_analytic_keyword(text: &str) -> bool {
    TOKEN_RE
        .captures_iter(text)
        .filter_map(|cap| cap.name("word"))
        .any(|w| ANALYTIC_WORDS.contains(&w.as_str().to_lowercase().as_str()))
}

/// Cheap screen for instructions not worth a model call: empty, very short,
/// mostly non-alphabetic, or vowel-less noise. Analytic keywords override
/// the noise checks.
pub fn looks_unintelligible(text: &str) -> bool {
    let text = text.trim();
    if text.chars().count() < 3 {
        return true;
    }
    if contains_analytic_keyword(text) {
        return false;
    }
    let total = text.chars().count();
    let alpha = text.chars().filter(|c| c.is_alphabetic()).count();
    if alpha * 2 < total {
        return true;
    }
    let vowels = text
        .chars()
        .filter(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u'))
        .count();
    vowels * 4 < alpha
}

// ============================================================================
// Tests
// ============================================================================
