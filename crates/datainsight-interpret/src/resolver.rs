//! Request resolution against the profiled table.
//!
//! Column names from the model are reconciled with real column names in a
//! fixed order, stopping at the first step that yields exactly one match:
//!
//! 1. exact match
//! 2. case-insensitive match
//! 3. case-insensitive edit distance, at most [`MAX_EDIT_DISTANCE`]
//!
//! Ties at any step are reported as [`ResolutionFailure::AmbiguousColumn`];
//! nothing beyond step 3 is ever guessed. Resolution is a pure function of
//! its inputs.

use crate::extraction::ExtractedEntities;
use crate::schema::{ChartKind, InterpretedRequest, OperationKind, ParamValue};
use datainsight_table::{ColumnMeta, ColumnType};
use serde::Serialize;
use std::fmt;

/// Upper bound for fuzzy column matching.
pub const MAX_EDIT_DISTANCE: usize = 2;
pub const DEFAULT_QUANTILES: [f64; 3] = [0.25, 0.5, 0.75];
pub const DEFAULT_BINS: usize = 10;
pub const MAX_BINS: usize = 100;
pub const DEFAULT_TOP: usize = 10;
const MAX_TOP: usize = 1_000;

// ============================================================================
// Failures
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionFailure {
    #[error("unknown column `{name}`")]
    UnknownColumn { name: String },
    #[error("column `{name}` is ambiguous: could be {}", .candidates.join(", "))]
    AmbiguousColumn { name: String, candidates: Vec<String> },
    #[error("column `{column}` is {actual}, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: ColumnType,
    },
    #[error("{operation} needs {expected} column(s), got {actual}")]
    WrongColumnCount {
        operation: OperationKind,
        expected: &'static str,
        actual: usize,
    },
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
}

// ============================================================================
// Resolved operations
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationMethod::Pearson => f.write_str("pearson"),
            CorrelationMethod::Spearman => f.write_str("spearman"),
        }
    }
}

/// Parameters after validation, with defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationParams {
    pub method: CorrelationMethod,
    /// Ascending, deduplicated, each in [0, 1].
    pub quantiles: Vec<f64>,
    pub bins: usize,
    pub top: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedColumn {
    pub name: String,
    pub dtype: ColumnType,
}

/// An interpreted request whose columns exist and fit the operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOperation {
    pub operation: OperationKind,
    pub columns: Vec<ResolvedColumn>,
    pub params: OperationParams,
}

impl ResolvedOperation {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub max_distance: usize,
    pub default_quantiles: Vec<f64>,
    pub default_bins: usize,
    pub default_top: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_distance: MAX_EDIT_DISTANCE,
            default_quantiles: DEFAULT_QUANTILES.to_vec(),
            default_bins: DEFAULT_BINS,
            default_top: DEFAULT_TOP,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestResolver {
    config: ResolverConfig,
}

impl RequestResolver {
    pub fn new(mut config: ResolverConfig) -> Self {
        config.max_distance = config.max_distance.min(MAX_EDIT_DISTANCE);
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(
        &self,
        request: &InterpretedRequest,
        columns: &[ColumnMeta],
    ) -> Result<ResolvedOperation, ResolutionFailure> {
        let resolved: Vec<&ColumnMeta> = if request.columns.is_empty() && !request.operation.requires_columns() {
            columns.iter().collect()
        } else {
            request
                .columns
                .iter()
                .map(|name| self.resolve_column(name, columns))
                .collect::<Result<_, _>>()?
        };

        check_types(request.operation, &resolved)?;
        let params = self.resolve_params(request)?;

        Ok(ResolvedOperation {
            operation: request.operation,
            columns: resolved
                .into_iter()
                .map(|c| ResolvedColumn {
                    name: c.name.clone(),
                    dtype: c.dtype,
                })
                .collect(),
            params,
        })
    }

    /// Map one user-facing column name onto a real column.
    pub fn resolve_column<'a>(
        &self,
        name: &str,
        columns: &'a [ColumnMeta],
    ) -> Result<&'a ColumnMeta, ResolutionFailure> {
        let name = name.trim();
        let unknown = || ResolutionFailure::UnknownColumn {
            name: name.to_string(),
        };
        if name.is_empty() {
            return Err(unknown());
        }

        if let Some(column) = columns.iter().find(|c| c.name == name) {
            return Ok(column);
        }

        let lower = name.to_lowercase();
        let folded: Vec<&ColumnMeta> = columns
            .iter()
            .filter(|c| c.name.to_lowercase() == lower)
            .collect();
        if !folded.is_empty() {
            return unique(name, folded);
        }

        let needle: Vec<char> = lower.chars().collect();
        let mut best = self.config.max_distance + 1;
        let mut nearest: Vec<&ColumnMeta> = Vec::new();
        for column in columns {
            let d = levenshtein_with_max(&column.name.to_lowercase(), &needle, self.config.max_distance);
            if d > self.config.max_distance {
                continue;
            }
            if d < best {
                best = d;
                nearest.clear();
            }
            if d == best {
                nearest.push(column);
            }
        }
        if nearest.is_empty() {
            return Err(unknown());
        }
        let resolved = unique(name, nearest)?;
        tracing::debug!(requested = name, resolved = %resolved.name, distance = best, "fuzzy column match");
        Ok(resolved)
    }

    fn resolve_params(&self, request: &InterpretedRequest) -> Result<OperationParams, ResolutionFailure> {
        let mut params = OperationParams {
            method: CorrelationMethod::Pearson,
            quantiles: Vec::new(),
            bins: self.config.default_bins,
            top: self.config.default_top,
        };

        for (name, value) in &request.params {
            match (request.operation, name.as_str()) {
                (OperationKind::Correlation, "method") => params.method = parse_method(value)?,
                (OperationKind::Quantiles, "quantiles" | "q" | "percentiles") => {
                    params.quantiles = parse_quantiles(name, value)?;
                }
                (OperationKind::Visualize(ChartKind::Hist), "bins") => {
                    params.bins = parse_count(name, value, MAX_BINS)?;
                }
                (OperationKind::SummaryStats, "top") => params.top = parse_count(name, value, MAX_TOP)?,
                _ => tracing::debug!(param = %name, operation = %request.operation, "ignoring unused parameter"),
            }
        }

        if request.operation == OperationKind::Quantiles && params.quantiles.is_empty() {
            params.quantiles = normalize_levels(self.config.default_quantiles.clone());
        }
        Ok(params)
    }
}

fn unique<'a>(name: &str, mut matches: Vec<&'a ColumnMeta>) -> Result<&'a ColumnMeta, ResolutionFailure> {
    if matches.len() == 1 {
        return Ok(matches.remove(0));
    }
    Err(ResolutionFailure::AmbiguousColumn {
        name: name.to_string(),
        candidates: matches.iter().map(|c| c.name.clone()).collect(),
    })
}

// ============================================================================
// Type rules
// ============================================================================

fn check_types(operation: OperationKind, columns: &[&ColumnMeta]) -> Result<(), ResolutionFailure> {
    let count = |expected: &'static str, ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(ResolutionFailure::WrongColumnCount {
                operation,
                expected,
                actual: columns.len(),
            })
        }
    };

    match operation {
        OperationKind::Correlation | OperationKind::Regression => {
            count("exactly 2", columns.len() == 2)?;
            require_all(columns, &[ColumnType::Numeric], "numeric")
        }
        OperationKind::Quantiles => {
            count("at least 1", !columns.is_empty())?;
            require_all(columns, &[ColumnType::Numeric], "numeric")
        }
        OperationKind::SummaryStats => Ok(()),
        OperationKind::Visualize(ChartKind::Bar | ChartKind::Hist) => {
            count("at least 1", !columns.is_empty())?;
            require_any(columns, &[ColumnType::Categorical, ColumnType::Numeric], "categorical or numeric")
        }
        OperationKind::Visualize(ChartKind::Line | ChartKind::Scatter) => {
            count("exactly 2", columns.len() == 2)?;
            // The y axis needs a number; x may be anything plottable.
            if columns.iter().any(|c| c.dtype == ColumnType::Numeric) {
                return Ok(());
            }
            match columns.last() {
                Some(c) => Err(mismatch(c, "numeric")),
                None => Ok(()),
            }
        }
    }
}

fn require_all(columns: &[&ColumnMeta], allowed: &[ColumnType], expected: &str) -> Result<(), ResolutionFailure> {
    match columns.iter().find(|c| !allowed.contains(&c.dtype)) {
        Some(c) => Err(mismatch(c, expected)),
        None => Ok(()),
    }
}

fn require_any(columns: &[&ColumnMeta], allowed: &[ColumnType], expected: &str) -> Result<(), ResolutionFailure> {
    if columns.iter().any(|c| allowed.contains(&c.dtype)) {
        return Ok(());
    }
    // Report the first column; none of them qualify.
    match columns.first() {
        Some(c) => Err(mismatch(c, expected)),
        None => Ok(()),
    }
}

fn mismatch(column: &ColumnMeta, expected: &str) -> ResolutionFailure {
    ResolutionFailure::TypeMismatch {
        column: column.name.clone(),
        expected: expected.to_string(),
        actual: column.dtype,
    }
}

// ============================================================================
// Parameters
// ============================================================================

fn invalid(name: &str, reason: impl Into<String>) -> ResolutionFailure {
    ResolutionFailure::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn parse_method(value: &ParamValue) -> Result<CorrelationMethod, ResolutionFailure> {
    match value.as_text().trim().to_ascii_lowercase().as_str() {
        "pearson" => Ok(CorrelationMethod::Pearson),
        "spearman" => Ok(CorrelationMethod::Spearman),
        other => Err(invalid("method", format!("`{other}` is not pearson or spearman"))),
    }
}

fn parse_count(name: &str, value: &ParamValue, max: usize) -> Result<usize, ResolutionFailure> {
    let n = value
        .as_f64()
        .ok_or_else(|| invalid(name, format!("`{}` is not a number", value.as_text())))?;
    if n.fract() != 0.0 || n < 1.0 || n > max as f64 {
        return Err(invalid(name, format!("must be a whole number between 1 and {max}")));
    }
    Ok(n as usize)
}

fn parse_quantiles(name: &str, value: &ParamValue) -> Result<Vec<f64>, ResolutionFailure> {
    let raw: Vec<f64> = match value {
        ParamValue::Number(n) => vec![*n],
        ParamValue::Text(text) => text
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .map(|s| s.trim().trim_end_matches('%'))
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| invalid(name, format!("`{s}` is not a number")))
            })
            .collect::<Result<_, _>>()?,
    };
    if raw.is_empty() {
        return Err(invalid(name, "no quantile levels given"));
    }
    let levels = raw
        .into_iter()
        .map(|q| quantile_level(q).ok_or_else(|| invalid(name, format!("{q} is outside [0, 1] and (1, 100]"))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(normalize_levels(levels))
}

/// Levels in (1, 100] are percentages.
fn quantile_level(q: f64) -> Option<f64> {
    if !q.is_finite() {
        None
    } else if (0.0..=1.0).contains(&q) {
        Some(q)
    } else if q > 1.0 && q <= 100.0 {
        Some(q / 100.0)
    } else {
        None
    }
}

fn normalize_levels(mut levels: Vec<f64>) -> Vec<f64> {
    levels.sort_by(|a, b| a.total_cmp(b));
    levels.dedup();
    levels
}

/// Fill a missing quantile list from numbers in the instruction, when every
/// literal is a usable level ("90th and 99th percentile of latency").
pub fn apply_quantile_hints(request: &mut InterpretedRequest, entities: &ExtractedEntities) {
    if request.operation != OperationKind::Quantiles
        || ["quantiles", "q", "percentiles"]
            .iter()
            .any(|k| request.params.contains_key(*k))
        || entities.numeric_literals.is_empty()
    {
        return;
    }
    let levels: Option<Vec<f64>> = entities
        .numeric_literals
        .iter()
        .map(|q| quantile_level(*q))
        .collect();
    if let Some(levels) = levels {
        let list = levels
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(",");
        request
            .params
            .insert("quantiles".to_string(), ParamValue::Text(list));
    }
}

// ============================================================================
// Edit distance
// ============================================================================

/// Levenshtein distance between `value` and `needle_chars`, giving up early
/// once every cell in a DP row exceeds `max_dist` (then returns
/// `max_dist + 1`).
pub fn levenshtein_with_max(value: &str, needle_chars: &[char], max_dist: usize) -> usize {
    if max_dist == 0 {
        return if value.chars().eq(needle_chars.iter().copied()) { 0 } else { 1 };
    }

    let n = needle_chars.len();
    if n == 0 {
        return value.chars().count();
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];

        for j in 1..=n {
            let cost = usize::from(c != needle_chars[j - 1]);
            let d = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            curr[j] = d;
            row_min = row_min.min(d);
        }

        if row_min > max_dist {
            return max_dist + 1;
        }

        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

// ============================================================================
// Tests
// ============================================================================
