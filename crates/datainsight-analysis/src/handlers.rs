//! Operation handlers.
//!
//! Each handler is a pure function of the table columns and the resolved
//! operation. Handlers never panic on empty or degenerate data; they return
//! an `InsufficientData` result instead.

use crate::result::{
    ChartData, ColumnQuantiles, ColumnSummary, ComputationResult, Payload, QuantileValue, Series,
};
use crate::stats;
use chrono::NaiveDateTime;
use datainsight_interpret::{ChartKind, CorrelationMethod, OperationKind, ResolvedOperation};
use datainsight_table::{parse_datetime, Column, ColumnType, Table};
use std::collections::BTreeMap;

/// Bars beyond this are dropped (largest groups are kept for counts).
pub const MAX_BARS: usize = 30;

pub(crate) fn fmt2(v: f64) -> String {
    format!("{v:.2}")
}

fn quantile_label(q: f64) -> String {
    let pct = q * 100.0;
    if (pct - pct.round()).abs() < 1e-9 {
        format!("{}%", pct.round() as i64)
    } else {
        format!("{pct:.1}%")
    }
}

fn too_few_pairs(kind: OperationKind, x: &Column, y: &Column, n: usize) -> ComputationResult {
    ComputationResult::insufficient(
        kind,
        format!(
            "only {n} row(s) have values in both `{}` and `{}`; at least 2 are needed",
            x.name(),
            y.name()
        ),
    )
}

fn wrong_arity(kind: OperationKind, expected: &str, actual: usize) -> ComputationResult {
    ComputationResult::insufficient(kind, format!("{kind} needs {expected} column(s), got {actual}"))
}

// ============================================================================
// Correlation and regression
// ============================================================================

pub fn strength(r: f64) -> &'static str {
    match r.abs() {
        a if a >= 0.7 => "strong",
        a if a >= 0.4 => "moderate",
        a if a >= 0.1 => "weak",
        _ => "negligible",
    }
}

/// Insufficient-data result for a paired statistic with no finite value.
/// Only the sides in `xs`/`ys` are checked for variation; an empty slice is
/// skipped.
fn undefined_pair_statistic(
    kind: OperationKind,
    x: &Column,
    y: &Column,
    xs: &[f64],
    ys: &[f64],
) -> ComputationResult {
    let constant: Vec<String> = [(x, xs), (y, ys)]
        .into_iter()
        .filter(|(_, values)| !values.is_empty() && !stats::varies(values))
        .map(|(column, _)| format!("`{}`", column.name()))
        .collect();
    let reason = if constant.is_empty() {
        format!(
            "`{}` and `{}` differ too much in magnitude to compute {kind} without overflow",
            x.name(),
            y.name()
        )
    } else {
        format!("{} does not vary across the paired rows", constant.join(" and "))
    };
    ComputationResult::insufficient(kind, reason)
}

pub fn correlation(_table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    let kind = OperationKind::Correlation;
    let [x, y] = columns else {
        return wrong_arity(kind, "exactly 2", columns.len());
    };
    let (xs, ys) = stats::paired(&x.numeric_values(), &y.numeric_values());
    if xs.len() < 2 {
        return too_few_pairs(kind, x, y, xs.len());
    }

    let method = op.params.method;
    let coefficient = match method {
        CorrelationMethod::Pearson => stats::pearson(&xs, &ys),
        CorrelationMethod::Spearman => stats::spearman(&xs, &ys),
    };
    let Some(r) = coefficient else {
        return undefined_pair_statistic(kind, x, y, &xs, &ys);
    };

    let direction = if r >= 0.0 { "positive" } else { "negative" };
    let narrative = format!(
        "There is a {} {} correlation between {} and {} ({} r = {}, {} rows).",
        strength(r),
        direction,
        x.name(),
        y.name(),
        method,
        fmt2(r),
        xs.len()
    );
    ComputationResult::computed(
        kind,
        Payload::Correlation {
            x: x.name().to_string(),
            y: y.name().to_string(),
            method,
            coefficient: r,
            n: xs.len(),
        },
        narrative,
    )
}

pub fn regression(_table: &Table, columns: &[&Column], _op: &ResolvedOperation) -> ComputationResult {
    let kind = OperationKind::Regression;
    let [x, y] = columns else {
        return wrong_arity(kind, "exactly 2", columns.len());
    };
    let (xs, ys) = stats::paired(&x.numeric_values(), &y.numeric_values());
    if xs.len() < 2 {
        return too_few_pairs(kind, x, y, xs.len());
    }
    let Some(fit) = stats::linear_fit(&xs, &ys) else {
        return undefined_pair_statistic(kind, x, y, &xs, &[]);
    };

    let sign = if fit.intercept < 0.0 { '-' } else { '+' };
    let equation = format!(
        "{} = {}·{} {sign} {}",
        y.name(),
        fmt2(fit.slope),
        x.name(),
        fmt2(fit.intercept.abs())
    );
    let narrative = format!(
        "Fitted {equation} (R² = {}, {} rows).",
        fmt2(fit.r_squared),
        xs.len()
    );
    ComputationResult::computed(
        kind,
        Payload::Regression {
            x: x.name().to_string(),
            y: y.name().to_string(),
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            equation,
            n: xs.len(),
        },
        narrative,
    )
}

// ============================================================================
// Quantiles and summaries
// ============================================================================

pub fn quantiles(_table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    let kind = OperationKind::Quantiles;
    if columns.is_empty() {
        return wrong_arity(kind, "at least 1", 0);
    }

    let mut out = Vec::with_capacity(columns.len());
    let mut lines = Vec::new();
    for column in columns {
        let values: Vec<f64> = column.numeric_values().into_iter().flatten().collect();
        let sorted = stats::sorted(&values);
        let levels: Vec<QuantileValue> = op
            .params
            .quantiles
            .iter()
            .filter_map(|&q| stats::quantile_sorted(&sorted, q).map(|value| QuantileValue { q, value }))
            .collect();
        if !levels.is_empty() {
            let parts: Vec<String> = levels
                .iter()
                .map(|l| format!("{} = {}", quantile_label(l.q), fmt2(l.value)))
                .collect();
            lines.push(format!("{} (n={}): {}", column.name(), sorted.len(), parts.join(", ")));
        }
        out.push(ColumnQuantiles {
            column: column.name().to_string(),
            count: sorted.len(),
            values: levels,
        });
    }

    if out.iter().all(|c| c.values.is_empty()) {
        return ComputationResult::insufficient(kind, "the selected columns have no numeric values");
    }
    ComputationResult::computed(kind, Payload::Quantiles { columns: out }, lines.join("; "))
}

pub fn summary_stats(table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    let kind = OperationKind::SummaryStats;
    if table.row_count() == 0 || columns.is_empty() {
        return ComputationResult::insufficient(kind, "the dataset has no rows to summarize");
    }

    let mut summaries = Vec::with_capacity(columns.len());
    let mut lines = Vec::new();
    for (column, meta) in columns.iter().zip(&op.columns) {
        if meta.dtype == ColumnType::Numeric {
            let values: Vec<f64> = column.numeric_values().into_iter().flatten().collect();
            let mean = stats::mean(&values);
            let std = stats::sample_std(&values);
            let range = stats::min_max(&values);
            let show = |v: Option<f64>| v.map(fmt2).unwrap_or_else(|| "n/a".to_string());
            lines.push(format!(
                "{}: count {}, mean {}, std {}, min {}, max {}",
                column.name(),
                values.len(),
                show(mean),
                show(std),
                show(range.map(|r| r.0)),
                show(range.map(|r| r.1)),
            ));
            summaries.push(ColumnSummary::Numeric {
                column: column.name().to_string(),
                count: values.len(),
                mean,
                std,
                min: range.map(|r| r.0),
                max: range.map(|r| r.1),
            });
        } else {
            let texts: Vec<String> = column.text_values().into_iter().flatten().collect();
            let count = texts.len();
            let mut counts = stats::value_counts(texts);
            let distinct = counts.len();
            counts.truncate(op.params.top);
            match counts.first() {
                Some((value, n)) => lines.push(format!(
                    "{}: {distinct} distinct values, most common `{value}` ({n})",
                    column.name()
                )),
                None => lines.push(format!("{}: no values", column.name())),
            }
            summaries.push(ColumnSummary::Counts {
                column: column.name().to_string(),
                count,
                distinct,
                top: counts,
            });
        }
    }

    ComputationResult::computed(
        kind,
        Payload::Summary {
            rows: table.row_count(),
            columns: summaries,
        },
        lines.join("; "),
    )
}

// ============================================================================
// Charts
// ============================================================================

fn no_points(chart: ChartKind, what: String) -> ComputationResult {
    ComputationResult::insufficient(OperationKind::Visualize(chart), format!("no rows with {what} to plot"))
}

fn count_chart(chart: ChartKind, column: &Column) -> ComputationResult {
    let mut counts = stats::value_counts(column.text_values().into_iter().flatten());
    if counts.is_empty() {
        return no_points(chart, format!("a value in `{}`", column.name()));
    }
    counts.truncate(MAX_BARS);
    let narrative = format!("Bar chart of `{}` counts ({} categories).", column.name(), counts.len());
    let (labels, ys): (Vec<String>, Vec<f64>) = counts.into_iter().map(|(l, n)| (l, n as f64)).unzip();
    ComputationResult::computed(
        OperationKind::Visualize(chart),
        Payload::Chart(ChartData {
            chart,
            x_column: column.name().to_string(),
            y_column: None,
            x: Series::Labels(labels),
            y: ys,
            y_measure: "count".to_string(),
        }),
        narrative,
    )
}

pub fn bar_chart(_table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    let chart = ChartKind::Bar;
    let category = op
        .columns
        .iter()
        .position(|c| c.dtype != ColumnType::Numeric)
        .unwrap_or(0);
    let value = op
        .columns
        .iter()
        .enumerate()
        .position(|(i, c)| i != category && c.dtype == ColumnType::Numeric);
    let (Some(cat), value) = (columns.get(category), value.and_then(|i| columns.get(i))) else {
        return wrong_arity(OperationKind::Visualize(chart), "at least 1", columns.len());
    };
    let Some(value) = value else {
        return count_chart(chart, cat);
    };

    let mut groups: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (label, v) in cat.text_values().into_iter().zip(value.numeric_values()) {
        if let (Some(label), Some(v)) = (label, v) {
            let entry = groups.entry(label).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }
    if groups.is_empty() {
        return no_points(chart, format!("both `{}` and `{}`", cat.name(), value.name()));
    }
    let (labels, means): (Vec<String>, Vec<f64>) = groups
        .into_iter()
        .take(MAX_BARS)
        .map(|(label, (sum, n))| (label, sum / n as f64))
        .unzip();

    let narrative = format!(
        "Bar chart of mean {} by {} ({} groups).",
        value.name(),
        cat.name(),
        labels.len()
    );
    ComputationResult::computed(
        OperationKind::Visualize(chart),
        Payload::Chart(ChartData {
            chart,
            x_column: cat.name().to_string(),
            y_column: Some(value.name().to_string()),
            x: Series::Labels(labels),
            y: means,
            y_measure: "mean".to_string(),
        }),
        narrative,
    )
}

pub fn histogram(_table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    let chart = ChartKind::Hist;
    let numeric = op.columns.iter().position(|c| c.dtype == ColumnType::Numeric);
    let Some(column) = numeric.and_then(|i| columns.get(i)) else {
        // Categorical-only request: a histogram of a category is its counts.
        return match columns.first() {
            Some(column) => count_chart(chart, column),
            None => wrong_arity(OperationKind::Visualize(chart), "at least 1", 0),
        };
    };

    let values: Vec<f64> = column.numeric_values().into_iter().flatten().collect();
    let bins = stats::histogram(&values, op.params.bins);
    if bins.is_empty() {
        return no_points(chart, format!("a numeric value in `{}`", column.name()));
    }
    let labels = bins
        .iter()
        .map(|b| format!("{}-{}", fmt2(b.lo), fmt2(b.hi)))
        .collect();
    let counts = bins.iter().map(|b| b.count as f64).collect();
    let narrative = format!(
        "Histogram of {} across {} bins ({} values).",
        column.name(),
        bins.len(),
        values.len()
    );
    ComputationResult::computed(
        OperationKind::Visualize(chart),
        Payload::Chart(ChartData {
            chart,
            x_column: column.name().to_string(),
            y_column: None,
            x: Series::Labels(labels),
            y: counts,
            y_measure: "count".to_string(),
        }),
        narrative,
    )
}

/// Shared by line and scatter: y is the numeric column (the second one when
/// both are numeric), x is the other.
fn xy_chart(chart: ChartKind, columns: &[&Column], op: &ResolvedOperation, sort_by_x: bool) -> ComputationResult {
    let kind = OperationKind::Visualize(chart);
    let ([first, second], [first_meta, second_meta]) = (columns, op.columns.as_slice()) else {
        return wrong_arity(kind, "exactly 2", columns.len());
    };
    let ((x, x_meta), (y, _)) = if second_meta.dtype == ColumnType::Numeric {
        ((first, first_meta), (second, second_meta))
    } else {
        ((second, second_meta), (first, first_meta))
    };

    let ys = y.numeric_values();
    let points: Vec<(XValue, f64)> = x
        .cells()
        .iter()
        .zip(ys)
        .filter_map(|(cell, yv)| {
            let yv = yv?;
            let xv = match x_meta.dtype {
                ColumnType::Numeric => XValue::Number(cell.as_f64()?),
                ColumnType::Datetime => {
                    let text = cell.as_text()?;
                    XValue::Time(parse_datetime(&text)?, text)
                }
                _ => XValue::Label(cell.as_text()?),
            };
            Some((xv, yv))
        })
        .collect();
    if points.is_empty() {
        return no_points(chart, format!("both `{}` and `{}`", x.name(), y.name()));
    }

    let mut points = points;
    if sort_by_x {
        points.sort_by(|a, b| a.0.cmp_key(&b.0));
    }
    let n = points.len();
    let x_series = if x_meta.dtype == ColumnType::Numeric {
        Series::Numbers(points.iter().filter_map(|(xv, _)| xv.number()).collect())
    } else {
        Series::Labels(points.iter().map(|(xv, _)| xv.label()).collect())
    };
    let ys: Vec<f64> = points.into_iter().map(|(_, yv)| yv).collect();

    let narrative = match chart {
        ChartKind::Line => format!("Line chart of {} over {} ({n} points).", y.name(), x.name()),
        _ => format!("Scatter plot of {} against {} ({n} points).", y.name(), x.name()),
    };
    ComputationResult::computed(
        kind,
        Payload::Chart(ChartData {
            chart,
            x_column: x.name().to_string(),
            y_column: Some(y.name().to_string()),
            x: x_series,
            y: ys,
            y_measure: y.name().to_string(),
        }),
        narrative,
    )
}

pub fn line_chart(_table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    xy_chart(ChartKind::Line, columns, op, true)
}

pub fn scatter_chart(_table: &Table, columns: &[&Column], op: &ResolvedOperation) -> ComputationResult {
    xy_chart(ChartKind::Scatter, columns, op, false)
}

#[derive(Debug, Clone)]
enum XValue {
    Number(f64),
    Time(NaiveDateTime, String),
    Label(String),
}

impl XValue {
    fn cmp_key(&self, other: &XValue) -> std::cmp::Ordering {
        match (self, other) {
            (XValue::Number(a), XValue::Number(b)) => a.total_cmp(b),
            (XValue::Time(a, _), XValue::Time(b, _)) => a.cmp(b),
            _ => self.label().cmp(&other.label()),
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            XValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn label(&self) -> String {
        match self {
            XValue::Number(n) => n.to_string(),
            XValue::Time(_, text) | XValue::Label(text) => text.clone(),
        }
    }
}
