//! Column profiling: infer what each column means.
//!
//! Policy, applied in order:
//! 1. `numeric` if at least 95% of non-null values parse as numbers
//! 2. `datetime` if at least 95% parse under one of [`DATE_FORMATS`]
//! 3. `categorical` if distinct values <= min(50, rows / 2)
//! 4. `text` otherwise (also for columns with no non-null values)

use crate::{Column, Table};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Share of non-null values (percent) that must parse for a typed column.
pub const TYPE_THRESHOLD_PERCENT: usize = 95;
pub const MAX_CATEGORIES: usize = 50;
pub const SAMPLE_VALUES: usize = 5;

pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];
pub const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Datetime => "datetime",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub dtype: ColumnType,
    /// Distinct non-null values.
    pub cardinality: usize,
    pub nullable: bool,
    pub null_count: usize,
    /// Up to [`SAMPLE_VALUES`] distinct values, in first-seen order.
    pub sample_values: Vec<String>,
}

/// Profile every column of `table`, in table order.
pub fn profile_table(table: &Table) -> Vec<ColumnMeta> {
    table
        .columns()
        .iter()
        .map(|c| profile_column(c, table.row_count()))
        .collect()
}

pub fn profile_column(column: &Column, row_count: usize) -> ColumnMeta {
    let values: Vec<String> = column.cells().iter().filter_map(|c| c.as_text()).collect();
    let null_count = column.len() - values.len();

    let mut distinct: HashSet<&str> = HashSet::new();
    let mut sample_values = Vec::new();
    for v in &values {
        if distinct.insert(v.as_str()) && sample_values.len() < SAMPLE_VALUES {
            sample_values.push(v.clone());
        }
    }
    let cardinality = distinct.len();

    let dtype = if values.is_empty() {
        ColumnType::Text
    } else {
        let numeric = column.cells().iter().filter(|c| c.as_f64().is_some()).count();
        if meets_threshold(numeric, values.len()) {
            ColumnType::Numeric
        } else if meets_threshold(
            values.iter().filter(|v| parse_datetime(v).is_some()).count(),
            values.len(),
        ) {
            ColumnType::Datetime
        } else if cardinality <= MAX_CATEGORIES.min(row_count / 2) {
            ColumnType::Categorical
        } else {
            ColumnType::Text
        }
    };

    ColumnMeta {
        name: column.name().to_string(),
        dtype,
        cardinality,
        nullable: null_count > 0,
        null_count,
        sample_values,
    }
}

fn meets_threshold(hits: usize, total: usize) -> bool {
    total > 0 && hits * 100 >= TYPE_THRESHOLD_PERCENT * total
}

/// Parse a date or timestamp under the fixed format set.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
