//! Datainsight tables
//!
//! The analysis pipeline works on a small, immutable, column-oriented table:
//!
//! ```text
//! bytes / path / url ──► loader ──► Table ──► profile ──► Vec<ColumnMeta>
//! ```
//!
//! Cells are loosely typed on purpose: CSV gives us strings, JSON gives us a
//! mix. What a column *means* (numeric, categorical, datetime, free text) is
//! decided by [`profile`], once per request, and never stored on the table.

pub mod loader;
pub mod profile;

pub use loader::{
    balanced_object_end, parse_table, split_inline_data, LoadFailure, TableFormat, TableLoader,
    TableSource, DEFAULT_MAX_BYTES,
};
pub use profile::{parse_datetime, profile_column, profile_table, ColumnMeta, ColumnType};

use std::collections::HashSet;
use std::fmt;

/// Tokens that load as a missing value (compared case-insensitively).
const NULL_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", "none"];

// ============================================================================
// Cells
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Interpret a raw field from a text format.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if NULL_TOKENS
            .iter()
            .any(|t| trimmed.eq_ignore_ascii_case(t))
        {
            return Cell::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n),
            _ => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell. Text that parses as a finite number counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Null => None,
            Cell::Number(n) => n.is_finite().then_some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Display text of a non-null cell.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Text(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("null"),
            Cell::Number(n) => f.write_str(&format_number(*n)),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

/// Integers print without a trailing `.0` so `3` and `"3"` profile alike.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ============================================================================
// Columns and tables
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    cells: Vec<Cell>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Row-aligned numeric view; `None` where the cell is null or non-numeric.
    pub fn numeric_values(&self) -> Vec<Option<f64>> {
        self.cells.iter().map(Cell::as_f64).collect()
    }

    /// Row-aligned text view; `None` where the cell is null.
    pub fn text_values(&self) -> Vec<Option<String>> {
        self.cells.iter().map(Cell::as_text).collect()
    }

    pub fn null_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_null()).count()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    #[error("column `{column}` has {actual} rows, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name `{0}`")]
    DuplicateColumn(String),
    #[error("column names must not be empty")]
    EmptyColumnName,
}

/// Immutable, column-oriented table. All columns have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let row_count = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.trim().is_empty() {
                return Err(TableError::EmptyColumnName);
            }
            if !seen.insert(column.name.as_str()) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != row_count {
                return Err(TableError::RaggedColumn {
                    column: column.name.clone(),
                    expected: row_count,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { columns, row_count })
    }

    /// Build from row-major data. Short rows are padded with nulls.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, TableError> {
        let mut columns: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows.len()); headers.len()];
        for row in rows {
            let mut row = row.into_iter();
            for cells in columns.iter_mut() {
                cells.push(row.next().unwrap_or(Cell::Null));
            }
        }
        Self::new(
            headers
                .into_iter()
                .zip(columns)
                .map(|(name, cells)| Column::new(name, cells))
                .collect(),
        )
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.row_count == 0
    }

    /// Total null cells and their share of all cells, as a percentage.
    pub fn missing_summary(&self) -> (usize, f64) {
        let total: usize = self.columns.iter().map(Column::null_count).sum();
        let cells = self.row_count * self.columns.len();
        let percent = if cells == 0 {
            0.0
        } else {
            (total as f64 / cells as f64 * 10_000.0).round() / 100.0
        };
        (total, percent)
    }
}

// ============================================================================
// Tests
// ============================================================================
