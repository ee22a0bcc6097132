//! Computation results.

use datainsight_interpret::{ChartKind, CorrelationMethod, OperationKind};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Computed,
    /// The request was well-formed but the data cannot answer it.
    InsufficientData { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantileValue {
    pub q: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnQuantiles {
    pub column: String,
    /// Non-null values the quantiles were taken over.
    pub count: usize,
    pub values: Vec<QuantileValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSummary {
    Numeric {
        column: String,
        count: usize,
        mean: Option<f64>,
        std: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Counts {
        column: String,
        count: usize,
        distinct: usize,
        top: Vec<(String, usize)>,
    },
}

impl ColumnSummary {
    pub fn column(&self) -> &str {
        match self {
            ColumnSummary::Numeric { column, .. } | ColumnSummary::Counts { column, .. } => column,
        }
    }
}

/// X values of a chart: numbers for a continuous axis, labels otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Series {
    Numbers(Vec<f64>),
    Labels(Vec<String>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Series::Numbers(v) => v.len(),
            Series::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Aggregated chart data, before any layout decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub chart: ChartKind,
    pub x_column: String,
    /// `None` when y is a count rather than a column.
    pub y_column: Option<String>,
    pub x: Series,
    pub y: Vec<f64>,
    /// What y measures ("count", "mean", or the y column name).
    pub y_measure: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Correlation {
        x: String,
        y: String,
        method: CorrelationMethod,
        coefficient: f64,
        n: usize,
    },
    Regression {
        x: String,
        y: String,
        slope: f64,
        intercept: f64,
        r_squared: f64,
        equation: String,
        n: usize,
    },
    Quantiles {
        columns: Vec<ColumnQuantiles>,
    },
    Summary {
        rows: usize,
        columns: Vec<ColumnSummary>,
    },
    Chart(ChartData),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputationResult {
    pub kind: OperationKind,
    pub payload: Payload,
    pub narrative_hint: Option<String>,
    pub outcome: Outcome,
}

impl ComputationResult {
    pub fn computed(kind: OperationKind, payload: Payload, narrative_hint: impl Into<String>) -> Self {
        Self {
            kind,
            payload,
            narrative_hint: Some(narrative_hint.into()),
            outcome: Outcome::Computed,
        }
    }

    pub fn insufficient(kind: OperationKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            payload: Payload::Empty,
            narrative_hint: None,
            outcome: Outcome::InsufficientData {
                reason: reason.into(),
            },
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self.outcome, Outcome::InsufficientData { .. })
    }

    pub fn chart_data(&self) -> Option<&ChartData> {
        match &self.payload {
            Payload::Chart(data) => Some(data),
            _ => None,
        }
    }

    /// Payload as a JSON mapping (`{"type": "correlation", "coefficient": ...}`).
    pub fn payload_json(&self) -> Value {
        serde_json::to_value(&self.payload).unwrap_or(Value::Null)
    }
}
