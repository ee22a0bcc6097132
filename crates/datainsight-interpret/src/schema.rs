//! The operation schema: the only shape a model reply may take.
//!
//! ```json
//! { "operation": "correlation", "columns": ["price", "units"], "params": {"method": "spearman"} }
//! ```
//!
//! Validation is strict at the top level (unknown fields, unknown operations,
//! and non-scalar params are all rejected) and lenient about framing: prose or
//! markdown fences around the object are stripped first.

use crate::llm::extract_json_object;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Hist,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
            ChartKind::Hist => "hist",
        }
    }
}

/// The closed set of analyses the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Correlation,
    Regression,
    Quantiles,
    SummaryStats,
    Visualize(ChartKind),
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Correlation,
        OperationKind::Regression,
        OperationKind::Quantiles,
        OperationKind::SummaryStats,
        OperationKind::Visualize(ChartKind::Bar),
        OperationKind::Visualize(ChartKind::Line),
        OperationKind::Visualize(ChartKind::Scatter),
        OperationKind::Visualize(ChartKind::Hist),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Correlation => "correlation",
            OperationKind::Regression => "regression",
            OperationKind::Quantiles => "quantiles",
            OperationKind::SummaryStats => "summary_stats",
            OperationKind::Visualize(ChartKind::Bar) => "visualize_bar",
            OperationKind::Visualize(ChartKind::Line) => "visualize_line",
            OperationKind::Visualize(ChartKind::Scatter) => "visualize_scatter",
            OperationKind::Visualize(ChartKind::Hist) => "visualize_hist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }

    /// Every operation except `summary_stats` needs at least one column.
    pub fn requires_columns(&self) -> bool {
        !matches!(self, OperationKind::SummaryStats)
    }

    pub fn chart_kind(&self) -> Option<ChartKind> {
        match self {
            OperationKind::Visualize(kind) => Some(*kind),
            _ => None,
        }
    }

    /// One-line description used when prompting the model.
    pub fn describe(&self) -> &'static str {
        match self {
            OperationKind::Correlation => "correlation between exactly two numeric columns",
            OperationKind::Regression => {
                "linear regression of the second numeric column on the first"
            }
            OperationKind::Quantiles => "quantiles of one or more numeric columns",
            OperationKind::SummaryStats => "summary statistics (no columns = every column)",
            OperationKind::Visualize(ChartKind::Bar) => {
                "bar chart: a category column, optionally with a numeric column to average"
            }
            OperationKind::Visualize(ChartKind::Line) => {
                "line chart: an x column (datetime or numeric) and a numeric y column"
            }
            OperationKind::Visualize(ChartKind::Scatter) => {
                "scatter plot of two columns, at least one numeric"
            }
            OperationKind::Visualize(ChartKind::Hist) => "histogram of one numeric column",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = SchemaViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| SchemaViolation::UnknownOperation(s.to_string()))
    }
}

impl Serialize for OperationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown operation `{s}`")))
    }
}

// ============================================================================
// Interpreted requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numbers as-is; text that parses as a number also counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Number(n) => n.to_string(),
            ParamValue::Text(s) => s.clone(),
        }
    }
}

/// A schema-valid model reply. Column names are still the model's spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretedRequest {
    pub operation: OperationKind,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl InterpretedRequest {
    pub fn new(operation: OperationKind, columns: Vec<String>) -> Self {
        Self {
            operation,
            columns,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("reply is not JSON: {0}")]
    NotJson(String),
    #[error("reply must be a single JSON object")]
    NotAnObject,
    #[error("model declined the request: {0}")]
    Declined(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("field `{field}` must be {expected}")]
    WrongType { field: String, expected: &'static str },
    #[error("`columns` must not be empty for `{0}`")]
    EmptyColumns(OperationKind),
}

const ALLOWED_FIELDS: &[&str] = &["operation", "columns", "params"];

/// Parse and validate a raw model reply.
pub fn validate_reply(text: &str) -> Result<InterpretedRequest, SchemaViolation> {
    let value = extract_json_object(text).map_err(SchemaViolation::NotJson)?;
    validate_value(&value)
}

/// Validate an already-parsed JSON value against the operation schema.
pub fn validate_value(value: &Value) -> Result<InterpretedRequest, SchemaViolation> {
    let object = value.as_object().ok_or(SchemaViolation::NotAnObject)?;

    // `{"error": "..."}` is how models tend to refuse; it is never a request.
    if let Some(reason) = declined_reason(object) {
        return Err(SchemaViolation::Declined(reason));
    }

    if let Some(unknown) = object
        .keys()
        .find(|k| !ALLOWED_FIELDS.contains(&k.as_str()))
    {
        return Err(SchemaViolation::UnknownField(unknown.clone()));
    }

    let operation = match object.get("operation") {
        None | Some(Value::Null) => return Err(SchemaViolation::MissingField("operation")),
        Some(Value::String(s)) => s.parse::<OperationKind>()?,
        Some(_) => {
            return Err(SchemaViolation::WrongType {
                field: "operation".to_string(),
                expected: "a string",
            })
        }
    };

    let columns = match object.get("columns") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item.as_str().map(str::trim) {
                Some(s) if !s.is_empty() => Ok(s.to_string()),
                _ => Err(SchemaViolation::WrongType {
                    field: format!("columns[{i}]"),
                    expected: "a non-empty string",
                }),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(SchemaViolation::WrongType {
                field: "columns".to_string(),
                expected: "an array of strings",
            })
        }
    };
    if columns.is_empty() && operation.requires_columns() {
        return Err(SchemaViolation::EmptyColumns(operation));
    }

    let mut params = BTreeMap::new();
    match object.get("params") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                let param = match value {
                    Value::Number(n) => n.as_f64().map(ParamValue::Number),
                    Value::String(s) => Some(ParamValue::Text(s.clone())),
                    _ => None,
                };
                let param = param.ok_or_else(|| SchemaViolation::WrongType {
                    field: format!("params.{name}"),
                    expected: "a number or a string",
                })?;
                params.insert(name.clone(), param);
            }
        }
        Some(_) => {
            return Err(SchemaViolation::WrongType {
                field: "params".to_string(),
                expected: "an object",
            })
        }
    }

    Ok(InterpretedRequest {
        operation,
        columns,
        params,
    })
}

fn declined_reason(object: &Map<String, Value>) -> Option<String> {
    if object.len() != 1 {
        return None;
    }
    object.get("error").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// JSON Schema handed to the model (and to backends that accept one).
pub fn operation_json_schema() -> Value {
    let operations: Vec<&str> = OperationKind::ALL.iter().map(|op| op.as_str()).collect();
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["operation", "columns"],
        "properties": {
            "operation": { "type": "string", "enum": operations },
            "columns": { "type": "array", "items": { "type": "string" } },
            "params": {
                "type": "object",
                "additionalProperties": { "type": ["number", "string"] }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names_round_trip() {
        for op in OperationKind::ALL {
            assert_eq!(OperationKind::parse(op.as_str()), Some(op));
        }
        assert_eq!(OperationKind::parse(" Visualize_Bar "), Some(OperationKind::Visualize(ChartKind::Bar)));
        assert_eq!(OperationKind::parse("pie_chart"), None);
    }

    #[test]
    fn test_valid_reply_inside_prose() {
        let reply = "Sure! ```json\n{\"operation\": \"correlation\", \"columns\": [\"a\", \"b\"], \"params\": {\"method\": \"spearman\"}}\n```";
        let request = validate_reply(reply).unwrap();
        assert_eq!(request.operation, OperationKind::Correlation);
        assert_eq!(request.columns, vec!["a", "b"]);
        assert_eq!(
            request.params.get("method"),
            Some(&ParamValue::Text("spearman".to_string()))
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = validate_reply(r#"{"operation": "quantiles", "columns": ["x"], "why": "because"}"#)
            .unwrap_err();
        assert_eq!(err, SchemaViolation::UnknownField("why".to_string()));
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let err = validate_reply(r#"{"operation": "pie", "columns": ["x"]}"#).unwrap_err();
        assert_eq!(err, SchemaViolation::UnknownOperation("pie".to_string()));
    }

    #[test]
    fn test_empty_columns() {
        let err = validate_reply(r#"{"operation": "regression", "columns": []}"#).unwrap_err();
        assert_eq!(err, SchemaViolation::EmptyColumns(OperationKind::Regression));

        let ok = validate_reply(r#"{"operation": "summary_stats"}"#).unwrap();
        assert!(ok.columns.is_empty());
    }

    #[test]
    fn test_error_object_is_declined() {
        let err = validate_reply(r#"{"error": "Unable to process query"}"#).unwrap_err();
        assert!(matches!(err, SchemaViolation::Declined(_)));
    }

    #[test]
    fn test_nested_params_rejected() {
        let err = validate_reply(r#"{"operation": "quantiles", "columns": ["x"], "params": {"q": [0.1]}}"#)
            .unwrap_err();
        assert!(matches!(err, SchemaViolation::WrongType { ref field, .. } if field == "params.q"));
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(
            validate_reply("I think you want a bar chart"),
            Err(SchemaViolation::NotJson(_))
        ));
        assert_eq!(validate_reply("[1, 2]"), Err(SchemaViolation::NotAnObject));
    }

    #[test]
    fn test_schema_lists_every_operation() {
        let schema = operation_json_schema();
        let ops = schema["properties"]["operation"]["enum"].as_array().unwrap();
        assert_eq!(ops.len(), OperationKind::ALL.len());
    }
}
