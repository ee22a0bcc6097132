//! Response assembly.
//!
//! [`ResponseBuilder`] is the only place caller-facing text is produced. It
//! never returns an empty `message`.

use crate::error::PipelineFailure;
use datainsight_analysis::{ColumnSummary, ComputationResult, Outcome, Payload};
use datainsight_interpret::{FailureReason, OperationKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub url: Option<String>,
}

impl ArtifactRef {
    pub fn none() -> Self {
        Self {
            kind: ArtifactKind::None,
            url: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Image,
            url: Some(url.into()),
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == ArtifactKind::Image
    }
}

/// What the caller receives, for successes and failures alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub message: String,
    pub artifact: ArtifactRef,
    pub summary: String,
}

impl ResponseEnvelope {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "message": self.message,
            "artifact": { "type": self.artifact.kind, "url": self.artifact.url },
            "summary": self.summary,
        })
    }
}

/// Shape of the analyzed table, for the summary header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseBuilder;

fn fmt2(v: f64) -> String {
    format!("{v:.2}")
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(fmt2).unwrap_or_else(|| "n/a".to_string())
}

fn percentile(q: f64) -> String {
    format!("{:.0}th percentile", q * 100.0)
}

/// Used when a handler produced no narrative.
fn generic_message(kind: OperationKind) -> String {
    match kind {
        OperationKind::Correlation => "Computed the correlation between the selected columns.".to_string(),
        OperationKind::Regression => "Fitted a linear regression on the selected columns.".to_string(),
        OperationKind::Quantiles => "Computed quantiles for the selected columns.".to_string(),
        OperationKind::SummaryStats => "Summarized the dataset.".to_string(),
        OperationKind::Visualize(chart) => format!("Prepared a {} chart.", chart.as_str()),
    }
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, shape: TableShape, result: &ComputationResult, artifact: ArtifactRef) -> ResponseEnvelope {
        let header = format!("Analyzed {} records across {} columns.", shape.rows, shape.columns);

        if let Outcome::InsufficientData { reason } = &result.outcome {
            return ResponseEnvelope {
                message: format!("Not enough data to compute {}: {reason}.", result.kind),
                artifact: ArtifactRef::none(),
                summary: format!("{header}\nInsufficient data: {reason}."),
            };
        }

        let message = result
            .narrative_hint
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| generic_message(result.kind));

        let mut lines = vec![header];
        lines.extend(Self::detail_lines(&result.payload));
        if artifact.is_image() {
            lines.push("Generated 1 visualization.".to_string());
        }

        ResponseEnvelope {
            message,
            artifact,
            summary: lines.join("\n"),
        }
    }

    pub fn failure(&self, failure: &PipelineFailure) -> ResponseEnvelope {
        let message = match failure {
            PipelineFailure::Load(e) => format!("Could not load the dataset: {e}."),
            PipelineFailure::UnclearInstruction(_) => {
                "Could not understand instruction. Name an analysis and the columns to use, \
                 for example \"correlation between age and income\"."
                    .to_string()
            }
            PipelineFailure::Interpretation(e) => match e.reason {
                FailureReason::SchemaViolation => format!(
                    "Could not understand instruction: the request could not be mapped to a supported \
                     analysis ({}).",
                    e.detail
                ),
                FailureReason::ModelUnavailable => format!(
                    "Could not understand instruction: the language model is unavailable ({}).",
                    e.detail
                ),
            },
            PipelineFailure::Resolution(e) => format!("Could not match the request to the dataset: {e}."),
            PipelineFailure::Dispatch(e) => format!("Could not run the analysis: {e}."),
        };
        ResponseEnvelope {
            message,
            artifact: ArtifactRef::none(),
            summary: format!("Request failed ({}).", failure.category()),
        }
    }

    fn detail_lines(payload: &Payload) -> Vec<String> {
        match payload {
            Payload::Correlation {
                x,
                y,
                method,
                coefficient,
                n,
            } => vec![format!("Correlation ({method}) {x} ~ {y}: {} over {n} rows.", fmt2(*coefficient))],
            Payload::Regression {
                x,
                y,
                slope,
                intercept,
                r_squared,
                equation,
                n,
            } => vec![
                format!("Regression of {y} on {x} over {n} rows:"),
                format!(" - Equation: {equation}"),
                format!(" - Slope: {}", fmt2(*slope)),
                format!(" - Intercept: {}", fmt2(*intercept)),
                format!(" - R2: {}", fmt2(*r_squared)),
            ],
            Payload::Quantiles { columns } => {
                let mut lines = vec!["Quantiles:".to_string()];
                for column in columns {
                    for value in &column.values {
                        lines.push(format!(
                            " - {} ({}): {}",
                            column.column,
                            percentile(value.q),
                            fmt2(value.value)
                        ));
                    }
                }
                lines
            }
            Payload::Summary { columns, .. } => columns
                .iter()
                .map(|summary| match summary {
                    ColumnSummary::Numeric {
                        column,
                        count,
                        mean,
                        std,
                        min,
                        max,
                    } => format!(
                        " - {column}: count {count}, mean {}, std {}, min {}, max {}",
                        fmt_opt(*mean),
                        fmt_opt(*std),
                        fmt_opt(*min),
                        fmt_opt(*max)
                    ),
                    ColumnSummary::Counts {
                        column,
                        distinct,
                        top,
                        ..
                    } => {
                        let shown: Vec<String> = top.iter().take(3).map(|(v, n)| format!("{v} ({n})")).collect();
                        format!(" - {column}: {distinct} distinct; top {}", shown.join(", "))
                    }
                })
                .collect(),
            Payload::Chart(data) => vec![format!(
                "Chart data: {} {} by {} ({} points).",
                data.y_measure,
                data.chart.as_str(),
                data.x_column,
                data.y.len()
            )],
            Payload::Empty => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datainsight_analysis::{ColumnQuantiles, QuantileValue};
    use datainsight_interpret::{CorrelationMethod, InterpretationFailure, ResolutionFailure};

    const SHAPE: TableShape = TableShape { rows: 100, columns: 3 };

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = ResponseEnvelope {
            message: "m".to_string(),
            artifact: ArtifactRef::none(),
            summary: "s".to_string(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message": "m", "artifact": {"type": "none", "url": null}, "summary": "s"})
        );
        assert_eq!(envelope.to_json(), json);

        let image = serde_json::to_value(ArtifactRef::image("https://x/y.svg")).unwrap();
        assert_eq!(image, serde_json::json!({"type": "image", "url": "https://x/y.svg"}));
    }

    #[test]
    fn test_success_uses_narrative() {
        let result = ComputationResult::computed(
            OperationKind::Correlation,
            Payload::Correlation {
                x: "age".to_string(),
                y: "income".to_string(),
                method: CorrelationMethod::Pearson,
                coefficient: 0.8123,
                n: 100,
            },
            "There is a strong positive correlation between age and income.",
        );
        let envelope = ResponseBuilder::new().success(SHAPE, &result, ArtifactRef::none());
        assert!(envelope.message.starts_with("There is a strong positive"));
        assert!(envelope.summary.starts_with("Analyzed 100 records across 3 columns."));
        assert!(envelope.summary.contains("0.81 over 100 rows"));
        assert!(!envelope.summary.contains("visualization"));
    }

    #[test]
    fn test_generic_message_when_narrative_missing() {
        let mut result = ComputationResult::computed(
            OperationKind::Quantiles,
            Payload::Quantiles {
                columns: vec![ColumnQuantiles {
                    column: "age".to_string(),
                    count: 4,
                    values: vec![QuantileValue { q: 0.5, value: 30.0 }],
                }],
            },
            "",
        );
        result.narrative_hint = None;
        let envelope = ResponseBuilder::new().success(SHAPE, &result, ArtifactRef::image("file:///tmp/a.svg"));
        assert_eq!(envelope.message, "Computed quantiles for the selected columns.");
        assert!(envelope.summary.contains(" - age (50th percentile): 30.00"));
        assert!(envelope.summary.ends_with("Generated 1 visualization."));
    }

    #[test]
    fn test_insufficient_data_drops_artifact() {
        let result = ComputationResult::insufficient(OperationKind::Regression, "only 1 row(s) have values");
        let envelope = ResponseBuilder::new().success(SHAPE, &result, ArtifactRef::image("file:///a.svg"));
        assert_eq!(envelope.artifact, ArtifactRef::none());
        assert!(envelope.message.contains("Not enough data"));
        assert!(envelope.message.contains("only 1 row"));
    }

    #[test]
    fn test_failure_messages_are_never_empty() {
        let failures = vec![
            PipelineFailure::UnclearInstruction("asdfgh".to_string()),
            PipelineFailure::Interpretation(InterpretationFailure {
                reason: FailureReason::ModelUnavailable,
                detail: "timed out after 30s".to_string(),
                attempts: 1,
            }),
            PipelineFailure::Resolution(ResolutionFailure::UnknownColumn {
                name: "salary".to_string(),
            }),
        ];
        for failure in &failures {
            let envelope = ResponseBuilder::new().failure(failure);
            assert!(!envelope.message.is_empty());
            assert_eq!(envelope.artifact.kind, ArtifactKind::None);
        }
        let unclear = ResponseBuilder::new().failure(&failures[0]);
        assert!(unclear.message.starts_with("Could not understand instruction"));
        let resolution = ResponseBuilder::new().failure(&failures[2]);
        assert!(resolution.message.contains("unknown column `salary`"));
    }
}
