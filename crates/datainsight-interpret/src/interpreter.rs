//! Schema-constrained interpretation with a single repair retry.
//!
//! Contract:
//! - a model call that errors or exceeds the timeout ends interpretation with
//!   [`FailureReason::ModelUnavailable`]; it is never retried
//! - a reply that fails validation is retried exactly once, with the
//!   validation error appended to the prompt
//! - a second invalid reply ends with [`FailureReason::SchemaViolation`]
//!
//! There is no heuristic fallback here. Callers decide what to do with a
//! failure.

use crate::extraction::ExtractedEntities;
use crate::llm::{CompletionRequest, ModelError, ModelService};
use crate::schema::{operation_json_schema, validate_reply, InterpretedRequest, OperationKind, SchemaViolation};
use crate::RawInstruction;
use datainsight_table::ColumnMeta;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Attempts per instruction: the first call plus one repair.
pub const MAX_ATTEMPTS: usize = 2;
const PREVIEW_CHARS: usize = 2_000;

const SYSTEM_PROMPT: &str = "\
You translate data analysis requests into a single JSON object.
Output ONLY the JSON object. No markdown, no commentary.
Use only column names from the dataset metadata, spelled exactly as listed.
Choose numeric columns for statistics, categorical columns for grouping,
and datetime columns for time-based charts.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    SchemaViolation,
    ModelUnavailable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SchemaViolation => f.write_str("schema violation"),
            FailureReason::ModelUnavailable => f.write_str("model unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("could not interpret instruction ({reason}): {detail}")]
pub struct InterpretationFailure {
    pub reason: FailureReason,
    pub detail: String,
    /// Model calls made before giving up.
    pub attempts: usize,
}

impl InterpretationFailure {
    fn unavailable(detail: impl Into<String>, attempts: usize) -> Self {
        Self {
            reason: FailureReason::ModelUnavailable,
            detail: detail.into(),
            attempts,
        }
    }

    fn violation(violation: &SchemaViolation, attempts: usize) -> Self {
        Self {
            reason: FailureReason::SchemaViolation,
            detail: violation.to_string(),
            attempts,
        }
    }
}

pub struct SchemaInterpreter {
    model: Arc<dyn ModelService>,
    timeout: Duration,
    max_tokens: usize,
}

impl SchemaInterpreter {
    pub fn new(model: Arc<dyn ModelService>, timeout: Duration) -> Self {
        Self {
            model,
            timeout,
            max_tokens: 512,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn interpret(
        &self,
        instruction: &RawInstruction,
        entities: &ExtractedEntities,
        columns: &[ColumnMeta],
    ) -> Result<InterpretedRequest, InterpretationFailure> {
        let base_prompt = render_prompt(instruction, entities, columns);
        let mut prompt = base_prompt.clone();
        let mut attempt = 1;

        loop {
            let reply = self.call(&prompt, attempt).await?;
            match validate_reply(&reply) {
                Ok(request) => {
                    tracing::debug!(attempt, operation = %request.operation, "model reply accepted");
                    return Ok(request);
                }
                Err(violation) if attempt >= MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %violation, "model reply failed validation, giving up");
                    return Err(InterpretationFailure::violation(&violation, attempt));
                }
                Err(violation) => {
                    tracing::warn!(attempt, error = %violation, "model reply failed validation, retrying");
                    prompt = render_repair_prompt(&base_prompt, &reply, &violation);
                    attempt += 1;
                }
            }
        }
    }

    async fn call(&self, prompt: &str, attempt: usize) -> Result<String, InterpretationFailure> {
        let request = CompletionRequest::new(SYSTEM_PROMPT, prompt)
            .with_json_schema(operation_json_schema())
            .with_temperature(0.0)
            .with_max_tokens(self.max_tokens);

        match tokio::time::timeout(self.timeout, self.model.complete(request)).await {
            Ok(Ok(response)) => Ok(response.content),
            Ok(Err(err)) => {
                tracing::warn!(attempt, model = %self.model.model_info().name, error = %err, "model call failed");
                Err(InterpretationFailure::unavailable(describe_model_error(&err), attempt))
            }
            Err(_) => {
                tracing::warn!(attempt, timeout_ms = self.timeout.as_millis() as u64, "model call timed out");
                Err(InterpretationFailure::unavailable(
                    format!("model call timed out after {:?}", self.timeout),
                    attempt,
                ))
            }
        }
    }
}

fn describe_model_error(err: &ModelError) -> String {
    match err {
        ModelError::RateLimited { .. } => format!("model is rate limited: {err}"),
        _ => err.to_string(),
    }
}

// ============================================================================
// Prompts
// ============================================================================

fn render_prompt(instruction: &RawInstruction, entities: &ExtractedEntities, columns: &[ColumnMeta]) -> String {
    let metadata: Vec<_> = columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "dtype": c.dtype,
                "cardinality": c.cardinality,
                "nullable": c.nullable,
                "samples": c.sample_values,
            })
        })
        .collect();
    let operations: String = OperationKind::ALL
        .iter()
        .map(|op| format!("- {}: {}\n", op.as_str(), op.describe()))
        .collect();
    let entities = serde_json::to_string(entities).unwrap_or_default();
    let metadata = serde_json::to_string_pretty(&metadata).unwrap_or_default();
    let schema = serde_json::to_string_pretty(&operation_json_schema()).unwrap_or_default();

    format!(
        r#"Request:
{text}

Hints extracted from the request (advisory, may be incomplete):
{entities}

Dataset columns:
{metadata}

Operations:
{operations}
Params (optional): "method" for correlation (pearson|spearman), "quantiles" as a
number or comma-separated list, "bins" for visualize_hist, "top" for summary_stats.

Reply with one JSON object matching this schema:
{schema}
"#,
        text = instruction.text.trim(),
    )
}

fn render_repair_prompt(base_prompt: &str, invalid_reply: &str, violation: &SchemaViolation) -> String {
    let preview: String = invalid_reply.chars().take(PREVIEW_CHARS).collect();
    format!(
        r#"{base_prompt}
---
Your previous reply was rejected: {violation}
Return ONLY one JSON object matching the schema above.
Do NOT include markdown or any other text.

Rejected reply (truncated):
{preview}
"#
    )
}

// ============================================================================
// Tests
// ============================================================================
