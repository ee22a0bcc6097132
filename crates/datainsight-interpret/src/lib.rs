//! # Datainsight Interpret
//!
//! Turns a free-form analytics instruction into an executable, type-checked
//! operation:
//!
//! ```text
//! RawInstruction ─► InstructionExtractor ─► ExtractedEntities (advisory)
//!                                   │
//! ColumnMeta[] ─────────────────────┼─► SchemaInterpreter ─► InterpretedRequest
//!                                   │        (model call, strict schema, 1 repair)
//!                                   └─► RequestResolver ─► ResolvedOperation
//! ```
//!
//! The model is reached only through the [`llm::ModelService`] capability;
//! HTTP backends are behind the `ollama`, `openai` and `anthropic` features.

pub mod extraction;
pub mod interpreter;
pub mod llm;
pub mod resolver;
pub mod schema;

pub use extraction::{
    contains_analytic_keyword, looks_unintelligible, ExtractedEntities, InstructionExtractor,
    KeywordHint,
};
pub use interpreter::{FailureReason, InterpretationFailure, SchemaInterpreter, MAX_ATTEMPTS};
pub use llm::{
    extract_json_object, CompletionRequest, CompletionResponse, Message, ModelError, ModelInfo,
    ModelService, Role, ScriptedModel,
};
pub use resolver::{
    apply_quantile_hints, levenshtein_with_max, CorrelationMethod, OperationParams,
    RequestResolver, ResolutionFailure, ResolvedColumn, ResolvedOperation, ResolverConfig,
    DEFAULT_BINS, DEFAULT_QUANTILES, DEFAULT_TOP, MAX_BINS, MAX_EDIT_DISTANCE,
};
pub use schema::{
    operation_json_schema, validate_reply, validate_value, ChartKind, InterpretedRequest,
    OperationKind, ParamValue, SchemaViolation,
};

use serde::{Deserialize, Serialize};

/// The caller's instruction, as typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub text: String,
}

impl RawInstruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
