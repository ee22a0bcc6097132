use datainsight_analysis::DispatchError;
use datainsight_interpret::{FailureReason, InterpretationFailure, ResolutionFailure};
use datainsight_table::LoadFailure;

/// Every way a request can fail before a result is computed.
///
/// Rendering and upload problems are not here: they degrade the response
/// instead of failing it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineFailure {
    #[error(transparent)]
    Load(#[from] LoadFailure),
    #[error("instruction is not understandable: {0:?}")]
    UnclearInstruction(String),
    #[error(transparent)]
    Interpretation(#[from] InterpretationFailure),
    #[error(transparent)]
    Resolution(#[from] ResolutionFailure),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl PipelineFailure {
    /// Stable label for logs and summaries.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineFailure::Load(_) => "load_failure",
            PipelineFailure::UnclearInstruction(_) => "unclear_instruction",
            PipelineFailure::Interpretation(e) => match e.reason {
                FailureReason::SchemaViolation => "schema_violation",
                FailureReason::ModelUnavailable => "model_unavailable",
            },
            PipelineFailure::Resolution(ResolutionFailure::UnknownColumn { .. }) => "unknown_column",
            PipelineFailure::Resolution(ResolutionFailure::TypeMismatch { .. }) => "type_mismatch",
            PipelineFailure::Resolution(_) => "resolution_failure",
            PipelineFailure::Dispatch(_) => "dispatch_failure",
        }
    }
}
