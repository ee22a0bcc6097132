//! # Datainsight Engine
//!
//! Wires the pipeline together: load and profile a dataset, interpret the
//! instruction through the model, resolve it against the real columns, run
//! the operation, publish a chart when one was asked for, and build the
//! caller-facing [`ResponseEnvelope`].
//!
//! External collaborators (model, renderer, artifact store) are injected
//! once when the engine is built and reused for every request.

pub mod config;
pub mod engine;
pub mod error;
pub mod response;

pub use config::{ConfigError, EngineConfig};
pub use engine::{AnalysisOutcome, AnalysisRequest, InsightEngine};
pub use error::PipelineFailure;
pub use response::{ArtifactKind, ArtifactRef, ResponseBuilder, ResponseEnvelope, TableShape};
