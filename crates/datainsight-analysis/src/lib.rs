//! Datainsight analysis
//!
//! Everything after a request has been resolved is deterministic and lives
//! here:
//!
//! ```text
//! ResolvedOperation ──► OperationDispatcher ──► ComputationResult
//!                                                   │
//!                         VisualizationSelector ◄───┘
//!                                   │
//!                               ChartSpec ──► Renderer ──► image bytes
//! ```
//!
//! Handlers are plain functions over table columns; they report unusable data
//! as [`Outcome::InsufficientData`] rather than failing.

pub mod chart;
pub mod dispatch;
pub mod handlers;
pub mod render;
pub mod result;
pub mod stats;

pub use chart::{AxisLabels, ChartBuilder, ChartSpec, VisualizationSelector};
pub use dispatch::{DispatchError, Handler, OperationDispatcher};
pub use handlers::strength;
pub use render::{RenderError, RenderedImage, Renderer, SvgRenderer};
pub use result::{
    ChartData, ColumnQuantiles, ColumnSummary, ComputationResult, Outcome, Payload, QuantileValue,
    Series,
};
