//! Chart specifications.
//!
//! [`VisualizationSelector`] turns a computed visualize result into a
//! [`ChartSpec`] for a renderer. The mapping is a table keyed by
//! [`ChartKind`]; a new chart kind is one `register` call.

use crate::result::{ChartData, ComputationResult, Series};
use datainsight_interpret::{ChartKind, ResolvedOperation};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisLabels {
    pub x: String,
    pub y: String,
}

/// What the renderer draws. Series lengths always agree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: String,
    pub x_series: Series,
    pub y_series: Vec<f64>,
    pub labels: AxisLabels,
}

pub type ChartBuilder = fn(&ResolvedOperation, &ChartData) -> ChartSpec;

fn y_label(data: &ChartData) -> String {
    match (&data.y_column, data.y_measure.as_str()) {
        (Some(column), "mean") => format!("mean of {column}"),
        (Some(column), _) => column.clone(),
        (None, measure) => measure.to_string(),
    }
}

fn spec(kind: ChartKind, title: String, data: &ChartData) -> ChartSpec {
    ChartSpec {
        kind,
        title,
        x_series: data.x.clone(),
        y_series: data.y.clone(),
        labels: AxisLabels {
            x: data.x_column.clone(),
            y: y_label(data),
        },
    }
}

fn bar_spec(_op: &ResolvedOperation, data: &ChartData) -> ChartSpec {
    spec(ChartKind::Bar, format!("{} by {}", y_label(data), data.x_column), data)
}

fn hist_spec(_op: &ResolvedOperation, data: &ChartData) -> ChartSpec {
    spec(ChartKind::Hist, format!("Distribution of {}", data.x_column), data)
}

fn line_spec(_op: &ResolvedOperation, data: &ChartData) -> ChartSpec {
    spec(ChartKind::Line, format!("{} over {}", y_label(data), data.x_column), data)
}

fn scatter_spec(_op: &ResolvedOperation, data: &ChartData) -> ChartSpec {
    spec(ChartKind::Scatter, format!("{} vs {}", y_label(data), data.x_column), data)
}

#[derive(Debug, Clone)]
pub struct VisualizationSelector {
    builders: BTreeMap<ChartKind, ChartBuilder>,
}

impl Default for VisualizationSelector {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl VisualizationSelector {
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut selector = Self::empty();
        selector.register(ChartKind::Bar, bar_spec);
        selector.register(ChartKind::Hist, hist_spec);
        selector.register(ChartKind::Line, line_spec);
        selector.register(ChartKind::Scatter, scatter_spec);
        selector
    }

    pub fn register(&mut self, kind: ChartKind, builder: ChartBuilder) {
        self.builders.insert(kind, builder);
    }

    /// `None` for non-visualize operations, insufficient results, or chart
    /// kinds without a registered builder.
    pub fn select(&self, op: &ResolvedOperation, result: &ComputationResult) -> Option<ChartSpec> {
        let kind = op.operation.chart_kind()?;
        let data = result.chart_data()?;
        let builder = self.builders.get(&kind)?;
        Some(builder(op, data))
    }
}
