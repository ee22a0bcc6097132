//! Operation dispatch
//!
//! [`OperationDispatcher`] is a registry from [`OperationKind`] to a handler
//! function. It is built once at startup and only read afterwards; adding an
//! operation is a [`OperationDispatcher::register`] call, not a new branch.

use crate::handlers;
use crate::result::ComputationResult;
use datainsight_interpret::{ChartKind, OperationKind, ResolvedOperation};
use datainsight_table::{Column, Table};
use std::collections::HashMap;

/// A pure computation over resolved columns (in request order).
pub type Handler = fn(&Table, &[&Column], &ResolvedOperation) -> ComputationResult;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no handler registered for `{0}`")]
    NoHandler(OperationKind),
    #[error("column `{0}` is not in the table")]
    MissingColumn(String),
}

#[derive(Clone, Default)]
pub struct OperationDispatcher {
    handlers: HashMap<OperationKind, Handler>,
}

impl OperationDispatcher {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with a handler for every enumerated operation.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(OperationKind::Correlation, handlers::correlation);
        registry.register(OperationKind::Regression, handlers::regression);
        registry.register(OperationKind::Quantiles, handlers::quantiles);
        registry.register(OperationKind::SummaryStats, handlers::summary_stats);
        registry.register(OperationKind::Visualize(ChartKind::Bar), handlers::bar_chart);
        registry.register(OperationKind::Visualize(ChartKind::Line), handlers::line_chart);
        registry.register(OperationKind::Visualize(ChartKind::Scatter), handlers::scatter_chart);
        registry.register(OperationKind::Visualize(ChartKind::Hist), handlers::histogram);
        registry
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register(&mut self, kind: OperationKind, handler: Handler) -> Option<Handler> {
        self.handlers.insert(kind, handler)
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, table: &Table, op: &ResolvedOperation) -> Result<ComputationResult, DispatchError> {
        let handler = self
            .handlers
            .get(&op.operation)
            .ok_or(DispatchError::NoHandler(op.operation))?;
        let columns = op
            .columns
            .iter()
            .map(|c| {
                table
                    .column(&c.name)
                    .ok_or_else(|| DispatchError::MissingColumn(c.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = handler(table, &columns, op);
        tracing::debug!(
            operation = %op.operation,
            insufficient = result.is_insufficient(),
            "operation computed"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for OperationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&OperationKind> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("OperationDispatcher").field("operations", &kinds).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ColumnSummary, Outcome, Payload, Series};
    use approx::assert_relative_eq;
    use datainsight_interpret::{CorrelationMethod, OperationParams, ResolvedColumn};
    use datainsight_table::{Cell, ColumnType};

    fn num(name: &str, values: &[Option<f64>]) -> Column {
        Column::new(
            name,
            values
                .iter()
                .map(|v| v.map(Cell::Number).unwrap_or(Cell::Null))
                .collect(),
        )
    }

    fn text(name: &str, values: &[&str]) -> Column {
        Column::new(name, values.iter().map(|v| Cell::from_raw(v)).collect())
    }

    fn table() -> Table {
        Table::new(vec![
            num("x", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
            num("y", &[Some(2.0), Some(4.1), Some(5.9), Some(8.0)]),
            num("sparse", &[Some(1.0), None, None, None]),
            text("region", &["n", "s", "n", "e"]),
            text("day", &["2024-01-03", "2024-01-01", "2024-01-02", "2024-01-04"]),
        ])
        .unwrap()
    }

    fn op(kind: OperationKind, columns: &[(&str, ColumnType)]) -> ResolvedOperation {
        ResolvedOperation {
            operation: kind,
            columns: columns
                .iter()
                .map(|(name, dtype)| ResolvedColumn {
                    name: name.to_string(),
                    dtype: *dtype,
                })
                .collect(),
            params: OperationParams {
                method: CorrelationMethod::Pearson,
                quantiles: vec![0.25, 0.5, 0.75],
                bins: 2,
                top: 10,
            },
        }
    }

    const N: ColumnType = ColumnType::Numeric;
    const C: ColumnType = ColumnType::Categorical;

    #[test]
    fn test_registry_covers_every_operation() {
        let dispatcher = OperationDispatcher::with_defaults();
        for kind in OperationKind::ALL {
            assert!(dispatcher.contains(kind), "missing handler for {kind}");
        }
        assert_eq!(dispatcher.len(), OperationKind::ALL.len());
    }

    #[test]
    fn test_empty_registry_reports_missing_handler() {
        let err = OperationDispatcher::new()
            .dispatch(&table(), &op(OperationKind::Quantiles, &[("x", N)]))
            .unwrap_err();
        assert_eq!(err, DispatchError::NoHandler(OperationKind::Quantiles));
    }

    #[test]
    fn test_correlation() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::Correlation, &[("x", N), ("y", N)]))
            .unwrap();
        let Payload::Correlation { coefficient, n, .. } = result.payload else {
            panic!("expected correlation payload");
        };
        assert!(coefficient > 0.99 && coefficient <= 1.0);
        assert_eq!(n, 4);
        assert!(result.narrative_hint.unwrap().contains("strong positive"));
    }

    #[test]
    fn test_regression_insufficient_data() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::Regression, &[("sparse", N), ("y", N)]))
            .unwrap();
        assert!(result.is_insufficient());
        assert_eq!(result.payload, Payload::Empty);
        assert!(matches!(result.outcome, Outcome::InsufficientData { ref reason } if reason.contains("only 1 row")));
    }

    #[test]
    fn test_regression_equation() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::Regression, &[("x", N), ("y", N)]))
            .unwrap();
        let Payload::Regression { slope, r_squared, ref equation, .. } = result.payload else {
            panic!("expected regression payload");
        };
        assert_relative_eq!(slope, 1.98, epsilon = 1e-9);
        assert!(r_squared > 0.99);
        assert!(equation.starts_with("y = 1.98·x"));
    }

    #[test]
    fn test_extreme_magnitudes_are_not_reported_as_constant() {
        let table = Table::new(vec![
            num("big", &[Some(1e200), Some(2e200), Some(3e200), Some(4e200)]),
            num("bigger", &[Some(2e200), Some(4e200), Some(6e200), Some(8e200)]),
            num("tiny", &[Some(1e-300), Some(2e-300), Some(3e-300), Some(4e-300)]),
            num("flat", &[Some(5.0), Some(5.0), Some(5.0), Some(5.0)]),
        ])
        .unwrap();
        let dispatcher = OperationDispatcher::with_defaults();

        let result = dispatcher
            .dispatch(&table, &op(OperationKind::Correlation, &[("big", N), ("bigger", N)]))
            .unwrap();
        let Payload::Correlation { coefficient, .. } = result.payload else {
            panic!("expected correlation payload");
        };
        assert_relative_eq!(coefficient, 1.0, epsilon = 1e-12);

        let result = dispatcher
            .dispatch(&table, &op(OperationKind::Regression, &[("tiny", N), ("big", N)]))
            .unwrap();
        assert!(matches!(
            result.outcome,
            Outcome::InsufficientData { ref reason } if reason.contains("without overflow") && !reason.contains("does not vary")
        ));

        let result = dispatcher
            .dispatch(&table, &op(OperationKind::Correlation, &[("big", N), ("flat", N)]))
            .unwrap();
        assert!(matches!(
            result.outcome,
            Outcome::InsufficientData { ref reason } if reason == "`flat` does not vary across the paired rows"
        ));
    }

    #[test]
    fn test_quantiles_payload() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::Quantiles, &[("x", N)]))
            .unwrap();
        let Payload::Quantiles { columns } = result.payload else {
            panic!("expected quantiles payload");
        };
        let values: Vec<f64> = columns[0].values.iter().map(|v| v.value).collect();
        assert_eq!(values, vec![1.75, 2.5, 3.25]);
    }

    #[test]
    fn test_summary_mixes_numeric_and_counts() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::SummaryStats, &[("x", N), ("region", C)]))
            .unwrap();
        let Payload::Summary { rows, columns } = result.payload else {
            panic!("expected summary payload");
        };
        assert_eq!(rows, 4);
        assert!(matches!(columns[0], ColumnSummary::Numeric { count: 4, .. }));
        match &columns[1] {
            ColumnSummary::Counts { distinct, top, .. } => {
                assert_eq!(*distinct, 3);
                assert_eq!(top[0], ("n".to_string(), 2));
            }
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[test]
    fn test_bar_chart_group_means() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(
                &table(),
                &op(OperationKind::Visualize(ChartKind::Bar), &[("region", C), ("x", N)]),
            )
            .unwrap();
        let data = result.chart_data().unwrap();
        assert_eq!(
            data.x,
            Series::Labels(vec!["e".to_string(), "n".to_string(), "s".to_string()])
        );
        assert_eq!(data.y, vec![4.0, 2.0, 2.0]);
        assert_eq!(data.y_measure, "mean");
    }

    #[test]
    fn test_line_chart_sorts_dates() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(
                &table(),
                &op(
                    OperationKind::Visualize(ChartKind::Line),
                    &[("day", ColumnType::Datetime), ("x", N)],
                ),
            )
            .unwrap();
        let data = result.chart_data().unwrap();
        assert_eq!(data.x_column, "day");
        assert_eq!(data.y, vec![2.0, 3.0, 1.0, 4.0]);
    }

    #[test]
    fn test_histogram_bins() {
        let result = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::Visualize(ChartKind::Hist), &[("x", N)]))
            .unwrap();
        let data = result.chart_data().unwrap();
        assert_eq!(data.x.len(), 2);
        assert_eq!(data.y.iter().sum::<f64>(), 4.0);
    }

    #[test]
    fn test_missing_column() {
        let err = OperationDispatcher::with_defaults()
            .dispatch(&table(), &op(OperationKind::Quantiles, &[("nope", N)]))
            .unwrap_err();
        assert_eq!(err, DispatchError::MissingColumn("nope".to_string()));
    }
}
