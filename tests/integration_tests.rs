//! End-to-end scenarios for the datainsight pipeline.
//!
//! Each test drives a request through `InsightEngine` with a scripted model:
//! - correlation over a generated dataset
//! - fuzzy column recovery
//! - a model that never produces a valid operation
//! - insufficient data after resolution
//! - a model that never answers in time
//!
//! Run with: cargo test --test integration_tests

use approx::assert_abs_diff_eq;
use async_trait::async_trait;
use datainsight_analysis::{Outcome, Payload};
use datainsight_engine::{
    AnalysisRequest, ArtifactKind, EngineConfig, InsightEngine, PipelineFailure,
};
use datainsight_interpret::{ChartKind, FailureReason, OperationKind, ScriptedModel, MAX_ATTEMPTS};
use datainsight_storage::{ArtifactStore, FsArtifactStore, StoreError};
use datainsight_table::{TableFormat, TableSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn csv(text: impl Into<String>) -> TableSource {
    TableSource::Inline {
        bytes: text.into().into_bytes(),
        format: Some(TableFormat::Csv),
    }
}

/// 100 people whose income grows with age, with a bounded wobble.
fn people() -> TableSource {
    let mut text = String::from("age,income\n");
    for i in 0..100 {
        let age = 20 + (i % 45);
        let wobble = ((i * 37) % 11) as f64 * 150.0;
        let income = 18_000.0 + age as f64 * 900.0 + wobble;
        text.push_str(&format!("{age},{income}\n"));
    }
    csv(text)
}

fn sales() -> TableSource {
    csv("\
region,month,sales
north,2024-01-01,120
south,2024-01-01,98
north,2024-02-01,130
south,2024-02-01,102
east,2024-03-01,87
north,2024-03-01,125
south,2024-03-01,104
east,2024-04-01,91
")
}

#[derive(Default)]
struct RecordingStore {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, StoreError> {
        self.keys.lock().push(key.to_string());
        Ok(format!("https://charts.example.com/{key}"))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

// ============================================================================
// Correlation
// ============================================================================

#[tokio::test]
async fn test_correlation_over_generated_people() {
    let model = Arc::new(ScriptedModel::always(
        r#"{"operation": "correlation", "columns": ["age", "income"]}"#,
    ));
    let engine = InsightEngine::new(model.clone(), EngineConfig::default());

    let outcome = engine
        .analyze(&AnalysisRequest::new("correlation between age and income", people()))
        .await
        .unwrap();

    assert_eq!(model.calls(), 1);
    assert_eq!(outcome.result.outcome, Outcome::Computed);
    match &outcome.result.payload {
        Payload::Correlation { coefficient, n, .. } => {
            assert!((-1.0..=1.0).contains(coefficient));
            assert!(*coefficient > 0.9);
            assert_eq!(*n, 100);
        }
        other => panic!("expected correlation payload, got {other:?}"),
    }
    assert_eq!(outcome.envelope.artifact.kind, ArtifactKind::None);
    assert!(outcome
        .envelope
        .summary
        .starts_with("Analyzed 100 records across 2 columns."));

    let json = outcome.envelope.to_json();
    assert_eq!(json["artifact"]["type"], "none");
    assert!(json["message"].as_str().unwrap().len() > 10);
}

#[tokio::test]
async fn test_regression_recovers_linear_relationship() {
    let engine = InsightEngine::new(
        Arc::new(ScriptedModel::always(
            r#"{"operation": "regression", "columns": ["x", "y"]}"#,
        )),
        EngineConfig::default(),
    );
    let outcome = engine
        .analyze(&AnalysisRequest::new(
            "regression of y on x",
            csv("x,y\n1,5\n2,7\n3,9\n4,11\n5,13\n"),
        ))
        .await
        .unwrap();
    match outcome.result.payload {
        Payload::Regression {
            slope,
            intercept,
            r_squared,
            ..
        } => {
            assert_abs_diff_eq!(slope, 2.0, epsilon = 1e-9);
            assert_abs_diff_eq!(intercept, 3.0, epsilon = 1e-9);
            assert_abs_diff_eq!(r_squared, 1.0, epsilon = 1e-9);
        }
        other => panic!("expected regression payload, got {other:?}"),
    }
    assert!(outcome.envelope.summary.contains(" - Slope: 2.00"));
}

// ============================================================================
// Fuzzy column recovery
// ============================================================================

#[tokio::test]
async fn test_misspelled_column_is_recovered() {
    let store = Arc::new(RecordingStore::default());
    let engine = InsightEngine::new(
        Arc::new(ScriptedModel::always(
            r#"{"operation": "visualize_bar", "columns": ["regoin", "sales"]}"#,
        )),
        EngineConfig::default(),
    )
    .with_store(store.clone());

    let outcome = engine
        .analyze(&AnalysisRequest::new("sales by regoin", sales()).with_ids("conv-1", "task-9"))
        .await
        .unwrap();

    assert_eq!(outcome.operation.operation, OperationKind::Visualize(ChartKind::Bar));
    assert_eq!(outcome.operation.column_names(), vec!["region", "sales"]);
    assert!(outcome.chart.is_some());
    assert_eq!(outcome.envelope.artifact.kind, ArtifactKind::Image);
    let url = outcome.envelope.artifact.url.clone().unwrap();
    assert!(url.starts_with("https://charts.example.com/conv-1/task-9/"));
    assert_eq!(store.keys.lock().len(), 1);
}

#[tokio::test]
async fn test_distant_column_name_is_rejected() {
    let engine = InsightEngine::new(
        Arc::new(ScriptedModel::always(
            r#"{"operation": "visualize_bar", "columns": ["territory", "sales"]}"#,
        )),
        EngineConfig::default(),
    );
    let envelope = engine
        .handle(&AnalysisRequest::new("sales by territory", sales()))
        .await;
    assert!(envelope.message.contains("territory"));
    assert_eq!(envelope.artifact.kind, ArtifactKind::None);
    assert!(envelope.summary.contains("unknown_column"));
}

// ============================================================================
// Schema violations
// ============================================================================

#[tokio::test]
async fn test_invalid_replies_exhaust_retry() {
    let model = Arc::new(ScriptedModel::always(
        r#"{"operation": "teleport", "columns": ["age"]}"#,
    ));
    let engine = InsightEngine::new(model.clone(), EngineConfig::default());
    let request = AnalysisRequest::new("regression", people());

    let err = engine.analyze(&request).await.unwrap_err();
    match &err {
        PipelineFailure::Interpretation(failure) => {
            assert_eq!(failure.reason, FailureReason::SchemaViolation);
            assert_eq!(failure.attempts, MAX_ATTEMPTS);
            assert_eq!(failure.attempts, 2);
        }
        other => panic!("expected interpretation failure, got {other:?}"),
    }
    assert_eq!(model.calls(), 2);

    let envelope = engine.handle(&request).await;
    assert!(envelope.message.starts_with("Could not understand instruction"));
    assert_eq!(envelope.artifact.kind, ArtifactKind::None);
}

#[tokio::test]
async fn test_repair_prompt_follows_invalid_reply() {
    let model = Arc::new(ScriptedModel::new(vec![
        Ok("not json at all".to_string()),
        Ok(r#"{"operation": "summary_stats", "columns": ["sales"]}"#.to_string()),
    ]));
    let engine = InsightEngine::new(model.clone(), EngineConfig::default());
    let outcome = engine
        .analyze(&AnalysisRequest::new("summarize sales", sales()))
        .await
        .unwrap();
    assert_eq!(outcome.operation.operation, OperationKind::SummaryStats);
    assert_eq!(model.calls(), 2);
}

// ============================================================================
// Insufficient data
// ============================================================================

#[tokio::test]
async fn test_single_overlapping_row_is_insufficient() {
    let store = Arc::new(RecordingStore::default());
    let engine = InsightEngine::new(
        Arc::new(ScriptedModel::always(
            r#"{"operation": "regression", "columns": ["x", "y"]}"#,
        )),
        EngineConfig::default(),
    )
    .with_store(store.clone());

    let outcome = engine
        .analyze(&AnalysisRequest::new(
            "regression of y on x",
            csv("x,y\n1,\n2,5\n,7\n4,\n"),
        ))
        .await
        .unwrap();

    assert!(outcome.result.is_insufficient());
    assert_eq!(outcome.envelope.artifact.kind, ArtifactKind::None);
    assert!(outcome.envelope.message.starts_with("Not enough data to compute regression"));
    assert!(outcome.envelope.message.contains("only 1 row(s)"));
    assert!(store.keys.lock().is_empty());
}

// ============================================================================
// Model availability
// ============================================================================

#[tokio::test]
async fn test_slow_model_times_out() {
    let model = Arc::new(
        ScriptedModel::always(r#"{"operation": "summary_stats"}"#).with_delay(Duration::from_millis(500)),
    );
    let config = EngineConfig {
        model_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = InsightEngine::new(model.clone(), config);
    let request = AnalysisRequest::new("summarize the sales", sales());

    let err = engine.analyze(&request).await.unwrap_err();
    assert_eq!(err.category(), "model_unavailable");
    match &err {
        PipelineFailure::Interpretation(failure) => assert_eq!(failure.attempts, 1),
        other => panic!("expected interpretation failure, got {other:?}"),
    }
    assert_eq!(model.calls(), 1);

    let envelope = engine.handle(&request).await;
    assert!(envelope.message.contains("unavailable"));
    assert!(!envelope.summary.is_empty());
}

// ============================================================================
// Filesystem artifacts
// ============================================================================

#[tokio::test]
async fn test_histogram_written_to_public_directory() {
    let dir = tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path())
        .with_public_base_url("https://static.example.com/charts")
        .unwrap();
    let engine = InsightEngine::new(
        Arc::new(ScriptedModel::always(
            r#"{"operation": "visualize_hist", "columns": ["income"], "params": {"bins": 5}}"#,
        )),
        EngineConfig::default(),
    )
    .with_store(Arc::new(store));

    let outcome = engine
        .analyze(&AnalysisRequest::new("histogram of income", people()).with_ids("c", "t"))
        .await
        .unwrap();

    let url = outcome.artifact.url.clone().unwrap();
    assert!(url.starts_with("https://static.example.com/charts/c/t/"));
    let file_name = url.rsplit('/').next().unwrap();
    let svg = std::fs::read_to_string(dir.path().join("c").join("t").join(file_name)).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("<rect x="));
}
