//! Engine behavior with in-process collaborators.

use async_trait::async_trait;
use datainsight_analysis::{ChartSpec, RenderError, RenderedImage, Renderer, SvgRenderer};
use datainsight_engine::*;
use datainsight_interpret::{ModelError, OperationKind, ScriptedModel};
use datainsight_storage::{ArtifactStore, FsArtifactStore, StoreError};
use datainsight_table::{LoadFailure, TableFormat, TableSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const SALES_CSV: &str = "\
region,month,sales,units
north,2024-01-01,120.5,10
south,2024-01-01,98.0,8
north,2024-02-01,130.0,11
south,2024-02-01,101.5,9
east,2024-03-01,87.25,7
north,2024-03-01,125.0,10
south,2024-03-01,104.0,9
east,2024-04-01,90.5,8
";

fn sales() -> TableSource {
    TableSource::Inline {
        bytes: SALES_CSV.as_bytes().to_vec(),
        format: Some(TableFormat::Csv),
    }
}

fn engine(model: ScriptedModel) -> InsightEngine {
    InsightEngine::new(Arc::new(model), EngineConfig::default())
}

/// Records uploads in memory.
#[derive(Default)]
struct MemoryStore {
    puts: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String, StoreError> {
        self.puts.lock().push((key.to_string(), bytes.len(), content_type.to_string()));
        Ok(format!("mem://{key}"))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct FailingStore;

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, StoreError> {
        Err(StoreError::Upload("503 Service Unavailable".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

struct SlowStore;

#[async_trait]
impl ArtifactStore for SlowStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> Result<String, StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok("never".to_string())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

struct BrokenRenderer;

impl Renderer for BrokenRenderer {
    fn render(&self, _spec: &ChartSpec) -> Result<RenderedImage, RenderError> {
        Err(RenderError::EmptySeries)
    }
}

#[tokio::test]
async fn test_bar_chart_is_rendered_and_stored() {
    let store = Arc::new(MemoryStore::default());
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "visualize_bar", "columns": ["region", "sales"]}"#,
    ))
    .with_store(store.clone());

    let outcome = engine
        .analyze(&AnalysisRequest::new("bar chart of sales by region", sales()).with_ids("ctx", "task"))
        .await
        .unwrap();

    assert!(outcome.chart.is_some());
    assert!(outcome.artifact.is_image());
    let url = outcome.envelope.artifact.url.clone().unwrap();
    assert!(url.starts_with("mem://ctx/task/"));
    assert!(url.ends_with(".svg"));
    let puts = store.puts.lock();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].2, "image/svg+xml");
    assert!(outcome.envelope.summary.starts_with("Analyzed 8 records across 4 columns."));
    assert!(outcome.envelope.summary.contains("Generated 1 visualization."));
}

#[tokio::test]
async fn test_no_store_means_no_artifact() {
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "visualize_hist", "columns": ["sales"], "params": {"bins": 3}}"#,
    ));
    let outcome = engine.analyze(&AnalysisRequest::new("histogram of sales", sales())).await.unwrap();
    assert!(outcome.chart.is_some());
    assert_eq!(outcome.artifact, ArtifactRef::none());
    assert_eq!(outcome.chart.unwrap().y_series.len(), 3);
}

#[tokio::test]
async fn test_upload_failure_keeps_result() {
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "visualize_line", "columns": ["month", "sales"]}"#,
    ))
    .with_store(Arc::new(FailingStore));
    let outcome = engine.analyze(&AnalysisRequest::new("sales over time", sales())).await.unwrap();
    assert!(!outcome.result.is_insufficient());
    assert_eq!(outcome.envelope.artifact, ArtifactRef::none());
    assert!(!outcome.envelope.message.is_empty());
}

#[tokio::test]
async fn test_upload_timeout_degrades() {
    let config = EngineConfig {
        upload_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = InsightEngine::new(
        Arc::new(ScriptedModel::always(
            r#"{"operation": "visualize_scatter", "columns": ["units", "sales"]}"#,
        )),
        config,
    )
    .with_store(Arc::new(SlowStore));
    let outcome = engine.analyze(&AnalysisRequest::new("scatter units vs sales", sales())).await.unwrap();
    assert_eq!(outcome.artifact, ArtifactRef::none());
}

#[tokio::test]
async fn test_render_failure_degrades() {
    let store = Arc::new(MemoryStore::default());
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "visualize_bar", "columns": ["region"]}"#,
    ))
    .with_renderer(Arc::new(BrokenRenderer))
    .with_store(store.clone());
    let envelope = engine.handle(&AnalysisRequest::new("count regions", sales())).await;
    assert_eq!(envelope.artifact, ArtifactRef::none());
    assert!(store.puts.lock().is_empty());
}

#[tokio::test]
async fn test_filesystem_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "visualize_bar", "columns": ["region", "units"]}"#,
    ))
    .with_renderer(Arc::new(SvgRenderer::new(640, 400)))
    .with_store(Arc::new(FsArtifactStore::new(dir.path())));
    let outcome = engine
        .analyze(&AnalysisRequest::new("units by region", sales()).with_ids("c1", "t1"))
        .await
        .unwrap();
    let url = outcome.artifact.url.unwrap();
    assert!(url.starts_with("file://"));
    let written: Vec<_> = std::fs::read_dir(dir.path().join("c1").join("t1")).unwrap().collect();
    assert_eq!(written.len(), 1);
}

#[tokio::test]
async fn test_unintelligible_instruction_skips_model() {
    let model = Arc::new(ScriptedModel::always(r#"{"operation": "summary_stats"}"#));
    let engine = InsightEngine::new(model.clone(), EngineConfig::default());
    let err = engine
        .analyze(&AnalysisRequest::new("xqzkrtpl", sales()))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineFailure::UnclearInstruction(_)));
    assert_eq!(model.calls(), 0);

    let envelope = engine.handle(&AnalysisRequest::new("?!", sales())).await;
    assert!(envelope.message.starts_with("Could not understand instruction"));
}

#[tokio::test]
async fn test_summary_over_all_columns() {
    let engine = engine(ScriptedModel::always(r#"{"operation": "summary_stats", "columns": []}"#));
    let outcome = engine.analyze(&AnalysisRequest::new("describe the data", sales())).await.unwrap();
    assert_eq!(outcome.operation.operation, OperationKind::SummaryStats);
    assert_eq!(outcome.operation.columns.len(), 4);
    assert!(outcome.envelope.summary.contains(" - sales: count 8"));
}

#[tokio::test]
async fn test_quantile_levels_from_instruction() {
    let engine = engine(ScriptedModel::always(r#"{"operation": "quantiles", "columns": ["sales"]}"#));
    let outcome = engine
        .analyze(&AnalysisRequest::new("90th percentile of sales", sales()))
        .await
        .unwrap();
    assert_eq!(outcome.operation.params.quantiles, vec![0.9]);
    assert!(outcome.envelope.summary.contains("sales (90th percentile)"));
}

#[tokio::test]
async fn test_inline_dataset() {
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "correlation", "columns": ["a", "b"]}"#,
    ));
    let request = AnalysisRequest::inline(r#"correlation between a and b {"a": [1, 2, 3, 4], "b": [2, 4, 5, 9]}"#);
    let outcome = engine.analyze(&request).await.unwrap();
    assert_eq!(outcome.operation.column_names(), vec!["a", "b"]);
    assert_eq!(outcome.envelope.summary.lines().next(), Some("Analyzed 4 records across 2 columns."));

    let missing = engine.handle(&AnalysisRequest::inline("correlation between a and b")).await;
    assert!(missing.message.starts_with("Could not load the dataset"));
}

#[tokio::test]
async fn test_inline_dataset_respects_size_limit() {
    let model = Arc::new(ScriptedModel::always(
        r#"{"operation": "correlation", "columns": ["a", "b"]}"#,
    ));
    let config = EngineConfig {
        max_table_bytes: 64,
        ..EngineConfig::default()
    };
    let engine = InsightEngine::new(model.clone(), config);
    let request = AnalysisRequest::inline(
        r#"correlation between a and b {"a": [1, 2, 3, 4, 5, 6, 7, 8], "b": [2, 4, 5, 9, 11, 12, 15, 16]}"#,
    );

    let err = engine.analyze(&request).await.unwrap_err();
    assert_eq!(err.category(), "load_failure");
    assert!(matches!(
        err,
        PipelineFailure::Load(LoadFailure::TooLarge { limit: 64, .. })
    ));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_line_chart_without_numeric_column_is_type_mismatch() {
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "visualize_line", "columns": ["month", "region"]}"#,
    ));
    let err = engine
        .analyze(&AnalysisRequest::new("plot region over month", sales()))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "type_mismatch");
}

#[tokio::test]
async fn test_rate_limit_is_model_unavailable() {
    let engine = engine(ScriptedModel::new(vec![Err(ModelError::RateLimited { retry_after_ms: 1000 })]));
    let err = engine
        .analyze(&AnalysisRequest::new("correlation between sales and units", sales()))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "model_unavailable");
}

#[tokio::test]
async fn test_type_mismatch_surfaces() {
    let engine = engine(ScriptedModel::always(
        r#"{"operation": "correlation", "columns": ["region", "sales"]}"#,
    ));
    let envelope = engine
        .handle(&AnalysisRequest::new("correlation between region and sales", sales()))
        .await;
    assert!(envelope.message.starts_with("Could not match the request to the dataset"));
    assert!(envelope.summary.contains("type_mismatch"));
}

#[tokio::test]
async fn test_engine_is_shared_across_tasks() {
    let engine = Arc::new(engine(ScriptedModel::always(
        r#"{"operation": "correlation", "columns": ["sales", "units"]}"#,
    )));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .handle(&AnalysisRequest::new("correlation between sales and units", sales()))
                    .await
            })
        })
        .collect();
    for handle in handles {
        let envelope = handle.await.unwrap();
        assert!(envelope.message.contains("correlation between sales and units"));
    }
}
