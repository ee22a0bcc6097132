//! The request pipeline.
//!
//! ```text
//! screen ─► load ─► profile ─► extract ─► interpret ─► resolve ─► dispatch
//!                                                                   │
//!                       respond ◄── upload ◄── render ◄── select ◄──┘
//! ```
//!
//! Everything up to dispatch can fail the request. Everything after it can
//! only degrade the response: a chart that fails to render or upload leaves
//! the computed result intact with `ArtifactRef::none()`.

use crate::config::EngineConfig;
use crate::error::PipelineFailure;
use crate::response::{ArtifactRef, ResponseBuilder, ResponseEnvelope, TableShape};
use datainsight_analysis::{
    ChartSpec, ComputationResult, OperationDispatcher, Renderer, SvgRenderer, VisualizationSelector,
};
use datainsight_interpret::{
    apply_quantile_hints, looks_unintelligible, ExtractedEntities, InstructionExtractor,
    ModelService, RawInstruction, RequestResolver, ResolvedOperation, SchemaInterpreter,
};
use datainsight_storage::{artifact_key, ArtifactStore};
use datainsight_table::{profile_table, split_inline_data, ColumnMeta, LoadFailure, Table, TableLoader, TableSource};
use std::sync::Arc;
use uuid::Uuid;

/// One caller request.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub instruction: RawInstruction,
    /// `None` means the dataset is embedded in the instruction as JSON.
    pub source: Option<TableSource>,
    pub context_id: Option<String>,
    pub task_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(instruction: impl Into<String>, source: TableSource) -> Self {
        Self {
            instruction: RawInstruction::new(instruction),
            source: Some(source),
            context_id: None,
            task_id: None,
        }
    }

    /// Dataset carried inline in the instruction text.
    pub fn inline(instruction: impl Into<String>) -> Self {
        Self {
            instruction: RawInstruction::new(instruction),
            source: None,
            context_id: None,
            task_id: None,
        }
    }

    pub fn with_ids(mut self, context_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self.task_id = Some(task_id.into());
        self
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub columns: Vec<ColumnMeta>,
    pub entities: ExtractedEntities,
    pub operation: ResolvedOperation,
    pub result: ComputationResult,
    pub chart: Option<ChartSpec>,
    pub artifact: ArtifactRef,
    pub envelope: ResponseEnvelope,
}

/// Long-lived engine. Build once, share across requests (`&self` only).
pub struct InsightEngine {
    config: EngineConfig,
    loader: TableLoader,
    extractor: InstructionExtractor,
    interpreter: SchemaInterpreter,
    resolver: RequestResolver,
    dispatcher: OperationDispatcher,
    selector: VisualizationSelector,
    renderer: Arc<dyn Renderer>,
    store: Option<Arc<dyn ArtifactStore>>,
    responses: ResponseBuilder,
}

impl InsightEngine {
    pub fn new(model: Arc<dyn ModelService>, config: EngineConfig) -> Self {
        Self {
            loader: TableLoader::new(config.max_table_bytes),
            extractor: InstructionExtractor::new(),
            interpreter: SchemaInterpreter::new(model, config.model_timeout),
            resolver: RequestResolver::new(config.resolver_config()),
            dispatcher: OperationDispatcher::with_defaults(),
            selector: VisualizationSelector::with_defaults(),
            renderer: Arc::new(SvgRenderer::default()),
            store: None,
            responses: ResponseBuilder::new(),
            config,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: OperationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_selector(mut self, selector: VisualizationSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a request and always produce an envelope.
    pub async fn handle(&self, request: &AnalysisRequest) -> ResponseEnvelope {
        match self.analyze(request).await {
            Ok(outcome) => outcome.envelope,
            Err(failure) => self.responses.failure(&failure),
        }
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, PipelineFailure> {
        let request_id = Uuid::new_v4().to_string();
        self.run(&request_id, request).await
    }

    #[tracing::instrument(name = "analyze", skip_all, fields(request_id = %request_id))]
    async fn run(&self, request_id: &str, request: &AnalysisRequest) -> Result<AnalysisOutcome, PipelineFailure> {
        let result = self.run_inner(request).await;
        match &result {
            Ok(outcome) => tracing::info!(
                operation = %outcome.operation.operation,
                insufficient = outcome.result.is_insufficient(),
                artifact = outcome.artifact.is_image(),
                "request completed"
            ),
            Err(failure) => tracing::warn!(category = failure.category(), error = %failure, "request failed"),
        }
        result
    }

    async fn run_inner(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, PipelineFailure> {
        let (table, instruction) = self.load(request).await?;

        // Caller-side screening; the model is never asked about noise.
        if looks_unintelligible(&instruction.text) {
            return Err(PipelineFailure::UnclearInstruction(instruction.text.clone()));
        }

        let columns = profile_table(&table);
        let entities = self.extractor.extract(&instruction, &columns);
        tracing::debug!(
            rows = table.row_count(),
            columns = columns.len(),
            candidates = entities.candidate_columns.len(),
            "dataset profiled"
        );

        let mut interpreted = self.interpreter.interpret(&instruction, &entities, &columns).await?;
        apply_quantile_hints(&mut interpreted, &entities);
        let operation = self.resolver.resolve(&interpreted, &columns)?;
        tracing::debug!(operation = %operation.operation, columns = ?operation.column_names(), "request resolved");

        let result = self.dispatcher.dispatch(&table, &operation)?;

        let chart = self.selector.select(&operation, &result);
        let artifact = match &chart {
            Some(spec) => self.publish(spec, request).await,
            None => ArtifactRef::none(),
        };

        let shape = TableShape {
            rows: table.row_count(),
            columns: table.column_count(),
        };
        let envelope = self.responses.success(shape, &result, artifact.clone());
        Ok(AnalysisOutcome {
            columns,
            entities,
            operation,
            result,
            chart,
            artifact,
            envelope,
        })
    }

    async fn load(&self, request: &AnalysisRequest) -> Result<(Table, RawInstruction), PipelineFailure> {
        match &request.source {
            Some(source) => {
                let table = self.loader.load(source).await?;
                if table.is_empty() {
                    return Err(LoadFailure::UnparseableFormat {
                        reason: "the dataset has no rows".to_string(),
                    }
                    .into());
                }
                Ok((table, request.instruction.clone()))
            }
            None => {
                let text = &request.instruction.text;
                self.loader.check_size(text.len() as u64)?;
                split_inline_data(text)
                    .map(|(table, rest)| (table, RawInstruction::new(rest)))
                    .ok_or_else(|| LoadFailure::NotFound("no dataset supplied with the instruction".to_string()).into())
            }
        }
    }

    /// Render and upload a chart. Failures are logged and degrade to no
    /// artifact.
    async fn publish(&self, spec: &ChartSpec, request: &AnalysisRequest) -> ArtifactRef {
        let Some(store) = &self.store else {
            return ArtifactRef::none();
        };
        let image = match self.renderer.render(spec) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(error = %e, chart = spec.kind.as_str(), "chart rendering failed");
                return ArtifactRef::none();
            }
        };

        let context_id = request.context_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let task_id = request.task_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = match artifact_key(&context_id, &task_id, image.extension) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = %e, "artifact key rejected");
                return ArtifactRef::none();
            }
        };

        let upload = store.put(&key, image.bytes, image.content_type);
        match tokio::time::timeout(self.config.upload_timeout, upload).await {
            Ok(Ok(url)) => {
                tracing::debug!(store = store.name(), key = %key, "artifact stored");
                ArtifactRef::image(url)
            }
            Ok(Err(e)) => {
                tracing::warn!(store = store.name(), error = %e, "artifact upload failed");
                ArtifactRef::none()
            }
            Err(_) => {
                tracing::warn!(
                    store = store.name(),
                    timeout_ms = self.config.upload_timeout.as_millis() as u64,
                    "artifact upload timed out"
                );
                ArtifactRef::none()
            }
        }
    }
}
