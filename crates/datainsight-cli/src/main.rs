//! `datainsight`: ask questions about a tabular dataset in plain language.

mod logging;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use datainsight_engine::{AnalysisRequest, EngineConfig, InsightEngine};
use datainsight_interpret::llm::providers::{Backend, ModelConfig, UnifiedClient};
use datainsight_interpret::{
    operation_json_schema, InstructionExtractor, ModelService, RawInstruction, ScriptedModel,
};
use datainsight_storage::{ArtifactStore, FsArtifactStore, HttpArtifactStore, HttpStoreConfig};
use datainsight_table::{profile_table, Table, TableFormat, TableLoader, TableSource};
use logging::LogFormat;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "datainsight")]
#[command(about = "Natural-language analysis of CSV and JSON datasets")]
#[command(version)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an instruction against a dataset and print the response envelope
    Ask {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        store: StoreArgs,

        /// Conversation id used in the artifact key
        #[arg(long)]
        context_id: Option<String>,

        /// Task id used in the artifact key
        #[arg(long)]
        task_id: Option<String>,

        /// Print compact single-line JSON
        #[arg(long)]
        compact: bool,

        /// The instruction, e.g. "average sales by region"
        #[arg(required = true, trailing_var_arg = true)]
        instruction: Vec<String>,
    },

    /// Print the column profile of a dataset
    Profile {
        #[command(flatten)]
        data: DataArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the entities extracted from an instruction (no model call)
    Extract {
        #[command(flatten)]
        data: DataArgs,

        #[arg(required = true, trailing_var_arg = true)]
        instruction: Vec<String>,
    },

    /// Print the operation JSON schema sent to the model
    Schema,
}

#[derive(Args)]
struct DataArgs {
    /// Path or http(s) URL of the dataset. Omit to embed JSON data in the
    /// instruction (`ask` only).
    #[arg(long)]
    data: Option<String>,

    /// Force the dataset format instead of inferring it
    #[arg(long, value_parser = ["csv", "json"])]
    format: Option<String>,
}

#[derive(Args)]
struct ModelArgs {
    /// Model backend: ollama, openai or anthropic [default:
    /// DATAINSIGHT_MODEL_BACKEND, then ollama]
    #[arg(long)]
    backend: Option<String>,

    /// Model name [default: DATAINSIGHT_MODEL, then the backend default]
    #[arg(long)]
    model: Option<String>,

    /// Backend base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Answer with this fixed model reply instead of calling a backend
    #[arg(long)]
    scripted_reply: Option<String>,
}

#[derive(Args)]
struct StoreArgs {
    /// Write rendered charts under this directory
    #[arg(long, conflicts_with = "upload_endpoint")]
    out_dir: Option<PathBuf>,

    /// Public URL prefix for charts written with --out-dir
    #[arg(long, requires = "out_dir")]
    public_base_url: Option<String>,

    /// Upload rendered charts with HTTP PUT to this endpoint
    #[arg(long, requires = "bucket")]
    upload_endpoint: Option<String>,

    #[arg(long, requires = "upload_endpoint")]
    bucket: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.log_format)?;

    if let Err(e) = run(cli.command).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Ask {
            data,
            model,
            store,
            context_id,
            task_id,
            compact,
            instruction,
        } => {
            let config = EngineConfig::from_env().context("invalid engine configuration")?;
            let model = build_model(&model, &config)?;
            let mut engine = InsightEngine::new(model, config);
            if let Some(store) = build_store(&store)? {
                engine = engine.with_store(store);
            }

            let instruction = instruction.join(" ");
            let mut request = match source_for(&data).await? {
                Some(source) => AnalysisRequest::new(instruction, source),
                None => AnalysisRequest::inline(instruction),
            };
            request.context_id = context_id;
            request.task_id = task_id;

            let envelope = engine.handle(&request).await;
            let json = envelope.to_json();
            if compact {
                println!("{}", serde_json::to_string(&json)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
        }

        Commands::Profile { data, json } => {
            let table = load_required(&data).await?;
            let columns = profile_table(&table);
            if json {
                println!("{}", serde_json::to_string_pretty(&columns)?);
                return Ok(());
            }

            println!(
                "{} {} rows, {} columns",
                "Dataset:".bold(),
                table.row_count(),
                table.column_count()
            );
            for meta in &columns {
                let nulls = if meta.null_count > 0 {
                    format!("{} null", meta.null_count).yellow().to_string()
                } else {
                    "no nulls".dimmed().to_string()
                };
                println!(
                    "  {:<24} {:<12} {:>6} distinct  {}  [{}]",
                    meta.name.cyan(),
                    meta.dtype.to_string(),
                    meta.cardinality,
                    nulls,
                    meta.sample_values.join(", ")
                );
            }
        }

        Commands::Extract { data, instruction } => {
            let table = load_required(&data).await?;
            let columns = profile_table(&table);
            let instruction = RawInstruction::new(instruction.join(" "));
            let entities = InstructionExtractor::new().extract(&instruction, &columns);
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }

        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&operation_json_schema())?);
        }
    }

    Ok(())
}

fn build_model(args: &ModelArgs, engine: &EngineConfig) -> Result<Arc<dyn ModelService>> {
    if let Some(reply) = &args.scripted_reply {
        return Ok(Arc::new(ScriptedModel::always(reply.clone())));
    }

    let mut config = model_config(args, |name| std::env::var(name).ok())?;
    config = config.with_timeout(engine.model_timeout);
    config.validate().context("invalid model configuration")?;

    tracing::info!(backend = config.backend.as_str(), model = %config.model, "model configured");
    Ok(Arc::new(UnifiedClient::from_config(config)?))
}

/// Environment first, then the `--backend`/`--model`/`--base-url` flags on
/// top. The chosen backend's base URL and API key variables always apply.
fn model_config(args: &ModelArgs, var: impl Fn(&str) -> Option<String>) -> Result<ModelConfig> {
    let backend = match &args.backend {
        Some(raw) => Some(
            Backend::parse(raw)
                .ok_or_else(|| anyhow!("unknown backend '{}' (expected ollama, openai or anthropic)", raw))?,
        ),
        None => None,
    };
    let mut config = ModelConfig::from_lookup(backend, var).context("invalid model configuration")?;
    if let Some(model) = &args.model {
        config = config.with_model(model.clone());
    }
    if let Some(base_url) = &args.base_url {
        config = config.with_base_url(base_url.clone());
    }
    Ok(config)
}

fn build_store(args: &StoreArgs) -> Result<Option<Arc<dyn ArtifactStore>>> {
    if let Some(dir) = &args.out_dir {
        let mut store = FsArtifactStore::new(dir);
        if let Some(base) = &args.public_base_url {
            store = store.with_public_base_url(base)?;
        }
        return Ok(Some(Arc::new(store)));
    }

    match (&args.upload_endpoint, &args.bucket) {
        (Some(endpoint), Some(bucket)) => {
            let config = HttpStoreConfig::new(endpoint.clone(), bucket.clone()).with_token_from_env();
            Ok(Some(Arc::new(HttpArtifactStore::new(config)?)))
        }
        _ => Ok(None),
    }
}

/// Resolve `--data`/`--format` into a source. A forced format on a local
/// file reads the bytes here so the loader skips extension inference.
async fn source_for(args: &DataArgs) -> Result<Option<TableSource>> {
    let Some(reference) = &args.data else {
        return Ok(None);
    };
    let source = TableSource::parse_reference(reference);
    let format = match &args.format {
        Some(raw) => Some(TableFormat::parse(raw).ok_or_else(|| anyhow!("unknown format '{}'", raw))?),
        None => None,
    };

    match (source, format) {
        (TableSource::Path(path), Some(format)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Some(TableSource::Inline {
                bytes,
                format: Some(format),
            }))
        }
        (source, _) => Ok(Some(source)),
    }
}

async fn load_required(args: &DataArgs) -> Result<Table> {
    let source = source_for(args)
        .await?
        .ok_or_else(|| anyhow!("--data is required for this command"))?;
    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let table = TableLoader::new(config.max_table_bytes)
        .load(&source)
        .await
        .with_context(|| format!("failed to load {}", source.describe()))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ask_collects_instruction_words() {
        let cli = Cli::try_parse_from([
            "datainsight",
            "ask",
            "--data",
            "sales.csv",
            "--scripted-reply",
            "{}",
            "average",
            "sales",
            "by",
            "region",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask { instruction, data, .. } => {
                assert_eq!(instruction.join(" "), "average sales by region");
                assert_eq!(data.data.as_deref(), Some("sales.csv"));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_store_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "datainsight",
            "ask",
            "--out-dir",
            "/tmp/charts",
            "--upload-endpoint",
            "https://store.example.com",
            "--bucket",
            "charts",
            "hello",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["datainsight", "ask", "--bucket", "charts", "hello"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_scripted_model_needs_no_backend() {
        let args = ModelArgs {
            backend: None,
            model: None,
            base_url: None,
            scripted_reply: Some(r#"{"operation": "summary_stats"}"#.to_string()),
        };
        assert!(build_model(&args, &EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let args = ModelArgs {
            backend: Some("mystery".to_string()),
            model: None,
            base_url: None,
            scripted_reply: None,
        };
        let err = build_model(&args, &EngineConfig::default()).err().unwrap();
        assert!(err.to_string().contains("unknown backend 'mystery'"));
    }

    fn backend_args(backend: Option<&str>, model: Option<&str>) -> ModelArgs {
        ModelArgs {
            backend: backend.map(str::to_string),
            model: model.map(str::to_string),
            base_url: None,
            scripted_reply: None,
        }
    }

    #[test]
    fn test_backend_flag_keeps_environment_urls_and_keys() {
        let vars = |name: &str| match name {
            "DATAINSIGHT_MODEL_BACKEND" => Some("anthropic".to_string()),
            "DATAINSIGHT_MODEL" => Some("gpt-4o".to_string()),
            "OPENAI_BASE_URL" => Some("http://proxy.local/v1".to_string()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        };
        let config = model_config(&backend_args(Some("openai"), None), vars).unwrap();
        assert_eq!(config.backend, Backend::OpenAI);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.base_url, "http://proxy.local/v1");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));

        let config = model_config(&backend_args(Some("openai"), Some("gpt-4o-mini")), vars).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let err = model_config(&backend_args(Some("openai"), None), |_| None)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("OPENAI_API_KEY"));

        let vars = |name: &str| (name == "DATAINSIGHT_MODEL_BACKEND").then(|| "anthropic".to_string());
        let err = model_config(&backend_args(None, None), vars).err().unwrap();
        assert!(format!("{err:#}").contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_ollama_host_from_environment() {
        let vars = |name: &str| (name == "OLLAMA_HOST").then(|| "http://gpu-box:11434".to_string());
        let config = model_config(&backend_args(None, None), vars).unwrap();
        assert_eq!(config.backend, Backend::Ollama);
        assert_eq!(config.base_url, "http://gpu-box:11434");
    }

    #[tokio::test]
    async fn test_forced_format_reads_file_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        let args = DataArgs {
            data: Some(path.display().to_string()),
            format: Some("csv".to_string()),
        };
        match source_for(&args).await.unwrap() {
            Some(TableSource::Inline { format, bytes }) => {
                assert_eq!(format, Some(TableFormat::Csv));
                assert_eq!(bytes, b"a,b\n1,2\n");
            }
            other => panic!("unexpected source {other:?}"),
        }
    }
}
