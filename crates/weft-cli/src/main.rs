//! CLI binary for analyzing, validating and running Weft pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;

use weft_llm::HttpProviderFactory;
use weft_pipeline::{
    analyze, auto_layout, node_types, validate, EngineConfig, ExecutionEngine, JsonDirStore,
    PipelineEvent, PipelineStore, KNOWN_CREDENTIALS,
};
use weft_schema::{load_pipeline, ExecuteRequest, LayoutDirection};
use weft_types::Secrets;

const APPROVED_INPUT: &str = "approved";

#[derive(Parser)]
#[command(name = "weft", version, about = "Node-graph pipeline engine for AI workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print structural metrics and the execution plan
    Analyze {
        /// Path to the pipeline .json file
        pipeline: PathBuf,
    },

    /// Check required fields and connection limits
    Validate {
        /// Path to the pipeline .json file
        pipeline: PathBuf,
    },

    /// Compute node positions
    Layout {
        /// Path to the pipeline .json file
        pipeline: PathBuf,

        /// LR (left to right) or TB (top to bottom)
        #[arg(short, long, default_value = "LR")]
        direction: LayoutDirection,
    },

    /// List the built-in node types
    NodeTypes,

    /// Execute a pipeline, printing one JSON event per line
    Run {
        /// Path to the pipeline .json file
        pipeline: PathBuf,

        /// Run id (generated when omitted)
        #[arg(long)]
        pipeline_id: Option<String>,

        /// Node to resume from
        #[arg(long)]
        resume_node: Option<String>,

        /// Input recorded as the resumed node's result
        #[arg(long)]
        user_input: Option<String>,

        /// Secret for this run, e.g. OPENROUTER_API_KEY=sk-...
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Resume every paused node in-process with --user-input (or "approved")
        #[arg(long)]
        approve_all: bool,
    },

    /// Manage saved pipelines
    Pipelines {
        /// Directory holding saved pipelines
        #[arg(long, default_value = ".weft/pipelines", global = true)]
        store: PathBuf,

        #[command(subcommand)]
        action: PipelineAction,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// Save a pipeline file under an id
    Save {
        pipeline: PathBuf,

        /// Id to save under (default: the file stem)
        #[arg(long)]
        id: Option<String>,
    },
    /// List saved pipelines, most recently updated first
    List,
    /// Print a saved pipeline
    Show { id: String },
    /// Delete a saved pipeline
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results only.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze { pipeline } => cmd_analyze(&pipeline)?,
        Commands::Validate { pipeline } => cmd_validate(&pipeline)?,
        Commands::Layout {
            pipeline,
            direction,
        } => cmd_layout(&pipeline, direction)?,
        Commands::NodeTypes => print_json(&node_types())?,
        Commands::Run {
            pipeline,
            pipeline_id,
            resume_node,
            user_input,
            env,
            approve_all,
        } => {
            let secrets = collect_secrets(&env, |key| std::env::var(key).ok())?;
            let options = RunOptions {
                pipeline_id,
                resume_node,
                user_input,
                approve_all,
            };
            let ok = cmd_run(&pipeline, options, secrets).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Pipelines { store, action } => {
            cmd_pipelines(&JsonDirStore::new(store), action).await?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_analyze(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    print_json(&analyze(&pipeline.nodes, &pipeline.edges))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let report = validate(&pipeline.nodes, &pipeline.edges);
    print_json(&report)?;
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_layout(path: &Path, direction: LayoutDirection) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    print_json(&auto_layout(&pipeline.nodes, &pipeline.edges, direction))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Split a `KEY=VALUE` flag.
fn parse_env_pair(pair: &str) -> anyhow::Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => anyhow::bail!("Invalid --env value '{}': expected KEY=VALUE", pair),
    }
}

/// Known credentials from the environment, then explicit `--env` pairs on top.
fn collect_secrets(
    pairs: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Secrets> {
    let mut secrets = Secrets::new();
    for key in KNOWN_CREDENTIALS {
        if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
            secrets.insert(*key, value);
        }
    }
    for pair in pairs {
        let (key, value) = parse_env_pair(pair)?;
        secrets.insert(key, value);
    }
    Ok(secrets)
}

struct RunOptions {
    pipeline_id: Option<String>,
    resume_node: Option<String>,
    user_input: Option<String>,
    approve_all: bool,
}

/// Returns `false` when the run failed or its stream ended early.
async fn cmd_run(path: &Path, options: RunOptions, secrets: Secrets) -> anyhow::Result<bool> {
    let pipeline = load_pipeline(path)?;
    let providers = Arc::new(HttpProviderFactory::new(EngineConfig::default().http_timeout)?);
    let engine = Arc::new(ExecutionEngine::with_defaults(providers)?);

    let mut request = ExecuteRequest::new(pipeline.nodes, pipeline.edges).with_env(secrets);
    if let Some(id) = &options.pipeline_id {
        request = request.with_pipeline_id(id.as_str());
    }
    if let Some(node) = &options.resume_node {
        request = request.resume(node.as_str(), options.user_input.clone());
    }

    let mut stdout = std::io::stdout();
    drive(&engine, request, &options, &mut stdout).await
}

/// Run to completion, resuming paused nodes in-process when `approve_all`
/// is set. Events are written to `out` one JSON object per line.
async fn drive(
    engine: &Arc<ExecutionEngine>,
    mut request: ExecuteRequest,
    options: &RunOptions,
    out: &mut impl std::io::Write,
) -> anyhow::Result<bool> {
    loop {
        let mut paused: Option<(String, String)> = None;
        let mut last: Option<PipelineEvent> = None;

        let mut events = engine.clone().stream(request.clone());
        while let Some(event) = events.next().await {
            out.write_all(event.to_json_line()?.as_bytes())?;
            if let PipelineEvent::NodePaused {
                node_id,
                pipeline_id,
                ..
            } = &event
            {
                paused = Some((pipeline_id.clone(), node_id.clone()));
            }
            last = Some(event);
        }
        out.flush()?;
        let failed = !ended_cleanly(last.as_ref());

        match paused {
            Some((pipeline_id, node_id)) if options.approve_all => {
                tracing::info!(pipeline_id = %pipeline_id, node = %node_id, "Auto-approving paused node");
                let input = options
                    .user_input
                    .clone()
                    .unwrap_or_else(|| APPROVED_INPUT.to_string());
                request = request.with_pipeline_id(pipeline_id).resume(node_id, Some(input));
            }
            _ => return Ok(!failed),
        }
    }
}

/// A run succeeded when its stream closed on `pipeline_complete` or
/// `node_paused`. Anything else, including no terminal event, is a failure.
fn ended_cleanly(last: Option<&PipelineEvent>) -> bool {
    match last {
        Some(PipelineEvent::PipelineComplete) | Some(PipelineEvent::NodePaused { .. }) => true,
        Some(other) => {
            if !other.is_terminal() {
                tracing::error!(last_event = other.name(), "Event stream ended without a terminal event");
            }
            false
        }
        None => {
            tracing::error!("Event stream ended without any event");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// pipelines
// ---------------------------------------------------------------------------

async fn cmd_pipelines(store: &dyn PipelineStore, action: PipelineAction) -> anyhow::Result<()> {
    match action {
        PipelineAction::Save { pipeline, id } => {
            let id = match id {
                Some(id) => id,
                None => default_id(&pipeline)?,
            };
            let data = load_pipeline(&pipeline)?;
            let record = store.upsert(&id, &data.name, data.nodes, data.edges).await?;
            print_json(&record)?;
        }
        PipelineAction::List => print_json(&store.list().await?)?,
        PipelineAction::Show { id } => match store.get(&id).await? {
            Some(saved) => print_json(&saved)?,
            None => anyhow::bail!("Pipeline '{}' not found", id),
        },
        PipelineAction::Delete { id } => {
            if !store.delete(&id).await? {
                anyhow::bail!("Pipeline '{}' not found", id);
            }
            println!("Deleted pipeline '{}'", id);
        }
    }
    Ok(())
}

fn default_id(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Cannot derive an id from '{}'; pass --id", path.display()))
}
