use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use stepflow::prelude::*;
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Run declarative automation workflows", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single workflow file and wait for it to finish
    Run {
        /// Path to the workflow definition (YAML or JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Initial variable, as KEY=VALUE (VALUE is parsed as JSON when possible)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Seconds to wait for the workflow to finish
        #[arg(short, long, default_value_t = 3600)]
        timeout: u64,

        /// Path to an engine config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate workflow definitions without running them
    Validate {
        /// Path to a definition file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// List workflow definitions in a directory
    List {
        /// Path to the workflows directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    /// Load a directory of definitions and run their schedules until Ctrl-C
    Serve {
        /// Path to the workflows directory (default: `definitions_dir` from the config)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Path to engine.yaml (default: <DIR>/engine.yaml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn filter_directive(verbose: bool) -> &'static str {
    if verbose {
        "stepflow=debug"
    } else {
        "stepflow=info"
    }
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) -> anyhow::Result<()> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
        .context("Failed to create OTLP exporter")?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("stepflow");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directive(verbose)))
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
    Ok(())
}

#[cfg(not(feature = "otel"))]
fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directive(verbose)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    if let Err(e) = init_otel_tracing(cli.verbose) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(2);
    }

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "stepflow failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run {
            file,
            vars,
            timeout,
            config,
        } => run_single(file, vars, timeout, config).await,
        Commands::Validate { path } => validate(path),
        Commands::List { dir } => list_workflows(dir),
        Commands::Serve { dir, config } => serve(dir, config).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Parse `--var KEY=VALUE` pairs
fn parse_vars(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Invalid --var '{}', expected KEY=VALUE", pair))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid --var '{}', empty key", pair);
        }
        let value =
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}

async fn run_single(
    file: PathBuf,
    vars: Vec<String>,
    timeout: u64,
    config: Option<PathBuf>,
) -> anyhow::Result<bool> {
    if !file.exists() {
        anyhow::bail!("Workflow file not found: {}", file.display());
    }
    let vars = parse_vars(&vars)?;
    let config = load_config(config.as_deref())?;

    println!("Running workflow: {}\n", file.display());

    let engine = Engine::new(config);
    let raw = WorkflowLoader::read_file(&file)?;
    let loaded = engine.load_definition(&raw).await?;
    for warning in &loaded.warnings {
        println!("⚠ {}", warning);
    }

    let outcome = engine
        .run_workflow(&loaded.definition.id, vars, Duration::from_secs(timeout))
        .await;
    engine.shutdown().await;
    let status = outcome?;

    print_status(&status);
    Ok(status.status == InstanceStatus::Completed)
}

fn validate(path: PathBuf) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let documents = if path.is_dir() {
        WorkflowLoader::read_directory(&path)?
    } else {
        vec![WorkflowLoader::read_file(&path)?]
    };

    if documents.is_empty() {
        println!("No workflows found in: {}", path.display());
        return Ok(true);
    }

    let mut valid = 0;
    for raw in &documents {
        match raw.parse() {
            Ok(definition) => {
                valid += 1;
                println!("✓ {} ({})", raw.origin, definition.id);
                for warning in definition.lint() {
                    println!("    ⚠ {}", warning);
                }
            }
            Err(e) => println!("✗ {}", e),
        }
    }

    println!("\n{}/{} definitions valid", valid, documents.len());
    Ok(valid == documents.len())
}

fn list_workflows(dir: PathBuf) -> anyhow::Result<bool> {
    if !dir.exists() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let mut workflows = WorkflowLoader::load_directory(&dir)?;
    if workflows.is_empty() {
        println!("No workflows found in: {}", dir.display());
        return Ok(true);
    }
    workflows.sort_by(|a, b| a.id.cmp(&b.id));

    println!("Workflows in {}:\n", dir.display());
    for w in &workflows {
        let schedule = match &w.schedule {
            Some(spec) => format!(" [schedule: {}]", spec.kind),
            None => String::new(),
        };
        println!(
            "  {} - {} v{} ({} steps){}",
            w.id,
            w.name,
            w.version,
            w.steps.len(),
            schedule
        );
    }

    Ok(true)
}

async fn serve(dir: Option<PathBuf>, config: Option<PathBuf>) -> anyhow::Result<bool> {
    let config_path = config.or_else(|| {
        let default = dir.as_ref()?.join("engine.yaml");
        default.exists().then_some(default)
    });
    let config = load_config(config_path.as_deref())?;

    let dir = match dir.or_else(|| config.definitions_dir.clone()) {
        Some(dir) => dir,
        None => anyhow::bail!("No workflows directory given and no definitions_dir configured"),
    };
    if !dir.is_dir() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let engine = Engine::new(config);
    let report = engine.load_from_source(&DirectorySource::new(&dir)).await?;

    println!("Loaded {} workflow(s) from {}", report.loaded.len(), dir.display());
    for (workflow_id, warning) in report.warnings() {
        println!("  ⚠ {}: {}", workflow_id, warning);
    }
    for rejected in &report.rejected {
        println!("  ✗ {}", rejected.error);
    }

    let upcoming = engine.upcoming_runs().await;
    if upcoming.is_empty() {
        println!("No scheduled workflows");
    } else {
        println!("\nScheduled:");
        for run in &upcoming {
            println!("  {} next at {}", run.workflow_id, run.next_run);
        }
    }

    println!("\nPress Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    engine.shutdown().await;

    let instances = engine.list_instances(&InstanceFilter::default()).await;
    let failed = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Failed)
        .count();
    println!(
        "Stopped after {} instance(s), {} failed",
        instances.len(),
        failed
    );
    Ok(report.rejected.is_empty())
}

fn print_status(status: &StatusView) {
    println!("\n=== Workflow Result ===\n");
    println!("Workflow: {} ({})", status.workflow_name, status.workflow_id);
    println!("Instance: {}", status.instance_id);
    println!("Status: {}", status.status);
    println!("Elapsed: {:.2}s\n", status.elapsed_seconds);

    for step in &status.steps {
        let marker = match step.status {
            StepStatus::Completed => "✓",
            StepStatus::Skipped => "-",
            StepStatus::Failed => "✗",
            _ => "…",
        };
        println!("  {} {} [{}] {}", marker, step.id, step.step_type, step.status);
        if let Some(err) = &step.error {
            println!("      Error: {}", err);
        }
    }

    if let Some(err) = &status.error {
        println!("\nError: {}", err);
    }
}
