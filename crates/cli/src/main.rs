//! Command-line checks and repairs for rodwatch.

mod config;
mod report;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Backend;
use report::LineOptions;
use rodwatch_core::CheckKind;
use rodwatch_engine::{Engine, PathSource, RunMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rodwatch")]
#[command(about = "Verify and repair data objects in an iRODS zone")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Configuration file path (default: config/rodwatch.toml)
    #[arg(long, global = true, env = "RODWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Log at debug level
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Log at trace level
    #[arg(short, long, global = true, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify data objects and report violations
    Check(RunArgs),
    /// Verify data objects and repair the violations found
    Repair(RunArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub(crate) struct RunArgs {
    /// Root collections or data objects
    roots: Vec<String>,

    /// Descend into sub-collections
    #[arg(short, long, default_value_t = false)]
    recursive: bool,

    /// Read data object paths from a file, one per line ('-' for stdin)
    #[arg(short, long)]
    input: Option<String>,

    /// Checks to run, comma separated (checksum, replicas, metadata, consent)
    #[arg(long, value_delimiter = ',')]
    checks: Vec<CheckKind>,

    /// Number of worker tasks
    #[arg(long)]
    threads: Option<usize>,

    /// Number of storage clients shared by the workers
    #[arg(long)]
    clients: Option<usize>,

    /// Expected number of valid replicas
    #[arg(long)]
    num_replicas: Option<usize>,

    /// Allow repairs to replace existing values
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Report planned repairs without writing anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Print the paths of objects that passed
    #[arg(long, default_value_t = false)]
    print_pass: bool,

    /// Print the paths of objects that failed
    #[arg(long, default_value_t = false)]
    print_fail: bool,

    /// Write printed paths to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the full run result as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Storage backend (overrides config)
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Zone snapshot for the memory backend
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let Cli { global, command } = Cli::parse();
    init_tracing(&global);

    match command {
        Commands::Check(args) => handle_run(RunMode::Check, args, &global).await,
        Commands::Repair(args) => handle_run(RunMode::Repair, args, &global).await,
    }
}

fn init_tracing(global: &GlobalArgs) {
    let filter = if global.debug {
        EnvFilter::new("trace")
    } else if global.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if global.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn handle_run(mode: RunMode, args: RunArgs, global: &GlobalArgs) -> Result<ExitCode> {
    let mut config = config::load(global.config.as_deref())?;
    config::apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let source = path_source(&args).await?;

    let factory = rodwatch_storage::from_config(&config.storage)
        .context("failed to set up storage backend")?;
    let warehouse = rodwatch_warehouse::from_config(&config.warehouse)
        .await
        .context("failed to connect to warehouse")?;
    let engine = Engine::new(config.engine.clone(), factory, warehouse)
        .context("failed to create engine")?;

    let result = engine.run(source, mode).await.context("run failed")?;

    let lines = report::render_lines(
        &result,
        LineOptions {
            print_pass: args.print_pass,
            print_fail: args.print_fail,
        },
    );
    match &args.output {
        Some(path) => tokio::fs::write(path, &lines)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{lines}"),
    }
    if let Some(path) = &args.report {
        report::write_json(&result, path).await?;
        tracing::info!(report = %path.display(), "Wrote run report");
    }

    if global.verbose || global.debug {
        eprint!("{}", report::render_failures(&result));
    }
    eprint!("{}", report::render_summary(&result));

    Ok(if result.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Decide what to walk from positional roots or an input list.
async fn path_source(args: &RunArgs) -> Result<PathSource> {
    if let Some(input) = &args.input {
        if !args.roots.is_empty() {
            anyhow::bail!("root paths cannot be combined with --input");
        }
        return Ok(PathSource::Listed(read_paths(input).await?));
    }

    if args.roots.is_empty() {
        anyhow::bail!("no root paths provided; pass collections or use --input");
    }
    for root in &args.roots {
        rodwatch_core::path::validate(root).with_context(|| format!("invalid root '{root}'"))?;
    }
    Ok(PathSource::Roots {
        roots: args.roots.clone(),
        recursive: args.recursive,
    })
}

/// Read object paths, skipping blank lines and `#` comments.
async fn read_paths(input: &str) -> Result<Vec<String>> {
    let text = if input == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read paths from stdin")?;
        text
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read paths from {input}"))?
    };

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
