//! GRANARY CLI
//!
//! Command-line interface for the incremental catalog build engine.

#![warn(clippy::all)]

mod manifest;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use console::style;
use granary_graph::{GraphLoader, Selection, StepGraph};
use granary_runtime::{BuildEngine, EngineConfig, RunSummary, StepOutcome};
use granary_steps::{DirSink, FsRemote, Remote, TransformRegistry, UpsertSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "granary")]
#[command(about = "GRANARY - incremental build engine for data catalogs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every stale step a target depends on
    Run {
        /// Target patterns (exact address or substring); empty builds the
        /// full catalog
        patterns: Vec<String>,
        /// Path to the step manifest
        #[arg(short, long)]
        manifest: PathBuf,
        /// Catalog root directory
        #[arg(short, long, default_value = ".granary")]
        catalog: PathBuf,
        /// Report the plan without executing anything
        #[arg(long)]
        dry_run: bool,
        /// Worker pool size
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Include steps marked private
        #[arg(long)]
        private: bool,
        /// Treat matching steps as stale regardless of fingerprint
        #[arg(long)]
        force: Vec<String>,
        /// Environment the publish sink targets
        #[arg(long, default_value = "staging")]
        env: String,
        /// Base directory for relative upstream sources
        #[arg(long)]
        source_dir: Option<PathBuf>,
        /// Directory the publish sink writes into
        /// (default: <catalog>/.sink/<env>)
        #[arg(long)]
        sink_dir: Option<PathBuf>,
    },
    /// List the steps declared in a manifest
    Steps {
        /// Path to the step manifest
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_graph(manifest_path: &Path) -> Result<StepGraph> {
    let manifest = manifest::load(manifest_path)?;
    Ok(GraphLoader::load(manifest.steps)?)
}

fn render_summary(summary: &RunSummary) {
    if summary.dry_run {
        println!("Plan ({} step(s)):", summary.len());
    } else {
        println!("Run ({} step(s)):", summary.len());
    }
    for (address, outcome) in summary.iter() {
        let line = outcome.to_string();
        let styled = match outcome {
            StepOutcome::Succeeded { .. } => style(line).green(),
            StepOutcome::Failed { .. } => style(line).red(),
            StepOutcome::WouldRun => style(line).cyan(),
            _ => style(line).dim(),
        };
        println!("  {:<60} {}", address.to_string(), styled);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    patterns: Vec<String>,
    manifest: PathBuf,
    catalog: PathBuf,
    dry_run: bool,
    workers: usize,
    private: bool,
    force: Vec<String>,
    env: String,
    source_dir: Option<PathBuf>,
    sink_dir: Option<PathBuf>,
) -> Result<bool> {
    let graph = load_graph(&manifest)?;
    let selection = Selection::resolve(&graph, &patterns, private)?;

    let remote: Arc<dyn Remote> = Arc::new(match source_dir {
        Some(base) => FsRemote::with_base(base),
        None => FsRemote::new(),
    });
    let sink_dir = sink_dir.unwrap_or_else(|| catalog.join(".sink").join(&env));
    let sink: Arc<dyn UpsertSink> = Arc::new(DirSink::new(env.clone(), sink_dir));

    let mut config = EngineConfig::default()
        .with_workers(workers)
        .with_environment(env);
    for pattern in force {
        config = config.with_force(pattern);
    }

    let engine = BuildEngine::open(
        graph,
        &catalog,
        remote,
        TransformRegistry::with_builtins(),
        sink,
        config,
    )?;

    let summary = if dry_run {
        engine.dry_run(&selection).await?
    } else {
        let cancel = CancellationToken::new();
        let cancel_on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing in-flight steps");
                cancel_on_signal.cancel();
            }
        });
        engine.run(&selection, cancel).await?
    };

    render_summary(&summary);
    Ok(summary.is_success())
}

fn steps_command(manifest: PathBuf) -> Result<()> {
    let graph = load_graph(&manifest)?;
    for (address, decl) in graph.iter() {
        let mark = if decl.private { " (private)" } else { "" };
        println!("{}{}", address, mark);
        for dep in &decl.dependencies {
            println!("  <- {}", dep);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    let cli = Cli::parse();

    let success = match cli.command {
        Commands::Run {
            patterns,
            manifest,
            catalog,
            dry_run,
            workers,
            private,
            force,
            env,
            source_dir,
            sink_dir,
        } => {
            run_command(
                patterns, manifest, catalog, dry_run, workers, private, force, env, source_dir,
                sink_dir,
            )
            .await?
        }
        Commands::Steps { manifest } => {
            steps_command(manifest)?;
            true
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
