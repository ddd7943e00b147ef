//! Cadence CLI entry point.
//!
//! This binary is the composition root. It loads the run file, wires
//! observability, builds the generation service and data providers, then
//! drives one calendar run:
//!
//! 1. Gather upstream data sources into a [`pipeline::SourceCatalog`].
//! 2. Run (or resume) the [`steps::StepOrchestrator`]; Ctrl-C cancels it.
//! 3. Write the calendar artifact, or on failure a checkpoint that
//!    `--resume` accepts.

mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use llm::AnthropicGenerator;
use pipeline::timeline::TimelineSlot;
use pipeline::{CalendarArtifact, SourceCatalog, StepCatalog};
use steps::{RunCheckpoint, StepOrchestrator};

use crate::config::{CadenceFile, API_KEY_VAR};

#[derive(Parser, Debug)]
#[command(name = "cadence", version, about = "Twelve-step content calendar generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generates a calendar.
    Run {
        #[arg(long, default_value = "cadence.toml")]
        config: PathBuf,
        /// Where the calendar artifact is written.
        #[arg(long, default_value = "calendar.json")]
        output: PathBuf,
        /// Continue from a checkpoint written by a failed run.
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Where the checkpoint is written if the run fails.
        #[arg(long, default_value = "cadence-checkpoint.json")]
        checkpoint_out: PathBuf,
    },
    /// Checks a run file without contacting any service.
    Validate {
        #[arg(long, default_value = "cadence.toml")]
        config: PathBuf,
    },
}

/// The document written to `--output`.
#[derive(Serialize)]
struct CalendarDocument<'a> {
    artifact: &'a CalendarArtifact,
    schedule: Vec<TimelineSlot>,
}

async fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

async fn read_checkpoint(path: &Path) -> Result<RunCheckpoint> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("decoding checkpoint {}", path.display()))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            child.cancel();
        }
    });
    token
}

async fn run(
    config: &Path,
    output: &Path,
    resume: Option<&Path>,
    checkpoint_out: &Path,
) -> Result<ExitCode> {
    let file = CadenceFile::load(config).await?;
    let api_key = std::env::var(API_KEY_VAR).unwrap_or_default();
    let generator = AnthropicGenerator::new(file.llm.clone(), api_key)
        .with_context(|| format!("set {API_KEY_VAR} to a valid key"))?;

    let providers = file.sources.providers()?;
    let sources = SourceCatalog::gather(&providers, file.sources.keys()).await?;
    info!(sources = sources.len(), "Gathered upstream data sources");

    let catalog = Arc::new(StepCatalog::standard());
    let mut orchestrator = StepOrchestrator::new(
        file.run,
        Arc::clone(&catalog),
        Arc::new(generator),
        Arc::new(sources),
    )?;

    let cancel = cancel_on_ctrl_c();
    let outcome = match resume {
        Some(path) => orchestrator.resume(read_checkpoint(path).await?, cancel).await,
        None => orchestrator.run(cancel).await,
    };

    match outcome {
        Ok(artifact) => {
            let document = CalendarDocument {
                schedule: artifact.schedule(&catalog),
                artifact: &artifact,
            };
            write_json(output, &document).await?;
            info!(
                run_id = %artifact.run_id(),
                score = artifact.aggregate_score().as_f64(),
                tier = ?artifact.tier(),
                path = %output.display(),
                "Calendar written"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            write_json(checkpoint_out, &failure.checkpoint).await?;
            error!(
                error = %failure.error,
                failed_step = ?failure.failed_step,
                phase = ?failure.phase,
                last_accepted = ?failure.last_accepted,
                checkpoint = %checkpoint_out.display(),
                "Calendar run failed"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init()?;

    match cli.command {
        Commands::Run {
            config,
            output,
            resume,
            checkpoint_out,
        } => run(&config, &output, resume.as_deref(), &checkpoint_out).await,
        Commands::Validate { config } => {
            CadenceFile::load(&config).await?;
            info!(path = %config.display(), "Run file is valid");
            Ok(ExitCode::SUCCESS)
        }
    }
}
