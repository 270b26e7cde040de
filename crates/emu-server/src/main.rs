//! Emulator automation service
//!
//! ```text
//! emu-automation [-c CONFIG]                                   run the trigger poller until ctrl-c
//! emu-automation [-c CONFIG] run SESSION SEQUENCE [--respect-triggers]
//! ```

mod host;
mod runtime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emu_config::AutomationConfig;
use emu_core::CancellationToken;
use std::path::PathBuf;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ulid::Ulid;

use crate::runtime::AutomationRuntime;

/// Emulator automation: trigger polling, sequences and command graphs
#[derive(Debug, Parser)]
#[command(name = "emu-automation", version, about)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, default_value = "automation.yaml")]
    config: PathBuf,

    /// Defaults to running the trigger poller until ctrl-c
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sequence against a session and print the result as JSON
    Run {
        /// Session to send inputs to
        session: String,
        /// Sequence to execute
        sequence: String,
        /// Skip commands whose trigger is not satisfied
        #[arg(long)]
        respect_triggers: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config: config_path,
        command,
    } = Cli::parse();
    let config = AutomationConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let run_id = Ulid::new();
    let span = info_span!("emu-automation", run_id = %run_id);

    async move {
        info!(config = %config_path.display(), "Starting emulator automation");

        let runtime = AutomationRuntime::from_config(&config);
        let cancel = CancellationToken::new();

        match command {
            Some(Commands::Run {
                session,
                sequence,
                respect_triggers,
            }) => {
                let run = runtime.run_sequence(&session, &sequence, respect_triggers, &cancel);
                let result = tokio::select! {
                    result = run => result?,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted");
                        return Ok(());
                    }
                };
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            None => {
                let poller = runtime.start(&cancel);
                info!("Emulator automation is running");

                tokio::signal::ctrl_c().await?;
                info!("Shutting down...");
                cancel.cancel();

                if let Some(handle) = poller {
                    handle.await?;
                }
                if let Some(metrics) = runtime.poller_metrics() {
                    info!(
                        cycles = metrics.cycles_completed,
                        idle_skips = metrics.idle_skips,
                        overlap_skips = metrics.overlap_skips,
                        triggers_evaluated = metrics.triggers_evaluated,
                        persist_failures = metrics.persist_failures,
                        "Poller stopped"
                    );
                }
            }
        }

        info!(dispatched = runtime.dispatched_inputs(), "Done");
        Ok::<_, anyhow::Error>(())
    }
    .instrument(span)
    .await
}
