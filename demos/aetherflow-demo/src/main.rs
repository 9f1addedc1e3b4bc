// SPDX-License-Identifier: MIT

//! aetherflow - run a flow document from the command line.
//!
//! This binary is the only place in the workspace that installs a
//! `tracing-subscriber` and the only place that reaches for `anyhow`:
//! every library crate below it propagates typed errors and never
//! touches process-global state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aetherflow_core::FlowId;
use aetherflow_registry::{ConnectorRegistry, StepRegistry};
use aetherflow_runner::{Engine, RunOptions, Settings};

#[derive(Parser)]
#[command(name = "aetherflow", version, about = "Run AetherFlow flow documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and semantically validate a flow without running it
    Validate {
        /// Path to the flow's YAML document
        flow: PathBuf,
    },
    /// Run a flow to completion
    Run {
        /// Path to the flow's YAML document
        flow: PathBuf,
        /// Reuse an existing run id instead of generating a fresh one
        #[arg(long)]
        run_id: Option<String>,
    },
}

fn init_logging(log_format: aetherflow_runner::LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        aetherflow_runner::LogFormat::Json => registry.with(fmt::layer().json()).init(),
        aetherflow_runner::LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let process_env: std::collections::HashMap<String, String> = std::env::vars().collect();
    let settings = Settings::from_env(&process_env).context("reading AETHERFLOW_* settings from the environment")?;
    init_logging(settings.log_format);

    let engine = Engine::new(ConnectorRegistry::new(), StepRegistry::new());

    match cli.command {
        Command::Validate { flow } => {
            let parsed = engine.validate(&flow, &settings).with_context(|| format!("validating {}", flow.display()))?;
            println!("flow `{}` is valid ({} job(s))", parsed.flow.id, parsed.jobs.len());
            Ok(())
        }
        Command::Run { flow, run_id } => {
            let options = RunOptions {
                run_id,
                ..RunOptions::default()
            };
            let summary = engine
                .run(&flow, &settings, options)
                .await
                .with_context(|| format!("running {}", flow.display()))?;

            println!(
                "run {} of flow {} finished in {}ms",
                summary.run_id,
                FlowId::new(summary.flow_id.clone()),
                summary.duration_ms()
            );
            for job in &summary.jobs {
                println!("  job {}: {} ({}ms)", job.job_id, job.status, job.duration_ms());
            }

            if summary.all_successful() {
                Ok(())
            } else {
                anyhow::bail!("flow `{}` did not complete successfully", summary.flow_id);
            }
        }
    }
}
