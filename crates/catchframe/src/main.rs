//! CatchFrame launcher
//!
//! One binary for both sides of the pipeline:
//! - **Intake**: `submit` stores a recording and publishes its first trigger
//! - **Workers**: `worker` consumes stage topics until interrupted
//! - **Operator commands**: `status`, `kick`, `sweep`, `dead-letters`

use anyhow::{Context, Result};
use catchframe_logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

use cli::worker::StageArg;
use cli::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "catchframe", about = "Bug report recording pipeline")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a recording with its diagnostics
    Submit {
        /// Recorded video file
        #[arg(long)]
        video: PathBuf,

        /// Free-text description of the problem
        #[arg(long, default_value = "")]
        description: String,

        /// Console log capture, as JSON
        #[arg(long, default_value = "[]")]
        console_logs: String,

        /// Environment metadata, as JSON
        #[arg(long, default_value = "{}")]
        metadata: String,

        /// Contact address for follow-up
        #[arg(long)]
        email: Option<String>,
    },

    /// Run stage workers until Ctrl+C
    Worker {
        /// Process what is currently queued, then exit
        #[arg(long)]
        once: bool,

        /// Run the stall sweep this often (0 disables; default from config)
        #[arg(long)]
        sweep_interval_secs: Option<u64>,

        /// Only consume these stages' topics (repeatable)
        #[arg(long = "stage", value_enum)]
        stages: Vec<StageArg>,
    },

    /// Re-publish triggers for stalled in-flight reports
    Sweep,

    /// Re-publish the trigger for one report
    Kick {
        /// Report ID
        id: String,
    },

    /// Print a report record as JSON
    Status {
        /// Report ID
        id: String,
    },

    /// List dead-lettered triggers
    DeadLetters {
        /// Only this topic
        #[arg(long)]
        topic: Option<String>,

        /// Maximum rows
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_command(cli: Cli) -> Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Submit {
            video,
            description,
            console_logs,
            metadata,
            email,
        } => {
            cli::submit::run(
                &global,
                cli::submit::SubmitArgs {
                    video,
                    description,
                    console_logs,
                    metadata,
                    email,
                },
            )
            .await
        }
        Commands::Worker {
            once,
            sweep_interval_secs,
            stages,
        } => {
            cli::worker::run(
                &global,
                cli::worker::WorkerArgs {
                    once,
                    sweep_interval_secs,
                    stages,
                },
            )
            .await
        }
        Commands::Sweep => cli::inspect::sweep(&global).await,
        Commands::Kick { id } => cli::inspect::kick(&global, &id).await,
        Commands::Status { id } => cli::inspect::status(&global, &id).await,
        Commands::DeadLetters { topic, limit, json } => {
            cli::inspect::dead_letters(&global, topic.as_deref(), limit, json).await
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(LogConfig {
        app_name: "catchframe",
        verbose: cli.global.verbose,
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
        .and_then(|runtime| runtime.block_on(run_command(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}
