//! `catchframe worker`

use anyhow::{Context, Result};
use catchframe_pipeline::{Stage, StageWorker};
use clap::ValueEnum;
use std::time::Duration;
use tracing::info;

use super::GlobalArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    Transcode,
    Publish,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Transcode => Stage::Transcode,
            StageArg::Publish => Stage::Publish,
        }
    }
}

#[derive(Debug)]
pub struct WorkerArgs {
    pub once: bool,
    pub sweep_interval_secs: Option<u64>,
    pub stages: Vec<StageArg>,
}

pub async fn run(global: &GlobalArgs, args: WorkerArgs) -> Result<()> {
    let ctx = global.open_context().await?;
    let (mut worker, shutdown_tx) = StageWorker::new(ctx.clone());

    if !args.stages.is_empty() {
        let stages: Vec<Stage> = args.stages.iter().copied().map(Stage::from).collect();
        worker = worker.only_stages(&stages);
        if worker.topics().is_empty() {
            anyhow::bail!(
                "No selected stage is active in {:?} mode",
                ctx.config.mode
            );
        }
    }

    if args.once {
        let summary = worker.run_once().await;
        info!(summary = ?summary, "Queued deliveries processed");
        println!(
            "{}",
            serde_json::json!({
                "deliveries": summary.deliveries,
                "advanced": summary.advanced,
                "skipped": summary.skipped,
                "retried": summary.retried,
                "deadLettered": summary.dead_lettered,
            })
        );
        return Ok(());
    }

    let sweep_secs = args
        .sweep_interval_secs
        .unwrap_or(ctx.config.sweep.interval_secs);
    if sweep_secs > 0 {
        worker = worker.with_sweep(Duration::from_secs(sweep_secs));
    }

    let handle = worker.spawn(shutdown_tx);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Interrupt received, draining worker");

    let summary = handle.shutdown().await.context("Worker task failed")?;
    info!(summary = ?summary, "Worker exited");
    Ok(())
}
