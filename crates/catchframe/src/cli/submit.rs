//! `catchframe submit`

use anyhow::{Context, Result};
use catchframe_pipeline::{Intake, PipelineError, Submission};
use std::path::PathBuf;

use super::GlobalArgs;

#[derive(Debug)]
pub struct SubmitArgs {
    pub video: PathBuf,
    pub description: String,
    pub console_logs: String,
    pub metadata: String,
    pub email: Option<String>,
}

pub async fn run(global: &GlobalArgs, args: SubmitArgs) -> Result<()> {
    let ctx = global.open_context().await?;
    let file = tokio::fs::File::open(&args.video)
        .await
        .with_context(|| format!("Failed to open {}", args.video.display()))?;

    let submission = Submission {
        artifact: file,
        description: args.description,
        diagnostic_log: args.console_logs,
        metadata: args.metadata,
        contact_address: args.email,
    };

    match Intake::new(ctx).submit(submission).await {
        Ok(report_id) => {
            println!("{}", serde_json::json!({ "reportId": report_id }));
            Ok(())
        }
        Err(PipelineError::PublishFailed { report_id, source }) => Err(anyhow::anyhow!(
            "Report {report_id} was stored but not queued ({source}); run `catchframe kick {report_id}`"
        )),
        Err(e) => Err(e).context("Submission rejected"),
    }
}
