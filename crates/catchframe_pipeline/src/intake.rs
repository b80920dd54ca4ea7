//! Intake stage.
//!
//! Order is fixed: store the raw artifact, create the record, publish the
//! trigger. The id goes back to the caller only once the trigger is
//! acknowledged by the channel.

use catchframe_protocol::{ArtifactForm, NewReport, ReportId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::context::{PipelineContext, Retrigger};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::METRICS;

/// One submission as decoded from the intake request.
pub struct Submission<R> {
    pub artifact: R,
    pub description: String,
    /// JSON-encoded console log
    pub diagnostic_log: String,
    /// JSON-encoded metadata blob
    pub metadata: String,
    pub contact_address: Option<String>,
}

pub struct Intake {
    ctx: Arc<PipelineContext>,
}

impl Intake {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn submit<R>(&self, submission: Submission<R>) -> PipelineResult<ReportId>
    where
        R: AsyncRead + Send + Unpin,
    {
        let Submission {
            artifact,
            description,
            diagnostic_log,
            metadata,
            contact_address,
        } = submission;

        validate_json("console logs", &diagnostic_log)?;
        validate_json("metadata", &metadata)?;
        let contact_address = contact_address
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let report_id = ReportId::new();
        let raw = self.ctx.location(ArtifactForm::Raw, &report_id);
        let artifacts = &self.ctx.stores.artifacts;

        // One byte past the limit is enough to tell "too large"
        let max_bytes = self.ctx.config.intake.max_bytes;
        let mut limited = artifact.take(max_bytes.saturating_add(1));
        let written = artifacts.put(&raw, &mut limited).await?;

        if written == 0 || written > max_bytes {
            if let Err(e) = artifacts.delete(&raw).await {
                warn!(report_id = %report_id, location = %raw, error = %e, "Failed to delete rejected upload");
            }
            return Err(if written == 0 {
                PipelineError::EmptyArtifact
            } else {
                PipelineError::ArtifactTooLarge { limit: max_bytes }
            });
        }
        debug!(report_id = %report_id, location = %raw, bytes = written, "Stored raw artifact");

        let record = NewReport {
            id: report_id.clone(),
            created_at: Utc::now(),
            description,
            diagnostic_log,
            metadata_blob: metadata,
            contact_address,
        };
        match self.ctx.stores.records.create(&record).await {
            Ok(true) => {}
            Ok(false) => return Err(PipelineError::DuplicateReport(report_id)),
            Err(e) => {
                // Raw artifact has no record now; left for orphan reconciliation
                error!(report_id = %report_id, location = %raw, error = %e, "Record creation failed after upload");
                return Err(e.into());
            }
        }

        self.publish_with_retry(&report_id).await?;
        METRICS.inc_reports_submitted();
        info!(report_id = %report_id, bytes = written, "Report submitted");
        Ok(report_id)
    }

    async fn publish_with_retry(&self, report_id: &ReportId) -> PipelineResult<()> {
        let topic = &self.ctx.table.first().topic;
        let attempts = self.ctx.config.intake.publish_attempts;
        let backoff = Duration::from_millis(self.ctx.config.intake.publish_backoff_ms);

        let mut attempt = 1;
        loop {
            match self.ctx.publish_trigger(topic, report_id).await {
                Ok(message_id) => {
                    debug!(report_id = %report_id, topic = %topic, message_id, "Published trigger");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        report_id = %report_id,
                        attempt,
                        error = %e,
                        "Trigger publish failed, retrying"
                    );
                    tokio::time::sleep(backoff * attempt).await;
                    attempt += 1;
                }
                Err(source) => {
                    error!(
                        report_id = %report_id,
                        error = %source,
                        "Trigger publish failed; report stays pending until kicked or swept"
                    );
                    return Err(PipelineError::PublishFailed {
                        report_id: report_id.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Re-publish the trigger for the report's current stage. Idempotent.
    pub async fn kick(&self, report_id: &ReportId) -> PipelineResult<Retrigger> {
        let report = self
            .ctx
            .stores
            .records
            .get(report_id)
            .await?
            .ok_or_else(|| PipelineError::RecordMissing(report_id.clone()))?;
        self.ctx.retrigger(&report).await
    }
}

fn validate_json(field: &str, value: &str) -> PipelineResult<()> {
    serde_json::from_str::<serde_json::Value>(value)
        .map(|_| ())
        .map_err(|e| PipelineError::Validation(format!("{field} is not valid JSON: {e}")))
}
