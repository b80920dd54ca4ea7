//! Stall sweeper.
//!
//! Re-publishes triggers for reports whose non-terminal status has not moved
//! within `stall_after`, covering a publish lost after a committed update.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::{PipelineContext, Retrigger};
use crate::error::PipelineResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub republished: usize,
    pub failed: usize,
}

pub struct Sweeper {
    ctx: Arc<PipelineContext>,
}

impl Sweeper {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub async fn sweep_once(&self) -> PipelineResult<SweepSummary> {
        let sweep = &self.ctx.config.sweep;
        let stall_after = chrono::Duration::from_std(sweep.stall_after())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - stall_after;

        let stalled = self
            .ctx
            .stores
            .records
            .list_stalled(&self.ctx.table.in_flight_statuses(), cutoff, sweep.batch_size)
            .await?;

        let mut summary = SweepSummary {
            scanned: stalled.len(),
            ..SweepSummary::default()
        };
        for report in &stalled {
            match self.ctx.retrigger(report).await {
                Ok(Retrigger::Published { .. }) => summary.republished += 1,
                Ok(other) => {
                    warn!(report_id = %report.id, outcome = ?other, "Stalled report has no stage to run");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(report_id = %report.id, error = %e, "Failed to re-trigger stalled report");
                }
            }
        }

        if summary.scanned > 0 {
            info!(
                scanned = summary.scanned,
                republished = summary.republished,
                failed = summary.failed,
                "Sweep finished"
            );
        }
        Ok(summary)
    }
}
