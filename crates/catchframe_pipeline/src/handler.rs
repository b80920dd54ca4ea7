//! Stage handlers.
//!
//! One handler invocation runs one transition for one report:
//!
//! 1. read the record and look up the decision for its status
//! 2. do the stage work, skipping whatever already exists at its
//!    deterministic location
//! 3. compare-and-set the status from `from` to `to`
//! 4. run best-effort post actions
//! 5. publish the next stage's trigger
//!
//! Work that already happened is detected from the output location, so a
//! crash between steps 2 and 3 is repaired by redelivery without redoing
//! the expensive part.

use catchframe_protocol::{
    ArtifactForm, ObjectLocation, Report, ReportId, ReportStatus, StatusUpdate, Visibility,
};
use catchframe_store::{download_to_file, upload_file};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PipelineMode;
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::fsm::{decide, Decision, Stage, Transition};
use crate::metrics::METRICS;
use crate::transform::TransformError;

/// Successful handler outcome. Failures are `PipelineError`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// This invocation made the transition
    Advanced {
        to: ReportStatus,
        next_topic: Option<String>,
    },
    /// Someone else already made it (duplicate or concurrent delivery)
    AlreadyDone {
        status: ReportStatus,
        republished: bool,
    },
    /// Report is `failed`; the trigger is dropped
    Abandoned,
}

/// Side effect that runs after a committed transition and can never undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    DeleteArtifact {
        location: ObjectLocation,
        what: &'static str,
    },
}

#[derive(Clone)]
pub struct StageHandler {
    ctx: Arc<PipelineContext>,
}

impl StageHandler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub async fn handle(
        &self,
        transition: &Transition,
        report_id: &ReportId,
    ) -> PipelineResult<StageOutcome> {
        let report = self.load(report_id).await?;

        match decide(transition, report.status) {
            Decision::Run => {}
            Decision::AlreadyDone => return self.already_done(transition, &report).await,
            Decision::Abandoned => {
                info!(report_id = %report_id, stage = %transition.stage, "Report is failed; dropping trigger");
                return Ok(StageOutcome::Abandoned);
            }
            Decision::NotReady => {
                return Err(PipelineError::NotReady {
                    report_id: report_id.clone(),
                    stage: transition.stage,
                    status: report.status,
                })
            }
        }

        let update = match transition.stage {
            Stage::Transcode => self.transcode(report_id, transition.to).await?,
            Stage::Publish => self.publish(report_id).await?,
        };

        let applied = self
            .ctx
            .stores
            .records
            .advance(report_id, transition.from, &update)
            .await?;

        if !applied {
            // Lost the compare-and-set to a concurrent delivery
            let current = self.load(report_id).await?;
            return match decide(transition, current.status) {
                Decision::AlreadyDone => {
                    METRICS.inc_idempotent_skips();
                    debug!(
                        report_id = %report_id,
                        stage = %transition.stage,
                        status = %current.status,
                        "Concurrent delivery advanced first"
                    );
                    Ok(StageOutcome::AlreadyDone {
                        status: current.status,
                        republished: false,
                    })
                }
                Decision::Abandoned => Ok(StageOutcome::Abandoned),
                Decision::Run | Decision::NotReady => Err(PipelineError::Conflict {
                    report_id: report_id.clone(),
                    stage: transition.stage,
                    status: current.status,
                }),
            };
        }

        METRICS.inc_stages_advanced();
        info!(
            report_id = %report_id,
            stage = %transition.stage,
            from = %transition.from,
            to = %transition.to,
            "Report advanced"
        );

        self.run_post_actions(report_id, self.post_actions(transition, report_id))
            .await;

        let next_topic = self.publish_next(transition, report_id).await?;
        Ok(StageOutcome::Advanced {
            to: transition.to,
            next_topic,
        })
    }

    async fn load(&self, report_id: &ReportId) -> PipelineResult<Report> {
        self.ctx
            .stores
            .records
            .get(report_id)
            .await?
            .ok_or_else(|| PipelineError::RecordMissing(report_id.clone()))
    }

    /// Duplicate delivery. When the report sits exactly at this stage's
    /// target the next trigger may have been lost after the commit, so it is
    /// published again; at the terminal stage the cleanup is repeated.
    async fn already_done(
        &self,
        transition: &Transition,
        report: &Report,
    ) -> PipelineResult<StageOutcome> {
        METRICS.inc_idempotent_skips();
        let mut republished = false;
        if report.status == transition.to {
            if transition.is_terminal() {
                self.run_post_actions(&report.id, self.post_actions(transition, &report.id))
                    .await;
            } else if self.publish_next(transition, &report.id).await?.is_some() {
                republished = true;
                METRICS.inc_triggers_republished();
            }
        }
        debug!(
            report_id = %report.id,
            stage = %transition.stage,
            status = %report.status,
            republished,
            "Stage already done"
        );
        Ok(StageOutcome::AlreadyDone {
            status: report.status,
            republished,
        })
    }

    async fn publish_next(
        &self,
        transition: &Transition,
        report_id: &ReportId,
    ) -> PipelineResult<Option<String>> {
        let Some(next) = self.ctx.table.next_after(transition) else {
            return Ok(None);
        };
        self.ctx
            .publish_trigger(&next.topic, report_id)
            .await
            .map_err(|source| PipelineError::NextPublish {
                report_id: report_id.clone(),
                source,
            })?;
        debug!(report_id = %report_id, topic = %next.topic, "Published next trigger");
        Ok(Some(next.topic.clone()))
    }

    // ========================================================================
    // Stage work
    // ========================================================================

    async fn transcode(
        &self,
        report_id: &ReportId,
        to: ReportStatus,
    ) -> PipelineResult<StatusUpdate> {
        let artifacts = self.ctx.stores.artifacts.as_ref();
        let processed = self.ctx.location(ArtifactForm::Processed, report_id);

        if artifacts.exists(&processed).await? {
            info!(
                report_id = %report_id,
                location = %processed,
                "Processed artifact already staged; skipping transform"
            );
            return Ok(StatusUpdate::to(to));
        }

        let raw = self.ctx.location(ArtifactForm::Raw, report_id);
        if !artifacts.exists(&raw).await? {
            return Err(PipelineError::ArtifactMissing {
                report_id: report_id.clone(),
                location: raw,
            });
        }

        // Removed on drop: success, error and cancellation alike
        let workdir = tempfile::Builder::new()
            .prefix("catchframe-")
            .tempdir()
            .map_err(TransformError::from)?;
        let input = workdir.path().join(&raw.key);
        let output = workdir.path().join(&processed.key);

        let bytes = download_to_file(artifacts, &raw, &input).await?;
        debug!(report_id = %report_id, bytes, "Downloaded raw artifact");

        let result = self.ctx.transform.run(&input, &output).await?;
        info!(
            report_id = %report_id,
            transform = self.ctx.transform.name(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Transform succeeded"
        );

        let bytes = upload_file(artifacts, &processed, &output).await?;
        info!(report_id = %report_id, location = %processed, bytes, "Staged processed artifact");
        Ok(StatusUpdate::to(to))
    }

    async fn publish(&self, report_id: &ReportId) -> PipelineResult<StatusUpdate> {
        let artifacts = self.ctx.stores.artifacts.as_ref();
        let source = self.ctx.location(self.ctx.config.published_form(), report_id);
        let target = self.ctx.public_location(report_id);

        let target_exists = artifacts.exists(&target).await?;
        if !target_exists {
            if target == source || !artifacts.exists(&source).await? {
                return Err(PipelineError::ArtifactMissing {
                    report_id: report_id.clone(),
                    location: source,
                });
            }
            artifacts.copy(&source, &target).await?;
            debug!(report_id = %report_id, from = %source, to = %target, "Copied to public bucket");
        }
        artifacts.set_visibility(&target, Visibility::Public).await?;

        let url = self.ctx.url_format().url_for(&target);
        info!(report_id = %report_id, url = %url, "Artifact public");
        Ok(StatusUpdate::completed(url))
    }

    // ========================================================================
    // Post actions
    // ========================================================================

    /// Superseded copies to retire once `transition` has committed.
    pub fn post_actions(&self, transition: &Transition, report_id: &ReportId) -> Vec<PostAction> {
        if transition.stage != Stage::Publish {
            return Vec::new();
        }
        let target = self.ctx.public_location(report_id);
        let mut actions = Vec::new();

        let raw = self.ctx.location(ArtifactForm::Raw, report_id);
        if raw != target {
            actions.push(PostAction::DeleteArtifact {
                location: raw,
                what: "raw upload",
            });
        }
        if self.ctx.table.mode() == PipelineMode::Transcode {
            let staged = self.ctx.location(ArtifactForm::Processed, report_id);
            if staged != target {
                actions.push(PostAction::DeleteArtifact {
                    location: staged,
                    what: "processed staging copy",
                });
            }
        }
        actions
    }

    async fn run_post_actions(&self, report_id: &ReportId, actions: Vec<PostAction>) {
        for action in actions {
            match action {
                PostAction::DeleteArtifact { location, what } => {
                    match self.ctx.stores.artifacts.delete(&location).await {
                        Ok(deleted) => {
                            debug!(report_id = %report_id, %location, deleted, "Retired {}", what)
                        }
                        Err(e) => {
                            METRICS.inc_cleanup_failures();
                            warn!(
                                report_id = %report_id,
                                %location,
                                error = %e,
                                "Failed to delete {}; transition stands",
                                what
                            );
                        }
                    }
                }
            }
        }
    }
}
