//! Process-wide handles, built once at startup and shared by every stage.

use catchframe_protocol::{
    ArtifactForm, ObjectLocation, PublicUrlFormat, Report, ReportId, ReportStatus, TriggerPayload,
};
use catchframe_store::{StoreResult, Stores};
use std::sync::Arc;
use tracing::info;

use crate::config::{ConfigError, PipelineConfig};
use crate::error::PipelineResult;
use crate::fsm::TransitionTable;
use crate::metrics::METRICS;
use crate::transform::{CommandTransform, Transform};

pub struct PipelineContext {
    pub stores: Stores,
    pub config: PipelineConfig,
    pub table: TransitionTable,
    pub transform: Arc<dyn Transform>,
    url_format: PublicUrlFormat,
}

/// Result of re-triggering a report from its current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrigger {
    Published { topic: String, status: ReportStatus },
    /// `completed` or `failed`; nothing left to run
    Terminal(ReportStatus),
    /// No active transition starts at this status (mode changed mid-flight)
    NoStage(ReportStatus),
}

impl PipelineContext {
    pub fn new(
        stores: Stores,
        config: PipelineConfig,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let table = TransitionTable::new(config.mode, &config.topics);
        let url_format = config.url_format();
        Ok(Self {
            stores,
            config,
            table,
            transform,
            url_format,
        })
    }

    /// Context with the configured subprocess transform.
    pub fn with_command_transform(
        stores: Stores,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        let transform = Arc::new(CommandTransform::from_config(&config.transform));
        Self::new(stores, config, transform)
    }

    pub fn location(&self, form: ArtifactForm, id: &ReportId) -> ObjectLocation {
        self.config.location(form, id)
    }

    pub fn public_location(&self, id: &ReportId) -> ObjectLocation {
        self.config.public_location(id)
    }

    pub fn url_format(&self) -> &PublicUrlFormat {
        &self.url_format
    }

    pub async fn publish_trigger(&self, topic: &str, id: &ReportId) -> StoreResult<i64> {
        let payload = TriggerPayload::new(id.clone()).encode();
        self.stores.channel.publish(topic, &payload).await
    }

    /// Publish the trigger for whichever transition starts at the report's
    /// current status. Safe to repeat: handlers short-circuit duplicates.
    pub async fn retrigger(&self, report: &Report) -> PipelineResult<Retrigger> {
        if report.status.is_terminal() {
            return Ok(Retrigger::Terminal(report.status));
        }
        let Some(transition) = self.table.starting_at(report.status) else {
            return Ok(Retrigger::NoStage(report.status));
        };
        self.publish_trigger(&transition.topic, &report.id).await?;
        METRICS.inc_triggers_republished();
        info!(
            report_id = %report.id,
            status = %report.status,
            topic = %transition.topic,
            "Re-published trigger"
        );
        Ok(Retrigger::Published {
            topic: transition.topic.clone(),
            status: report.status,
        })
    }
}
