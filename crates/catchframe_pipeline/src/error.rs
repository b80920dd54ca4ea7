use catchframe_protocol::{ObjectLocation, ProtocolError, ReportId, ReportStatus};
use catchframe_store::StoreError;
use std::time::Duration;
use thiserror::Error;

use crate::fsm::Stage;
use crate::transform::TransformError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying will not help (malformed input, corrupt stored data)
    Permanent,
    /// May succeed on retry (store unavailable, transform timeout)
    Transient,
    /// State that should exist does not (yet); retried on its own budget
    Inconsistency,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Artifact is empty")]
    EmptyArtifact,

    #[error("Artifact exceeds {limit} bytes")]
    ArtifactTooLarge { limit: u64 },

    #[error("Report {0} already exists")]
    DuplicateReport(ReportId),

    #[error("Report {report_id} stored but its trigger was not published: {source}")]
    PublishFailed {
        report_id: ReportId,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Record {0} not found")]
    RecordMissing(ReportId),

    #[error("Artifact {location} for report {report_id} not found")]
    ArtifactMissing {
        report_id: ReportId,
        location: ObjectLocation,
    },

    #[error("{stage} trigger for report {report_id} arrived while it is {status}")]
    NotReady {
        report_id: ReportId,
        stage: Stage,
        status: ReportStatus,
    },

    #[error("Report {report_id} moved to {status} during {stage}")]
    Conflict {
        report_id: ReportId,
        stage: Stage,
        status: ReportStatus,
    },

    #[error("Report {report_id} advanced but the next trigger was not published: {source}")]
    NextPublish {
        report_id: ReportId,
        #[source]
        source: StoreError,
    },

    #[error("{stage} for report {report_id} exceeded its {deadline:?} deadline")]
    Deadline {
        report_id: ReportId,
        stage: Stage,
        deadline: Duration,
    },
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Validation(_)
            | PipelineError::EmptyArtifact
            | PipelineError::ArtifactTooLarge { .. }
            | PipelineError::DuplicateReport(_)
            | PipelineError::Protocol(_) => ErrorClass::Permanent,
            PipelineError::Store(e) if e.is_not_found() => ErrorClass::Inconsistency,
            PipelineError::Store(e) if e.is_transient() => ErrorClass::Transient,
            PipelineError::Store(_) => ErrorClass::Permanent,
            PipelineError::Transform(_) => ErrorClass::Transient,
            PipelineError::RecordMissing(_)
            | PipelineError::ArtifactMissing { .. }
            | PipelineError::NotReady { .. } => ErrorClass::Inconsistency,
            PipelineError::PublishFailed { .. }
            | PipelineError::Conflict { .. }
            | PipelineError::NextPublish { .. }
            | PipelineError::Deadline { .. } => ErrorClass::Transient,
        }
    }

    /// Whether exhausting retries on this error should mark the report
    /// `failed`. An early trigger says nothing about the report itself,
    /// and a committed advance must not be overwritten.
    pub fn marks_failed(&self) -> bool {
        !matches!(
            self,
            PipelineError::NotReady { .. } | PipelineError::NextPublish { .. }
        )
    }
}
