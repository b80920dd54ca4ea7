//! Report document types.
//!
//! Field names on the wire follow the document layout the web console reads
//! (`timestamp`, `consoleLogs`, `email`, `processedVideoUrl`), so a record can
//! be exported verbatim.

use std::fmt;
use std::str::FromStr;

use catchframe_ids::ReportId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Lifecycle state of a report.
///
/// `Pending -> Downloaded -> Completed` in a transcode pipeline,
/// `Pending -> Completed` in a direct one. `Failed` is terminal and only
/// reached once the retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Raw artifact stored, record created, trigger enqueued
    #[default]
    Pending,
    /// Transformed artifact staged in the processed bucket
    Downloaded,
    /// Finished artifact is public and its location recorded
    Completed,
    /// Retries exhausted; see `last_error`
    Failed,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 4] = [
        ReportStatus::Pending,
        ReportStatus::Downloaded,
        ReportStatus::Completed,
        ReportStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Downloaded => "downloaded",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
        }
    }

    /// Position along the success path. `Failed` sorts after everything so
    /// no status comparison ever treats it as "not yet reached".
    pub fn rank(&self) -> u8 {
        match self {
            ReportStatus::Pending => 0,
            ReportStatus::Downloaded => 1,
            ReportStatus::Completed => 2,
            ReportStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Failed)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "downloaded" => Ok(ReportStatus::Downloaded),
            "completed" | "complete" => Ok(ReportStatus::Completed),
            "failed" => Ok(ReportStatus::Failed),
            _ => Err(ProtocolError::InvalidStatus(s.to_string())),
        }
    }
}

/// The record store document for one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    pub status: ReportStatus,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub description: String,
    #[serde(rename = "consoleLogs")]
    pub diagnostic_log: String,
    #[serde(rename = "metadata")]
    pub metadata_blob: String,
    /// Absent when the submitter gave none. Never stored as "".
    #[serde(rename = "email", default, skip_serializing_if = "Option::is_none")]
    pub contact_address: Option<String>,
    #[serde(
        rename = "processedVideoUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_artifact_location: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Fields supplied at intake. Status is always `Pending` on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub id: ReportId,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub diagnostic_log: String,
    pub metadata_blob: String,
    pub contact_address: Option<String>,
}

impl NewReport {
    /// Materialise the document a freshly created record holds.
    pub fn into_report(self) -> Report {
        Report {
            id: self.id,
            status: ReportStatus::Pending,
            created_at: self.created_at,
            updated_at: self.created_at,
            description: self.description,
            diagnostic_log: self.diagnostic_log,
            metadata_blob: self.metadata_blob,
            contact_address: self.contact_address,
            public_artifact_location: None,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Partial update applied together with a conditional status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ReportStatus,
    pub public_artifact_location: Option<String>,
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: ReportStatus) -> Self {
        Self {
            status,
            public_artifact_location: None,
            last_error: None,
        }
    }

    pub fn completed(location: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Completed,
            public_artifact_location: Some(location.into()),
            last_error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            public_artifact_location: None,
            last_error: Some(error.into()),
        }
    }
}
