//! Record store adapter.

mod memory;
mod sqlite;

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;
use catchframe_protocol::{NewReport, Report, ReportId, ReportStatus, StatusUpdate};
use chrono::{DateTime, Utc};

use crate::error::StoreResult;

/// Per-report document store with conditional status updates.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create-if-absent. Returns false when a record with this id exists.
    async fn create(&self, report: &NewReport) -> StoreResult<bool>;

    async fn get(&self, id: &ReportId) -> StoreResult<Option<Report>>;

    /// Compare-and-set: apply `update` only while the record is at
    /// `expected`. Returns false when the record moved on (or is missing).
    ///
    /// `publicArtifactLocation` is written in the same update as the status,
    /// and a transition to `completed` clears `lastError`.
    async fn advance(
        &self,
        id: &ReportId,
        expected: ReportStatus,
        update: &StatusUpdate,
    ) -> StoreResult<bool>;

    /// Bump the attempt counter and record the error, only while the record
    /// is still at `expected`. Status is untouched. Returns false when the
    /// record does not exist or has moved on.
    async fn record_failure(
        &self,
        id: &ReportId,
        expected: ReportStatus,
        error: &str,
    ) -> StoreResult<bool>;

    /// Records in one of `statuses` whose status last changed before
    /// `updated_before`, oldest first.
    async fn list_stalled(
        &self,
        statuses: &[ReportStatus],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Report>>;
}

/// Shared field logic so both backends apply updates identically.
pub(crate) fn apply_update(report: &mut Report, update: &StatusUpdate, now: DateTime<Utc>) {
    report.status = update.status;
    report.updated_at = now;
    if let Some(location) = &update.public_artifact_location {
        report.public_artifact_location = Some(location.clone());
    }
    if update.status == ReportStatus::Completed {
        report.last_error = None;
    } else if let Some(error) = &update.last_error {
        report.last_error = Some(error.clone());
    }
}
