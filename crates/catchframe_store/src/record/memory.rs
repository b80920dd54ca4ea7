//! In-memory record store with fault injection for tests.

use async_trait::async_trait;
use catchframe_protocol::{NewReport, Report, ReportId, ReportStatus, StatusUpdate};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{apply_update, RecordStore};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryRecordStore {
    reports: Mutex<HashMap<ReportId, Report>>,
    fail_creates: AtomicU32,
    fail_advances: AtomicU32,
    advances: AtomicU32,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` creates fail with `Unavailable`.
    pub fn fail_next_creates(&self, n: u32) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` conditional updates fail with `Unavailable`
    /// before anything is written (a crash between work and commit).
    pub fn fail_next_advances(&self, n: u32) {
        self.fail_advances.store(n, Ordering::SeqCst);
    }

    /// Conditional updates that were applied.
    pub fn applied_advances(&self) -> u32 {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Overwrite `updated_at`, for stall-window tests.
    pub fn backdate(&self, id: &ReportId, updated_at: DateTime<Utc>) {
        if let Some(report) = self.lock().get_mut(id) {
            report.updated_at = updated_at;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ReportId, Report>> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, report: &NewReport) -> StoreResult<bool> {
        if Self::take_fault(&self.fail_creates) {
            return Err(StoreError::Unavailable("injected create failure".to_string()));
        }
        let mut reports = self.lock();
        if reports.contains_key(&report.id) {
            return Ok(false);
        }
        reports.insert(report.id.clone(), report.clone().into_report());
        Ok(true)
    }

    async fn get(&self, id: &ReportId) -> StoreResult<Option<Report>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn advance(
        &self,
        id: &ReportId,
        expected: ReportStatus,
        update: &StatusUpdate,
    ) -> StoreResult<bool> {
        if Self::take_fault(&self.fail_advances) {
            return Err(StoreError::Unavailable(format!(
                "injected update failure for {}",
                id
            )));
        }
        let mut reports = self.lock();
        match reports.get_mut(id) {
            Some(report) if report.status == expected => {
                apply_update(report, update, Utc::now());
                self.advances.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failure(
        &self,
        id: &ReportId,
        expected: ReportStatus,
        error: &str,
    ) -> StoreResult<bool> {
        let mut reports = self.lock();
        match reports.get_mut(id) {
            Some(report) if report.status == expected => {
                report.attempts = report.attempts.saturating_add(1);
                report.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stalled(
        &self,
        statuses: &[ReportStatus],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Report>> {
        let reports = self.lock();
        let mut stalled: Vec<Report> = reports
            .values()
            .filter(|r| statuses.contains(&r.status) && r.updated_at < updated_before)
            .cloned()
            .collect();
        stalled.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        stalled.truncate(limit);
        Ok(stalled)
    }
}
