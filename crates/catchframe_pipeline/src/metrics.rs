//! Pipeline counters.
//!
//! Lock-free atomics in a process-wide static; read with [`Metrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub reports_submitted: AtomicU64,
    pub stages_advanced: AtomicU64,
    pub idempotent_skips: AtomicU64,
    pub stage_failures: AtomicU64,
    pub retries_scheduled: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub cleanup_failures: AtomicU64,
    pub triggers_republished: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            reports_submitted: AtomicU64::new(0),
            stages_advanced: AtomicU64::new(0),
            idempotent_skips: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
            triggers_republished: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_reports_submitted(&self) {
        self.reports_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_stages_advanced(&self) {
        self.stages_advanced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_idempotent_skips(&self) {
        self.idempotent_skips.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_stage_failures(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_retries_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_cleanup_failures(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_triggers_republished(&self) {
        self.triggers_republished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reports_submitted: self.reports_submitted.load(Ordering::Relaxed),
            stages_advanced: self.stages_advanced.load(Ordering::Relaxed),
            idempotent_skips: self.idempotent_skips.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
            triggers_republished: self.triggers_republished.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of metrics for reading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reports_submitted: u64,
    pub stages_advanced: u64,
    pub idempotent_skips: u64,
    pub stage_failures: u64,
    pub retries_scheduled: u64,
    pub dead_lettered: u64,
    pub cleanup_failures: u64,
    pub triggers_republished: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let metrics = Metrics::new();
        metrics.inc_stages_advanced();
        metrics.inc_stages_advanced();
        metrics.inc_dead_lettered();

        let s = metrics.snapshot();
        assert_eq!(s.stages_advanced, 2);
        assert_eq!(s.dead_lettered, 1);
        assert_eq!(s.reports_submitted, 0);
    }
}
