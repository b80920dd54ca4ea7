//! Retry / dead-letter policy for failed deliveries.

use catchframe_store::DeadLetterReason;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ErrorClass;

/// Maximum deliveries of a trigger that keeps failing transiently
pub const MAX_RETRY_COUNT: u32 = 3;

/// Base backoff in seconds for exponential retry (4^attempt)
pub const BACKOFF_BASE_SECS: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Deliveries allowed for transient failures, the first one included
    pub max_attempts: u32,
    /// Deliveries allowed for inconsistencies (missing record or artifact,
    /// early trigger) before the report is surfaced as stuck
    pub inconsistency_attempts: u32,
    pub backoff_base_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_COUNT,
            inconsistency_attempts: 5,
            backoff_base_secs: BACKOFF_BASE_SECS,
            max_backoff_secs: 300,
        }
    }
}

/// What to do with a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    DeadLetter(DeadLetterReason),
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.inconsistency_attempts == 0 {
            return Err("retry.inconsistency_attempts must be at least 1".to_string());
        }
        if self.backoff_base_secs == 0 || self.max_backoff_secs == 0 {
            return Err("retry backoff must be at least 1 second".to_string());
        }
        Ok(())
    }

    /// `min(base^attempt, max)` seconds (4, 16, 64, ... with the defaults).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self
            .backoff_base_secs
            .checked_pow(attempt.max(1))
            .unwrap_or(u64::MAX)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }

    /// `attempt` is the 1-based delivery count of the failed delivery.
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        match class {
            ErrorClass::Permanent => RetryDecision::DeadLetter(DeadLetterReason::PermanentError),
            ErrorClass::Transient if attempt < self.max_attempts => {
                RetryDecision::RetryAfter(self.backoff(attempt))
            }
            ErrorClass::Transient => {
                RetryDecision::DeadLetter(DeadLetterReason::MaxRetriesExceeded)
            }
            ErrorClass::Inconsistency if attempt < self.inconsistency_attempts => {
                RetryDecision::RetryAfter(self.backoff(attempt))
            }
            ErrorClass::Inconsistency => RetryDecision::DeadLetter(DeadLetterReason::Inconsistent),
        }
    }
}
