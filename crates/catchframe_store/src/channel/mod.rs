//! Trigger channel adapter.
//!
//! Delivery is at-least-once: a claimed message stays hidden for its lease
//! and reappears if it is neither acked, nacked nor dead-lettered in time.

mod memory;
mod sqlite;

pub use memory::MemoryTriggerChannel;
pub use sqlite::SqliteTriggerChannel;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::StoreResult;

/// One claimed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: i64,
    pub topic: String,
    pub payload: Vec<u8>,
    /// 1-based count of deliveries of this message, including this one
    pub attempt: u32,
    /// Claim token; settling with a stale receipt fails with `LeaseLost`
    pub receipt: String,
}

/// Why a message left the live queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterReason {
    /// Payload could not be decoded; never retried
    Malformed,
    /// Non-retryable failure
    PermanentError,
    /// Transient failures exhausted their retry budget
    MaxRetriesExceeded,
    /// Missing record/artifact or out-of-order trigger outlived its budget
    Inconsistent,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Malformed => "MALFORMED",
            DeadLetterReason::PermanentError => "PERMANENT_ERROR",
            DeadLetterReason::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            DeadLetterReason::Inconsistent => "INCONSISTENT",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeadLetterReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MALFORMED" => Ok(DeadLetterReason::Malformed),
            "PERMANENT_ERROR" => Ok(DeadLetterReason::PermanentError),
            "MAX_RETRIES_EXCEEDED" => Ok(DeadLetterReason::MaxRetriesExceeded),
            "INCONSISTENT" => Ok(DeadLetterReason::Inconsistent),
            _ => Err(format!("Invalid dead letter reason: '{}'", s)),
        }
    }
}

/// A message held for manual inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub original_message_id: i64,
    pub topic: String,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub error_message: String,
    pub reason: DeadLetterReason,
    pub moved_at: DateTime<Utc>,
}

fn serialize_payload<S: serde::Serializer>(payload: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(payload))
}

#[async_trait]
pub trait TriggerChannel: Send + Sync {
    /// Returns once the message is durably enqueued (the acknowledgment).
    async fn publish(&self, topic: &str, payload: &[u8]) -> StoreResult<i64>;

    /// Claim the oldest visible message on `topic`, hiding it for `lease`.
    async fn receive(&self, topic: &str, lease: Duration) -> StoreResult<Option<Delivery>>;

    /// Settle successfully; the message is gone.
    async fn ack(&self, delivery: &Delivery) -> StoreResult<()>;

    /// Release for redelivery after `retry_after`.
    async fn nack(&self, delivery: &Delivery, retry_after: Duration, error: &str)
        -> StoreResult<()>;

    /// Move to the dead-letter table.
    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        error: &str,
    ) -> StoreResult<()>;

    async fn list_dead_letters(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<DeadLetter>>;

    /// Messages on `topic` not yet settled, visible or leased.
    async fn depth(&self, topic: &str) -> StoreResult<u64>;
}

pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_strings_roundtrip() {
        for reason in [
            DeadLetterReason::Malformed,
            DeadLetterReason::PermanentError,
            DeadLetterReason::MaxRetriesExceeded,
            DeadLetterReason::Inconsistent,
        ] {
            assert_eq!(reason.as_str().parse::<DeadLetterReason>().unwrap(), reason);
        }
        assert!("RETRY".parse::<DeadLetterReason>().is_err());
    }
}
