//! In-memory trigger channel.
//!
//! Visibility runs on `tokio::time::Instant`, so paused-clock tests can
//! expire leases and backoffs with `tokio::time::advance`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{DeadLetter, DeadLetterReason, Delivery, TriggerChannel};
use crate::error::{StoreError, StoreResult};

#[derive(Debug)]
struct Message {
    topic: String,
    payload: Vec<u8>,
    attempts: u32,
    visible_at: Instant,
    receipt: Option<String>,
    last_error: Option<String>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    next_dead_id: i64,
    messages: BTreeMap<i64, Message>,
    dead: Vec<DeadLetter>,
    published: u64,
}

#[derive(Default)]
pub struct MemoryTriggerChannel {
    inner: Mutex<Inner>,
    fail_publishes: AtomicU32,
}

impl MemoryTriggerChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail with `Unavailable`.
    pub fn fail_next_publishes(&self, n: u32) {
        self.fail_publishes.store(n, Ordering::SeqCst);
    }

    /// Publishes accepted since creation, including ones already settled.
    pub fn published_count(&self) -> u64 {
        self.lock().published
    }

    /// Payloads waiting on `topic`, oldest first.
    pub fn pending_payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .messages
            .values()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Last error recorded by a nack for `message_id`.
    pub fn last_error(&self, message_id: i64) -> Option<String> {
        self.lock()
            .messages
            .get(&message_id)
            .and_then(|m| m.last_error.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn leased<'a>(inner: &'a mut Inner, delivery: &Delivery) -> StoreResult<&'a mut Message> {
    inner
        .messages
        .get_mut(&delivery.message_id)
        .filter(|m| m.receipt.as_deref() == Some(delivery.receipt.as_str()))
        .ok_or(StoreError::LeaseLost(delivery.message_id))
}

#[async_trait]
impl TriggerChannel for MemoryTriggerChannel {
    async fn publish(&self, topic: &str, payload: &[u8]) -> StoreResult<i64> {
        if Self::take_fault(&self.fail_publishes) {
            return Err(StoreError::Unavailable(format!(
                "injected publish failure on {}",
                topic
            )));
        }
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.insert(
            id,
            Message {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                attempts: 0,
                visible_at: Instant::now(),
                receipt: None,
                last_error: None,
            },
        );
        inner.published += 1;
        Ok(id)
    }

    async fn receive(&self, topic: &str, lease: Duration) -> StoreResult<Option<Delivery>> {
        let now = Instant::now();
        let mut inner = self.lock();
        let candidate = inner
            .messages
            .iter()
            .filter(|(_, m)| m.topic == topic && m.visible_at <= now)
            .min_by_key(|(id, m)| (m.visible_at, **id))
            .map(|(id, _)| *id);

        let Some(message_id) = candidate else {
            return Ok(None);
        };
        let Some(message) = inner.messages.get_mut(&message_id) else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4().to_string();
        message.attempts = message.attempts.saturating_add(1);
        message.receipt = Some(receipt.clone());
        message.visible_at = now + lease;

        Ok(Some(Delivery {
            message_id,
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            attempt: message.attempts,
            receipt,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> StoreResult<()> {
        let mut inner = self.lock();
        leased(&mut inner, delivery)?;
        inner.messages.remove(&delivery.message_id);
        Ok(())
    }

    async fn nack(
        &self,
        delivery: &Delivery,
        retry_after: Duration,
        error: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let message = leased(&mut inner, delivery)?;
        message.visible_at = Instant::now() + retry_after;
        message.receipt = None;
        message.last_error = Some(error.to_string());
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        error: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        leased(&mut inner, delivery)?;
        let Some(message) = inner.messages.remove(&delivery.message_id) else {
            return Err(StoreError::LeaseLost(delivery.message_id));
        };
        inner.next_dead_id += 1;
        let id = inner.next_dead_id;
        inner.dead.push(DeadLetter {
            id,
            original_message_id: delivery.message_id,
            topic: message.topic,
            payload: message.payload,
            attempts: message.attempts,
            error_message: error.to_string(),
            reason,
            moved_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<DeadLetter>> {
        Ok(self
            .lock()
            .dead
            .iter()
            .filter(|d| topic.map_or(true, |t| d.topic == t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn depth(&self, topic: &str) -> StoreResult<u64> {
        let count = self
            .lock()
            .messages
            .values()
            .filter(|m| m.topic == topic)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn lease_expiry_redelivers() {
        let channel = MemoryTriggerChannel::new();
        channel.publish("t", b"abc").await.unwrap();

        let first = channel.receive("t", LEASE).await.unwrap().unwrap();
        assert!(channel.receive("t", LEASE).await.unwrap().is_none());

        tokio::time::advance(LEASE + Duration::from_millis(1)).await;
        let second = channel.receive("t", LEASE).await.unwrap().unwrap();
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.attempt, 2);

        assert!(matches!(channel.ack(&first).await, Err(StoreError::LeaseLost(_))));
        channel.ack(&second).await.unwrap();
        assert_eq!(channel.depth("t").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nack_backoff_and_dead_letter() {
        let channel = MemoryTriggerChannel::new();
        channel.publish("t", b"abc").await.unwrap();

        let delivery = channel.receive("t", LEASE).await.unwrap().unwrap();
        channel
            .nack(&delivery, Duration::from_secs(4), "boom")
            .await
            .unwrap();
        assert_eq!(channel.last_error(delivery.message_id).as_deref(), Some("boom"));
        assert!(channel.receive("t", LEASE).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(4)).await;
        let delivery = channel.receive("t", LEASE).await.unwrap().unwrap();
        channel
            .dead_letter(&delivery, DeadLetterReason::MaxRetriesExceeded, "boom")
            .await
            .unwrap();

        let dead = channel.list_dead_letters(None, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(channel.depth("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn injected_publish_failure() {
        let channel = MemoryTriggerChannel::new();
        channel.fail_next_publishes(1);
        assert!(channel.publish("t", b"a").await.is_err());
        channel.publish("t", b"a").await.unwrap();
        assert_eq!(channel.published_count(), 1);
        assert_eq!(channel.pending_payloads("t"), vec![b"a".to_vec()]);
    }
}
