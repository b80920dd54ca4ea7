//! SQLite trigger channel.
//!
//! Claims use UPDATE ... WHERE visible_at <= now inside a transaction, so two
//! consumers racing for the same row cannot both win it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{duration_millis, DeadLetter, DeadLetterReason, Delivery, TriggerChannel};
use crate::error::{StoreError, StoreResult};
use crate::schema;

pub struct SqliteTriggerChannel {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    topic: String,
    payload: Vec<u8>,
    attempts: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    id: i64,
    original_message_id: i64,
    topic: String,
    payload: Vec<u8>,
    attempts: i64,
    error_message: String,
    reason: String,
    moved_at: i64,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = StoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let reason = row
            .reason
            .parse::<DeadLetterReason>()
            .map_err(StoreError::Corrupt)?;
        let moved_at = DateTime::<Utc>::from_timestamp_millis(row.moved_at)
            .ok_or_else(|| StoreError::Corrupt(format!("dead letter {}: bad moved_at", row.id)))?;
        Ok(DeadLetter {
            id: row.id,
            original_message_id: row.original_message_id,
            topic: row.topic,
            payload: row.payload,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            error_message: row.error_message,
            reason,
            moved_at,
        })
    }
}

impl SqliteTriggerChannel {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> StoreResult<()> {
        schema::init_channel_schema(&self.pool).await
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl TriggerChannel for SqliteTriggerChannel {
    async fn publish(&self, topic: &str, payload: &[u8]) -> StoreResult<i64> {
        let now = now_millis();
        let id = sqlx::query(
            r#"
            INSERT INTO cf_trigger_messages (topic, payload, attempts, visible_at, published_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(topic)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        debug!(topic, message_id = id, "Published trigger");
        Ok(id)
    }

    async fn receive(&self, topic: &str, lease: Duration) -> StoreResult<Option<Delivery>> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();

        let message_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM cf_trigger_messages
            WHERE topic = ? AND visible_at <= ?
            ORDER BY visible_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(topic)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(message_id) = message_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let receipt = Uuid::new_v4().to_string();
        let rows_affected = sqlx::query(
            r#"
            UPDATE cf_trigger_messages
            SET attempts = attempts + 1,
                receipt = ?,
                visible_at = ?
            WHERE id = ? AND visible_at <= ?
            "#,
        )
        .bind(&receipt)
        .bind(now.saturating_add(duration_millis(lease)))
        .bind(message_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Claimed by another consumer between SELECT and UPDATE
            tx.commit().await?;
            return Ok(None);
        }

        let row: MessageRow = sqlx::query_as(
            "SELECT id, topic, payload, attempts FROM cf_trigger_messages WHERE id = ?",
        )
        .bind(message_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(Delivery {
            message_id: row.id,
            topic: row.topic,
            payload: row.payload,
            attempt: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            receipt,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> StoreResult<()> {
        let rows = sqlx::query("DELETE FROM cf_trigger_messages WHERE id = ? AND receipt = ?")
            .bind(delivery.message_id)
            .bind(&delivery.receipt)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(StoreError::LeaseLost(delivery.message_id));
        }
        Ok(())
    }

    async fn nack(
        &self,
        delivery: &Delivery,
        retry_after: Duration,
        error: &str,
    ) -> StoreResult<()> {
        let visible_at = now_millis().saturating_add(duration_millis(retry_after));
        let rows = sqlx::query(
            r#"
            UPDATE cf_trigger_messages
            SET visible_at = ?,
                receipt = NULL,
                last_error = ?
            WHERE id = ? AND receipt = ?
            "#,
        )
        .bind(visible_at)
        .bind(error)
        .bind(delivery.message_id)
        .bind(&delivery.receipt)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows == 0 {
            return Err(StoreError::LeaseLost(delivery.message_id));
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: DeadLetterReason,
        error: &str,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let moved = sqlx::query(
            r#"
            INSERT INTO cf_dead_letters (
                original_message_id, topic, payload, attempts, error_message, reason, moved_at
            )
            SELECT id, topic, payload, attempts, ?, ?, ?
            FROM cf_trigger_messages
            WHERE id = ? AND receipt = ?
            "#,
        )
        .bind(error)
        .bind(reason.as_str())
        .bind(now_millis())
        .bind(delivery.message_id)
        .bind(&delivery.receipt)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if moved == 0 {
            tx.rollback().await?;
            warn!(
                message_id = delivery.message_id,
                "Dead-letter skipped: lease no longer held"
            );
            return Err(StoreError::LeaseLost(delivery.message_id));
        }

        sqlx::query("DELETE FROM cf_trigger_messages WHERE id = ?")
            .bind(delivery.message_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            message_id = delivery.message_id,
            topic = %delivery.topic,
            reason = reason.as_str(),
            "Moved trigger to dead letter table"
        );
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<DeadLetter>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            r#"
            SELECT * FROM cf_dead_letters
            WHERE (? IS NULL OR topic = ?)
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(topic)
        .bind(topic)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    async fn depth(&self, topic: &str) -> StoreResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cf_trigger_messages WHERE topic = ?")
                .bind(topic)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
