//! SQLite record store (`cf_reports`).

use async_trait::async_trait;
use catchframe_protocol::{NewReport, Report, ReportId, ReportStatus, StatusUpdate};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::RecordStore;
use crate::error::{StoreError, StoreResult};
use crate::schema;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    id: String,
    status: String,
    created_at: String,
    updated_at: String,
    description: String,
    diagnostic_log: String,
    metadata_blob: String,
    contact_address: Option<String>,
    public_artifact_location: Option<String>,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    /// Status and timestamps are parsed at the boundary with error propagation.
    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let id = ReportId::parse(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("cf_reports.id: {}", e)))?;
        let status = row
            .status
            .parse::<ReportStatus>()
            .map_err(|e| StoreError::Corrupt(format!("report {}: {}", id, e)))?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| StoreError::Corrupt(format!("report {}: attempts out of range", id)))?;
        Ok(Report {
            status,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            description: row.description,
            diagnostic_log: row.diagnostic_log,
            metadata_blob: row.metadata_blob,
            contact_address: row.contact_address,
            public_artifact_location: row.public_artifact_location,
            attempts,
            last_error: row.last_error,
            id,
        })
    }
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> StoreResult<()> {
        schema::init_report_schema(&self.pool).await
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, report: &NewReport) -> StoreResult<bool> {
        let created = format_timestamp(report.created_at);
        let rows = sqlx::query(
            r#"
            INSERT INTO cf_reports (
                id, status, created_at, updated_at, description,
                diagnostic_log, metadata_blob, contact_address, attempts
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(report.id.as_str())
        .bind(ReportStatus::Pending.as_str())
        .bind(&created)
        .bind(&created)
        .bind(&report.description)
        .bind(&report.diagnostic_log)
        .bind(&report.metadata_blob)
        .bind(report.contact_address.as_deref())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 1 {
            info!(report_id = %report.id, "Created report record");
        }
        Ok(rows == 1)
    }

    async fn get(&self, id: &ReportId) -> StoreResult<Option<Report>> {
        let row: Option<ReportRow> = sqlx::query_as("SELECT * FROM cf_reports WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Report::try_from).transpose()
    }

    async fn advance(
        &self,
        id: &ReportId,
        expected: ReportStatus,
        update: &StatusUpdate,
    ) -> StoreResult<bool> {
        let now = format_timestamp(Utc::now());
        let clear_error = update.status == ReportStatus::Completed;
        let rows = sqlx::query(
            r#"
            UPDATE cf_reports
            SET status = ?,
                updated_at = ?,
                public_artifact_location = COALESCE(?, public_artifact_location),
                last_error = CASE WHEN ? THEN NULL ELSE COALESCE(?, last_error) END
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(&now)
        .bind(update.public_artifact_location.as_deref())
        .bind(clear_error)
        .bind(update.last_error.as_deref())
        .bind(id.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!(
            report_id = %id,
            from = %expected,
            to = %update.status,
            applied = rows == 1,
            "Conditional status update"
        );
        Ok(rows == 1)
    }

    async fn record_failure(
        &self,
        id: &ReportId,
        expected: ReportStatus,
        error: &str,
    ) -> StoreResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE cf_reports
            SET attempts = attempts + 1,
                last_error = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(error)
        .bind(id.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn list_stalled(
        &self,
        statuses: &[ReportStatus],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Report>> {
        if statuses.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM cf_reports WHERE status IN ({}) AND updated_at < ? \
             ORDER BY updated_at ASC, id ASC LIMIT ?",
            placeholders
        );
        let mut query = sqlx::query_as::<_, ReportRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = query
            .bind(format_timestamp(updated_before))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Report::try_from).collect()
    }
}

/// Fixed-width UTC so timestamps compare correctly as text.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Invalid timestamp '{}': {}", raw, e)))
}
