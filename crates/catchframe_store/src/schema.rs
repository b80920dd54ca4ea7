//! SQLite schema for the record store and the trigger channel.
//!
//! All statements are idempotent so every process may run them at startup.

use sqlx::SqlitePool;

use crate::error::StoreResult;

const REPORT_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cf_reports (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        description TEXT NOT NULL,
        diagnostic_log TEXT NOT NULL,
        metadata_blob TEXT NOT NULL,
        contact_address TEXT,
        public_artifact_location TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_cf_reports_status_updated ON cf_reports (status, updated_at)",
];

const CHANNEL_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cf_trigger_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        topic TEXT NOT NULL,
        payload BLOB NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        visible_at INTEGER NOT NULL,
        receipt TEXT,
        last_error TEXT,
        published_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_cf_trigger_messages_topic_visible ON cf_trigger_messages (topic, visible_at)",
    r#"
    CREATE TABLE IF NOT EXISTS cf_dead_letters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        original_message_id INTEGER NOT NULL,
        topic TEXT NOT NULL,
        payload BLOB NOT NULL,
        attempts INTEGER NOT NULL,
        error_message TEXT NOT NULL,
        reason TEXT NOT NULL,
        moved_at INTEGER NOT NULL
    )
    "#,
];

pub async fn init_report_schema(pool: &SqlitePool) -> StoreResult<()> {
    run_all(pool, REPORT_SCHEMA).await
}

pub async fn init_channel_schema(pool: &SqlitePool) -> StoreResult<()> {
    run_all(pool, CHANNEL_SCHEMA).await
}

async fn run_all(pool: &SqlitePool, statements: &[&str]) -> StoreResult<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
