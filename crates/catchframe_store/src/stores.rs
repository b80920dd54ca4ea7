//! Store URL parsing and the adapter bundle handed to every stage.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::artifact::{ArtifactStore, FilesystemArtifactStore, MemoryArtifactStore};
use crate::channel::{MemoryTriggerChannel, SqliteTriggerChannel, TriggerChannel};
use crate::error::{StoreError, StoreResult};
use crate::record::{MemoryRecordStore, RecordStore, SqliteRecordStore};

const SQLITE_MAX_CONNECTIONS: u32 = 8;
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed state store URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    Sqlite(PathBuf),
    Memory,
}

impl StoreUrl {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let raw = raw.trim();
        if raw == "memory:" {
            return Ok(Self::Memory);
        }
        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let path = rest.trim_start_matches("//").trim();
            if path.is_empty() {
                return Err(StoreError::InvalidUrl(format!("sqlite URL missing path: {raw}")));
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        Err(StoreError::InvalidUrl(raw.to_string()))
    }
}

/// Record store, trigger channel and artifact store, shared by reference.
#[derive(Clone)]
pub struct Stores {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub records: Arc<dyn RecordStore>,
    pub channel: Arc<dyn TriggerChannel>,
}

impl Stores {
    /// Open durable backends. `memory:` still places artifacts under
    /// `artifact_root`; use [`Stores::in_memory`] for a fully volatile set.
    pub async fn open(url: &StoreUrl, artifact_root: &Path) -> StoreResult<Self> {
        match url {
            StoreUrl::Memory => Ok(Self {
                artifacts: Arc::new(FilesystemArtifactStore::new(artifact_root)),
                records: Arc::new(MemoryRecordStore::new()),
                channel: Arc::new(MemoryTriggerChannel::new()),
            }),
            StoreUrl::Sqlite(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .busy_timeout(SQLITE_BUSY_TIMEOUT);
                let pool = SqlitePoolOptions::new()
                    .max_connections(SQLITE_MAX_CONNECTIONS)
                    .connect_with(options)
                    .await?;

                let records = SqliteRecordStore::new(pool.clone());
                records.init_schema().await?;
                let channel = SqliteTriggerChannel::new(pool);
                channel.init_schema().await?;

                info!(
                    state_store = %path.display(),
                    artifact_root = %artifact_root.display(),
                    "Opened stores"
                );
                Ok(Self {
                    artifacts: Arc::new(FilesystemArtifactStore::new(artifact_root)),
                    records: Arc::new(records),
                    channel: Arc::new(channel),
                })
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            artifacts: Arc::new(MemoryArtifactStore::new()),
            records: Arc::new(MemoryRecordStore::new()),
            channel: Arc::new(MemoryTriggerChannel::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catchframe_protocol::{NewReport, ObjectLocation, ReportId};
    use tempfile::TempDir;

    #[test]
    fn parse_store_urls() {
        assert_eq!(
            StoreUrl::parse("sqlite:catchframe.sqlite").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("catchframe.sqlite"))
        );
        assert_eq!(
            StoreUrl::parse("sqlite:///tmp/cf.db").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("/tmp/cf.db"))
        );
        assert_eq!(StoreUrl::parse("memory:").unwrap(), StoreUrl::Memory);
        assert!(StoreUrl::parse("sqlite:").is_err());
        assert!(StoreUrl::parse("postgres://localhost/db").is_err());
    }

    #[tokio::test]
    async fn open_sqlite_shares_one_database() {
        let dir = TempDir::new().unwrap();
        let url = StoreUrl::Sqlite(dir.path().join("state").join("cf.sqlite"));
        let stores = Stores::open(&url, &dir.path().join("artifacts")).await.unwrap();

        let report = NewReport {
            id: ReportId::new(),
            created_at: chrono::Utc::now(),
            description: String::new(),
            diagnostic_log: "[]".to_string(),
            metadata_blob: "{}".to_string(),
            contact_address: None,
        };
        assert!(stores.records.create(&report).await.unwrap());
        stores.channel.publish("t", report.id.as_bytes()).await.unwrap();
        assert_eq!(stores.channel.depth("t").await.unwrap(), 1);

        let loc = ObjectLocation::new("raw", "a.webm");
        stores.artifacts.put(&loc, &mut &b"abc"[..]).await.unwrap();
        assert!(dir.path().join("artifacts").join("raw").join("a.webm").exists());

        // Reopening sees the same rows
        let reopened = Stores::open(&url, &dir.path().join("artifacts")).await.unwrap();
        assert!(reopened.records.get(&report.id).await.unwrap().is_some());
    }
}
