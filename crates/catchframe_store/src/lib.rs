//! Adapters over the three external resources a report touches.
//!
//! - [`ArtifactStore`]: key-addressed blobs (raw and processed video)
//! - [`RecordStore`]: one document per report, conditional status updates
//! - [`TriggerChannel`]: at-least-once topic delivery with redelivery
//!
//! Each trait has a durable backend (filesystem / SQLite) and an in-memory
//! backend with fault-injection knobs for tests.

pub mod artifact;
pub mod channel;
pub mod error;
pub mod record;
pub mod schema;
pub mod stores;

pub use artifact::{
    download_to_file, read_to_vec, upload_file, ArtifactReader, ArtifactStore,
    FilesystemArtifactStore, MemoryArtifactStore,
};
pub use channel::{
    DeadLetter, DeadLetterReason, Delivery, MemoryTriggerChannel, SqliteTriggerChannel,
    TriggerChannel,
};
pub use error::{StoreError, StoreResult};
pub use record::{MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use stores::{StoreUrl, Stores};
