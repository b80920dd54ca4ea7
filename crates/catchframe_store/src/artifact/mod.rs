//! Artifact store adapter.

mod filesystem;
mod memory;

pub use filesystem::FilesystemArtifactStore;
pub use memory::MemoryArtifactStore;

use async_trait::async_trait;
use catchframe_protocol::{ObjectLocation, Visibility};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{StoreError, StoreResult};

/// Streamed object contents.
pub type ArtifactReader = Box<dyn AsyncRead + Send + Unpin>;

/// Key-addressed blob store.
///
/// Writes are all-or-nothing: a reader never observes a partially written
/// object, and a failed `put` leaves no object behind.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stream `reader` into `location`, replacing any existing object.
    /// Returns the number of bytes written.
    async fn put(
        &self,
        location: &ObjectLocation,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64>;

    /// Open an object for streamed reading. `NotFound` when absent.
    async fn open(&self, location: &ObjectLocation) -> StoreResult<ArtifactReader>;

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool>;

    /// Server-side copy. The destination starts out private.
    async fn copy(&self, src: &ObjectLocation, dst: &ObjectLocation) -> StoreResult<()>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, location: &ObjectLocation) -> StoreResult<bool>;

    async fn set_visibility(
        &self,
        location: &ObjectLocation,
        visibility: Visibility,
    ) -> StoreResult<()>;

    async fn visibility(&self, location: &ObjectLocation) -> StoreResult<Visibility>;
}

/// Read a whole object into memory.
pub async fn read_to_vec(
    store: &dyn ArtifactStore,
    location: &ObjectLocation,
) -> StoreResult<Vec<u8>> {
    let mut reader = store.open(location).await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Stream an object into a local file.
pub async fn download_to_file(
    store: &dyn ArtifactStore,
    location: &ObjectLocation,
    path: &Path,
) -> StoreResult<u64> {
    let mut reader = store.open(location).await?;
    let mut file = tokio::fs::File::create(path).await?;
    let bytes = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(bytes)
}

/// Stream a local file into the store.
pub async fn upload_file(
    store: &dyn ArtifactStore,
    location: &ObjectLocation,
    path: &Path,
) -> StoreResult<u64> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(path.display().to_string())
        } else {
            StoreError::Io(e)
        }
    })?;
    store.put(location, &mut file).await
}

/// Reject bucket or key segments that could escape a directory layout.
pub(crate) fn validate_segment(segment: &str) -> StoreResult<()> {
    let bad = segment.is_empty()
        || segment.starts_with('.')
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0');
    if bad {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_must_stay_inside_bucket() {
        assert!(validate_segment("abc.webm").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("..").is_err());
        assert!(validate_segment(".acl").is_err());
        assert!(validate_segment("a/b").is_err());
    }
}
