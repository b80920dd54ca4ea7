//! In-memory artifact store with fault injection for tests.

use async_trait::async_trait;
use bytes::Bytes;
use catchframe_protocol::{ObjectLocation, Visibility};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{validate_segment, ArtifactReader, ArtifactStore};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    visibility: Visibility,
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<ObjectLocation, MemoryObject>>,
    fail_puts: AtomicU32,
    fail_deletes: AtomicU32,
    puts: AtomicU64,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts fail with `Unavailable` before writing.
    pub fn fail_next_puts(&self, n: u32) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` deletes fail with `Unavailable`.
    pub fn fail_next_deletes(&self, n: u32) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    /// Successful puts and copies so far.
    pub fn write_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Keys currently stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let objects = self.lock();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|loc| loc.bucket == bucket)
            .map(|loc| loc.key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectLocation, MemoryObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn validate(location: &ObjectLocation) -> StoreResult<()> {
        validate_segment(&location.bucket)?;
        validate_segment(&location.key)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        location: &ObjectLocation,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64> {
        Self::validate(location)?;
        if Self::take_fault(&self.fail_puts) {
            return Err(StoreError::Unavailable(format!("injected put failure for {}", location)));
        }
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        let len = buf.len() as u64;
        self.lock().insert(
            location.clone(),
            MemoryObject {
                data: Bytes::from(buf),
                visibility: Visibility::Private,
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(len)
    }

    async fn open(&self, location: &ObjectLocation) -> StoreResult<ArtifactReader> {
        Self::validate(location)?;
        let objects = self.lock();
        let object = objects
            .get(location)
            .ok_or_else(|| StoreError::NotFound(location.to_string()))?;
        Ok(Box::new(Cursor::new(object.data.clone())))
    }

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool> {
        Self::validate(location)?;
        Ok(self.lock().contains_key(location))
    }

    async fn copy(&self, src: &ObjectLocation, dst: &ObjectLocation) -> StoreResult<()> {
        Self::validate(src)?;
        Self::validate(dst)?;
        let mut objects = self.lock();
        let data = objects
            .get(src)
            .map(|object| object.data.clone())
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;
        objects.insert(
            dst.clone(),
            MemoryObject {
                data,
                visibility: Visibility::Private,
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<bool> {
        Self::validate(location)?;
        if Self::take_fault(&self.fail_deletes) {
            return Err(StoreError::Unavailable(format!(
                "injected delete failure for {}",
                location
            )));
        }
        Ok(self.lock().remove(location).is_some())
    }

    async fn set_visibility(
        &self,
        location: &ObjectLocation,
        visibility: Visibility,
    ) -> StoreResult<()> {
        Self::validate(location)?;
        let mut objects = self.lock();
        let object = objects
            .get_mut(location)
            .ok_or_else(|| StoreError::NotFound(location.to_string()))?;
        object.visibility = visibility;
        Ok(())
    }

    async fn visibility(&self, location: &ObjectLocation) -> StoreResult<Visibility> {
        Self::validate(location)?;
        self.lock()
            .get(location)
            .map(|object| object.visibility)
            .ok_or_else(|| StoreError::NotFound(location.to_string()))
    }
}
