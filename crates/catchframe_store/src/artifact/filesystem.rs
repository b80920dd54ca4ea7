//! Filesystem artifact store.
//!
//! Layout under `root`:
//! ```text
//! <bucket>/<key>            object bytes
//! <bucket>/.<key>.<n>.part  in-flight write (renamed into place on success)
//! .acl/<bucket>/<key>       present when the object is public
//! ```

use async_trait::async_trait;
use catchframe_protocol::{ObjectLocation, Visibility};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{validate_segment, ArtifactReader, ArtifactStore};
use crate::error::{StoreError, StoreResult};

const ACL_DIR: &str = ".acl";

pub struct FilesystemArtifactStore {
    root: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        validate_segment(&location.bucket)?;
        validate_segment(&location.key)?;
        Ok(self.root.join(&location.bucket).join(&location.key))
    }

    fn acl_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        validate_segment(&location.bucket)?;
        validate_segment(&location.key)?;
        Ok(self
            .root
            .join(ACL_DIR)
            .join(&location.bucket)
            .join(&location.key))
    }

    fn part_path(&self, location: &ObjectLocation) -> PathBuf {
        self.root
            .join(&location.bucket)
            .join(format!(".{}.{}.part", location.key, Uuid::new_v4().simple()))
    }

    async fn ensure_bucket(&self, bucket: &str) -> StoreResult<()> {
        fs::create_dir_all(self.root.join(bucket)).await?;
        Ok(())
    }

    /// Move a finished part file into place, clearing any stale ACL marker
    /// so replaced objects start private.
    async fn commit_part(&self, part: &Path, location: &ObjectLocation) -> StoreResult<()> {
        let target = self.object_path(location)?;
        fs::rename(part, &target).await?;
        remove_if_exists(&self.acl_path(location)?).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn put(
        &self,
        location: &ObjectLocation,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StoreResult<u64> {
        self.object_path(location)?;
        self.ensure_bucket(&location.bucket).await?;

        let part = self.part_path(location);
        let written = async {
            let mut file = fs::File::create(&part).await?;
            let bytes = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, StoreError>(bytes)
        }
        .await;

        match written {
            Ok(bytes) => {
                if let Err(e) = self.commit_part(&part, location).await {
                    let _ = remove_if_exists(&part).await;
                    return Err(e);
                }
                debug!(object = %location, bytes, "Stored object");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = remove_if_exists(&part).await {
                    warn!(object = %location, "Failed to remove partial upload: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn open(&self, location: &ObjectLocation) -> StoreResult<ArtifactReader> {
        let path = self.object_path(location)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(location.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool> {
        let path = self.object_path(location)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn copy(&self, src: &ObjectLocation, dst: &ObjectLocation) -> StoreResult<()> {
        let from = self.object_path(src)?;
        self.object_path(dst)?;
        self.ensure_bucket(&dst.bucket).await?;

        let part = self.part_path(dst);
        match fs::copy(&from, &part).await {
            Ok(_) => {}
            Err(e) => {
                let _ = remove_if_exists(&part).await;
                if e.kind() == ErrorKind::NotFound {
                    return Err(StoreError::NotFound(src.to_string()));
                }
                return Err(e.into());
            }
        }
        if let Err(e) = self.commit_part(&part, dst).await {
            let _ = remove_if_exists(&part).await;
            return Err(e);
        }
        debug!(from = %src, to = %dst, "Copied object");
        Ok(())
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<bool> {
        let path = self.object_path(location)?;
        let removed = remove_if_exists(&path).await?;
        remove_if_exists(&self.acl_path(location)?).await?;
        Ok(removed)
    }

    async fn set_visibility(
        &self,
        location: &ObjectLocation,
        visibility: Visibility,
    ) -> StoreResult<()> {
        if !self.exists(location).await? {
            return Err(StoreError::NotFound(location.to_string()));
        }
        let acl = self.acl_path(location)?;
        match visibility {
            Visibility::Public => {
                if let Some(parent) = acl.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&acl, b"public").await?;
            }
            Visibility::Private => {
                remove_if_exists(&acl).await?;
            }
        }
        Ok(())
    }

    async fn visibility(&self, location: &ObjectLocation) -> StoreResult<Visibility> {
        if !self.exists(location).await? {
            return Err(StoreError::NotFound(location.to_string()));
        }
        if fs::try_exists(self.acl_path(location)?).await? {
            Ok(Visibility::Public)
        } else {
            Ok(Visibility::Private)
        }
    }
}

async fn remove_if_exists(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::read_to_vec;
    use tempfile::TempDir;

    fn loc(bucket: &str, key: &str) -> ObjectLocation {
        ObjectLocation::new(bucket, key)
    }

    #[tokio::test]
    async fn put_then_read_back() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let raw = loc("raw", "a.webm");

        let written = store.put(&raw, &mut &b"video-bytes"[..]).await.unwrap();
        assert_eq!(written, 11);
        assert!(store.exists(&raw).await.unwrap());
        assert_eq!(read_to_vec(&store, &raw).await.unwrap(), b"video-bytes");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("raw"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let err = store.open(&loc("raw", "nope.webm")).await.err().unwrap();
        assert!(err.is_not_found());
        assert!(!store.delete(&loc("raw", "nope.webm")).await.unwrap());
        assert!(store
            .copy(&loc("raw", "nope.webm"), &loc("public", "nope.webm"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn copy_starts_private_and_visibility_toggles() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let src = loc("raw", "b.webm");
        let dst = loc("public", "b.webm");
        store.put(&src, &mut &b"abc"[..]).await.unwrap();

        store.copy(&src, &dst).await.unwrap();
        assert_eq!(store.visibility(&dst).await.unwrap(), Visibility::Private);

        store.set_visibility(&dst, Visibility::Public).await.unwrap();
        assert_eq!(store.visibility(&dst).await.unwrap(), Visibility::Public);
        assert_eq!(read_to_vec(&store, &dst).await.unwrap(), b"abc");

        store.set_visibility(&dst, Visibility::Private).await.unwrap();
        assert_eq!(store.visibility(&dst).await.unwrap(), Visibility::Private);
    }

    #[tokio::test]
    async fn delete_clears_acl_marker() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let obj = loc("public", "c.mp4");
        store.put(&obj, &mut &b"x"[..]).await.unwrap();
        store.set_visibility(&obj, Visibility::Public).await.unwrap();

        assert!(store.delete(&obj).await.unwrap());
        assert!(!store.exists(&obj).await.unwrap());
        assert!(!dir.path().join(".acl/public/c.mp4").exists());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let err = store
            .put(&loc("raw", "../escape"), &mut &b"x"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
