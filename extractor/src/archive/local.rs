use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use error_stack::{Result, ResultExt};

use super::{ArchiveStore, ObjectStoreError};

/// Archive in a local directory. Keys map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalArchiveStore {
    root: PathBuf,
}

impl LocalArchiveStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ArchiveStore for LocalArchiveStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        let path = self.path(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .change_context(ObjectStoreError::Request)
                .attach_printable("failed to create archive directory")
                .attach_printable_lazy(|| format!("path: {}", parent.display()))?;
        }

        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .change_context(ObjectStoreError::Request)
            .attach_printable("failed to write archive file")
            .attach_printable_lazy(|| format!("path: {}", tmp.display()))?;

        tokio::fs::rename(&tmp, &path)
            .await
            .change_context(ObjectStoreError::Request)
            .attach_printable("failed to move archive file into place")
            .attach_printable_lazy(|| format!("path: {}", path.display()))?;

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.path(key);
        tokio::fs::try_exists(&path)
            .await
            .change_context(ObjectStoreError::Request)
            .attach_printable_lazy(|| format!("path: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::LocalArchiveStore;
    use crate::archive::ArchiveStore;

    #[tokio::test]
    async fn test_put_overwrites_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let key = "linea/linea_tx_0_9.parquet";

        assert!(!store.exists(key).await.unwrap());

        store.put(key, Bytes::from_static(b"first")).await.unwrap();
        store.put(key, Bytes::from_static(b"second")).await.unwrap();

        assert!(store.exists(key).await.unwrap());
        let content = std::fs::read(dir.path().join(key)).unwrap();
        assert_eq!(content, b"second");
    }
}
