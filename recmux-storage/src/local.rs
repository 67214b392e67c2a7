//! Directory-backed storage

use crate::{Result, StorageClient, StorageError, StorageSettings};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Storage client that stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    settings: StorageSettings,
    delete_local: bool,
}

impl LocalStorage {
    /// Create a client rooted at `root`. Local copies are deleted after upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            settings: StorageSettings::default(),
            delete_local: true,
        }
    }

    /// Use the given settings.
    pub fn with_settings(mut self, settings: StorageSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Keep or delete the local file after a successful upload.
    pub fn with_delete_local(mut self, delete_local: bool) -> Self {
        self.delete_local = delete_local;
        self
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read an object.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Store data under `key`.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    /// Map a key to a path below the root. Keys are relative, `/` separated
    /// and may not leave the root.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl StorageClient for LocalStorage {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn upload(&self, key: &str, local_path: &Path) -> Result<()> {
        let data = match tokio::fs::read(local_path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                return Err(StorageError::UploadFailed(format!(
                    "cannot read {}: {}",
                    local_path.display(),
                    e
                )))
            }
        };
        let size = data.len();
        self.put(key, data).await?;

        if self.delete_local {
            tokio::fs::remove_file(local_path).await?;
            debug!(path = %local_path.display(), "deleted local copy");
        }

        info!(key, size, root = %self.root.display(), "stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn settings(&self) -> &StorageSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        let storage = LocalStorage::new("/bucket");
        assert_eq!(
            storage.object_path("streams/a.mp4").unwrap(),
            PathBuf::from("/bucket/streams/a.mp4")
        );
        assert!(storage.object_path("").is_err());
        assert!(storage.object_path("../etc/passwd").is_err());
        assert!(storage.object_path("/etc/passwd").is_err());
        assert!(storage.object_path("streams/../../x").is_err());
    }
}
