//! Storage handoff for finished recordings
//!
//! The engine hands finished files to a [`StorageClient`]. A client decides
//! on its own whether the local copy survives the upload.
//!
//! [`LocalStorage`] treats a directory as the bucket.
//!
//! # Example
//!
//! ```ignore
//! use recmux_storage::{FileType, LocalStorage, StorageClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = LocalStorage::new("/srv/bucket");
//!
//!     let key = FileType::Stream.key("stream1.mp4");
//!     if !storage.exists(&key).await? {
//!         storage.upload(&key, "recordings/stream1.mp4".as_ref()).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

mod error;
mod local;

pub use error::*;
pub use local::*;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Kind of object being stored. Each kind lives under its own key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Recorded streams
    Stream,
    /// Preview images
    Preview,
}

impl FileType {
    /// Key prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            FileType::Stream => "streams",
            FileType::Preview => "previews",
        }
    }

    /// Object key for a file name.
    pub fn key(&self, file_name: &str) -> String {
        format!("{}/{}", self.prefix(), file_name)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Connection settings shared by storage clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Service endpoint
    pub endpoint: Option<String>,
    /// Access key
    pub access_key: Option<String>,
    /// Secret key
    pub secret_key: Option<String>,
    /// Region
    pub region: Option<String>,
    /// Bucket or container name
    pub storage_name: Option<String>,
    /// Canned permission applied to uploaded objects
    pub permission: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
            storage_name: None,
            permission: "public-read".to_string(),
        }
    }
}

/// Storage client trait
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Upload a local file under `key`
    async fn upload(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// Connection settings
    fn settings(&self) -> &StorageSettings;

    /// Check if a file of the given kind exists
    async fn file_exists(&self, file_type: FileType, file_name: &str) -> Result<bool> {
        self.exists(&file_type.key(file_name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_keys() {
        assert_eq!(FileType::Stream.key("a.mp4"), "streams/a.mp4");
        assert_eq!(FileType::Preview.key("a.png"), "previews/a.png");
        assert_eq!(FileType::Preview.to_string(), "previews");
    }

    #[test]
    fn test_settings_default_permission() {
        let settings = StorageSettings::default();
        assert_eq!(settings.permission, "public-read");
        assert!(settings.endpoint.is_none());
    }
}
