//! CLI configuration file.

use anyhow::Context;
use recmux::MuxerConfig;
use recmux_storage::StorageSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of the `--config` file.
///
/// ```json
/// {
///   "muxer": { "output_dir": "recordings", "upload_delay_ms": 0 },
///   "storage": { "root": "bucket", "region": "eu-west-1" }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    /// Recorder configuration.
    pub muxer: MuxerConfig,
    /// Local storage target.
    pub storage: Option<StorageTarget>,
}

/// A directory used as the storage bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTarget {
    /// Bucket directory.
    pub root: PathBuf,
    /// Delete the local recording after upload.
    #[serde(default = "default_delete_local")]
    pub delete_local: bool,
    /// Client settings.
    #[serde(flatten)]
    pub settings: StorageSettings,
}

fn default_delete_local() -> bool {
    true
}

impl CliSettings {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        settings.muxer.validate()?;
        Ok(settings)
    }
}
