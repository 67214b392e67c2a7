//! Upload of finished recordings.

use crate::error::Result;
use recmux_storage::{FileType, StorageClient};
use std::path::Path;
use tracing::{error, info};

/// Find a key under `file_type` that does not exist yet.
///
/// `name.mp4` is tried first, then `name_1.mp4`, `name_2.mp4` and so on.
pub async fn resolve_unique_key(storage: &dyn StorageClient, file_type: FileType, file_name: &str) -> Result<String> {
    let mut key = file_type.key(file_name);
    let mut n = 1u32;
    while storage.exists(&key).await? {
        key = file_type.key(&suffixed(file_name, n));
        n += 1;
    }
    Ok(key)
}

/// Insert `_n` before the last extension.
fn suffixed(file_name: &str, n: u32) -> String {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &file_name[..dot], n, &file_name[dot..]),
        _ => format!("{}_{}", file_name, n),
    }
}

/// Upload a recording under a free stream key.
///
/// Failures are logged.
pub async fn upload_recording(storage: &dyn StorageClient, path: &Path) {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        error!(path = %path.display(), "recording has no usable file name");
        return;
    };

    let key = match resolve_unique_key(storage, FileType::Stream, file_name).await {
        Ok(key) => key,
        Err(e) => {
            error!(path = %path.display(), error = %e, "could not resolve storage key");
            return;
        }
    };

    match storage.upload(&key, path).await {
        Ok(()) => info!(key = %key, "recording uploaded"),
        Err(e) => error!(key = %key, error = %e, "upload failed"),
    }
}
