//! On-disk model artifacts.
//!
//! An artifact is a bincode envelope holding a format version, the SHA-256
//! of the payload and the payload itself. Writes go to a sibling temporary
//! file which is then renamed over the target.

use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Bump when the payload layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: String,
    payload: Vec<u8>,
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` and atomically replace the file at `path`
pub fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let envelope = Envelope {
        format_version: ARTIFACT_FORMAT_VERSION,
        checksum: checksum(&payload),
        payload,
    };
    let bytes = bincode::serialize(&envelope)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    fs::write(&tmp, &bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Artifact written");
    Ok(())
}

/// Read and verify an artifact written by [`write_artifact`]
pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    let envelope: Envelope = bincode::deserialize(&bytes)?;

    if envelope.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(AppError::Serialization(format!(
            "unsupported artifact format version {} (expected {})",
            envelope.format_version, ARTIFACT_FORMAT_VERSION
        )));
    }

    if checksum(&envelope.payload) != envelope.checksum {
        return Err(AppError::Serialization(format!(
            "artifact checksum mismatch in {}",
            path.display()
        )));
    }

    Ok(bincode::deserialize(&envelope.payload)?)
}
