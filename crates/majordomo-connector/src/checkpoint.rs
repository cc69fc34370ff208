//! Durable cursor checkpointing.
//!
//! The cursor is advanced only after the switchboard has accepted (or
//! deduplicated) everything up to it. Writes are atomic: temp file in the
//! same directory, fsync, rename. On restart the connector replays from
//! the last safe cursor; duplicates are harmless.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, ConnectorResult};

/// The persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Opaque source cursor.
    pub cursor: String,
    /// When it was written.
    pub updated_at: DateTime<Utc>,
}

/// Atomic file-backed checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    /// Use `path` as the checkpoint location.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the last safe checkpoint, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Checkpoint`] for unreadable or corrupt
    /// files; a missing file is `Ok(None)`.
    pub async fn load(&self) -> ConnectorResult<Option<Checkpoint>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ConnectorError::Checkpoint(format!("corrupt checkpoint: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConnectorError::Checkpoint(e.to_string())),
        })
        .await
        .map_err(|e| ConnectorError::Checkpoint(e.to_string()))?
    }

    /// Persist a new cursor atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Checkpoint`] when the write, fsync, or
    /// rename fails.
    pub async fn save(&self, cursor: &str) -> ConnectorResult<Checkpoint> {
        let checkpoint = Checkpoint {
            cursor: cursor.to_owned(),
            updated_at: Utc::now(),
        };
        let path = self.path.clone();
        let payload = serde_json::to_vec(&checkpoint)
            .map_err(|e| ConnectorError::Checkpoint(e.to_string()))?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &payload))
            .await
            .map_err(|e| ConnectorError::Checkpoint(e.to_string()))??;
        Ok(checkpoint)
    }
}

/// Temp file in the target directory, fsync, rename over the target.
fn write_atomic(path: &Path, payload: &[u8]) -> ConnectorResult<()> {
    use std::io::Write as _;

    let dir = path
        .parent()
        .ok_or_else(|| ConnectorError::Checkpoint("checkpoint path has no parent".to_owned()))?;
    std::fs::create_dir_all(dir).map_err(|e| ConnectorError::Checkpoint(e.to_string()))?;

    let tmp = path.with_extension("tmp");
    let mut file =
        std::fs::File::create(&tmp).map_err(|e| ConnectorError::Checkpoint(e.to_string()))?;
    file.write_all(payload)
        .map_err(|e| ConnectorError::Checkpoint(e.to_string()))?;
    file.sync_all()
        .map_err(|e| ConnectorError::Checkpoint(e.to_string()))?;
    drop(file);

    std::fs::rename(&tmp, path).map_err(|e| ConnectorError::Checkpoint(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let cp = CheckpointFile::new(dir.path().join("cursor.json"));
        assert!(cp.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cp = CheckpointFile::new(dir.path().join("cursor.json"));
        cp.save("offset:42").await.unwrap();
        let loaded = cp.load().await.unwrap().unwrap();
        assert_eq!(loaded.cursor, "offset:42");
    }

    #[tokio::test]
    async fn save_overwrites_previous_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cp = CheckpointFile::new(dir.path().join("cursor.json"));
        cp.save("offset:1").await.unwrap();
        cp.save("offset:2").await.unwrap();
        assert_eq!(cp.load().await.unwrap().unwrap().cursor, "offset:2");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_a_silent_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, b"not json").unwrap();
        let cp = CheckpointFile::new(path);
        assert!(matches!(
            cp.load().await.unwrap_err(),
            ConnectorError::Checkpoint(_)
        ));
    }
}
