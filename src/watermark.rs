//! Durable sync watermark
//!
//! The watermark is the epoch-ms timestamp of the newest order seen by a
//! completed pass, used as the lower bound of the next fetch. It is kept in
//! a small JSON state file and replaced atomically (write a temp sibling,
//! then rename) so a crash mid-write never leaves a torn file behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to write watermark file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode watermark state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkState {
    last_synced_at_ms: i64,
    updated_at: DateTime<Utc>,
}

/// File-backed watermark store.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted watermark. A missing or unreadable file yields
    /// `None` (the caller falls back to its default lookback) with a warning
    /// for anything other than plain absence.
    pub fn load(&self) -> Option<i64> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read watermark file");
                return None;
            }
        };

        match serde_json::from_str::<WatermarkState>(&raw) {
            Ok(state) => Some(state.last_synced_at_ms),
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "watermark file is not valid state; ignoring it"
                );
                None
            }
        }
    }

    /// Persist a new watermark value, replacing the file atomically.
    pub fn store(&self, last_synced_at_ms: i64) -> Result<(), WatermarkError> {
        let state = WatermarkState {
            last_synced_at_ms,
            updated_at: Utc::now(),
        };
        let encoded = serde_json::to_vec_pretty(&state)?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &encoded).map_err(|source| WatermarkError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| WatermarkError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join("watermark.json"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn round_trips_the_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join("watermark.json"));

        store.store(1_700_000_000_000).unwrap();
        assert_eq!(store.load(), Some(1_700_000_000_000));

        store.store(1_700_000_123_456).unwrap();
        assert_eq!(store.load(), Some(1_700_000_123_456));
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermark.json");
        fs::write(&path, b"not json at all").unwrap();

        let store = WatermarkStore::new(&path);
        assert_eq!(store.load(), None);

        // A later store still recovers the file.
        store.store(42).unwrap();
        assert_eq!(store.load(), Some(42));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watermark.json");
        let store = WatermarkStore::new(&path);
        store.store(7).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
}
