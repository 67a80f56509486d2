//! Persistence layer — JSON-file key-value sets.
//!
//! Each set lives in `<data_dir>/<set_name>.json`. The process is
//! single-instance, so there is no locking; every write replaces the file.

mod sets;

pub use sets::{SENT_EMAILS, SKIPPED_EMAILS, SentEmails, SkippedEmails};

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StoreError;

/// JSON-backed store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, set_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", set_name))
    }

    /// Load a set. A missing file yields the default (empty) value.
    pub async fn load<T: DeserializeOwned + Default>(&self, set_name: &str) -> Result<T, StoreError> {
        let path = self.path_for(set_name);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Set file missing, starting empty");
                return Ok(T::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }

        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write a set, creating the data directory when needed.
    pub async fn save<T: Serialize>(&self, set_name: &str, value: &T) -> Result<(), StoreError> {
        let io_err = |path: &Path, source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;

        // Write a sibling then rename over the target, so a crash never leaves a torn set file.
        let path = self.path_for(set_name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))?;

        debug!(path = %path.display(), "Saved set");
        Ok(())
    }
}
