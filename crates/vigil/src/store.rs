//! Durable state file.
//!
//! Reads never fail the caller: anything unreadable loads as an empty [WatcherState] and the
//! watcher backfills from there. Writes go to a temporary file in the target directory, are
//! synced, and then atomically renamed over the state file, so a crash mid-save leaves either
//! the old or the new document on disk.

use crate::config::RetentionConfig;
use crate::state::WatcherState;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("replace state file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    retention: RetentionConfig,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, retention: RetentionConfig) -> Self {
        Self {
            path: path.into(),
            retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state, falling back to the empty state on any failure.
    pub fn load(&self) -> WatcherState {
        match self.try_load() {
            Ok(st) => st,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), reason = %e, "state unreadable, starting empty");
                WatcherState::default()
            }
        }
    }

    /// Load state. A missing or empty file is the empty state, not an error.
    pub fn try_load(&self) -> Result<WatcherState, StateError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WatcherState::default()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(WatcherState::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Best-effort save: failures are logged and reported as `false`.
    pub fn save(&self, state: &WatcherState) -> bool {
        match self.try_save(state) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), reason = %e, "state write failed");
                false
            }
        }
    }

    pub fn try_save(&self, state: &WatcherState) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let body = serde_json::to_vec(&state.to_persisted(&self.retention))?;
        // Dropped (and removed) on every early return below.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        #[cfg(unix)]
        if let Ok(d) = std::fs::File::open(&dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }
}
