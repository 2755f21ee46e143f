//! Progress persistence
//!
//! A single JSON file maps device identifiers to their [`ProgressRecord`], so
//! a run can resume its counters on the same device later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Failed to read progress file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write progress file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed progress file {path:?}: {source}")]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type ProgressResult<T> = Result<T, ProgressError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub total_battles: u64,
    pub cycle_count: u64,
    pub last_run_time: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(total_battles: u64, cycle_count: u64) -> Self {
        Self {
            total_battles,
            cycle_count,
            last_run_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored record; a missing file is an empty store.
    pub fn load_all(&self) -> ProgressResult<BTreeMap<String, ProgressRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ProgressError::Read {
            path: self.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| ProgressError::Format {
            path: self.path.clone(),
            source,
        })
    }

    pub fn load(&self, device: &str) -> ProgressResult<Option<ProgressRecord>> {
        Ok(self.load_all()?.remove(device))
    }

    /// Replace the record for `device`, keeping the others.
    pub fn save(&self, device: &str, record: &ProgressRecord) -> ProgressResult<()> {
        let mut all = self.load_all()?;
        all.insert(device.to_string(), record.clone());
        let json = serde_json::to_string_pretty(&all).map_err(|source| ProgressError::Format {
            path: self.path.clone(),
            source,
        })?;

        let write_err = |source| ProgressError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        log::debug!("💾 Progress for {device} saved to {}", self.path.display());
        Ok(())
    }
}
