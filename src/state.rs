//! Persisted per-container state.
//!
//! The only thing remembered between two runs is the last `start_count`
//! seen for every container, which is what makes a restart detectable
//! from one snapshot to the next. The whole map lives in a single JSON
//! file:
//!
//! ```json
//! { "shop_web_1": { "start_count": 4 } }
//! ```

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Unable to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Unable to replace {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "start_count")]
    pub restart_count: u64,
}

/// Last observed restart counter per container id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerStates {
    inner: BTreeMap<String, ContainerState>,
}

impl ContainerStates {
    pub fn get(&self, id: &str) -> Option<ContainerState> {
        self.inner.get(id).copied()
    }

    pub fn record(&mut self, id: &str, restart_count: u64) {
        self.inner
            .insert(id.to_string(), ContainerState { restart_count });
    }

    /// Keeps only the containers whose id matches `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.inner.retain(|id, _| keep(id));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty state, anything unparsable is an error.
    pub fn load(&self) -> Result<ContainerStates, StateError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ContainerStates::default());
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces the state file with the full snapshot.
    ///
    /// The snapshot is written to a temporary file next to the target and
    /// renamed over it, so a crash never leaves a truncated file behind.
    pub fn save(&self, state: &ContainerStates) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|source| StateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let json = serde_json::to_vec_pretty(state)?;

        let io_err = |source: std::io::Error| StateError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path)
            .map_err(|source| StateError::Persist {
                path: self.path.clone(),
                source,
            })?;

        log::info!(
            "Saved state of {} containers to {:?}",
            state.len(),
            self.path
        );
        Ok(())
    }
}
