use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tridot_core::PeerRecord;

use crate::fsio;

const PEERS_FILE: &str = "peers.json";
const DRAIN_FILE: &str = "drain";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Last applied peer set and the operator drain flag, kept across restarts.
pub trait StateStore: Send + Sync {
    fn save_peers(&self, peers: &[PeerRecord]) -> Result<(), StateError>;
    /// An absent file is an empty set.
    fn load_peers(&self) -> Result<Vec<PeerRecord>, StateError>;
    fn drain_enabled(&self) -> Result<bool, StateError>;
}

/// Directory-backed store: `peers.json` plus a `drain` sentinel file.
/// All access is serialized through one lock.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fsio::ensure_private_dir(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates or removes the drain sentinel. Removing an absent flag is a no-op.
    pub fn set_drain(&self, enabled: bool) -> Result<(), StateError> {
        let _guard = self.guard();
        let path = self.dir.join(DRAIN_FILE);
        let result = if enabled {
            std::fs::write(&path, b"")
        } else {
            match std::fs::remove_file(&path) {
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            }
        };
        result.map_err(|source| StateError::Io { path, source })
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for FileStateStore {
    fn save_peers(&self, peers: &[PeerRecord]) -> Result<(), StateError> {
        let _guard = self.guard();
        let path = self.dir.join(PEERS_FILE);
        let body = serde_json::to_vec_pretty(peers).map_err(|source| StateError::Json {
            path: path.clone(),
            source,
        })?;
        fsio::write_private_atomic(&path, &body).map_err(|source| StateError::Io { path, source })
    }

    fn load_peers(&self) -> Result<Vec<PeerRecord>, StateError> {
        let _guard = self.guard();
        let path = self.dir.join(PEERS_FILE);
        let body = match std::fs::read(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        serde_json::from_slice(&body).map_err(|source| StateError::Json { path, source })
    }

    fn drain_enabled(&self) -> Result<bool, StateError> {
        let _guard = self.guard();
        let path = self.dir.join(DRAIN_FILE);
        match std::fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }
}
