//! Transactional state store for the ticket workflow
//!
//! Tables live in memory behind an `RwLock`. A mutating unit of work runs
//! against a working copy while the write lock is held; the copy is swapped
//! in only after it has been committed, which for a file-backed store means
//! the JSON snapshot was written (temp file + rename). A failed commit
//! leaves the previous state untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::tables::Tables;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to StateStore
pub type SharedStateStore = Arc<StateStore>;

/// In-memory tables with an optional JSON snapshot on disk
pub struct StateStore {
    tables: RwLock<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl StateStore {
    /// Create a store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            snapshot_path: None,
        }
    }

    /// Open a file-backed store, loading the snapshot when it exists.
    ///
    /// A missing file starts an empty store; the file is created on the
    /// first commit.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let tables = read_snapshot(&path)?.unwrap_or_default();
        info!(path = %path.display(), tickets = tables.tickets.len(), "Opened state store");
        Ok(Self {
            tables: RwLock::new(tables),
            snapshot_path: Some(path),
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedStateStore {
        Arc::new(self)
    }

    /// Snapshot path, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Run a read-only closure against the current tables
    pub fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> StoreResult<R> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&tables))
    }

    /// Clone the current tables
    pub fn snapshot(&self) -> StoreResult<Tables> {
        self.read(Tables::clone)
    }

    /// Run a unit of work as one transaction.
    ///
    /// `f` mutates a working copy. If it returns `Err`, or the commit fails,
    /// nothing is applied. Writers serialize on the store lock.
    pub fn transaction<R, E>(&self, f: impl FnOnce(&mut Tables) -> Result<R, E>) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut working = guard.clone();
        let output = f(&mut working)?;

        if let Some(path) = &self.snapshot_path {
            write_snapshot(path, &working)?;
        }

        *guard = working;
        Ok(output)
    }

    /// Reload the snapshot file, picking up commits made by other processes.
    /// No-op for in-memory stores or when the file does not exist yet.
    pub fn refresh(&self) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if let Some(tables) = read_snapshot(path)? {
            let mut guard = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
            *guard = tables;
            debug!(path = %path.display(), "Reloaded state snapshot");
        }
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> StoreResult<Option<Tables>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let tables =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(Some(tables))
}

fn write_snapshot(path: &Path, tables: &Tables) -> StoreResult<()> {
    let bytes =
        serde_json::to_vec_pretty(tables).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
