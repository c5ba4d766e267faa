//! Dismissal state persistence
//!
//! [`JsonFileStore`] writes a versioned JSON document next to its target
//! and renames it into place, so a crash mid-write leaves the previous
//! state intact.

use crate::error::PersistenceError;
use parking_lot::Mutex;
use sc_model::PersistedRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Backing store for dismissal records
pub trait DismissalStore: Send + Sync + fmt::Debug {
    /// Read all records; an absent store reads as empty
    fn load(&self) -> Result<Vec<PersistedRecord>, PersistenceError>;

    /// Replace the stored records
    fn save(&self, records: &[PersistedRecord]) -> Result<(), PersistenceError>;
}

/// Store kept in memory only
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<PersistedRecord>>,
    saves: Mutex<usize>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with `records`
    #[must_use]
    pub fn with_records(records: Vec<PersistedRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: Mutex::new(0),
        }
    }

    /// Current contents
    #[must_use]
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records.lock().clone()
    }

    /// Number of completed saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl DismissalStore for InMemoryStore {
    fn load(&self) -> Result<Vec<PersistedRecord>, PersistenceError> {
        Ok(self.records.lock().clone())
    }

    fn save(&self, records: &[PersistedRecord]) -> Result<(), PersistenceError> {
        *self.records.lock() = records.to_vec();
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    records: Vec<PersistedRecord>,
}

/// Store backed by one JSON file
///
/// Clones share one write lock, so their temp-file writes never overlap.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Document version written by this store
    pub const VERSION: u32 = 1;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DismissalStore for JsonFileStore {
    fn load(&self) -> Result<Vec<PersistedRecord>, PersistenceError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No dismissal state at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(PersistenceError::io_error(&self.path, e)),
        };
        let document: Document = serde_json::from_slice(&bytes)?;
        if document.version != Self::VERSION {
            return Err(PersistenceError::UnsupportedVersion(document.version));
        }
        tracing::debug!(
            "Loaded {} dismissal records from {}",
            document.records.len(),
            self.path.display()
        );
        Ok(document.records)
    }

    fn save(&self, records: &[PersistedRecord]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io_error(parent, e))?;
        }
        let document = Document {
            version: Self::VERSION,
            records: records.to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let _writing = self.write_lock.lock();
        let temp = self.temp_path();
        std::fs::write(&temp, bytes).map_err(|e| PersistenceError::io_error(&temp, e))?;
        std::fs::rename(&temp, &self.path).map_err(|e| PersistenceError::io_error(&self.path, e))?;
        tracing::debug!(
            "Saved {} dismissal records to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}
