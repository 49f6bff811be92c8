//! Local persistence of verified metadata.
//!
//! The updater only ever hands verified bytes to a store. Writes must be
//! atomic so a crash cannot leave a torn root on disk; a missing or corrupt
//! root is treated as a bootstrap condition by the updater.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::layout;

/// Errors emitted by metadata stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid role name '{0}'")]
    InvalidRoleName(String),
}

/// Persistent cache of the latest trusted metadata, one entry per role.
pub trait MetadataStore: Send + Sync + Debug {
    /// Returns the bytes last stored for `role`, or `None` if absent.
    fn load(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Atomically replaces the bytes stored for `role`.
    fn store(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Remote file name of `role` at `version`.
    fn persisted_filename_for(&self, role: &str, version: u64, consistent_snapshot: bool) -> String {
        layout::persisted_filename_for(role, version, consistent_snapshot)
    }
}

fn check_role(role: &str) -> Result<(), StoreError> {
    if role.is_empty() {
        return Err(StoreError::InvalidRoleName(role.to_string()));
    }
    Ok(())
}

/// Directory-backed store holding `<role>.json` files.
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, role: &str) -> PathBuf {
        self.dir.join(format!("{}.json", layout::encode_role(role)))
    }
}

impl MetadataStore for FsStore {
    fn load(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_role(role)?;
        match fs::read(self.path_for(role)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(role, "tuf: no cached metadata");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_role(role)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(role)).map_err(|err| err.error)?;
        debug!(role, len = bytes.len(), "tuf: persisted metadata");
        Ok(())
    }
}

/// In-process store for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roles currently held, sorted.
    pub fn roles(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut roles: Vec<String> = entries.keys().cloned().collect();
        roles.sort();
        roles
    }
}

impl MetadataStore for MemoryStore {
    fn load(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_role(role)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(role).cloned())
    }

    fn store(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_role(role)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(role.to_string(), bytes.to_vec());
        Ok(())
    }
}
