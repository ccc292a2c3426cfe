//! Local persistence port.
//!
//! The tree and the reconciler share one local artifact. Both reach it through
//! [`ArtifactStorage`], which deals in raw bytes so that the reconciler can
//! fingerprint and overwrite exactly what is on disk. [`TreeRepository`] adds
//! the JSON encoding of the tree on top, and [`RestoreGate`] tells writers
//! whether the local copy can be trusted yet.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::store::Tree;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stored tree is corrupt: {0}")]
    Corrupt(String),

    #[error("failed to encode tree: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("local tree is waiting to be restored from the remote record")]
    AwaitingRestore,
}

/// Byte-level access to one local artifact.
pub trait ArtifactStorage: Send + Sync {
    /// Current bytes, or `None` if the artifact does not exist.
    fn read(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Replace the artifact. Readers must never observe a partial write.
    fn write(&self, bytes: &[u8]) -> Result<(), PersistenceError>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Artifact stored as a single file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ArtifactStorage for FileStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;

        // Each writer gets its own temp file in the target directory, so
        // concurrent writers never rename each other's files.
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(bytes).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory artifact for tests and ephemeral runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    bytes: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the artifact, as if local storage had been wiped.
    pub fn wipe(&self) {
        *self.bytes.lock().expect("storage lock poisoned") = None;
    }
}

impl ArtifactStorage for MemoryStorage {
    fn read(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.bytes.lock().expect("storage lock poisoned").clone())
    }

    fn write(&self, bytes: &[u8]) -> Result<(), PersistenceError> {
        *self.bytes.lock().expect("storage lock poisoned") = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// How far the local artifact can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Local data may be missing and the remote record has not been consulted
    /// successfully. Nothing may be written.
    Pending,
    /// Local data is present or was restored from the remote record.
    Restored,
    /// The remote holds no record, so an absent artifact is a brand new tree.
    Fresh,
}

/// Shared flag between the reconciler and the mutation pipeline.
///
/// Starts out [`GateState::Pending`]. The reconciler moves it as it learns
/// about the local artifact and the remote record.
#[derive(Debug, Clone)]
pub struct RestoreGate {
    state: Arc<Mutex<GateState>>,
}

impl Default for RestoreGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RestoreGate {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::Pending)),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.lock().expect("gate lock poisoned")
    }

    pub fn set(&self, state: GateState) {
        let mut current = self.state.lock().expect("gate lock poisoned");
        if *current != state {
            tracing::debug!("Restore gate {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() != GateState::Pending
    }
}

/// Loads and saves the tree through an [`ArtifactStorage`].
#[derive(Clone)]
pub struct TreeRepository {
    storage: Arc<dyn ArtifactStorage>,
    root_name: String,
}

impl TreeRepository {
    pub fn new(storage: Arc<dyn ArtifactStorage>, root_name: impl Into<String>) -> Self {
        Self {
            storage,
            root_name: root_name.into(),
        }
    }

    pub fn storage(&self) -> Arc<dyn ArtifactStorage> {
        self.storage.clone()
    }

    /// A root-only tree, for when nothing has been stored yet. Not saved.
    pub fn fresh_tree(&self) -> Tree {
        Tree::new(&self.root_name)
    }

    /// Load the tree if one is stored. Never writes.
    ///
    /// An empty artifact counts as missing. Anything else that does not decode
    /// to a valid tree is reported as corrupt rather than replaced, so a bad
    /// file is never silently overwritten with an empty tree.
    pub fn peek(&self) -> Result<Option<Tree>, PersistenceError> {
        match self.storage.read()? {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => decode(&bytes).map(Some),
            _ => Ok(None),
        }
    }

    pub fn save(&self, tree: &Tree) -> Result<(), PersistenceError> {
        self.storage.write(&encode(tree)?)
    }
}

/// Encode a tree as the store record.
pub fn encode(tree: &Tree) -> Result<Vec<u8>, PersistenceError> {
    Ok(serde_json::to_vec_pretty(tree)?)
}

/// Decode and validate a store record.
pub fn decode(bytes: &[u8]) -> Result<Tree, PersistenceError> {
    let tree: Tree =
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
    tree.check_invariants()
        .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
    Ok(tree)
}
