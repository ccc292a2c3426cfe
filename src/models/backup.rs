use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Tree;

/// Current backup bundle format.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// A full, self-describing copy of the store that can be downloaded and later
/// imported to replace the tree wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupBundle {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub store: Tree,
}

impl BackupBundle {
    pub fn new(store: Tree) -> Self {
        Self {
            format_version: BACKUP_FORMAT_VERSION,
            exported_at: Utc::now(),
            store,
        }
    }
}

/// What an import accepts: a bundle, or a bare store record as older backups
/// contained.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BackupPayload {
    Bundle(BackupBundle),
    Store(Tree),
}

impl BackupPayload {
    pub fn into_tree(self) -> Tree {
        match self {
            Self::Bundle(bundle) => bundle.store,
            Self::Store(tree) => tree,
        }
    }
}

/// Undo/redo depth of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStatus {
    pub undo: usize,
    pub redo: usize,
}

/// Result of an undo or redo step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStep {
    /// Node count of the tree now in place.
    pub nodes: usize,
    pub history: HistoryStatus,
}

/// Result of a backup import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub nodes: usize,
}
