//! Bounded undo/redo history of whole-tree snapshots.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::HistoryStatus;
use crate::store::Tree;

/// Default number of undo steps kept per session.
pub const DEFAULT_HISTORY_DEPTH: usize = 20;

/// An immutable copy of the tree at one instant.
///
/// The tree sits behind an `Arc`, so cloning a snapshot (or a whole log) does
/// not copy nodes again.
#[derive(Debug, Clone)]
pub struct Snapshot {
    tree: Arc<Tree>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(tree: &Tree) -> Self {
        Self {
            tree: Arc::new(tree.clone()),
            taken_at: Utc::now(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    fn into_tree(self) -> Tree {
        Arc::try_unwrap(self.tree).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Undo and redo stacks for one editing session.
///
/// Recording a new snapshot clears the redo stack. Undo and redo only move
/// the current tree onto the opposite stack; they never record, so an undo
/// cannot be redone into itself.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    depth: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl HistoryLog {
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::with_capacity(depth.min(64)),
            redo: Vec::new(),
            depth: depth.max(1),
        }
    }

    /// Copy `tree` onto the undo stack. Call this before the change it guards.
    pub fn record_snapshot(&mut self, tree: &Tree) {
        self.record(Snapshot::capture(tree));
    }

    /// Push an already captured snapshot.
    pub fn record(&mut self, snapshot: Snapshot) {
        self.push_undo(snapshot);
        self.redo.clear();
    }

    fn push_undo(&mut self, snapshot: Snapshot) {
        self.undo.push_back(snapshot);
        while self.undo.len() > self.depth {
            self.undo.pop_front();
        }
    }

    /// Step back: `current` goes onto the redo stack and the most recent
    /// snapshot comes back.
    pub fn undo(&mut self, current: &Tree) -> Result<Tree> {
        let previous = self.undo.pop_back().ok_or(Error::NothingToUndo)?;
        self.redo.push(Snapshot::capture(current));
        Ok(previous.into_tree())
    }

    /// Step forward again after an undo.
    pub fn redo(&mut self, current: &Tree) -> Result<Tree> {
        let next = self.redo.pop().ok_or(Error::NothingToRedo)?;
        self.push_undo(Snapshot::capture(current));
        Ok(next.into_tree())
    }

    /// Forget everything, e.g. after a wholesale import.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn status(&self) -> HistoryStatus {
        HistoryStatus {
            undo: self.undo.len(),
            redo: self.redo.len(),
        }
    }

    /// The most recent undo snapshot, if any.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.undo.back()
    }
}
