//! The single mutation pipeline.
//!
//! Every change goes through [`TreeService`]: load the persisted tree, capture
//! a snapshot, apply the change to a working copy, persist it, and only then
//! commit the snapshot to the caller's history. A change that fails at any
//! step leaves both the persisted tree and the session history as they were.
//!
//! Reads never write. When the service is attached to a [`RestoreGate`], no
//! write happens until the reconciler has settled whether the local artifact
//! must be restored, and a missing artifact only becomes a fresh root once the
//! remote has confirmed it holds no record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::history::{HistoryLog, Snapshot};
use crate::models::*;
use crate::persist::{GateState, PersistenceError, RestoreGate, TreeRepository};
use crate::store::Tree;

/// Session key used when a caller does not name one.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Clone)]
pub struct TreeService {
    repo: TreeRepository,
    // Held for the whole of every mutation, which serializes them.
    sessions: Arc<Mutex<HashMap<String, HistoryLog>>>,
    history_depth: usize,
    gate: Option<RestoreGate>,
}

impl TreeService {
    pub fn new(repo: TreeRepository, history_depth: usize) -> Self {
        Self {
            repo,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            history_depth,
            gate: None,
        }
    }

    /// Hold writes until `gate` opens.
    pub fn with_gate(mut self, gate: RestoreGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn repository(&self) -> &TreeRepository {
        &self.repo
    }

    // ============================================================
    // Reads
    // ============================================================

    pub fn tree(&self) -> Result<Tree> {
        self.current()
    }

    /// The stored tree, or a root-only tree if nothing is stored and nothing
    /// could be restored.
    fn current(&self) -> Result<Tree> {
        match self.repo.peek()? {
            Some(tree) => Ok(tree),
            None if self.may_start_fresh() => Ok(self.repo.fresh_tree()),
            None => Err(PersistenceError::AwaitingRestore.into()),
        }
    }

    fn may_start_fresh(&self) -> bool {
        self.gate
            .as_ref()
            .map_or(true, |gate| gate.state() == GateState::Fresh)
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.gate {
            Some(gate) if !gate.is_open() => Err(PersistenceError::AwaitingRestore.into()),
            _ => Ok(()),
        }
    }

    pub fn get_node(&self, id: &NodeId) -> Result<NodeView> {
        self.tree()?.view(id)
    }

    pub fn list_children(&self, id: &NodeId) -> Result<Vec<NodeView>> {
        self.tree()?.children(id)
    }

    pub fn history_status(&self, session: &str) -> HistoryStatus {
        let sessions = self.sessions.lock().expect("history lock poisoned");
        sessions
            .get(session)
            .map(HistoryLog::status)
            .unwrap_or(HistoryStatus { undo: 0, redo: 0 })
    }

    // ============================================================
    // Mutations
    // ============================================================

    fn mutate<T>(&self, session: &str, op: impl FnOnce(&mut Tree) -> Result<T>) -> Result<T> {
        let mut sessions = self.sessions.lock().expect("history lock poisoned");

        self.ensure_writable()?;
        let current = self.current()?;
        let snapshot = Snapshot::capture(&current);
        let mut working = current;

        let out = op(&mut working)?;
        self.repo.save(&working)?;

        sessions
            .entry(session.to_string())
            .or_insert_with(|| HistoryLog::new(self.history_depth))
            .record(snapshot);
        Ok(out)
    }

    pub fn create_node(&self, session: &str, parent: &NodeId, name: &str) -> Result<NodeView> {
        let view = self.mutate(session, |tree| tree.add_child(parent, name))?;
        tracing::debug!("Created node {} '{}' under {}", view.id, name, parent);
        Ok(view)
    }

    pub fn rename_node(&self, session: &str, id: &NodeId, name: &str) -> Result<NodeView> {
        self.mutate(session, |tree| {
            tree.rename(id, name)?;
            tree.view(id)
        })
    }

    /// Delete `id` and its whole subtree. Returns the removed ids.
    pub fn delete_subtree(&self, session: &str, id: &NodeId) -> Result<Vec<NodeId>> {
        let removed = self.mutate(session, |tree| tree.delete_subtree(id))?;
        tracing::debug!("Deleted subtree {} ({} nodes)", id, removed.len());
        Ok(removed)
    }

    /// Copy the subtree at `source` under `new_parent`. Returns the copy's root.
    pub fn clone_subtree(
        &self,
        session: &str,
        source: &NodeId,
        new_parent: &NodeId,
    ) -> Result<NodeView> {
        let view = self.mutate(session, |tree| {
            let copy = tree.clone_subtree(source, new_parent)?;
            tree.view(&copy)
        })?;
        tracing::debug!("Cloned {} as {} under {}", source, view.id, new_parent);
        Ok(view)
    }

    pub fn reorder_children(
        &self,
        session: &str,
        parent: &NodeId,
        order: &[NodeId],
    ) -> Result<Vec<NodeView>> {
        self.mutate(session, |tree| {
            tree.reorder_children(parent, order)?;
            tree.children(parent)
        })
    }

    pub fn set_contents(
        &self,
        session: &str,
        id: &NodeId,
        contents: Vec<ContentItem>,
    ) -> Result<NodeView> {
        self.mutate(session, |tree| {
            tree.set_contents(id, contents)?;
            tree.view(id)
        })
    }

    pub fn append_contents(
        &self,
        session: &str,
        id: &NodeId,
        contents: Vec<ContentItem>,
    ) -> Result<NodeView> {
        self.mutate(session, |tree| {
            tree.append_contents(id, contents)?;
            tree.view(id)
        })
    }

    pub fn clear_contents(&self, session: &str, id: &NodeId) -> Result<NodeView> {
        self.mutate(session, |tree| {
            tree.clear_contents(id)?;
            tree.view(id)
        })
    }

    // ============================================================
    // History
    // ============================================================

    /// Restore the tree as it was before the session's last change.
    pub fn undo(&self, session: &str) -> Result<HistoryStep> {
        self.step(session, HistoryLog::undo)
    }

    /// Re-apply the change most recently undone in this session.
    pub fn redo(&self, session: &str) -> Result<HistoryStep> {
        self.step(session, HistoryLog::redo)
    }

    fn step(
        &self,
        session: &str,
        direction: impl FnOnce(&mut HistoryLog, &Tree) -> Result<Tree>,
    ) -> Result<HistoryStep> {
        let mut sessions = self.sessions.lock().expect("history lock poisoned");

        self.ensure_writable()?;
        let current = self.current()?;
        // Work on a copy so a failed save leaves the stacks untouched.
        let mut log = sessions
            .get(session)
            .cloned()
            .unwrap_or_else(|| HistoryLog::new(self.history_depth));
        let target = direction(&mut log, &current)?;

        self.repo.save(&target)?;
        let step = HistoryStep {
            nodes: target.len(),
            history: log.status(),
        };
        sessions.insert(session.to_string(), log);
        Ok(step)
    }

    // ============================================================
    // Backup
    // ============================================================

    pub fn export_backup(&self) -> Result<BackupBundle> {
        Ok(BackupBundle::new(self.tree()?))
    }

    /// Replace the whole tree with an imported backup.
    ///
    /// The import becomes a new baseline: every session's history is cleared.
    /// Payloads that do not decode to a valid tree are rejected before
    /// anything is written.
    pub fn import_backup(&self, payload: &[u8]) -> Result<Tree> {
        let tree = serde_json::from_slice::<BackupPayload>(payload)
            .map_err(|e| Error::invalid(format!("backup is not a valid store: {}", e)))?
            .into_tree();
        tree.check_invariants()
            .map_err(|e| Error::invalid(format!("backup violates tree structure: {}", e)))?;

        let mut sessions = self.sessions.lock().expect("history lock poisoned");
        self.ensure_writable()?;
        self.repo.save(&tree)?;
        sessions.clear();

        tracing::info!("Imported backup with {} nodes", tree.len());
        Ok(tree)
    }
}
