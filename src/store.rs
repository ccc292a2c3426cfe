//! The in-memory content tree.
//!
//! [`Tree`] holds every node keyed by id and offers the CRUD and traversal
//! primitives the service builds on. Each operation validates its inputs
//! before touching the map, so a failed call leaves the tree exactly as it
//! was. Only [`Tree::delete_subtree`] and [`Tree::clone_subtree`] change the
//! set of ids, and both apply to the whole affected subtree at once.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::models::{ContentItem, Node, NodeId, NodeView};

/// A structural invariant the tree failed to satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("tree has no root")]
    NoRoot,

    #[error("tree has {0} parentless nodes")]
    MultipleRoots(usize),

    #[error("node {parent} lists missing child {child}")]
    DanglingChild { parent: NodeId, child: NodeId },

    #[error("node {child} is listed under {listed_by} but names {actual:?} as parent")]
    ParentMismatch {
        child: NodeId,
        listed_by: NodeId,
        actual: Option<NodeId>,
    },

    #[error("node {0} is listed as a child more than once")]
    SharedChild(NodeId),

    #[error("node {0} is not listed by any parent")]
    Orphan(NodeId),

    #[error("node {0} is not reachable from the root")]
    Unreachable(NodeId),
}

/// Mapping from id to node, rooted at the single parentless node.
///
/// Serializes as a JSON object keyed by node id. Keys are kept sorted so the
/// encoded record, and therefore its fingerprint, is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tree {
    nodes: BTreeMap<NodeId, Node>,
}

impl Tree {
    /// A tree holding only the root node.
    pub fn new(root_name: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::root(), Node::new(root_name, None));
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Id of the parentless node.
    pub fn root_id(&self) -> NodeId {
        self.nodes
            .iter()
            .find(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id.clone())
            .unwrap_or_else(NodeId::root)
    }

    pub fn get(&self, id: &NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or_else(|| Error::NotFound(id.clone()))
    }

    fn get_mut(&mut self, id: &NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    pub fn view(&self, id: &NodeId) -> Result<NodeView> {
        Ok(NodeView {
            id: id.clone(),
            node: self.get(id)?.clone(),
        })
    }

    /// Direct children of `id`, in presentation order.
    pub fn children(&self, id: &NodeId) -> Result<Vec<NodeView>> {
        self.get(id)?
            .children
            .iter()
            .map(|child| self.view(child))
            .collect()
    }

    /// `id` followed by every node reachable from it, in pre-order.
    pub fn descendants(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        self.get(id)?;

        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                // Reverse so children pop in presentation order.
                stack.extend(node.children.iter().rev().cloned());
            }
            out.push(current);
        }
        Ok(out)
    }

    /// Whether `candidate` lies strictly below `ancestor`.
    pub fn is_descendant(&self, candidate: &NodeId, ancestor: &NodeId) -> bool {
        let mut current = self.nodes.get(candidate).and_then(|n| n.parent.as_ref());
        // Bounded walk: a corrupt parent chain must not loop forever.
        for _ in 0..self.nodes.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.nodes.get(id).and_then(|n| n.parent.as_ref()),
                None => return false,
            }
        }
        false
    }

    fn fresh_id(&self, taken: &HashSet<NodeId>) -> NodeId {
        loop {
            let id = NodeId::generate();
            if !self.nodes.contains_key(&id) && !taken.contains(&id) {
                return id;
            }
        }
    }

    /// Append a new, empty child named `name` under `parent`.
    pub fn add_child(&mut self, parent: &NodeId, name: &str) -> Result<NodeView> {
        self.get(parent)?;

        let id = self.fresh_id(&HashSet::new());
        let node = Node::new(name, Some(parent.clone()));
        self.nodes.insert(id.clone(), node.clone());
        self.get_mut(parent)?.children.push(id.clone());

        Ok(NodeView { id, node })
    }

    pub fn rename(&mut self, id: &NodeId, name: &str) -> Result<()> {
        self.get_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// Remove `id` and every node below it. Returns the removed ids.
    ///
    /// The root cannot be deleted: the tree always keeps exactly one root.
    pub fn delete_subtree(&mut self, id: &NodeId) -> Result<Vec<NodeId>> {
        let parent = self.get(id)?.parent.clone();
        let Some(parent) = parent else {
            return Err(Error::invalid("the root node cannot be deleted"));
        };

        let doomed = self.descendants(id)?;
        self.get_mut(&parent)?.children.retain(|child| child != id);
        for node_id in &doomed {
            self.nodes.remove(node_id);
        }

        Ok(doomed)
    }

    /// Deep-copy the subtree rooted at `source` and append the copy under
    /// `new_parent`. Returns the id of the copy's root.
    ///
    /// Every copied node gets a fresh id; names, contents and child order are
    /// kept. Copying a subtree into itself is rejected.
    pub fn clone_subtree(&mut self, source: &NodeId, new_parent: &NodeId) -> Result<NodeId> {
        self.get(source)?;
        self.get(new_parent)?;
        if new_parent == source || self.is_descendant(new_parent, source) {
            return Err(Error::invalid(format!(
                "cannot copy {} into its own subtree",
                source
            )));
        }

        let order = self.descendants(source)?;
        let mut taken = HashSet::with_capacity(order.len());
        let mut mapping = HashMap::with_capacity(order.len());
        for old in &order {
            let new = self.fresh_id(&taken);
            taken.insert(new.clone());
            mapping.insert(old.clone(), new);
        }

        let mut copies = Vec::with_capacity(order.len());
        for old in &order {
            let original = self.get(old)?;
            let parent = if old == source {
                new_parent.clone()
            } else {
                original
                    .parent
                    .as_ref()
                    .and_then(|p| mapping.get(p))
                    .cloned()
                    .ok_or_else(|| Error::invalid(format!("node {} has a broken parent", old)))?
            };
            let children = original
                .children
                .iter()
                .map(|c| mapping[c].clone())
                .collect();
            copies.push((
                mapping[old].clone(),
                Node {
                    name: original.name.clone(),
                    parent: Some(parent),
                    children,
                    contents: original.contents.clone(),
                },
            ));
        }

        let new_root = mapping[source].clone();
        self.nodes.extend(copies);
        self.get_mut(new_parent)?.children.push(new_root.clone());

        Ok(new_root)
    }

    /// Replace the child order of `parent` with `new_order`, which must be a
    /// permutation of the current children.
    pub fn reorder_children(&mut self, parent: &NodeId, new_order: &[NodeId]) -> Result<()> {
        let current = &self.get(parent)?.children;

        let proposed: HashSet<&NodeId> = new_order.iter().collect();
        if proposed.len() != new_order.len() {
            return Err(Error::invalid("new order contains duplicate ids"));
        }
        if new_order.len() != current.len() {
            return Err(Error::invalid(format!(
                "new order has {} ids but {} has {} children",
                new_order.len(),
                parent,
                current.len()
            )));
        }
        if let Some(missing) = current.iter().find(|c| !proposed.contains(c)) {
            return Err(Error::invalid(format!("new order is missing child {}", missing)));
        }

        self.get_mut(parent)?.children = new_order.to_vec();
        Ok(())
    }

    pub fn set_contents(&mut self, id: &NodeId, contents: Vec<ContentItem>) -> Result<()> {
        self.get_mut(id)?.contents = contents;
        Ok(())
    }

    pub fn append_contents(&mut self, id: &NodeId, contents: Vec<ContentItem>) -> Result<()> {
        self.get_mut(id)?.contents.extend(contents);
        Ok(())
    }

    pub fn clear_contents(&mut self, id: &NodeId) -> Result<()> {
        self.get_mut(id)?.contents.clear();
        Ok(())
    }

    /// Check the structural invariants: one root, every other node listed by
    /// exactly the parent it names, no dangling child ids, no cycles.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        let roots: Vec<&NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(id, _)| id)
            .collect();
        let root = match roots.as_slice() {
            [] => return Err(InvariantViolation::NoRoot),
            [root] => *root,
            many => return Err(InvariantViolation::MultipleRoots(many.len())),
        };

        let mut listed: HashSet<&NodeId> = HashSet::with_capacity(self.nodes.len());
        for (id, node) in &self.nodes {
            for child in &node.children {
                let Some(child_node) = self.nodes.get(child) else {
                    return Err(InvariantViolation::DanglingChild {
                        parent: id.clone(),
                        child: child.clone(),
                    });
                };
                if child_node.parent.as_ref() != Some(id) {
                    return Err(InvariantViolation::ParentMismatch {
                        child: child.clone(),
                        listed_by: id.clone(),
                        actual: child_node.parent.clone(),
                    });
                }
                if !listed.insert(child) {
                    return Err(InvariantViolation::SharedChild(child.clone()));
                }
            }
        }

        if let Some(orphan) = self.nodes.keys().find(|id| *id != root && !listed.contains(id)) {
            return Err(InvariantViolation::Orphan(orphan.clone()));
        }

        // With one listing per node, anything the root cannot reach sits on a
        // cycle.
        let mut seen: HashSet<&NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                if let Some(node) = self.nodes.get(id) {
                    stack.extend(node.children.iter());
                }
            }
        }
        if let Some(unreachable) = self.nodes.keys().find(|id| !seen.contains(id)) {
            return Err(InvariantViolation::Unreachable(unreachable.clone()));
        }

        Ok(())
    }
}
