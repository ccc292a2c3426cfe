use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id of the single parentless node.
pub const ROOT_ID: &str = "root";

/// Opaque, tree-unique node identifier.
///
/// The root is always `"root"`; every other node gets a UUID v4 string when it
/// is created or cloned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One item of node content.
///
/// Content belongs to the messaging layer (text, photos, documents, ...), so
/// the tree treats it as an opaque JSON value and only ever copies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentItem(pub serde_json::Value);

impl ContentItem {
    /// The `"type"` tag the messaging layer stores on each item, if any.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(|v| v.as_str())
    }
}

impl From<serde_json::Value> for ContentItem {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A node of the content tree, as stored in the store record.
///
/// The node's own id is the key it is stored under, so it is not repeated
/// here. Use [`NodeView`] when the id has to travel with the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// `None` only for the root.
    pub parent: Option<NodeId>,
    /// Child ids in presentation order.
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub contents: Vec<ContentItem>,
}

impl Node {
    pub fn new(name: impl Into<String>, parent: Option<NodeId>) -> Self {
        Self {
            name: name.into(),
            parent,
            children: Vec::new(),
            contents: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A node together with its id, used for API responses.
///
/// The `node` fields are flattened into the JSON object next to `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: NodeId,
    #[serde(flatten)]
    pub node: Node,
}

/// Input for creating a child node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeInput {
    pub name: String,
}

/// Input for renaming a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameNodeInput {
    pub name: String,
}

/// Input for cloning a subtree under a new parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneSubtreeInput {
    pub parent_id: NodeId,
}

/// Input for reordering a node's children.
///
/// `children` must be an exact permutation of the current child list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderChildrenInput {
    pub children: Vec<NodeId>,
}

/// Input for replacing or extending a node's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentsInput {
    pub contents: Vec<ContentItem>,
}

/// Result of deleting a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedSubtree {
    /// Every removed id, the subtree root first.
    pub removed: Vec<NodeId>,
}
