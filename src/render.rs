//! ASCII rendering of the content tree.

use crate::error::Result;
use crate::models::{Node, NodeId};
use crate::store::Tree;

const BRANCH: char = '▸';
const LEAF: char = '•';

/// Marker for a node: a triangle if it has children, a bullet otherwise.
fn node_symbol(node: &Node) -> char {
    if node.is_leaf() {
        LEAF
    } else {
        BRANCH
    }
}

fn label(node: &Node) -> String {
    match node.contents.len() {
        0 => node.name.clone(),
        1 => format!("{} (1 item)", node.name),
        n => format!("{} ({} items)", node.name, n),
    }
}

/// Render the subtree rooted at `from` as ASCII art.
///
/// Example output:
/// ```text
/// Home
/// ├── ▸ Courses
/// │   ├── • Algebra (3 items)
/// │   └── • Physics
/// └── • Contact (1 item)
/// ```
pub fn render_tree(tree: &Tree, from: &NodeId) -> Result<String> {
    let mut output = String::new();
    let root = tree.get(from)?;
    output.push_str(&label(root));
    output.push('\n');
    render_children(&mut output, tree, root, "")?;
    Ok(output)
}

fn render_children(output: &mut String, tree: &Tree, node: &Node, prefix: &str) -> Result<()> {
    for (i, child_id) in node.children.iter().enumerate() {
        let child = tree.get(child_id)?;
        let is_last = i == node.children.len() - 1;

        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
        output.push(node_symbol(child));
        output.push(' ');
        output.push_str(&label(child));
        output.push('\n');

        let continuation = if is_last { "    " } else { "│   " };
        render_children(output, tree, child, &format!("{}{}", prefix, continuation))?;
    }
    Ok(())
}
