//! Databricks adapter.
//!
//! Explain support is deferred: retrieving a usable plan requires scraping
//! the workspace query history, which belongs to the driver layer. Until
//! then every explain yields a placeholder plan, and the rest of the
//! pipeline tolerates its childless `Select` root.

use crate::plan::{Node, NodeKind, Plan};
use crate::tree::Tree;

/// A minimal plan standing in for deferred explain support.
pub fn placeholder_plan() -> Plan {
    let mut tree = Tree::new();
    let root = tree.push(Node::new(NodeKind::Select));
    Plan::new(tree, root)
}
