//! Canonical query-plan representation.
//!
//! A [`Plan`] owns exactly one operator tree built by one of the explain
//! adapters. Adapters mutate it in place during post-processing (pruning,
//! join flips, actual-row backfill); afterwards the statistics and render
//! layers read it only.

pub mod node;
pub mod sql;
pub mod stats;

pub use node::{
    Column, DistributeStrategy, GroupStrategy, JoinStrategy, JoinType, Node, NodeKind,
    ScanStrategy, Sorting, UnionType,
};
pub use stats::{cutoff, MisEstimation, Operation, RowCount};

use crate::error::{ExplainError, Result};
use crate::tree::{NodeId, Tree};

/// An engine-agnostic query plan.
#[derive(Debug)]
pub struct Plan {
    tree: Tree<Node>,
    root: NodeId,
    /// Time the engine spent planning, in milliseconds; 0 when unreported.
    pub planning_time: f64,
    /// Time the engine spent executing, in milliseconds; 0 when unreported.
    pub execution_time: f64,
}

impl Plan {
    /// Wraps a built tree. Structural invariants are checked lazily by the
    /// statistics and render passes, after adapter post-processing ran.
    pub fn new(tree: Tree<Node>, root: NodeId) -> Self {
        Plan {
            tree,
            root,
            planning_time: 0.0,
            execution_time: 0.0,
        }
    }

    /// Root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The underlying tree.
    pub fn tree(&self) -> &Tree<Node> {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut Tree<Node> {
        &mut self.tree
    }

    /// Shorthand node access.
    pub fn node(&self, id: NodeId) -> &Node {
        self.tree.get(id)
    }

    /// Shorthand mutable node access.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.tree.get_mut(id)
    }

    /// Checks the arity invariants every downstream pass relies on: a join
    /// has exactly two children, a union at least two.
    ///
    /// A violation means a defective adapter, never valid input, so it is a
    /// hard error rather than a silent skip.
    pub fn validate(&self) -> Result<()> {
        for id in self.tree.depth_first(self.root) {
            let children = self.tree.children(id).len();
            match self.tree.get(id).kind {
                NodeKind::Join { .. } if children != 2 => {
                    return Err(ExplainError::ChildArity {
                        kind: "JOIN",
                        found: children,
                        expected: 2,
                    });
                }
                NodeKind::Union { .. } if children < 2 => {
                    return Err(ExplainError::ChildArity {
                        kind: "UNION",
                        found: children,
                        expected: 2,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}
