//! Terminal rendering of a plan tree.
//!
//! Two modes: a compact symbolic form using relational-algebra glyphs, and a
//! plain-English "muggle" form. Both walk the tree depth-first with an
//! explicit stack of split frames so join build sides indent under their
//! join while the probe side stays at the parent's indentation.

use std::fmt::{self, Write};

use crate::error::Result;
use crate::plan::{cutoff, Column, NodeKind, Plan, RowCount, Sorting};
use crate::tree::NodeId;

/// Marker appended when a list is cut to fit the terminal.
pub(crate) const ELLIPSIS: &str = "...";

/// Output flavour of [`Plan::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Relational-algebra glyphs.
    Symbolic,
    /// Plain English.
    Muggle,
}

/// Truncates `s` to `max_width` characters, ending in `...` when cut.
pub(crate) fn ellipsify(s: &str, max_width: usize) -> String {
    let length = s.chars().count();
    if length <= max_width {
        return s.to_string();
    }
    if max_width <= ELLIPSIS.len() {
        return ELLIPSIS.to_string();
    }
    let kept: String = s.chars().take(max_width - ELLIPSIS.len()).collect();
    format!("{kept}{ELLIPSIS}")
}

/// Joins column names with `delimiter` up to `max_width` characters,
/// optionally appending sort order.
pub(crate) fn join_columns(
    columns: &[Column],
    delimiter: &str,
    max_width: usize,
    with_order: bool,
) -> String {
    let max_width = if max_width == 0 { usize::MAX } else { max_width };
    let mut result = String::new();
    for (i, column) in columns.iter().enumerate() {
        let mut piece = String::new();
        if i > 0 {
            piece.push_str(delimiter);
        }
        piece.push_str(&column.name);
        if with_order && column.sorting != Sorting::Random {
            piece.push(' ');
            piece.push_str(&column.sorting.to_string());
        }
        let remaining = max_width.saturating_sub(result.chars().count());
        if i > 0 && remaining <= ELLIPSIS.len() + delimiter.len() {
            result.push_str(ELLIPSIS);
            break;
        }
        result.push_str(&ellipsify(&piece, remaining));
    }
    result
}

/// Width every rendered count is padded to.
const COUNT_WIDTH: usize = 8;

/// Renders a row count as a fixed-width, human-abbreviated figure.
///
/// Plain digits below 10^8, `M`/`B`/`T` above, a single `∞` for unknown or
/// overflowing counts; always exactly [`COUNT_WIDTH`] glyphs, left-padded.
pub fn pretty_human_count(count: RowCount) -> String {
    let text = match count {
        RowCount::Unknown => "∞".to_string(),
        RowCount::Exact(n) => {
            if n < 100_000_000 {
                n.to_string()
            } else if n < 100_000_000_000 {
                format!("{}M", n / 1_000_000)
            } else if n < 100_000_000_000_000 {
                format!("{}B", n / 1_000_000_000)
            } else if n < 100_000_000_000_000_000 {
                format!("{}T", n / 1_000_000_000_000)
            } else {
                "∞".to_string()
            }
        }
    };
    let length = text.chars().count();
    let mut padded = String::new();
    for _ in length..COUNT_WIDTH {
        padded.push(' ');
    }
    padded.push_str(&text);
    padded
}

impl Plan {
    fn is_ancestor(&self, ancestor: NodeId, mut id: NodeId) -> bool {
        while let Some(parent) = self.tree().parent(id) {
            if parent == ancestor {
                return true;
            }
            id = parent;
        }
        false
    }

    /// Renders the plan tree into `out`.
    ///
    /// `max_width` limits each line; 0 means unlimited. Fails when the tree
    /// violates join/union arity.
    pub fn render_to(
        &self,
        out: &mut dyn fmt::Write,
        max_width: usize,
        mode: RenderMode,
    ) -> Result<()> {
        self.validate()?;

        struct Frame {
            node: NodeId,
            indent: String,
        }
        let mut frames: Vec<Frame> = Vec::new();

        for id in self.tree().depth_first(self.root()) {
            // Coming back up the tree: drop frames we are no longer under.
            while let Some(frame) = frames.last() {
                if self.is_ancestor(frame.node, id) {
                    break;
                }
                frames.pop();
            }
            // Joins only indent the build side; the frame is popped on
            // reaching the probe so it renders at the join's indentation.
            if let Some(frame) = frames.last() {
                if matches!(self.node(frame.node).kind, NodeKind::Join { .. })
                    && self.tree().parent(id) == Some(frame.node)
                    && self.tree().last_child(frame.node) == Some(id)
                {
                    frames.pop();
                }
            }

            let mut prefix = String::new();
            for frame in &mut frames {
                let is_join = matches!(self.node(frame.node).kind, NodeKind::Join { .. });
                let is_union = matches!(self.node(frame.node).kind, NodeKind::Union { .. });
                if is_join && self.tree().first_child(frame.node) == Some(id) {
                    prefix.push_str("│└");
                } else if is_union && self.tree().last_child(frame.node) == Some(id) {
                    prefix.push_str("└─");
                    // Descendants of the last sibling get blank indentation
                    // instead of a vertical bar.
                    frame.indent = "  ".to_string();
                } else if is_union && self.tree().parent(id) == Some(frame.node) {
                    prefix.push_str("├─");
                } else {
                    prefix.push_str(&frame.indent);
                }
            }

            if self.tree().children(id).len() > 1 {
                frames.push(Frame {
                    node: id,
                    indent: "│ ".to_string(),
                });
            }

            let node = self.node(id);
            let estimated = pretty_human_count(cutoff(node.rows_estimated));
            let actual = pretty_human_count(cutoff(node.rows_actual));
            let budget = if max_width == 0 {
                usize::MAX
            } else {
                max_width.saturating_sub(prefix.chars().count() + 2 * COUNT_WIDTH + 2)
            };
            let text = match mode {
                RenderMode::Symbolic => node.compact_symbolic(),
                RenderMode::Muggle => node.render_muggle(budget),
            };
            writeln!(out, "{estimated} {actual} {prefix}{text}")
                .map_err(|_| crate::error::ExplainError::RenderWrite)?;
        }
        Ok(())
    }

    /// Renders the plan into a string.
    pub fn render(&self, max_width: usize, mode: RenderMode) -> Result<String> {
        let mut out = String::new();
        self.render_to(&mut out, max_width, mode)?;
        Ok(out)
    }
}
