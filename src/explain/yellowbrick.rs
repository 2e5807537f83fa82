//! Yellowbrick XML explain adapter.
//!
//! The friendliest of the native formats: elements map onto canonical
//! operators nearly 1:1 and row statistics sit in `estimate`/`actual`
//! attributes directly on each element. Only the usual hash/merge join
//! build-probe flip is needed after the tree is built.

use roxmltree::{Document, Node as XmlNode};
use tracing::debug;

use crate::error::{ExplainError, Result};
use crate::plan::{
    Column, DistributeStrategy, GroupStrategy, JoinStrategy, JoinType, Node, NodeKind, Plan,
    ScanStrategy, Sorting,
};
use crate::tree::{NodeId, Tree};
use crate::explain::flip_join_children;

fn attribute(node: XmlNode<'_, '_>, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

fn number(node: XmlNode<'_, '_>, name: &str) -> Option<f64> {
    node.attribute(name).and_then(|v| v.parse().ok())
}

/// Splits a comma-separated column attribute, cleaning each entry.
fn column_list(raw: &str) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    for piece in raw.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        columns.push(Column::new(piece)?);
    }
    Ok(columns)
}

/// Splits sort columns carrying an optional trailing `asc`/`desc`.
fn sorted_column_list(raw: &str) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    for piece in raw.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (name, sorting) = match piece.to_ascii_lowercase() {
            lower if lower.ends_with(" desc") => (&piece[..piece.len() - 5], Sorting::Desc),
            lower if lower.ends_with(" asc") => (&piece[..piece.len() - 4], Sorting::Asc),
            _ => (piece, Sorting::Asc),
        };
        columns.push(Column::with_sorting(name, sorting)?);
    }
    Ok(columns)
}

fn create_node(node_xml: XmlNode<'_, '_>) -> Result<Option<Node>> {
    let tag = node_xml.tag_name().name();

    let mut node = match tag {
        "scan" => {
            let strategy = if attribute(node_xml, "strategy").eq_ignore_ascii_case("seek") {
                ScanStrategy::Seek
            } else {
                ScanStrategy::Scan
            };
            let mut node = Node::new(NodeKind::Scan {
                table_name: attribute(node_xml, "table"),
                strategy,
            });
            let filter = attribute(node_xml, "filter");
            if !filter.is_empty() {
                node.set_filter(&filter)?;
            }
            node
        }
        "scan_empty" => Node::new(NodeKind::ScanEmpty),
        "scan_materialised" => Node::new(NodeKind::ScanMaterialised),
        "join" => {
            let strategy = match attribute(node_xml, "strategy").to_ascii_lowercase().as_str() {
                "loop" => JoinStrategy::Loop,
                "merge" => JoinStrategy::Merge,
                _ => JoinStrategy::Hash,
            };
            let join_type = JoinType::from_native(&attribute(node_xml, "type"))?;
            Node::join(join_type, strategy, &attribute(node_xml, "condition"))?
        }
        "group_by" => {
            let strategy = match attribute(node_xml, "strategy").to_ascii_lowercase().as_str() {
                "hash" => GroupStrategy::Hash,
                "sort" => GroupStrategy::SortMerge,
                "partial" => GroupStrategy::Partial,
                "simple" => GroupStrategy::Simple,
                _ => GroupStrategy::Unknown,
            };
            Node::new(NodeKind::GroupBy {
                strategy,
                group_keys: column_list(&attribute(node_xml, "keys"))?,
                aggregates: column_list(&attribute(node_xml, "aggregates"))?,
            })
        }
        "sort" => Node::new(NodeKind::Sort {
            columns_sorted: sorted_column_list(&attribute(node_xml, "columns"))?,
        }),
        "project" => Node::new(NodeKind::Projection {
            columns_projected: column_list(&attribute(node_xml, "columns"))?,
        }),
        "filter" => Node::selection(&attribute(node_xml, "condition"))?,
        "limit" => Node::new(NodeKind::Limit {
            limit_count: attribute(node_xml, "count").parse().unwrap_or(-1),
        }),
        "distribute" => {
            let strategy = match attribute(node_xml, "strategy").to_ascii_lowercase().as_str() {
                "broadcast" => DistributeStrategy::Broadcast,
                "round_robin" => DistributeStrategy::RoundRobin,
                "gather" => DistributeStrategy::Gather,
                _ => DistributeStrategy::Hash,
            };
            Node::new(NodeKind::Distribute {
                strategy,
                columns: column_list(&attribute(node_xml, "columns"))?,
            })
        }
        "union" => Node::new(NodeKind::Union {
            union_type: if attribute(node_xml, "type").eq_ignore_ascii_case("distinct") {
                crate::plan::UnionType::Distinct
            } else {
                crate::plan::UnionType::All
            },
        }),
        "select" => Node::new(NodeKind::Select),
        "sequence" => Node::new(NodeKind::Sequence),
        _ => return Ok(None),
    };

    if let Some(estimated) = number(node_xml, "estimate") {
        node.rows_estimated = estimated;
    }
    if let Some(actual) = number(node_xml, "actual") {
        node.rows_actual = actual;
    }
    if let Some(cost) = number(node_xml, "cost") {
        node.cost = cost;
    }

    Ok(Some(node))
}

fn child_elements<'a, 'i>(node_xml: XmlNode<'a, 'i>) -> Vec<XmlNode<'a, 'i>> {
    node_xml.children().filter(|c| c.is_element()).collect()
}

fn build_node(tree: &mut Tree<Node>, node_xml: XmlNode<'_, '_>) -> Result<NodeId> {
    let mut current = node_xml;
    let mut created = create_node(current)?;

    while created.is_none() {
        let tag = current.tag_name().name().to_string();
        let children = child_elements(current);
        if children.is_empty() {
            return Err(ExplainError::UnmappedLeaf { node_type: tag });
        }
        if children.len() > 1 {
            return Err(ExplainError::AmbiguousSkip {
                node_type: tag,
                children: children.len(),
            });
        }
        debug!(node_type = %tag, "skipping unmapped explain node");
        current = children[0];
        created = create_node(current)?;
    }

    let node = created.expect("loop above only exits with a node");
    let id = tree.push(node);
    for child in child_elements(current) {
        let built = build_node(tree, child)?;
        tree.add_child(id, built);
    }
    Ok(id)
}

/// Builds a canonical plan from Yellowbrick explain XML.
pub fn build_plan(payload: &str) -> Result<Plan> {
    let document = Document::parse(payload).map_err(|e| {
        ExplainError::MalformedPayload(format!("explain XML failed to parse: {e}"))
    })?;

    let plan_element = document.root_element();
    let operator = child_elements(plan_element)
        .into_iter()
        .next()
        .ok_or_else(|| {
            ExplainError::MalformedPayload("explain XML carries no operators".to_string())
        })?;

    let mut tree = Tree::new();
    let root = build_node(&mut tree, operator)?;
    flip_join_children(&mut tree, root);

    let mut plan = Plan::new(tree, root);
    plan.planning_time = number(plan_element, "planning_time").unwrap_or(0.0);
    plan.execution_time = number(plan_element, "execution_time").unwrap_or(0.0);
    Ok(plan)
}
