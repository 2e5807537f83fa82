//! ClickHouse JSON explain adapter.
//!
//! The native explain reports no actual row counts at all, replicates
//! broadcast subtrees into every consuming branch, and disguises semi/anti
//! joins as outer joins over an `EXISTS()` filter. Three post-build passes
//! put that right: broadcast pruning, semi-join reconstruction, and a
//! per-node `COUNT(*)` backfill through the query runner. The backfill
//! round trips dominate the cost of explaining on this engine.

use std::sync::OnceLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{ExplainError, Result};
use crate::explain::{flip_join_children, splice_out};
use crate::expr::remove_expression_function;
use crate::plan::{
    Column, GroupStrategy, JoinStrategy, JoinType, Node, NodeKind, Plan, ScanStrategy, Sorting,
};
use crate::runner::QueryRunner;
use crate::tree::{NodeId, Tree};

/// Rows per ClickHouse index granule, used to approximate scan actuals
/// before backfill overwrites them.
const GRANULE_SIZE: f64 = 8192.0;

fn table_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"__table\d+\.*").expect("static regex"))
}

/// Strips the `__tableN.` prefixes ClickHouse puts on column names; they
/// point at nothing recoverable.
fn sanitise_column(nonsense: &str) -> String {
    table_prefix_regex().replace_all(nonsense, "").into_owned()
}

fn text(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_projections(json: &Value) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    let Some(actions) = json.get("Actions").and_then(Value::as_array) else {
        return Ok(columns);
    };
    for action in actions {
        let action_type = text(action, "Node Type").unwrap_or_default();
        match action_type.as_str() {
            "INPUT" => continue,
            "COLUMN" => {
                let column = sanitise_column(&text(action, "Column").unwrap_or_default());
                columns.push(Column::new(&column)?);
            }
            "FUNCTION" => {
                let function = sanitise_column(&text(action, "Function Name").unwrap_or_default());
                columns.push(Column::new(&function)?);
            }
            other => {
                return Err(ExplainError::UnknownNodeType {
                    node_type: format!("projection action '{other}'"),
                })
            }
        }
    }
    Ok(columns)
}

fn parse_sorting(json: &Value) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    let Some(description) = json.get("Sort Description").and_then(Value::as_array) else {
        return Ok(columns);
    };
    for entry in description {
        let name = sanitise_column(&text(entry, "Column").unwrap_or_default());
        let sorting = if entry.get("Ascending").and_then(Value::as_bool).unwrap_or(true) {
            Sorting::Asc
        } else {
            Sorting::Desc
        };
        columns.push(Column::with_sorting(&name, sorting)?);
    }
    Ok(columns)
}

fn parse_group_keys(json: &Value) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    if let Some(keys) = json.get("Keys") {
        let keys = keys.as_array().ok_or_else(|| {
            ExplainError::MalformedPayload("expected group-by keys to be an array".to_string())
        })?;
        for key in keys {
            columns.push(Column::new(&sanitise_column(key.as_str().unwrap_or_default()))?);
        }
    }
    Ok(columns)
}

fn parse_aggregations(json: &Value) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    if let Some(aggregations) = json.get("Aggregations") {
        let aggregations = aggregations.as_array().ok_or_else(|| {
            ExplainError::MalformedPayload("expected aggregations to be an array".to_string())
        })?;
        for aggregation in aggregations {
            let name = sanitise_column(&text(aggregation, "Name").unwrap_or_default());
            columns.push(Column::new(&name)?);
        }
    }
    Ok(columns)
}

fn parse_clauses(clauses: &Value) -> String {
    let raw = match clauses {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|i| i.as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>()
            .join(" AND "),
        _ => String::new(),
    };
    sanitise_column(&raw)
}

fn create_node(json: &Value) -> Result<Option<Node>> {
    let node_type = text(json, "Node Type").ok_or_else(|| {
        ExplainError::MalformedPayload("explain node is missing 'Node Type'".to_string())
    })?;

    let mut node = match node_type.as_str() {
        "Expression" => {
            let columns_projected = parse_projections(json)?;
            if columns_projected.is_empty() {
                // A projection that merely reorganises column order.
                return Ok(None);
            }
            Node::new(NodeKind::Projection { columns_projected })
        }
        "ReadFromMergeTree" => Node::new(NodeKind::Scan {
            table_name: text(json, "Description").unwrap_or_default(),
            strategy: ScanStrategy::Scan,
        }),
        "Sorting" => Node::new(NodeKind::Sort {
            columns_sorted: parse_sorting(json)?,
        }),
        "Aggregating" => Node::new(NodeKind::GroupBy {
            strategy: GroupStrategy::Hash,
            group_keys: parse_group_keys(json)?,
            aggregates: parse_aggregations(json)?,
        }),
        "Limit" => Node::new(NodeKind::Limit {
            limit_count: json.get("Limit").and_then(Value::as_i64).unwrap_or(-1),
        }),
        "Filter" => {
            let condition = sanitise_column(&text(json, "Filter Column").unwrap_or_default());
            Node::selection(&condition)?
        }
        "Join" => {
            let strategy = if text(json, "Algorithm").unwrap_or_default().contains("Hash") {
                JoinStrategy::Hash
            } else {
                JoinStrategy::Loop
            };
            let condition = json
                .get("Clauses")
                .map(parse_clauses)
                .unwrap_or_default();
            let join_type = JoinType::from_native(&text(json, "Type").unwrap_or_default())?;
            Node::join(join_type, strategy, &condition)?
        }
        // Prep nodes that just construct layouts for later joins.
        "CreatingSets" => return Ok(None),
        _ => return Ok(None),
    };

    // Index statistics give a usable scan approximation even before
    // backfill; backfill overwrites it.
    if let Some(indexes) = json.get("Indexes").and_then(Value::as_array) {
        if let Some(granules) = indexes
            .first()
            .and_then(|i| i.get("Selected Granules"))
            .and_then(Value::as_f64)
        {
            node.rows_actual = granules * GRANULE_SIZE;
        }
    }

    Ok(Some(node))
}

fn native_id(json: &Value) -> Option<i64> {
    json.get("Node Id").and_then(Value::as_i64)
}

fn build_node(
    tree: &mut Tree<Node>,
    ids: &mut FxHashMap<NodeId, i64>,
    json: &Value,
) -> Result<NodeId> {
    let mut current = json;
    let mut created = create_node(current)?;

    while created.is_none() {
        let node_type = text(current, "Node Type").unwrap_or_default();
        let children = current
            .get("Plans")
            .and_then(Value::as_array)
            .ok_or_else(|| ExplainError::UnmappedLeaf {
                node_type: node_type.clone(),
            })?;
        if children.len() > 1 {
            return Err(ExplainError::AmbiguousSkip {
                node_type,
                children: children.len(),
            });
        }
        debug!(node_type = %node_type, "skipping unmapped explain node");
        current = &children[0];
        created = create_node(current)?;
    }

    let node = created.expect("loop above only exits with a node");
    let id = tree.push(node);
    if let Some(native) = native_id(current) {
        ids.insert(id, native);
    }

    if let Some(children) = current.get("Plans").and_then(Value::as_array) {
        for child_json in children {
            let child = build_node(tree, ids, child_json)?;
            tree.add_child(id, child);
        }
    }

    Ok(id)
}

/// Drops all but the shallowest occurrence of every replicated subtree,
/// then splices out the joins and unions the removals left under-filled.
///
/// The native format copies a broadcast subtree into every branch that
/// consumes it; occurrences share a native node id.
fn prune_broadcasts(
    tree: &mut Tree<Node>,
    mut root: NodeId,
    ids: &FxHashMap<NodeId, i64>,
) -> Result<NodeId> {
    // Depths are taken before any removal so later groups are not skewed
    // by earlier detachments.
    let mut by_native: FxHashMap<i64, Vec<(NodeId, usize)>> = FxHashMap::default();
    for id in tree.depth_first(root) {
        if let Some(native) = ids.get(&id) {
            let depth = tree.depth(id);
            by_native.entry(*native).or_default().push((id, depth));
        }
    }

    for (native, occurrences) in by_native {
        if occurrences.len() < 2 {
            continue;
        }
        let keep = occurrences
            .iter()
            .min_by_key(|(_, depth)| *depth)
            .map(|(id, _)| *id)
            .expect("at least two occurrences");
        for (id, _) in occurrences {
            if id != keep {
                debug!(native, "pruning replicated broadcast subtree");
                tree.remove(id);
            }
        }
    }

    // Removals can leave joins with one input and unions with none;
    // resolve iteratively since each splice can expose the next.
    loop {
        let mut changed = false;
        let nodes: Vec<NodeId> = tree.depth_first(root).collect();
        for id in nodes {
            let children = tree.children(id).len();
            let under_filled = matches!(
                tree.get(id).kind,
                NodeKind::Join { .. } | NodeKind::Union { .. }
            ) && children < 2;
            if under_filled {
                if children == 1 {
                    root = splice_out(tree, root, id)?;
                } else if id == root {
                    return Err(ExplainError::MalformedPayload(
                        "broadcast pruning removed every input of the plan root".to_string(),
                    ));
                } else {
                    tree.remove(id);
                }
                changed = true;
            }
            if changed {
                break;
            }
        }
        if !changed {
            return Ok(root);
        }
    }
}

/// Finds the filter or scan predicate closest to the top of a subtree.
fn build_side_predicate(tree: &Tree<Node>, start: NodeId) -> Option<String> {
    for id in tree.depth_first(start) {
        match &tree.get(id).kind {
            NodeKind::Selection { filter_expression } if !filter_expression.is_empty() => {
                return Some(filter_expression.clone());
            }
            NodeKind::Scan { .. } if !tree.get(id).filter_condition.is_empty() => {
                return Some(tree.get(id).filter_condition.clone());
            }
            _ => {}
        }
    }
    None
}

/// Rewrites `LEFT OUTER` joins whose condition carries an `EXISTS()`
/// marker into the semi or anti joins they really are.
fn reconstruct_semi_joins(tree: &mut Tree<Node>, root: NodeId) -> Result<()> {
    let joins: Vec<NodeId> = tree.depth_first(root).collect();
    for id in joins {
        let NodeKind::Join {
            strategy,
            join_type: JoinType::LeftOuter,
            condition,
        } = &tree.get(id).kind
        else {
            continue;
        };
        if !condition.contains("EXISTS(") {
            continue;
        }
        let strategy = *strategy;

        let predicate = tree
            .first_child(id)
            .and_then(|build| build_side_predicate(tree, build))
            .unwrap_or_else(|| condition.clone());
        let negated = predicate.contains("NOT EXISTS(");
        let stripped = remove_expression_function(&predicate, "EXISTS")?;
        let join_type = if negated {
            JoinType::LeftAnti
        } else {
            JoinType::LeftSemiInner
        };
        debug!(
            anti = negated,
            "collapsing disguised semi-join from EXISTS filter"
        );
        tree.get_mut(id).kind = NodeKind::Join {
            strategy,
            join_type,
            condition: stripped,
        };
    }
    Ok(())
}

/// Recomputes the actual row count of every node with one `COUNT(*)`
/// round trip per node, strictly sequential in depth-first order.
fn backfill_actual_rows(plan: &mut Plan, runner: &mut dyn QueryRunner) -> Result<()> {
    let nodes: Vec<NodeId> = plan.tree().depth_first(plan.root()).collect();
    for id in nodes {
        let statement = plan.count_sql(id)?;
        debug!(node = id.index(), "backfilling actual rows");
        let scalar = runner.fetch_scalar(&statement)?;
        if let Some(count) = scalar.as_count() {
            plan.node_mut(id).rows_actual = count as f64;
        }
    }
    Ok(())
}

/// Builds a canonical plan from ClickHouse explain JSON.
pub fn build_plan(payload: &str, runner: &mut dyn QueryRunner) -> Result<Plan> {
    let json: Value = serde_json::from_str(payload)
        .map_err(|e| ExplainError::MalformedPayload(format!("invalid explain JSON: {e}")))?;

    let top = json.get(0).ok_or_else(|| {
        ExplainError::MalformedPayload("explain output is supposed to be an array".to_string())
    })?;
    let plan_json = top.get("Plan").ok_or_else(|| {
        ExplainError::MalformedPayload("expected to find a 'Plan' object".to_string())
    })?;

    let mut tree = Tree::new();
    let mut ids = FxHashMap::default();
    let mut root = build_node(&mut tree, &mut ids, plan_json)?;

    flip_join_children(&mut tree, root);
    root = prune_broadcasts(&mut tree, root, &ids)?;
    reconstruct_semi_joins(&mut tree, root)?;

    let mut plan = Plan::new(tree, root);
    backfill_actual_rows(&mut plan, runner)?;
    Ok(plan)
}
