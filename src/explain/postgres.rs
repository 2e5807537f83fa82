//! PostgreSQL-style JSON explain adapter, shared with DuckDB.
//!
//! The payload is a top-level array whose first element carries the `Plan`
//! tree; children nest under `Plans` and the node type lives in
//! `Node Type`. Actual row counts are reported per loop and corrected here.

use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::debug;

use crate::error::{ExplainError, Result};
use crate::explain::flip_join_children;
use crate::plan::{
    Column, GroupStrategy, JoinStrategy, JoinType, Node, NodeKind, Plan, ScanStrategy, Sorting,
    UnionType,
};
use crate::tree::{NodeId, Tree};

fn text(json: &Value, key: &str) -> Option<String> {
    json.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number(json: &Value, key: &str) -> Option<f64> {
    json.get(key).and_then(Value::as_f64)
}

fn node_type(json: &Value) -> Result<String> {
    text(json, "Node Type").ok_or_else(|| {
        ExplainError::MalformedPayload("explain node is missing 'Node Type'".to_string())
    })
}

fn scan_relation(json: &Value) -> String {
    // The alias wins so self-joined tables stay distinguishable.
    text(json, "Alias")
        .or_else(|| text(json, "Relation Name"))
        .unwrap_or_default()
}

/// Maps one native node onto a canonical one; `None` means "no mapping,
/// skip transparently".
///
/// The returned flag tells whether per-loop correction applies; a
/// single-threaded sequential scan reports true totals already.
fn create_node(json: &Value) -> Result<Option<(Node, bool)>> {
    let pg_type = node_type(json)?;
    let mut needs_loop_correction = true;

    let mut node = match pg_type.as_str() {
        "Seq Scan" | "Index Scan" | "Index Only Scan" => {
            if pg_type == "Seq Scan"
                && json.get("Parallel Aware").and_then(Value::as_bool) == Some(false)
            {
                needs_loop_correction = false;
            }
            let strategy = if pg_type == "Seq Scan" {
                ScanStrategy::Scan
            } else {
                ScanStrategy::Seek
            };
            Node::new(NodeKind::Scan {
                table_name: scan_relation(json),
                strategy,
            })
        }
        "Bitmap Heap Scan" | "Bitmap Index Scan" => {
            // Bitmap index operations chain arbitrarily deep; only the top
            // heap scan carries the relation and stands for the whole stack.
            let relation = scan_relation(json);
            if relation.is_empty() {
                return Ok(None);
            }
            Node::new(NodeKind::Scan {
                table_name: relation,
                strategy: ScanStrategy::Seek,
            })
        }
        "Hash Join" | "Nested Loop" | "Merge Join" => {
            let mut condition = String::new();
            let strategy = match pg_type.as_str() {
                "Hash Join" => JoinStrategy::Hash,
                "Merge Join" => {
                    condition = text(json, "Merge Cond").unwrap_or_default();
                    JoinStrategy::Merge
                }
                _ => {
                    // A loop join correlates an inner index seek against
                    // outer references; the condition lives on the seek.
                    if let Some(inner) = json.get("Plans").and_then(|p| p.get(1)) {
                        if text(inner, "Node Type").as_deref() == Some("Index Scan") {
                            condition = text(inner, "Index Cond").unwrap_or_default();
                        }
                    }
                    JoinStrategy::Loop
                }
            };
            if let Some(filter) = text(json, "Join Filter") {
                if condition.is_empty() {
                    condition = filter;
                } else {
                    condition = format!("{condition} AND {filter}");
                }
            }
            if let Some(hash_cond) = text(json, "Hash Cond") {
                condition = hash_cond;
            }
            let mut join_type = match text(json, "Join Type") {
                Some(native) => JoinType::from_native(&native)?,
                None => JoinType::Inner,
            };
            if condition.is_empty() {
                // No notion of a cross join here, just a loop join without
                // a condition.
                join_type = JoinType::Cross;
            }
            Node::join(join_type, strategy, &condition)?
        }
        "Sort" => {
            let mut columns_sorted = Vec::new();
            if let Some(keys) = json.get("Sort Key").and_then(Value::as_array) {
                for key in keys {
                    let mut name = key.as_str().unwrap_or_default().to_string();
                    let mut sorting = Sorting::Asc;
                    // Descending keys end in a literal " DESC".
                    if let Some(stripped) = name.strip_suffix(" DESC") {
                        name = stripped.to_string();
                        sorting = Sorting::Desc;
                    }
                    columns_sorted.push(Column::with_sorting(&name, sorting)?);
                }
            }
            Node::new(NodeKind::Sort { columns_sorted })
        }
        "Limit" => Node::new(NodeKind::Limit {
            limit_count: number(json, "Plan Rows").unwrap_or(-1.0) as i64,
        }),
        "Aggregate" => {
            let strategy = match text(json, "Strategy").as_deref() {
                Some("Hashed") => GroupStrategy::Hash,
                Some("Sorted") => GroupStrategy::SortMerge,
                Some("Plain") => GroupStrategy::Simple,
                Some(other) => {
                    return Err(ExplainError::UnknownNodeType {
                        node_type: format!("GROUP BY strategy '{other}'"),
                    })
                }
                // The strategy key is only present alongside hashing or an
                // aggregate output; grouped output without it means sorted.
                None if json.get("Group Key").is_some() => GroupStrategy::SortMerge,
                None => GroupStrategy::Unknown,
            };
            let mut group_keys = Vec::new();
            if let Some(keys) = json.get("Group Key").and_then(Value::as_array) {
                for key in keys {
                    group_keys.push(Column::new(key.as_str().unwrap_or_default())?);
                }
            }
            let mut aggregates = Vec::new();
            if let Some(output) = json.get("Output").and_then(Value::as_array) {
                let key_set: FxHashSet<&Column> = group_keys.iter().collect();
                for column in output {
                    let column = Column::new(column.as_str().unwrap_or_default())?;
                    if !key_set.contains(&column) {
                        aggregates.push(column);
                    }
                }
            }
            Node::new(NodeKind::GroupBy {
                strategy,
                group_keys,
                aggregates,
            })
        }
        "Result" => Node::new(NodeKind::Select),
        "Append" => Node::new(NodeKind::Union {
            union_type: UnionType::All,
        }),
        // A dedicated node for distinct unions over sorted inputs.
        "Merge Append" => Node::new(NodeKind::Union {
            union_type: UnionType::Distinct,
        }),
        _ => return Ok(None),
    };

    if let Some(cost) = number(json, "Total Cost") {
        node.cost = cost;
    }
    if let Some(estimated) = number(json, "Plan Rows") {
        node.rows_estimated = estimated;
    }
    if let Some(actual) = number(json, "Actual Rows") {
        node.rows_actual = actual;
    }

    // Actual rows are an integer AVERAGE per loop, so they round down to
    // zero on short inner loops; floor the corrected value at the loop
    // count instead. Estimates are scaled the same way to keep the
    // estimate/actual comparison fair.
    if needs_loop_correction {
        if let Some(loops) = number(json, "Actual Loops") {
            node.rows_actual = (node.rows_actual * loops).max(loops);
            node.rows_estimated *= loops;
        }
    }

    if let Some(filter) = text(json, "Filter") {
        node.set_filter(&filter)?;
    }

    if let Some(output) = json.get("Output").and_then(Value::as_array) {
        for column in output {
            node.columns_output
                .push(crate::expr::clean_expression(column.as_str().unwrap_or_default())?);
        }
    }

    Ok(Some((node, needs_loop_correction)))
}

fn is_bitmap_type(pg_type: &str) -> bool {
    matches!(
        pg_type,
        "BitmapAnd" | "BitmapOr" | "Bitmap Index Scan" | "Bitmap Heap Scan"
    )
}

/// Builds the subtree for one native node, skipping unmapped wrappers.
fn build_node(tree: &mut Tree<Node>, json: &Value) -> Result<Option<NodeId>> {
    let mut current = json;
    let mut created = create_node(current)?;

    if created.is_none() && is_bitmap_type(&node_type(current)?) {
        // A lower bitmap operation; the top heap scan already stands in.
        return Ok(None);
    }

    while created.is_none() {
        let pg_type = node_type(current)?;
        let children = current.get("Plans").and_then(Value::as_array);
        let children = children.ok_or_else(|| ExplainError::UnmappedLeaf {
            node_type: pg_type.clone(),
        })?;
        if children.len() > 1 {
            return Err(ExplainError::AmbiguousSkip {
                node_type: pg_type,
                children: children.len(),
            });
        }
        debug!(node_type = %pg_type, "skipping unmapped explain node");
        current = &children[0];
        created = create_node(current)?;
    }

    let (node, _) = created.expect("loop above only exits with a node");
    let id = tree.push(node);

    if let Some(children) = current.get("Plans").and_then(Value::as_array) {
        let last = children.len().saturating_sub(1);
        for (i, child_json) in children.iter().enumerate() {
            let Some(child) = build_node(tree, child_json)? else {
                continue;
            };
            // Init plans surface as extra aggregate children; only the last
            // child is the real input.
            if matches!(tree.get(child).kind, NodeKind::GroupBy { .. }) && i != last {
                debug!("dropping init-plan aggregate child");
                continue;
            }
            tree.add_child(id, child);
        }
    }

    Ok(Some(id))
}

/// Builds a canonical plan from PostgreSQL-style explain JSON.
pub fn build_plan(payload: &str) -> Result<Plan> {
    let json: Value = serde_json::from_str(payload)
        .map_err(|e| ExplainError::MalformedPayload(format!("invalid explain JSON: {e}")))?;

    let top = json
        .get(0)
        .filter(|t| t.get("Plan").is_some())
        .ok_or_else(|| {
            ExplainError::MalformedPayload(
                "expected a top-level array with a 'Plan' object".to_string(),
            )
        })?;

    let mut tree = Tree::new();
    let root = build_node(&mut tree, &top["Plan"])?.ok_or_else(|| {
        ExplainError::MalformedPayload("could not construct a plan from the payload".to_string())
    })?;

    // Hash and merge joins report build and probe reversed.
    flip_join_children(&mut tree, root);

    let mut plan = Plan::new(tree, root);
    plan.planning_time = number(top, "Planning Time").unwrap_or(0.0);
    plan.execution_time = number(top, "Execution Time").unwrap_or(0.0);
    Ok(plan)
}
