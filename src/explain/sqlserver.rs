//! SQL Server showplan XML adapter.
//!
//! Operators are `RelOp` elements dispatched on their `LogicalOp` and
//! `PhysicalOp` attributes. Actual rows hide under a per-thread runtime
//! counter element, projections never report them at all, and loop-join
//! predicates have to be reconstructed positionally from the inner seek.

use std::sync::OnceLock;

use regex::Regex;
use roxmltree::{Document, Node as XmlNode};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::{ExplainError, Result};
use crate::plan::{
    Column, GroupStrategy, JoinStrategy, JoinType, Node, NodeKind, Plan, ScanStrategy, Sorting,
};
use crate::tree::{NodeId, Tree};

fn bloom_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PROBE\(\[*Opt_Bitmap[0-9]+\]*,(.*)\)").expect("static regex"))
}

/// Rewrites bitmap-probe pseudo calls into `BLOOM(...)` markers, repeatedly
/// since probes nest.
fn clean_filter(filter: &str) -> String {
    let mut text = filter.to_string();
    loop {
        let replaced = bloom_regex().replace(&text, "BLOOM($1)").into_owned();
        if replaced == text {
            return text;
        }
        text = replaced;
    }
}

/// Drops bitmap probes entirely; used when a filter melts into a scan.
fn drop_bloom_probes(filter: &str) -> String {
    let mut text = filter.to_string();
    loop {
        let replaced = bloom_regex().replace(&text, "").into_owned();
        if replaced == text {
            return text;
        }
        text = replaced;
    }
}

fn element<'a, 'i>(node: XmlNode<'a, 'i>, name: &str) -> Option<XmlNode<'a, 'i>> {
    node.children()
        .find(|c| c.is_element() && c.has_tag_name(name))
}

fn elements<'a, 'i>(node: XmlNode<'a, 'i>, name: &'a str) -> impl Iterator<Item = XmlNode<'a, 'i>> {
    node.children()
        .filter(move |c| c.is_element() && c.has_tag_name(name))
}

fn attribute(node: XmlNode<'_, '_>, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

/// Fully qualified `database.schema.table.column` name of a reference.
fn qname(column_reference: XmlNode<'_, '_>) -> String {
    format!(
        "{}.{}.{}.{}",
        attribute(column_reference, "Database"),
        attribute(column_reference, "Schema"),
        attribute(column_reference, "Table"),
        attribute(column_reference, "Column")
    )
}

fn scalar_string(parent: XmlNode<'_, '_>) -> String {
    element(parent, "ScalarOperator")
        .map(|s| attribute(s, "ScalarString"))
        .unwrap_or_default()
}

/// Estimated rows from the RelOp, actuals from the per-thread counters.
fn parse_row_count(node: &mut Node, node_xml: XmlNode<'_, '_>) {
    node.rows_estimated = attribute(node_xml, "EstimateRows").parse().unwrap_or(0.0);
    if let Some(runtime) = element(node_xml, "RunTimeInformation") {
        if let Some(per_thread) = element(runtime, "RunTimeCountersPerThread") {
            node.rows_actual = attribute(per_thread, "ActualRows").parse().unwrap_or(f64::NAN);
        }
    }
}

/// An aggregate output column: the defining expression aliased to the
/// column it feeds.
fn defined_value_column(defined_value: XmlNode<'_, '_>) -> Result<Column> {
    let expression = crate::expr::clean_expression(&scalar_string(defined_value))?;
    match element(defined_value, "ColumnReference") {
        Some(reference) => Ok(Column::with_alias(expression, attribute(reference, "Column"))),
        None => Ok(Column {
            name: expression,
            alias: None,
            sorting: Sorting::Random,
        }),
    }
}

fn defined_values(container: XmlNode<'_, '_>) -> Result<Vec<Column>> {
    let mut columns = Vec::new();
    if let Some(values) = element(container, "DefinedValues") {
        for value in elements(values, "DefinedValue") {
            columns.push(defined_value_column(value)?);
        }
    }
    Ok(columns)
}

fn is_scan_op(physical_op: &str) -> bool {
    matches!(
        physical_op,
        "Clustered Index Scan" | "Clustered Index Seek" | "Table Scan" | "Index Scan" | "Index Seek"
    )
}

/// Zips the inner seek's range columns against the loop join's declared
/// outer references, in order, yielding `(inner, outer)` equality pairs.
fn extract_loop_join_pairs(
    inner_rel_op: XmlNode<'_, '_>,
    outer_refs: &FxHashSet<String>,
) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    let mut seek_predicates: Vec<XmlNode> = inner_rel_op
        .descendants()
        .filter(|d| d.has_tag_name("SeekPredicates"))
        .collect();
    if seek_predicates.is_empty() {
        seek_predicates = inner_rel_op
            .descendants()
            .filter(|d| d.has_tag_name("SeekPredicateNew"))
            .collect();
    }
    if seek_predicates.is_empty() {
        seek_predicates = inner_rel_op
            .descendants()
            .filter(|d| d.has_tag_name("Predicate"))
            .collect();
    }

    for seek_predicate in seek_predicates {
        let inner_columns: Vec<XmlNode> = seek_predicate
            .descendants()
            .filter(|d| d.has_tag_name("RangeColumns"))
            .flat_map(|r| r.children().filter(|c| c.has_tag_name("ColumnReference")))
            .collect();
        let outer_columns: Vec<XmlNode> = seek_predicate
            .descendants()
            .filter(|d| d.has_tag_name("RangeExpressions"))
            .flat_map(|r| r.descendants().filter(|d| d.has_tag_name("Identifier")))
            .filter_map(|i| element(i, "ColumnReference"))
            .collect();

        // Typical plans align these 1:1 for equi-join prefixes.
        for (inner, outer) in inner_columns.iter().zip(outer_columns.iter()) {
            let inner_qn = qname(*inner);
            let outer_qn = qname(*outer);
            if outer_refs.contains(&outer_qn) {
                pairs.push((inner_qn, outer_qn));
            }
        }
    }

    pairs
}

/// Direct `RelOp` descendants of an operator container, stopping at nested
/// operators.
fn direct_rel_ops<'a, 'i>(node_xml: XmlNode<'a, 'i>) -> Vec<XmlNode<'a, 'i>> {
    node_xml
        .descendants()
        .skip(1)
        .filter(|d| d.has_tag_name("RelOp"))
        .filter(|d| {
            d.ancestors()
                .skip(1)
                .find(|a| a.has_tag_name("RelOp"))
                .map(|a| a == node_xml)
                .unwrap_or(false)
        })
        .collect()
}

/// Maps one `RelOp` onto a canonical node plus the native children to
/// recurse into. `pushed_filter` carries a parent filter being melted into
/// a scan.
fn create_node<'a, 'i>(
    node_xml: XmlNode<'a, 'i>,
    pushed_filter: &str,
) -> Result<Option<(Node, Vec<XmlNode<'a, 'i>>)>> {
    let physical_op = attribute(node_xml, "PhysicalOp");
    let logical_op = attribute(node_xml, "LogicalOp");

    let mut children: Vec<XmlNode> = Vec::new();
    let node = if logical_op == "Filter" {
        let filter = element(node_xml, "Filter").ok_or_else(|| {
            ExplainError::MalformedPayload("Filter operator without a Filter element".to_string())
        })?;
        let condition = element(filter, "Predicate")
            .map(scalar_string)
            .unwrap_or_default();
        let child = element(filter, "RelOp");
        if let Some(child) = child {
            let child_op = attribute(child, "PhysicalOp");
            if is_scan_op(&child_op) {
                // The filter belongs to the scan; bitmap probes computed
                // here are noise at that level.
                return create_node(child, &drop_bloom_probes(&condition));
            }
            children.push(child);
        }
        Node::selection(&clean_filter(&condition))?
    } else if logical_op == "Sort" {
        let sort = element(node_xml, "Sort").ok_or_else(|| {
            ExplainError::MalformedPayload("Sort operator without a Sort element".to_string())
        })?;
        let mut columns_sorted = Vec::new();
        if let Some(order_by) = element(sort, "OrderBy") {
            for order_column in elements(order_by, "OrderByColumn") {
                let sorting = if matches!(attribute(order_column, "Ascending").as_str(), "true" | "1")
                {
                    Sorting::Asc
                } else {
                    Sorting::Desc
                };
                if let Some(reference) = element(order_column, "ColumnReference") {
                    columns_sorted
                        .push(Column::with_sorting(&attribute(reference, "Column"), sorting)?);
                }
            }
        }
        children.extend(element(sort, "RelOp"));
        Node::new(NodeKind::Sort { columns_sorted })
    } else if logical_op == "Aggregate" && physical_op == "Hash Match" {
        let hash = element(node_xml, "Hash").ok_or_else(|| {
            ExplainError::MalformedPayload("Hash Match without a Hash element".to_string())
        })?;
        let aggregates = defined_values(hash)?;
        let mut group_keys = Vec::new();
        for keys in elements(hash, "HashKeysBuild").chain(elements(hash, "HashKeyBuild")) {
            for reference in elements(keys, "ColumnReference") {
                group_keys.push(Column::new(&attribute(reference, "Column"))?);
            }
        }
        children.extend(elements(hash, "RelOp"));
        Node::new(NodeKind::GroupBy {
            strategy: GroupStrategy::Hash,
            group_keys,
            aggregates,
        })
    } else if logical_op == "Aggregate" && physical_op == "Stream Aggregate" {
        let stream = element(node_xml, "StreamAggregate").ok_or_else(|| {
            ExplainError::MalformedPayload(
                "Stream Aggregate without a StreamAggregate element".to_string(),
            )
        })?;
        let aggregates = defined_values(stream)?;
        let mut group_keys = Vec::new();
        if let Some(group_by) = element(stream, "GroupBy") {
            for reference in elements(group_by, "ColumnReference") {
                group_keys.push(Column::new(&attribute(reference, "Column"))?);
            }
        }
        children.extend(elements(stream, "RelOp"));
        Node::new(NodeKind::GroupBy {
            // Stream aggregation relies on sorted input.
            strategy: GroupStrategy::SortMerge,
            group_keys,
            aggregates,
        })
    } else if logical_op == "Inner Join" && physical_op == "Merge Join" {
        let merge = element(node_xml, "Merge").ok_or_else(|| {
            ExplainError::MalformedPayload("Merge Join without a Merge element".to_string())
        })?;
        let condition = element(merge, "Residual")
            .map(scalar_string)
            .unwrap_or_default();
        children.extend(elements(merge, "RelOp"));
        Node::join(JoinType::Inner, JoinStrategy::Merge, &condition)?
    } else if physical_op == "Hash Match" {
        let hash = element(node_xml, "Hash").ok_or_else(|| {
            ExplainError::MalformedPayload("Hash Match without a Hash element".to_string())
        })?;
        let condition = element(hash, "ProbeResidual")
            .map(scalar_string)
            .unwrap_or_default();
        children.extend(elements(hash, "RelOp"));
        Node::join(JoinType::Inner, JoinStrategy::Hash, &condition)?
    } else if logical_op == "Inner Join" && physical_op == "Nested Loops" {
        let nested = element(node_xml, "NestedLoops").ok_or_else(|| {
            ExplainError::MalformedPayload("Nested Loops without its element".to_string())
        })?;
        children.extend(elements(nested, "RelOp"));
        let mut outer_refs = FxHashSet::default();
        if let Some(references) = element(nested, "OuterReferences") {
            for reference in elements(references, "ColumnReference") {
                outer_refs.insert(qname(reference));
            }
        }
        let mut condition = String::new();
        if let Some(inner) = children.last() {
            for (inner_col, outer_col) in extract_loop_join_pairs(*inner, &outer_refs) {
                if !condition.is_empty() {
                    condition.push_str(" AND ");
                }
                condition.push_str(&format!("{outer_col} = {inner_col}"));
            }
        }
        // Loop joins are the wrong way around in these plans.
        children.reverse();
        Node::join(JoinType::Inner, JoinStrategy::Loop, &condition)?
    } else if is_scan_op(&physical_op) {
        let index_scan = element(node_xml, "IndexScan")
            .or_else(|| element(node_xml, "TableScan"));
        let mut table_name = element(node_xml, "OutputList")
            .and_then(|list| {
                list.children()
                    .filter(|c| c.is_element())
                    .map(|c| attribute(c, "Table"))
                    .find(|t| !t.is_empty())
            })
            .unwrap_or_default();
        if table_name.is_empty() {
            if let Some(scan) = index_scan {
                if let Some(object) = element(scan, "Object") {
                    table_name = attribute(object, "Table");
                }
            }
        }
        if table_name.is_empty() {
            return Err(ExplainError::MalformedPayload(format!(
                "table name not found for scan node: {physical_op}"
            )));
        }

        let strategy = if physical_op.contains("Seek") {
            ScanStrategy::Seek
        } else {
            ScanStrategy::Scan
        };
        let mut node = Node::new(NodeKind::Scan {
            table_name,
            strategy,
        });

        let mut filter = index_scan
            .and_then(|scan| element(scan, "Predicate"))
            .map(scalar_string)
            .unwrap_or_default();
        if !pushed_filter.is_empty() {
            if filter.is_empty() {
                filter = pushed_filter.to_string();
            } else {
                filter = format!("({filter}) AND ({pushed_filter})");
            }
        }
        node.set_filter(&clean_filter(&filter))?;
        node
    } else if logical_op == "Compute Scalar" {
        let compute = element(node_xml, "ComputeScalar").ok_or_else(|| {
            ExplainError::MalformedPayload(
                "Compute Scalar without a ComputeScalar element".to_string(),
            )
        })?;
        children.extend(element(compute, "RelOp"));
        Node::new(NodeKind::Projection {
            columns_projected: defined_values(compute)?,
        })
    } else {
        return Ok(None);
    };

    let mut node = node;
    parse_row_count(&mut node, node_xml);
    Ok(Some((node, children)))
}

fn build_node(tree: &mut Tree<Node>, node_xml: XmlNode<'_, '_>) -> Result<NodeId> {
    let mut current = node_xml;
    let mut created = create_node(current, "")?;

    while created.is_none() {
        let op = format!(
            "{} ({})",
            attribute(current, "LogicalOp"),
            attribute(current, "PhysicalOp")
        );
        let rel_ops = direct_rel_ops(current);
        if rel_ops.is_empty() {
            return Err(ExplainError::UnmappedLeaf { node_type: op });
        }
        if rel_ops.len() > 1 {
            return Err(ExplainError::AmbiguousSkip {
                node_type: op,
                children: rel_ops.len(),
            });
        }
        debug!(node_type = %op, "skipping unmapped explain node");
        current = rel_ops[0];
        created = create_node(current, "")?;
    }

    let (node, children) = created.expect("loop above only exits with a node");
    let id = tree.push(node);
    for child in children {
        let built = build_node(tree, child)?;
        tree.add_child(id, built);
    }
    Ok(id)
}

/// Projections and selections never report actual rows in this format, and
/// neither can change the count, so they inherit their input's.
fn fix_projection_actuals(tree: &mut Tree<Node>, root: NodeId) {
    let nodes: Vec<NodeId> = tree.depth_first(root).collect();
    // Reverse order so chained projections propagate from the leaves up.
    for id in nodes.into_iter().rev() {
        if matches!(
            tree.get(id).kind,
            NodeKind::Projection { .. } | NodeKind::Selection { .. }
        ) {
            if let Some(child) = tree.first_child(id) {
                tree.get_mut(id).rows_actual = tree.get(child).rows_actual;
            }
        }
    }
}

/// Builds a canonical plan from showplan XML.
pub fn build_plan(payload: &str) -> Result<Plan> {
    let document = Document::parse(payload).map_err(|e| {
        ExplainError::MalformedPayload(format!("showplan XML failed to parse: {e}"))
    })?;

    // A single round trip may carry several statements; take the SELECT.
    let statements = document
        .descendants()
        .find(|d| d.has_tag_name("Statements"))
        .ok_or_else(|| {
            ExplainError::MalformedPayload("showplan XML carries no Statements".to_string())
        })?;
    let statement = statements
        .children()
        .filter(|c| c.is_element())
        .find(|c| attribute(*c, "StatementType") == "SELECT")
        .ok_or_else(|| {
            ExplainError::MalformedPayload("no SELECT statement in showplan XML".to_string())
        })?;

    let query_plan = element(statement, "QueryPlan").ok_or_else(|| {
        ExplainError::MalformedPayload("statement carries no QueryPlan".to_string())
    })?;
    let first_operator = element(query_plan, "RelOp").ok_or_else(|| {
        ExplainError::MalformedPayload("query plan carries no operators".to_string())
    })?;

    let execution_time = element(query_plan, "QueryTimeStats")
        .map(|stats| attribute(stats, "ElapsedTime").parse().unwrap_or(0.0))
        .unwrap_or(0.0);

    let mut tree = Tree::new();
    let root = build_node(&mut tree, first_operator)?;
    fix_projection_actuals(&mut tree, root);

    let mut plan = Plan::new(tree, root);
    plan.execution_time = execution_time;
    Ok(plan)
}
