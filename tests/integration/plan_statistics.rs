//! Statistics over hand-built canonical plans.

use crossplan::plan::{
    Column, GroupStrategy, JoinStrategy, JoinType, Node, NodeKind, Operation, Plan, RowCount,
    ScanStrategy,
};
use crossplan::tree::Tree;

fn scan(table: &str, actual: f64) -> Node {
    let mut node = Node::new(NodeKind::Scan {
        table_name: table.to_string(),
        strategy: ScanStrategy::Scan,
    });
    node.rows_actual = actual;
    node.rows_estimated = actual;
    node
}

fn with_rows(mut node: Node, estimated: f64, actual: f64) -> Node {
    node.rows_estimated = estimated;
    node.rows_actual = actual;
    node
}

/// Scan(100) feeding a Selection(40) feeding a Limit(10).
fn filtered_chain() -> Plan {
    let mut tree = Tree::new();
    let limit = tree.push(with_rows(
        Node::new(NodeKind::Limit { limit_count: 10 }),
        10.0,
        10.0,
    ));
    let selection = tree.push(with_rows(Node::selection("l_tax > 0").unwrap(), 50.0, 40.0));
    let base = tree.push(scan("lineitem", 100.0));
    tree.add_child(limit, selection);
    tree.add_child(selection, base);
    Plan::new(tree, limit)
}

#[test]
fn filtering_math_skips_the_limit() {
    let plan = filtered_chain();
    assert_eq!(plan.rows_scanned().unwrap().value(), Some(100));
    // 100 into the selection, 40 out; the limit's cutoff is not filtering.
    assert_eq!(plan.rows_filtered().unwrap().value(), Some(60));
    assert_eq!(plan.node(plan.root()).rows_actual, 10.0);
}

#[test]
fn processed_is_joined_plus_aggregated_plus_sorted() {
    let mut tree = Tree::new();
    let group = tree.push(with_rows(
        Node::new(NodeKind::GroupBy {
            strategy: GroupStrategy::Hash,
            group_keys: vec![Column::new("k").unwrap()],
            aggregates: vec![Column::new("SUM(v)").unwrap()],
        }),
        5.0,
        5.0,
    ));
    let join = tree.push(with_rows(
        Node::join(JoinType::Inner, JoinStrategy::Hash, "a = b").unwrap(),
        900.0,
        1000.0,
    ));
    let build = tree.push(scan("dim", 10.0));
    let probe = tree.push(scan("fact", 2000.0));
    tree.add_child(group, join);
    tree.add_child(join, build);
    tree.add_child(join, probe);
    let plan = Plan::new(tree, group);

    assert_eq!(plan.rows_joined().unwrap().value(), Some(1000));
    assert_eq!(plan.rows_aggregated().unwrap().value(), Some(1000));
    assert_eq!(plan.rows_sorted().unwrap().value(), Some(0));
    assert_eq!(plan.rows_processed().unwrap().value(), Some(2000));
    assert_eq!(plan.rows_scanned().unwrap().value(), Some(2010));
}

#[test]
fn mis_estimations_always_fill_the_cross_product() {
    let plan = filtered_chain();
    let buckets = plan.mis_estimations().unwrap();
    assert_eq!(buckets.len(), 36);

    // Sorted by operation then magnitude, every combination present.
    for (i, operation) in Operation::ALL.iter().enumerate() {
        for (j, magnitude) in (-4..=4).enumerate() {
            let bucket = &buckets[i * 9 + j];
            assert_eq!(bucket.operation, *operation);
            assert_eq!(bucket.magnitude, magnitude);
        }
    }

    // The single selection sits in Filter at magnitude 0 (50 vs 40).
    let total: u64 = buckets.iter().map(|b| b.count).sum();
    assert_eq!(total, 1);
    let filter_zero = buckets
        .iter()
        .find(|b| b.operation == Operation::Filter && b.magnitude == 0)
        .unwrap();
    assert_eq!(filter_zero.count, 1);
}

#[test]
fn overestimates_bucket_positive_underestimates_negative() {
    let mut tree = Tree::new();
    let sort = tree.push(with_rows(
        Node::new(NodeKind::Sort {
            columns_sorted: vec![Column::new("k").unwrap()],
        }),
        800.0,
        100.0,
    ));
    let base = tree.push(scan("t", 100.0));
    tree.add_child(sort, base);
    let plan = Plan::new(tree, sort);

    let buckets = plan.mis_estimations().unwrap();
    let bucket = buckets
        .iter()
        .find(|b| b.operation == Operation::Sort && b.count > 0)
        .unwrap();
    assert_eq!(bucket.magnitude, 3);
}

#[test]
fn unfilled_actuals_surface_as_unknown() {
    let mut tree = Tree::new();
    let sort = tree.push(Node::new(NodeKind::Sort {
        columns_sorted: vec![Column::new("k").unwrap()],
    }));
    let base = tree.push(Node::new(NodeKind::Scan {
        table_name: "t".to_string(),
        strategy: ScanStrategy::Scan,
    }));
    tree.add_child(sort, base);
    let plan = Plan::new(tree, sort);

    // No adapter ever filled the actuals; the boundary reports Unknown
    // instead of a fake saturated count.
    assert_eq!(plan.rows_sorted().unwrap(), RowCount::Unknown);
    assert_eq!(plan.rows_scanned().unwrap(), RowCount::Unknown);
}

#[test]
fn join_arity_is_enforced_at_statistics_time() {
    let mut tree = Tree::new();
    let join = tree.push(Node::join(JoinType::Inner, JoinStrategy::Hash, "a = b").unwrap());
    let only = tree.push(scan("t", 1.0));
    tree.add_child(join, only);
    let plan = Plan::new(tree, join);

    assert!(matches!(
        plan.mis_estimations(),
        Err(crossplan::ExplainError::ChildArity {
            kind: "JOIN",
            found: 1,
            expected: 2
        })
    ));
}
