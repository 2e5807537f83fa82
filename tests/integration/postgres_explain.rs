//! End-to-end adapter test for PostgreSQL-style explain JSON.

use crossplan::error::DatabaseError;
use crossplan::plan::{JoinType, NodeKind};
use crossplan::runner::{QueryRunner, SqlValue};
use crossplan::{build_plan, Engine};

/// The JSON adapters never touch the runner; this one proves it.
struct NullRunner;

impl QueryRunner for NullRunner {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        panic!("unexpected execute: {sql}");
    }

    fn fetch_scalar(&mut self, sql: &str) -> Result<SqlValue, DatabaseError> {
        panic!("unexpected fetch_scalar: {sql}");
    }

    fn fetch_rows(&mut self, sql: &str) -> Result<Vec<Vec<SqlValue>>, DatabaseError> {
        panic!("unexpected fetch_rows: {sql}");
    }
}

const PAYLOAD: &str = r#"[{
  "Plan": {
    "Node Type": "Limit",
    "Plan Rows": 10, "Actual Rows": 10, "Actual Loops": 1, "Total Cost": 4123.9,
    "Plans": [{
      "Node Type": "Sort",
      "Sort Key": ["revenue DESC", "o_orderdate"],
      "Plan Rows": 1000, "Actual Rows": 1130, "Actual Loops": 1,
      "Plans": [{
        "Node Type": "Aggregate",
        "Strategy": "Hashed",
        "Group Key": ["l_orderkey"],
        "Output": ["l_orderkey", "sum(l_extendedprice)"],
        "Plan Rows": 1000, "Actual Rows": 1130, "Actual Loops": 1,
        "Plans": [{
          "Node Type": "Hash Join",
          "Join Type": "Inner",
          "Hash Cond": "(lineitem.l_orderkey = orders.o_orderkey)",
          "Plan Rows": 30000, "Actual Rows": 30519, "Actual Loops": 1,
          "Plans": [
            {
              "Node Type": "Seq Scan",
              "Relation Name": "lineitem",
              "Parallel Aware": false,
              "Plan Rows": 3000000, "Actual Rows": 3000028,
              "Filter": "(l_shipdate > '1995-03-15'::date)"
            },
            {
              "Node Type": "Hash",
              "Plans": [{
                "Node Type": "Seq Scan",
                "Relation Name": "orders",
                "Parallel Aware": false,
                "Plan Rows": 15000, "Actual Rows": 14657
              }]
            }
          ]
        }]
      }]
    }]
  },
  "Planning Time": 0.42,
  "Execution Time": 823.4
}]"#;

#[test]
fn builds_the_canonical_tree() {
    let plan = build_plan(Engine::Postgres, PAYLOAD, &mut NullRunner).unwrap();
    plan.validate().unwrap();

    assert_eq!(plan.planning_time, 0.42);
    assert_eq!(plan.execution_time, 823.4);

    let root = plan.node(plan.root());
    assert!(matches!(root.kind, NodeKind::Limit { limit_count: 10 }));

    // Limit -> Sort -> GroupBy -> Join, with the Hash wrapper skipped.
    let sort = plan.tree().first_child(plan.root()).unwrap();
    let group = plan.tree().first_child(sort).unwrap();
    let join = plan.tree().first_child(group).unwrap();
    assert!(matches!(plan.node(sort).kind, NodeKind::Sort { .. }));
    assert!(matches!(plan.node(group).kind, NodeKind::GroupBy { .. }));
    match &plan.node(join).kind {
        NodeKind::Join {
            join_type,
            condition,
            ..
        } => {
            assert_eq!(*join_type, JoinType::Inner);
            assert_eq!(condition, "l_orderkey = o_orderkey");
        }
        other => panic!("expected join, found {other:?}"),
    }
}

#[test]
fn hash_join_children_are_flipped_to_build_probe() {
    let plan = build_plan(Engine::Postgres, PAYLOAD, &mut NullRunner).unwrap();
    let sort = plan.tree().first_child(plan.root()).unwrap();
    let group = plan.tree().first_child(sort).unwrap();
    let join = plan.tree().first_child(group).unwrap();

    let children = plan.tree().children(join);
    assert_eq!(children.len(), 2);
    match &plan.node(children[0]).kind {
        NodeKind::Scan { table_name, .. } => assert_eq!(table_name, "orders"),
        other => panic!("expected build-side scan, found {other:?}"),
    }
    match &plan.node(children[1]).kind {
        NodeKind::Scan { table_name, .. } => assert_eq!(table_name, "lineitem"),
        other => panic!("expected probe-side scan, found {other:?}"),
    }
}

#[test]
fn filters_and_aggregates_are_cleaned() {
    let plan = build_plan(Engine::Postgres, PAYLOAD, &mut NullRunner).unwrap();
    let sort = plan.tree().first_child(plan.root()).unwrap();
    let group = plan.tree().first_child(sort).unwrap();
    let join = plan.tree().first_child(group).unwrap();
    let probe = plan.tree().last_child(join).unwrap();

    assert_eq!(
        plan.node(probe).filter_condition,
        "l_shipdate > '1995-03-15'"
    );
    match &plan.node(group).kind {
        NodeKind::GroupBy {
            group_keys,
            aggregates,
            ..
        } => {
            assert_eq!(group_keys.len(), 1);
            assert_eq!(group_keys[0].name, "l_orderkey");
            assert_eq!(aggregates.len(), 1);
            assert_eq!(aggregates[0].name, "SUM(l_extendedprice)");
        }
        other => panic!("expected group by, found {other:?}"),
    }
}

#[test]
fn row_statistics_add_up() {
    let plan = build_plan(Engine::Postgres, PAYLOAD, &mut NullRunner).unwrap();
    assert_eq!(
        plan.rows_scanned().unwrap().value(),
        Some(3_000_028 + 14_657)
    );
    // Build input (14657) is below the join's own output (30519).
    assert_eq!(plan.rows_joined().unwrap().value(), Some(30_519));
    assert_eq!(plan.rows_aggregated().unwrap().value(), Some(30_519));
    assert_eq!(plan.rows_sorted().unwrap().value(), Some(1_130));
    assert_eq!(plan.mis_estimations().unwrap().len(), 36);
}

#[test]
fn duckdb_shares_the_adapter() {
    let plan = build_plan(Engine::DuckDb, PAYLOAD, &mut NullRunner).unwrap();
    plan.validate().unwrap();
    assert!(matches!(
        plan.node(plan.root()).kind,
        NodeKind::Limit { .. }
    ));
}
