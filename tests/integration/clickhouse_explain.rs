//! End-to-end adapter tests for ClickHouse explain JSON: broadcast
//! pruning, semi-join reconstruction, and actual-row backfill.

use crossplan::error::DatabaseError;
use crossplan::plan::{JoinType, NodeKind};
use crossplan::runner::{QueryRunner, SqlValue};
use crossplan::{build_plan, Engine};
use tracing_subscriber::EnvFilter;

/// Adapter decisions (skips, flips, pruning) log at debug; run with
/// `RUST_LOG=crossplan=debug` to watch them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Answers every backfill query with a fixed count and records it.
struct CountingRunner {
    count: i64,
    statements: Vec<String>,
}

impl CountingRunner {
    fn new(count: i64) -> Self {
        CountingRunner {
            count,
            statements: Vec::new(),
        }
    }
}

impl QueryRunner for CountingRunner {
    fn execute(&mut self, _sql: &str) -> Result<(), DatabaseError> {
        Ok(())
    }

    fn fetch_scalar(&mut self, sql: &str) -> Result<SqlValue, DatabaseError> {
        self.statements.push(sql.to_string());
        Ok(SqlValue::Int(self.count))
    }

    fn fetch_rows(&mut self, _sql: &str) -> Result<Vec<Vec<SqlValue>>, DatabaseError> {
        Ok(Vec::new())
    }
}

const BROADCAST_PAYLOAD: &str = r#"[{
  "Plan": {
    "Node Type": "Join", "Node Id": 1,
    "Algorithm": "HashJoin", "Type": "Inner",
    "Clauses": "[(n_nationkey = s_nationkey)]",
    "Plans": [
      {"Node Type": "ReadFromMergeTree", "Node Id": 7, "Description": "nation"},
      {
        "Node Type": "Join", "Node Id": 2,
        "Algorithm": "HashJoin", "Type": "Inner",
        "Clauses": "[(s_suppkey = l_suppkey)]",
        "Plans": [
          {"Node Type": "ReadFromMergeTree", "Node Id": 7, "Description": "nation"},
          {"Node Type": "ReadFromMergeTree", "Node Id": 9, "Description": "supplier"}
        ]
      }
    ]
  }
}]"#;

#[test]
fn broadcast_subtrees_collapse_to_the_shallowest() {
    init_logging();
    let mut runner = CountingRunner::new(25);
    let plan = build_plan(Engine::ClickHouse, BROADCAST_PAYLOAD, &mut runner).unwrap();
    plan.validate().unwrap();

    // The deeper copy of node id 7 is gone, the inner join it starved got
    // spliced out, and the surviving tree is one join over two scans.
    let nodes: Vec<_> = plan.tree().depth_first(plan.root()).collect();
    assert_eq!(nodes.len(), 3);

    let tables: Vec<String> = nodes
        .iter()
        .filter_map(|id| match &plan.node(*id).kind {
            NodeKind::Scan { table_name, .. } => Some(table_name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(tables.len(), 2);
    assert!(tables.contains(&"nation".to_string()));
    assert!(tables.contains(&"supplier".to_string()));
}

#[test]
fn backfill_visits_every_surviving_node() {
    let mut runner = CountingRunner::new(25);
    let plan = build_plan(Engine::ClickHouse, BROADCAST_PAYLOAD, &mut runner).unwrap();

    // One COUNT(*) round trip per surviving node, none for pruned ones.
    assert_eq!(runner.statements.len(), 3);
    for statement in &runner.statements {
        assert!(statement.starts_with("SELECT COUNT(*) FROM"));
    }
    for id in plan.tree().depth_first(plan.root()) {
        assert_eq!(plan.node(id).rows_actual, 25.0);
    }
}

const SEMI_JOIN_PAYLOAD: &str = r#"[{
  "Plan": {
    "Node Type": "Join",
    "Algorithm": "HashJoin", "Type": "Left",
    "Clauses": "[(o_custkey = c_custkey) AND EXISTS()]",
    "Plans": [
      {"Node Type": "ReadFromMergeTree", "Description": "orders"},
      {
        "Node Type": "Filter",
        "Filter Column": "and(greater(c_acctbal, 0), exists())",
        "Plans": [
          {"Node Type": "ReadFromMergeTree", "Description": "customer"}
        ]
      }
    ]
  }
}]"#;

#[test]
fn disguised_semi_join_is_reconstructed() {
    let mut runner = CountingRunner::new(5);
    let plan = build_plan(Engine::ClickHouse, SEMI_JOIN_PAYLOAD, &mut runner).unwrap();

    match &plan.node(plan.root()).kind {
        NodeKind::Join {
            join_type,
            condition,
            ..
        } => {
            assert_eq!(*join_type, JoinType::LeftSemiInner);
            assert_eq!(condition, "c_acctbal > 0");
        }
        other => panic!("expected join root, found {other:?}"),
    }
}

#[test]
fn negated_exists_yields_an_anti_join() {
    let payload = SEMI_JOIN_PAYLOAD.replace(
        "and(greater(c_acctbal, 0), exists())",
        "and(greater(c_acctbal, 0), not(exists()))",
    );
    let mut runner = CountingRunner::new(5);
    let plan = build_plan(Engine::ClickHouse, &payload, &mut runner).unwrap();

    match &plan.node(plan.root()).kind {
        NodeKind::Join {
            join_type,
            condition,
            ..
        } => {
            assert_eq!(*join_type, JoinType::LeftAnti);
            assert_eq!(condition, "c_acctbal > 0");
        }
        other => panic!("expected join root, found {other:?}"),
    }
}

#[test]
fn backfill_failure_surfaces_the_database_error() {
    struct FailingRunner;
    impl QueryRunner for FailingRunner {
        fn execute(&mut self, _sql: &str) -> Result<(), DatabaseError> {
            Ok(())
        }
        fn fetch_scalar(&mut self, sql: &str) -> Result<SqlValue, DatabaseError> {
            Err(DatabaseError::with_statement("connection lost", sql))
        }
        fn fetch_rows(&mut self, _sql: &str) -> Result<Vec<Vec<SqlValue>>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    let result = build_plan(Engine::ClickHouse, BROADCAST_PAYLOAD, &mut FailingRunner);
    match result {
        Err(crossplan::ExplainError::Backfill(db)) => {
            assert_eq!(db.message, "connection lost");
            assert!(db.statement.unwrap().starts_with("SELECT COUNT(*)"));
        }
        other => panic!("expected a backfill error, found {other:?}"),
    }
}

#[test]
fn expression_cleaning_is_applied_to_clauses() {
    let payload = r#"[{
      "Plan": {
        "Node Type": "Filter",
        "Filter Column": "equals(__table1.n_name, 'GERMANY')",
        "Plans": [{"Node Type": "ReadFromMergeTree", "Description": "nation"}]
      }
    }]"#;
    let mut runner = CountingRunner::new(1);
    let plan = build_plan(Engine::ClickHouse, payload, &mut runner).unwrap();
    match &plan.node(plan.root()).kind {
        NodeKind::Selection { filter_expression } => {
            assert_eq!(filter_expression, "n_name = 'GERMANY'");
        }
        other => panic!("expected selection root, found {other:?}"),
    }
}
