//! Per-engine explain adapters.
//!
//! Each adapter walks its engine's native explain tree top-down and builds
//! the canonical [`Plan`]. Native nodes without a canonical mapping are
//! skipped transparently when they have exactly one child; anything else is
//! a structural error. All scalar expressions go through the expression
//! cleaner on the way in.

pub mod clickhouse;
pub mod databricks;
pub mod postgres;
pub mod sqlserver;
pub mod yellowbrick;

use tracing::debug;

use crate::error::{ExplainError, Result};
use crate::plan::{JoinStrategy, Node, NodeKind, Plan};
use crate::runner::QueryRunner;
use crate::tree::{NodeId, Tree};

/// The engines this crate can interpret explain output from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// PostgreSQL: JSON tree with per-loop actuals.
    Postgres,
    /// DuckDB: shares the PostgreSQL JSON tree shape.
    DuckDb,
    /// ClickHouse: JSON tree without actual-row reporting.
    ClickHouse,
    /// SQL Server: showplan XML.
    SqlServer,
    /// Yellowbrick: near-1:1 XML elements.
    Yellowbrick,
    /// Databricks: explain support deferred, placeholder plans only.
    Databricks,
}

impl Engine {
    /// The statement that makes this engine emit the payload
    /// [`build_plan`] understands, `None` when explain is deferred.
    pub fn explain_statement(&self, statement: &str) -> Option<String> {
        match self {
            Engine::Postgres | Engine::DuckDb => Some(format!(
                "EXPLAIN (ANALYZE, VERBOSE, FORMAT JSON)\n{statement}"
            )),
            Engine::ClickHouse => Some(format!(
                "EXPLAIN PLAN json = 1, actions = 1, header = 1, indexes = 1\n{statement}\nFORMAT TSVRaw"
            )),
            // SQL Server flips a session flag instead, see [`explain`].
            Engine::SqlServer => Some(statement.to_string()),
            Engine::Yellowbrick => Some(format!("EXPLAIN (ANALYZE, FORMAT XML)\n{statement}")),
            Engine::Databricks => None,
        }
    }
}

/// Builds a canonical plan from a raw explain payload.
///
/// `runner` is only exercised for engines that must recompute statistics
/// the payload lacks (ClickHouse actual-row backfill).
pub fn build_plan(engine: Engine, payload: &str, runner: &mut dyn QueryRunner) -> Result<Plan> {
    match engine {
        Engine::Postgres | Engine::DuckDb => postgres::build_plan(payload),
        Engine::ClickHouse => clickhouse::build_plan(payload, runner),
        Engine::SqlServer => sqlserver::build_plan(payload),
        Engine::Yellowbrick => yellowbrick::build_plan(payload),
        Engine::Databricks => Ok(databricks::placeholder_plan()),
    }
}

/// Runs the explain statement for `statement` and builds its plan.
pub fn explain(engine: Engine, statement: &str, runner: &mut dyn QueryRunner) -> Result<Plan> {
    match engine {
        Engine::SqlServer => {
            // Session flag plus re-execution; the driver returns the
            // showplan XML as the statement's trailing result.
            runner.execute("SET STATISTICS XML ON")?;
            let payload = runner.fetch_scalar(statement)?;
            runner.execute("SET STATISTICS XML OFF")?;
            let payload = payload.as_text().map(str::to_string).unwrap_or_default();
            build_plan(engine, &payload, runner)
        }
        Engine::Databricks => Ok(databricks::placeholder_plan()),
        _ => {
            let explain_sql = engine
                .explain_statement(statement)
                .expect("all non-deferred engines synthesize a statement");
            let payload = runner.fetch_scalar(&explain_sql)?;
            let payload = payload.as_text().map(str::to_string).unwrap_or_default();
            build_plan(engine, &payload, runner)
        }
    }
}

/// Reverses the children of every hash and merge join.
///
/// Several engines report build and probe sides opposite to this crate's
/// convention (first child = build side).
pub(crate) fn flip_join_children(tree: &mut Tree<Node>, root: NodeId) {
    let flips: Vec<NodeId> = tree
        .depth_first(root)
        .filter(|id| {
            matches!(
                tree.get(*id).kind,
                NodeKind::Join {
                    strategy: JoinStrategy::Hash | JoinStrategy::Merge,
                    ..
                }
            )
        })
        .collect();
    for id in flips {
        debug!(node = id.index(), "flipping join children to build/probe order");
        tree.reverse_children(id);
    }
}

/// Splices `id` out of the tree, moving its only child into its position.
///
/// Returns the new root when `id` was the root.
pub(crate) fn splice_out(tree: &mut Tree<Node>, root: NodeId, id: NodeId) -> Result<NodeId> {
    let children = tree.children(id).to_vec();
    if children.len() != 1 {
        return Err(ExplainError::AmbiguousSkip {
            node_type: tree.get(id).kind_name().to_string(),
            children: children.len(),
        });
    }
    let child = children[0];
    if id == root {
        tree.remove(child);
        Ok(child)
    } else {
        tree.replace_with(id, child);
        Ok(root)
    }
}
