//! End-to-end adapter test for SQL Server showplan XML.

use crossplan::error::DatabaseError;
use crossplan::plan::{GroupStrategy, NodeKind};
use crossplan::runner::{QueryRunner, SqlValue};
use crossplan::{build_plan, Engine};

struct NullRunner;

impl QueryRunner for NullRunner {
    fn execute(&mut self, _sql: &str) -> Result<(), DatabaseError> {
        Ok(())
    }
    fn fetch_scalar(&mut self, sql: &str) -> Result<SqlValue, DatabaseError> {
        panic!("unexpected fetch_scalar: {sql}");
    }
    fn fetch_rows(&mut self, _sql: &str) -> Result<Vec<Vec<SqlValue>>, DatabaseError> {
        Ok(Vec::new())
    }
}

const PAYLOAD: &str = r#"
<ShowPlanXML>
  <BatchSequence>
    <Batch>
      <Statements>
        <StmtSimple StatementType="SELECT">
          <QueryPlan>
            <QueryTimeStats ElapsedTime="95"/>
            <RelOp LogicalOp="Compute Scalar" PhysicalOp="Compute Scalar" EstimateRows="8">
              <ComputeScalar>
                <DefinedValues>
                  <DefinedValue>
                    <ScalarOperator ScalarString="[db].[dbo].[orders].[o_total]*(0.9)"/>
                    <ColumnReference Column="discounted"/>
                  </DefinedValue>
                </DefinedValues>
                <RelOp LogicalOp="Aggregate" PhysicalOp="Hash Match" EstimateRows="8">
                  <RunTimeInformation>
                    <RunTimeCountersPerThread ActualRows="9"/>
                  </RunTimeInformation>
                  <Hash>
                    <DefinedValues>
                      <DefinedValue>
                        <ScalarOperator ScalarString="SUM([db].[dbo].[orders].[o_total])"/>
                        <ColumnReference Column="o_total_sum"/>
                      </DefinedValue>
                    </DefinedValues>
                    <HashKeysBuild>
                      <ColumnReference Column="o_status"/>
                    </HashKeysBuild>
                    <RelOp LogicalOp="Filter" PhysicalOp="Filter" EstimateRows="50">
                      <Filter>
                        <RelOp LogicalOp="Table Scan" PhysicalOp="Table Scan" EstimateRows="100">
                          <RunTimeInformation>
                            <RunTimeCountersPerThread ActualRows="102"/>
                          </RunTimeInformation>
                          <OutputList>
                            <ColumnReference Table="orders" Column="o_total"/>
                          </OutputList>
                        </RelOp>
                        <Predicate>
                          <ScalarOperator ScalarString="[db].[dbo].[orders].[o_total]&gt;(100)"/>
                        </Predicate>
                      </Filter>
                    </RelOp>
                  </Hash>
                </RelOp>
              </ComputeScalar>
            </RelOp>
          </QueryPlan>
        </StmtSimple>
      </Statements>
    </Batch>
  </BatchSequence>
</ShowPlanXML>"#;

#[test]
fn builds_the_canonical_tree() {
    let plan = build_plan(Engine::SqlServer, PAYLOAD, &mut NullRunner).unwrap();
    plan.validate().unwrap();
    assert_eq!(plan.execution_time, 95.0);

    let root = plan.node(plan.root());
    match &root.kind {
        NodeKind::Projection { columns_projected } => {
            assert_eq!(columns_projected.len(), 1);
            assert_eq!(columns_projected[0].name, "o_total * 0.9");
            assert_eq!(columns_projected[0].alias.as_deref(), Some("discounted"));
        }
        other => panic!("expected projection root, found {other:?}"),
    }

    let group = plan.tree().first_child(plan.root()).unwrap();
    match &plan.node(group).kind {
        NodeKind::GroupBy {
            strategy,
            group_keys,
            aggregates,
        } => {
            assert_eq!(*strategy, GroupStrategy::Hash);
            assert_eq!(group_keys.len(), 1);
            assert_eq!(group_keys[0].name, "o_status");
            assert_eq!(aggregates.len(), 1);
            assert_eq!(aggregates[0].name, "SUM(o_total)");
            assert_eq!(aggregates[0].alias.as_deref(), Some("o_total_sum"));
        }
        other => panic!("expected group by, found {other:?}"),
    }
}

#[test]
fn filter_over_scan_melts_into_the_scan() {
    let plan = build_plan(Engine::SqlServer, PAYLOAD, &mut NullRunner).unwrap();
    let group = plan.tree().first_child(plan.root()).unwrap();
    let scan = plan.tree().first_child(group).unwrap();
    match &plan.node(scan).kind {
        NodeKind::Scan { table_name, .. } => assert_eq!(table_name, "orders"),
        other => panic!("expected scan, found {other:?}"),
    }
    assert_eq!(plan.node(scan).filter_condition, "o_total > 100");
    assert_eq!(plan.node(scan).rows_actual, 102.0);
}

#[test]
fn projections_inherit_their_childs_actual_rows() {
    let plan = build_plan(Engine::SqlServer, PAYLOAD, &mut NullRunner).unwrap();
    // The compute scalar reports no runtime counters; it cannot change the
    // count, so it takes the aggregate's.
    assert_eq!(plan.node(plan.root()).rows_actual, 9.0);
    assert_eq!(plan.node(plan.root()).rows_estimated, 8.0);
}

#[test]
fn statements_without_a_select_are_rejected() {
    let payload = r#"
        <ShowPlanXML>
          <BatchSequence><Batch><Statements>
            <StmtSimple StatementType="UPDATE"/>
          </Statements></Batch></BatchSequence>
        </ShowPlanXML>"#;
    assert!(matches!(
        build_plan(Engine::SqlServer, payload, &mut NullRunner),
        Err(crossplan::ExplainError::MalformedPayload(_))
    ));
}
