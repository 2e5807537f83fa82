//! Derived-table SQL reconstruction.
//!
//! Renders everything at or below a plan node as an equivalent SQL
//! expression, giving each node a stable alias. This is the only mechanism
//! for recomputing actual row counts on engines whose explain output omits
//! them, and doubles as a debugging aid.

use crate::error::{ExplainError, Result};
use crate::plan::{Column, JoinType, NodeKind, Plan, Sorting, UnionType};
use crate::tree::NodeId;

fn newline(indent: usize) -> String {
    let mut s = String::from("\n");
    for _ in 0..indent {
        s.push_str("  ");
    }
    s
}

fn sql_alias(id: NodeId) -> String {
    format!("node_{}", id.index())
}

fn column_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| c.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Plan {
    fn single_child(&self, id: NodeId, kind: &'static str) -> Result<NodeId> {
        self.tree()
            .first_child(id)
            .ok_or(ExplainError::ChildArity {
                kind,
                found: 0,
                expected: 1,
            })
    }

    /// Aggregate aliases of the nearest aggregation below `id`, used to
    /// resolve projected expressions that reference aggregate outputs.
    fn aggregate_aliases(&self, id: NodeId) -> Vec<(String, String)> {
        for candidate in self.tree().breadth_first(id).skip(1) {
            if let NodeKind::GroupBy { aggregates, .. } = &self.node(candidate).kind {
                let mut aliases: Vec<(String, String)> = aggregates
                    .iter()
                    .enumerate()
                    .map(|(i, agg)| (agg.name.clone(), format!("agg_{i}")))
                    .collect();
                // Longest names first so nested expressions substitute whole.
                aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
                return aliases;
            }
        }
        Vec::new()
    }

    /// Renders the subtree at `id` as a derived-table expression.
    pub fn tree_sql(&self, id: NodeId, indent: usize) -> Result<String> {
        let node = self.node(id);
        let alias = sql_alias(id);
        let children = self.tree().children(id);

        let sql = match &node.kind {
            NodeKind::Scan { table_name, .. } => {
                let mut s = format!("(SELECT * FROM {table_name}");
                if !node.filter_condition.is_empty() {
                    s.push_str(&newline(indent));
                    s.push_str(&format!("WHERE {}", node.filter_condition));
                }
                s.push_str(&format!(") AS {alias}"));
                s
            }
            NodeKind::ScanEmpty => format!("(SELECT 1 WHERE 1 = 0) AS {alias}"),
            NodeKind::ScanMaterialised => format!("(SELECT 1) AS {alias}"),
            NodeKind::Join {
                join_type,
                condition,
                ..
            } => {
                if children.len() != 2 {
                    return Err(ExplainError::ChildArity {
                        kind: "JOIN",
                        found: children.len(),
                        expected: 2,
                    });
                }
                let build = self.tree_sql(children[0], indent + 1)?;
                let probe = self.tree_sql(children[1], indent + 1)?;
                if join_type.is_semi_or_anti() {
                    let negation = if join_type.is_anti() { "NOT " } else { "" };
                    format!(
                        "(SELECT * FROM {probe}{}WHERE {negation}EXISTS (SELECT * FROM {build} WHERE {condition})) AS {alias}",
                        newline(indent)
                    )
                } else {
                    let kind_sql = match join_type {
                        JoinType::Inner => "INNER JOIN",
                        JoinType::LeftOuter => "LEFT OUTER JOIN",
                        JoinType::RightOuter => "RIGHT OUTER JOIN",
                        JoinType::Full => "FULL JOIN",
                        JoinType::Cross => "CROSS JOIN",
                        _ => unreachable!("semi/anti handled above"),
                    };
                    let mut s = format!("(SELECT * FROM {probe}");
                    s.push_str(&newline(indent));
                    s.push_str(&format!("{kind_sql} {build}"));
                    if !condition.is_empty() && *join_type != JoinType::Cross {
                        s.push_str(&format!(" ON {condition}"));
                    }
                    s.push_str(&format!(") AS {alias}"));
                    s
                }
            }
            NodeKind::GroupBy {
                group_keys,
                aggregates,
                ..
            } => {
                let child = self.single_child(id, "GROUP BY")?;
                let mut s = String::from("(SELECT ");
                let mut column_count = 0;
                if !group_keys.is_empty() {
                    s.push_str(&column_list(group_keys));
                    column_count = group_keys.len();
                }
                // Aggregates are named so ancestor projections can refer to
                // them.
                for (i, agg) in aggregates.iter().enumerate() {
                    if column_count > 0 {
                        s.push_str(", ");
                    }
                    s.push_str(&format!("{} AS agg_{i}", agg.name));
                    column_count += 1;
                }
                if column_count == 0 {
                    s.push('*');
                }
                s.push_str(&newline(indent));
                s.push_str(&format!("FROM {}", self.tree_sql(child, indent + 1)?));
                if !group_keys.is_empty() {
                    s.push_str(&newline(indent));
                    s.push_str(&format!("GROUP BY {}", column_list(group_keys)));
                }
                s.push_str(&newline(indent));
                s.push_str(&format!(") AS {alias}"));
                s
            }
            NodeKind::Sort { columns_sorted } => {
                let child = self.single_child(id, "SORT")?;
                let order: Vec<String> = columns_sorted
                    .iter()
                    .map(|c| match c.sorting {
                        Sorting::Asc => format!("{} ASC", c.name),
                        Sorting::Desc => format!("{} DESC", c.name),
                        Sorting::Random => c.name.clone(),
                    })
                    .collect();
                format!(
                    "(SELECT * FROM {}{}ORDER BY {}) AS {alias}",
                    self.tree_sql(child, indent + 1)?,
                    newline(indent),
                    order.join(", ")
                )
            }
            NodeKind::Projection { columns_projected } => {
                let child = self.single_child(id, "PROJECTION")?;
                let aliases = self.aggregate_aliases(id);
                let projected: Vec<String> = columns_projected
                    .iter()
                    .map(|c| {
                        let mut text = c.name.clone();
                        for (name, agg_alias) in &aliases {
                            if !name.is_empty() {
                                text = text.replace(name.as_str(), agg_alias);
                            }
                        }
                        text
                    })
                    .collect();
                let list = if projected.is_empty() {
                    "*".to_string()
                } else {
                    projected.join(", ")
                };
                format!(
                    "(SELECT {list}{}FROM {}) AS {alias}",
                    newline(indent),
                    self.tree_sql(child, indent + 1)?
                )
            }
            NodeKind::Selection { filter_expression } => {
                let child = self.single_child(id, "SELECTION")?;
                format!(
                    "(SELECT * FROM {}{}WHERE {filter_expression}) AS {alias}",
                    self.tree_sql(child, indent + 1)?,
                    newline(indent)
                )
            }
            NodeKind::Union { union_type } => {
                if children.is_empty() {
                    return Err(ExplainError::ChildArity {
                        kind: "UNION",
                        found: 0,
                        expected: 2,
                    });
                }
                let keyword = match union_type {
                    UnionType::All => "UNION ALL",
                    UnionType::Distinct => "UNION",
                };
                let parts: Result<Vec<String>> = children
                    .iter()
                    .map(|c| Ok(format!("SELECT * FROM {}", self.tree_sql(*c, indent + 1)?)))
                    .collect();
                format!(
                    "({}) AS {alias}",
                    parts?.join(&format!("{}{keyword} ", newline(indent)))
                )
            }
            NodeKind::Limit { limit_count } => {
                let child = self.single_child(id, "LIMIT")?;
                format!(
                    "(SELECT * FROM {}{}LIMIT {limit_count}) AS {alias}",
                    self.tree_sql(child, indent + 1)?,
                    newline(indent)
                )
            }
            NodeKind::Distribute { .. } | NodeKind::Sequence => {
                // Row movement and sequencing do not change row contents;
                // reconstruct the last input.
                let child = self.tree().last_child(id).ok_or(ExplainError::ChildArity {
                    kind: node.kind_name(),
                    found: 0,
                    expected: 1,
                })?;
                self.tree_sql(child, indent)?
            }
            NodeKind::Select => match self.tree().first_child(id) {
                Some(child) => self.tree_sql(child, indent)?,
                // The deferred-explain placeholder plan is a childless root.
                None => format!("(SELECT 1) AS {alias}"),
            },
        };
        Ok(sql)
    }

    /// Statement used to recompute the actual row count of a subtree.
    pub fn count_sql(&self, id: NodeId) -> Result<String> {
        Ok(format!("SELECT COUNT(*) FROM {}", self.tree_sql(id, 1)?))
    }
}
