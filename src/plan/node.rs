#![allow(missing_docs)]

//! Canonical plan-node model.
//!
//! Every adapter builds toward this engine-agnostic representation: one
//! [`Node`] per plan operator, shared statistics hoisted onto the struct and
//! operator-specific payload in the [`NodeKind`] tag.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{ExplainError, ExpressionError};
use crate::expr::clean_expression;
use crate::render::{ellipsify, join_columns};

/// Sort direction attached to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sorting {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
    /// No meaningful order.
    #[default]
    Random,
}

impl fmt::Display for Sorting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sorting::Asc => write!(f, "ASC"),
            Sorting::Desc => write!(f, "DESC"),
            Sorting::Random => write!(f, "RANDOM"),
        }
    }
}

/// A column reference inside a plan node.
///
/// Equality and hashing go by `name` alone; that is what makes the
/// group-key/aggregate set separation work.
#[derive(Debug, Clone, Eq)]
pub struct Column {
    /// Expression-cleaned column text.
    pub name: String,
    /// Output alias, when the engine reported one.
    pub alias: Option<String>,
    /// Sort direction, meaningful only under Sort nodes.
    pub sorting: Sorting,
}

impl Column {
    /// Builds a column from raw engine text, cleaning it.
    pub fn new(raw: &str) -> Result<Self, ExpressionError> {
        Ok(Column {
            name: clean_expression(raw)?,
            alias: None,
            sorting: Sorting::Random,
        })
    }

    /// Builds a sorted column from raw engine text.
    pub fn with_sorting(raw: &str, sorting: Sorting) -> Result<Self, ExpressionError> {
        Ok(Column {
            name: clean_expression(raw)?,
            alias: None,
            sorting,
        })
    }

    /// Builds a column with an alias; the name is taken as already clean.
    pub fn with_alias(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            alias: Some(alias.into()),
            sorting: Sorting::Random,
        }
    }

    /// True when the engine reported an output alias.
    pub fn has_alias(&self) -> bool {
        self.alias.is_some()
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// How a scan locates its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Full relation scan.
    Scan,
    /// Index-assisted point or range lookup.
    Seek,
}

/// Physical join algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    Hash,
    Loop,
    Merge,
}

impl JoinStrategy {
    fn name(self) -> &'static str {
        match self {
            JoinStrategy::Hash => "HASH",
            JoinStrategy::Loop => "LOOP",
            JoinStrategy::Merge => "MERGE",
        }
    }
}

/// Logical join variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    LeftSemiInner,
    LeftSemiOuter,
    LeftAnti,
    RightOuter,
    RightSemiInner,
    RightSemiOuter,
    RightAnti,
    Full,
    Cross,
}

impl JoinType {
    /// Maps an engine's join-type string onto the canonical variant.
    pub fn from_native(native: &str) -> Result<Self, ExplainError> {
        let lower = native.trim().to_ascii_lowercase();
        let mapped = match lower.as_str() {
            "inner" => JoinType::Inner,
            "left" | "left outer" => JoinType::LeftOuter,
            "right" | "right outer" => JoinType::RightOuter,
            "full" => JoinType::Full,
            "left anti" | "anti left" => JoinType::LeftAnti,
            "right anti" | "anti right" => JoinType::RightAnti,
            "semi" | "semi left inner" => JoinType::LeftSemiInner,
            "semi left outer" => JoinType::LeftSemiOuter,
            "semi right inner" => JoinType::RightSemiInner,
            "semi right outer" => JoinType::RightSemiOuter,
            "cross" => JoinType::Cross,
            _ => {
                return Err(ExplainError::UnknownNodeType {
                    node_type: format!("join type '{native}'"),
                })
            }
        };
        Ok(mapped)
    }

    /// True for the variants expressed as `[NOT] EXISTS` in SQL.
    pub fn is_semi_or_anti(self) -> bool {
        matches!(
            self,
            JoinType::LeftSemiInner
                | JoinType::LeftSemiOuter
                | JoinType::LeftAnti
                | JoinType::RightSemiInner
                | JoinType::RightSemiOuter
                | JoinType::RightAnti
        )
    }

    /// True for the anti variants.
    pub fn is_anti(self) -> bool {
        matches!(self, JoinType::LeftAnti | JoinType::RightAnti)
    }

    fn name(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::LeftOuter => "LEFT OUTER",
            JoinType::LeftSemiInner | JoinType::LeftSemiOuter => "LEFT SEMI",
            JoinType::LeftAnti => "LEFT ANTI",
            JoinType::RightOuter => "RIGHT OUTER",
            JoinType::RightSemiInner => "RIGHT SEMI INNER",
            JoinType::RightSemiOuter => "RIGHT SEMI OUTER",
            JoinType::RightAnti => "RIGHT ANTI",
            JoinType::Full => "FULL",
            JoinType::Cross => "CROSS",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            JoinType::Inner => "⋈",
            JoinType::LeftOuter => "⟕",
            JoinType::RightOuter => "⟖",
            JoinType::Full => "⟗",
            JoinType::Cross => "×",
            JoinType::LeftSemiInner | JoinType::LeftSemiOuter => "⋉",
            JoinType::RightSemiInner | JoinType::RightSemiOuter => "⋊",
            JoinType::LeftAnti => "▷",
            JoinType::RightAnti => "◁",
        }
    }
}

/// Grouping algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStrategy {
    Hash,
    SortMerge,
    Partial,
    Simple,
    Unknown,
}

impl GroupStrategy {
    fn name(self) -> &'static str {
        match self {
            GroupStrategy::Hash => "hash",
            GroupStrategy::SortMerge => "sort",
            GroupStrategy::Partial => "partial",
            GroupStrategy::Simple => "simple",
            GroupStrategy::Unknown => "unknown",
        }
    }
}

/// Distinct or bag union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnionType {
    Distinct,
    All,
}

/// Row redistribution strategy on distributed engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributeStrategy {
    Hash,
    Broadcast,
    RoundRobin,
    Gather,
}

/// Operator-specific payload of a plan node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Base table access.
    Scan {
        /// Unqualified table name.
        table_name: String,
        /// Scan or seek.
        strategy: ScanStrategy,
    },
    /// Two-input join; first child is the build side, last the probe side.
    Join {
        strategy: JoinStrategy,
        join_type: JoinType,
        /// Cleaned join condition, empty for cross joins.
        condition: String,
    },
    /// Aggregation.
    GroupBy {
        strategy: GroupStrategy,
        group_keys: Vec<Column>,
        aggregates: Vec<Column>,
    },
    /// Ordering.
    Sort { columns_sorted: Vec<Column> },
    /// Column computation/reordering.
    Projection { columns_projected: Vec<Column> },
    /// Row filter that could not be pushed into a scan.
    Selection { filter_expression: String },
    /// Concatenation of inputs.
    Union { union_type: UnionType },
    /// Row-count cutoff.
    Limit { limit_count: i64 },
    /// Row movement between workers.
    Distribute {
        strategy: DistributeStrategy,
        columns: Vec<Column>,
    },
    /// Top-level result marker.
    Select,
    /// Container running its children one after another.
    Sequence,
    /// A scan the engine optimised away entirely.
    ScanEmpty,
    /// A scan of an earlier materialised result.
    ScanMaterialised,
}

/// One operator in the canonical plan tree.
///
/// `f64` is used for row counts: planners routinely estimate values beyond
/// the integer range, and NaN marks an actual count that was never filled.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Operator tag plus payload.
    pub kind: NodeKind,
    /// Planner row estimate.
    pub rows_estimated: f64,
    /// Observed row count; NaN until filled.
    pub rows_actual: f64,
    /// Planner cost in engine-specific units.
    pub cost: f64,
    /// Cleaned filter attached to this operator, empty if none.
    pub filter_condition: String,
    /// Cleaned output column expressions.
    pub columns_output: Vec<String>,
}

impl Node {
    /// Creates a node with empty statistics.
    pub fn new(kind: NodeKind) -> Self {
        Node {
            kind,
            rows_estimated: 0.0,
            rows_actual: f64::NAN,
            cost: 0.0,
            filter_condition: String::new(),
            columns_output: Vec::new(),
        }
    }

    /// Join node constructor; the condition is cleaned here.
    pub fn join(
        join_type: JoinType,
        strategy: JoinStrategy,
        raw_condition: &str,
    ) -> Result<Self, ExpressionError> {
        Ok(Node::new(NodeKind::Join {
            strategy,
            join_type,
            condition: clean_expression(raw_condition)?,
        }))
    }

    /// Selection node constructor; the filter is cleaned here.
    pub fn selection(raw_filter: &str) -> Result<Self, ExpressionError> {
        let cleaned = clean_expression(raw_filter)?;
        let mut node = Node::new(NodeKind::Selection {
            filter_expression: cleaned.clone(),
        });
        node.filter_condition = cleaned;
        Ok(node)
    }

    /// Cleans and stores a filter condition.
    pub fn set_filter(&mut self, raw: &str) -> Result<(), ExpressionError> {
        self.filter_condition = clean_expression(raw)?;
        Ok(())
    }

    /// Canonical name of the operator kind.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Scan { .. } => "SCAN",
            NodeKind::Join { .. } => "JOIN",
            NodeKind::GroupBy { .. } => "GROUP BY",
            NodeKind::Sort { .. } => "SORT",
            NodeKind::Projection { .. } => "PROJECTION",
            NodeKind::Selection { .. } => "SELECTION",
            NodeKind::Union { .. } => "UNION",
            NodeKind::Limit { .. } => "LIMIT",
            NodeKind::Distribute { .. } => "DISTRIBUTE",
            NodeKind::Select => "SELECT",
            NodeKind::Sequence => "SEQUENCE",
            NodeKind::ScanEmpty => "SCAN EMPTY",
            NodeKind::ScanMaterialised => "SCAN MATERIALISED",
        }
    }

    /// Compact relational-algebra form of the node.
    pub fn compact_symbolic(&self) -> String {
        match &self.kind {
            NodeKind::Scan { table_name, .. } => table_name.clone(),
            NodeKind::Join {
                strategy,
                join_type,
                condition,
            } => {
                let strategy = strategy.name().to_ascii_lowercase();
                format!("{}({strategy}){{{condition}}}", join_type.symbol())
            }
            NodeKind::GroupBy {
                strategy,
                group_keys,
                aggregates,
            } => format!(
                "γ({}){{{} ; {}}}",
                strategy.name(),
                join_columns(group_keys, ", ", usize::MAX, false),
                join_columns(aggregates, ", ", usize::MAX, false)
            ),
            NodeKind::Sort { columns_sorted } => {
                let mut result = String::from("τ{");
                for column in columns_sorted {
                    result.push_str(&column.name);
                    match column.sorting {
                        Sorting::Asc => result.push('↑'),
                        Sorting::Desc => result.push('↓'),
                        Sorting::Random => {}
                    }
                }
                result.push('}');
                result
            }
            NodeKind::Projection { columns_projected } => {
                format!("π{{{}}}", join_columns(columns_projected, ", ", usize::MAX, false))
            }
            NodeKind::Selection { filter_expression } => format!("σ{{{filter_expression}}}"),
            NodeKind::Union { union_type } => match union_type {
                UnionType::Distinct => "∪{distinct}".to_string(),
                UnionType::All => "∪{all}".to_string(),
            },
            NodeKind::Limit { limit_count } => format!("λ{{{limit_count}}}"),
            NodeKind::Distribute { strategy, columns } => match strategy {
                DistributeStrategy::Hash => {
                    format!("⟨R⟩{{{}}}", join_columns(columns, ", ", usize::MAX, false))
                }
                DistributeStrategy::Broadcast => "⟨B⟩".to_string(),
                DistributeStrategy::RoundRobin => "⟨D⟩".to_string(),
                DistributeStrategy::Gather => "⟨G⟩".to_string(),
            },
            NodeKind::Select => format!("π{{{}}}", self.columns_output.join(", ")),
            NodeKind::Sequence => ";".to_string(),
            NodeKind::ScanEmpty => "📄".to_string(),
            NodeKind::ScanMaterialised => "SCAN MATERIALISED".to_string(),
        }
    }

    /// Plain-English form of the node, ellipsified to `max_width`.
    pub fn render_muggle(&self, max_width: usize) -> String {
        match &self.kind {
            NodeKind::Scan { table_name, .. } => {
                let mut result = format!("SCAN {table_name}");
                if !self.filter_condition.is_empty() {
                    result.push_str(" WHERE ");
                    let remaining = max_width.saturating_sub(result.chars().count());
                    result.push_str(&ellipsify(&self.filter_condition, remaining));
                }
                result
            }
            NodeKind::Join {
                strategy,
                join_type,
                condition,
            } => {
                let mut result = format!("{} JOIN {} ON ", join_type.name(), strategy.name());
                let remaining = max_width.saturating_sub(result.chars().count());
                result.push_str(&ellipsify(condition, remaining));
                result
            }
            NodeKind::GroupBy {
                strategy,
                group_keys,
                aggregates,
            } => {
                let mut result = format!("GROUP BY {}", strategy.name().to_ascii_uppercase());
                if !group_keys.is_empty() {
                    result.push(' ');
                    result.push_str(&join_columns(group_keys, ", ", max_width / 2, false));
                }
                result.push_str(" AGGREGATE ");
                let remaining = max_width.saturating_sub(result.chars().count());
                result.push_str(&join_columns(aggregates, ", ", remaining, false));
                result
            }
            NodeKind::Sort { columns_sorted } => {
                format!("SORT {}", join_columns(columns_sorted, ", ", max_width, true))
            }
            NodeKind::Projection { columns_projected } => {
                format!(
                    "PROJECT ({})",
                    join_columns(columns_projected, ", ", max_width, false)
                )
            }
            NodeKind::Selection { filter_expression } => {
                format!("FILTER ({})", ellipsify(filter_expression, max_width))
            }
            NodeKind::Union { union_type } => match union_type {
                UnionType::Distinct => "UNION DISTINCT".to_string(),
                UnionType::All => "UNION ALL".to_string(),
            },
            NodeKind::Limit { limit_count } => format!("LIMIT {limit_count}"),
            NodeKind::Distribute { strategy, columns } => {
                let name = match strategy {
                    DistributeStrategy::Hash => "DISTRIBUTE HASH",
                    DistributeStrategy::Broadcast => "BROADCAST",
                    DistributeStrategy::RoundRobin => "DISTRIBUTE ROUND ROBIN",
                    DistributeStrategy::Gather => "GATHER",
                };
                if columns.is_empty() {
                    name.to_string()
                } else {
                    format!("{name} ({})", join_columns(columns, ", ", max_width, false))
                }
            }
            NodeKind::Select => "SELECT".to_string(),
            NodeKind::Sequence => "SEQUENCE".to_string(),
            NodeKind::ScanEmpty => "SCAN EMPTY".to_string(),
            NodeKind::ScanMaterialised => "SCAN MATERIALISED".to_string(),
        }
    }
}
