//! Row statistics and mis-estimation analysis over a built plan.

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::plan::{Node, NodeKind, Plan};
use crate::tree::NodeId;

/// A row count safe for external reporting.
///
/// Planner estimates live in `f64` internally and can be NaN or beyond the
/// unsigned range; clamping happens only here, at the reporting boundary.
/// NaN maps to an explicit [`RowCount::Unknown`] rather than overloading the
/// maximum representable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowCount {
    /// A concrete count, saturated at `u64::MAX`.
    Exact(u64),
    /// The engine never reported or computed this count.
    Unknown,
}

impl RowCount {
    /// The count, when known.
    pub fn value(self) -> Option<u64> {
        match self {
            RowCount::Exact(v) => Some(v),
            RowCount::Unknown => None,
        }
    }
}

impl fmt::Display for RowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowCount::Exact(v) => write!(f, "{v}"),
            RowCount::Unknown => write!(f, "∞"),
        }
    }
}

/// Clamps a planner row value to a reportable count.
///
/// NaN and the negative sentinels mean "never filled"; values beyond the
/// unsigned range saturate to the maximum.
pub fn cutoff(plan_rows: f64) -> RowCount {
    if plan_rows.is_nan() || plan_rows < 0.0 {
        return RowCount::Unknown;
    }
    if plan_rows > u64::MAX as f64 {
        return RowCount::Exact(u64::MAX);
    }
    RowCount::Exact(plan_rows as u64)
}

/// Operation class used when bucketing estimation accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Operation {
    Join,
    Sort,
    Filter,
    Aggregate,
}

impl Operation {
    /// All classes, in report order.
    pub const ALL: [Operation; 4] = [
        Operation::Join,
        Operation::Sort,
        Operation::Filter,
        Operation::Aggregate,
    ];

    fn of(node: &Node) -> Option<Operation> {
        match node.kind {
            NodeKind::Join { .. } => Some(Operation::Join),
            NodeKind::Sort { .. } => Some(Operation::Sort),
            NodeKind::Selection { .. } => Some(Operation::Filter),
            NodeKind::GroupBy { .. } => Some(Operation::Aggregate),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Join => "Join",
            Operation::Sort => "Sort",
            Operation::Filter => "Filter",
            Operation::Aggregate => "Aggregate",
        };
        write!(f, "{name}")
    }
}

/// How far off the planner was for one operation class.
///
/// `magnitude` is a signed power of two: +2 means the estimate was about 4x
/// the actual, -1 means about half of it. The full operation x magnitude
/// cross-product is always emitted, zero-filled and sorted, so two runs are
/// diffable line by line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MisEstimation {
    /// Operation class the bucket belongs to.
    pub operation: Operation,
    /// Clamped signed order of magnitude, in `[-4, 4]`.
    pub magnitude: i8,
    /// Number of plan nodes falling into this bucket.
    pub count: u64,
}

/// Range of the clamped magnitude buckets.
pub const MAGNITUDE_RANGE: std::ops::RangeInclusive<i8> = -4..=4;

fn magnitude(rows_estimated: f64, rows_actual: f64) -> i8 {
    // NaN never compares greater, so an unfilled actual falls back to 1.
    let estimated = if rows_estimated > 1.0 { rows_estimated } else { 1.0 };
    let actual = if rows_actual > 1.0 { rows_actual } else { 1.0 };
    let raw = (estimated / actual).log2().round();
    raw.clamp(-4.0, 4.0) as i8
}

impl Plan {
    fn first_child_actual(&self, id: NodeId) -> f64 {
        self.tree()
            .first_child(id)
            .map(|c| self.node(c).rows_actual)
            .unwrap_or(f64::NAN)
    }

    /// Rows flowing through joins: for each join, the larger of its build
    /// input and its own output, so cardinality-increasing joins count.
    pub fn rows_joined(&self) -> Result<RowCount> {
        self.validate()?;
        let mut total = 0.0;
        for id in self.tree().depth_first(self.root()) {
            if matches!(self.node(id).kind, NodeKind::Join { .. }) {
                total += self.first_child_actual(id).max(self.node(id).rows_actual);
            }
        }
        Ok(cutoff(total))
    }

    /// Rows fed into aggregations.
    pub fn rows_aggregated(&self) -> Result<RowCount> {
        self.validate()?;
        let mut total = 0.0;
        for id in self.tree().depth_first(self.root()) {
            if matches!(self.node(id).kind, NodeKind::GroupBy { .. }) {
                total += self.first_child_actual(id);
            }
        }
        Ok(cutoff(total))
    }

    /// Rows passing through sorts.
    pub fn rows_sorted(&self) -> Result<RowCount> {
        self.validate()?;
        let mut total = 0.0;
        for id in self.tree().depth_first(self.root()) {
            if matches!(self.node(id).kind, NodeKind::Sort { .. }) {
                total += self.node(id).rows_actual;
            }
        }
        Ok(cutoff(total))
    }

    /// Rows read from base tables.
    pub fn rows_scanned(&self) -> Result<RowCount> {
        self.validate()?;
        let mut total = 0.0;
        for id in self.tree().depth_first(self.root()) {
            if matches!(self.node(id).kind, NodeKind::Scan { .. }) {
                total += self.node(id).rows_actual;
            }
        }
        Ok(cutoff(total))
    }

    /// Rows dropped between each non-leaf node and its first input.
    /// Limits are excluded; a cutoff is not a filter.
    pub fn rows_filtered(&self) -> Result<RowCount> {
        self.validate()?;
        let mut total = 0.0;
        for id in self.tree().depth_first(self.root()) {
            if self.tree().children(id).is_empty() {
                continue;
            }
            if matches!(self.node(id).kind, NodeKind::Limit { .. }) {
                continue;
            }
            total += self.first_child_actual(id) - self.node(id).rows_actual;
        }
        Ok(cutoff(total))
    }

    /// Rows the engine had to move through joins, aggregations, and sorts.
    pub fn rows_processed(&self) -> Result<RowCount> {
        let parts = [
            self.rows_joined()?,
            self.rows_aggregated()?,
            self.rows_sorted()?,
        ];
        let mut total: u64 = 0;
        for part in parts {
            match part.value() {
                Some(v) => total = total.saturating_add(v),
                None => return Ok(RowCount::Unknown),
            }
        }
        Ok(RowCount::Exact(total))
    }

    /// Buckets every join/sort/filter/aggregate node by how far its estimate
    /// was from its actual.
    ///
    /// Always returns the 4 operations x 9 magnitudes = 36 buckets, sorted
    /// by operation then magnitude, with unseen combinations at count 0.
    pub fn mis_estimations(&self) -> Result<Vec<MisEstimation>> {
        self.validate()?;
        let mut buckets = Vec::with_capacity(36);
        for operation in Operation::ALL {
            for magnitude in MAGNITUDE_RANGE {
                buckets.push(MisEstimation {
                    operation,
                    magnitude,
                    count: 0,
                });
            }
        }
        for id in self.tree().depth_first(self.root()) {
            let node = self.node(id);
            let Some(operation) = Operation::of(node) else {
                continue;
            };
            let m = magnitude(node.rows_estimated, node.rows_actual);
            let slot = buckets
                .iter_mut()
                .find(|b| b.operation == operation && b.magnitude == m)
                .expect("cross-product covers every clamped magnitude");
            slot.count += 1;
        }
        Ok(buckets)
    }
}
