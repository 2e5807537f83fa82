//! Seam to the wire-level database drivers.
//!
//! The explain core never talks to a socket itself; it is handed something
//! implementing [`QueryRunner`] and uses it for the original explain
//! statement and for per-node `COUNT(*)` backfill queries. Drivers live in
//! the surrounding benchmarking framework.

use crate::error::DatabaseError;

/// A scalar value coming back from a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Character data.
    Text(String),
}

impl SqlValue {
    /// The value as a row count, when it is one.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            SqlValue::Int(v) if *v >= 0 => Some(*v as u64),
            SqlValue::Float(v) if *v >= 0.0 => Some(*v as u64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// The value as text, when it is character data.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// One fetched row.
pub type Row = Vec<SqlValue>;

/// Minimal query-execution contract the explain pipeline needs.
///
/// Every method may block; calls are strictly sequential within one explain
/// invocation. Timeouts are the implementor's business and surface as
/// ordinary [`DatabaseError`]s.
pub trait QueryRunner {
    /// Runs a statement for its side effect.
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// Runs a statement and returns the first column of the first row.
    fn fetch_scalar(&mut self, sql: &str) -> Result<SqlValue, DatabaseError>;

    /// Runs a statement and returns all rows.
    fn fetch_rows(&mut self, sql: &str) -> Result<Vec<Row>, DatabaseError>;
}
