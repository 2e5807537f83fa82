#![allow(missing_docs)]

use thiserror::Error;

/// Convenience alias for explain-pipeline results.
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Error raised by the query-execution collaborator.
///
/// The core never interprets these; the message is surfaced verbatim so the
/// caller can tell which engine produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("database error: {message}")]
pub struct DatabaseError {
    /// Driver-supplied message, passed through untouched.
    pub message: String,
    /// Statement that triggered the failure, when known.
    pub statement: Option<String>,
}

impl DatabaseError {
    /// Wraps a driver message without statement context.
    pub fn new(message: impl Into<String>) -> Self {
        DatabaseError {
            message: message.into(),
            statement: None,
        }
    }

    /// Wraps a driver message together with the statement that caused it.
    pub fn with_statement(message: impl Into<String>, statement: impl Into<String>) -> Self {
        DatabaseError {
            message: message.into(),
            statement: Some(statement.into()),
        }
    }
}

/// Structured errors emitted while turning native explain output into a
/// canonical plan.
///
/// Nothing here is recovered locally: every variant aborts the enclosing
/// `explain` call and carries enough context (offending expression text or
/// native node type) to tell which adapter produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExplainError {
    /// A native node type had no canonical mapping and no single child to
    /// skip to.
    #[error("unhandled native node '{node_type}' has no child to skip to")]
    UnmappedLeaf {
        /// Native type name of the node that could not be skipped.
        node_type: String,
    },
    /// Skipping an unmapped native node would have collapsed more than one
    /// child into its position.
    #[error("unhandled native node '{node_type}' has {children} children, cannot skip")]
    AmbiguousSkip {
        /// Native type name of the node that could not be skipped.
        node_type: String,
        /// How many children the node had.
        children: usize,
    },
    /// A native node type the adapter does not recognise at all.
    #[error("could not map native node of type '{node_type}'")]
    UnknownNodeType {
        /// Native type name as it appeared in the payload.
        node_type: String,
    },
    /// The payload did not have the overall shape the adapter expects.
    #[error("malformed explain payload: {0}")]
    MalformedPayload(String),
    /// A join or union was found with too few children at statistics or
    /// render time.
    #[error("{kind} node has {found} children, expected at least {expected}")]
    ChildArity {
        /// Canonical kind name of the offending node.
        kind: &'static str,
        /// Children actually present.
        found: usize,
        /// Minimum children the kind requires.
        expected: usize,
    },
    /// The sink handed to the renderer refused the output.
    #[error("failed writing rendered output")]
    RenderWrite,
    /// An expression could not be tokenized or normalized.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    /// The query runner failed while executing the explain statement or an
    /// actual-row backfill query.
    #[error(transparent)]
    Backfill(#[from] DatabaseError),
}

/// Failure while cleaning a single scalar expression.
///
/// Fatal to the expression being cleaned, which propagates as fatal to the
/// enclosing adapter call; no expression is ever silently left uncleaned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// A parenthesis without a partner.
    #[error("unmatched parenthesis in expression: {expression}")]
    UnmatchedParenthesis {
        /// The expression being cleaned when the failure occurred.
        expression: String,
    },
    /// A character outside the literal/operator alphabets.
    #[error("invalid character '{found}' in expression, expected a literal: {expression}")]
    InvalidCharacter {
        /// The character the tokenizer choked on.
        found: char,
        /// The expression being cleaned when the failure occurred.
        expression: String,
    },
}
