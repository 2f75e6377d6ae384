//! Error types for the optimizer.
//!
//! Infeasibility is not an error: a plan that cannot satisfy a requested property
//! is reported with `Cost::infinite()`. The errors below abort the compilation.

use crate::expr::ColumnRef;
use thiserror::Error;

/// Failure while evaluating or comparing constants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("cannot compare {left} with {right}")]
    Incomparable { left: String, right: String },
    #[error("value {0} cannot be used as a condition")]
    NotBoolean(String),
}

/// Histogram query failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    #[error("histogram for column {column} is malformed: {reason}")]
    MalformedHistogram { column: String, reason: String },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Range construction failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    /// The constant cannot be represented exactly in the column's domain.
    /// Callers fall back to the full range.
    #[error("constant {value} truncated when building ranges on {column}")]
    Truncated { column: String, value: String },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl RangeError {
    pub fn is_soft(&self) -> bool {
        matches!(self, RangeError::Truncated { .. })
    }
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("range construction failed: {0}")]
    Range(#[from] RangeError),
    #[error("expression evaluation failed: {0}")]
    Evaluation(#[from] EvalError),
    #[error("column {column} not found in schema during {operation}")]
    SchemaLookup {
        column: ColumnRef,
        operation: &'static str,
    },
    #[error("statistics error: {0}")]
    Stats(#[from] StatsError),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("no feasible physical plan for the root node")]
    NoFeasiblePlan,
    #[error("while converting {kind} node {node}: {source}")]
    Context {
        node: u32,
        kind: &'static str,
        #[source]
        source: Box<OptimizerError>,
    },
}

impl OptimizerError {
    /// Attach the originating plan node, keeping the innermost context.
    pub fn at_node(self, node: u32, kind: &'static str) -> Self {
        match self {
            ctx @ OptimizerError::Context { .. } => ctx,
            other => OptimizerError::Context {
                node,
                kind,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
