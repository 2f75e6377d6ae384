//! # Storage Pushdown
//!
//! Distributable scans (table and index scans) are executed by a storage client that
//! may evaluate part of the query next to the data: filters, limits, top-N and partial
//! aggregation. The optimizer asks the client what it supports through the
//! `StorageClient` trait and records what was pushed on the scan node.
//!
//! Pushed predicates are handed over in an opaque encoded form (JSON of the conjunct
//! list); the conditions themselves are kept on the scan for display and estimation.

use crate::expr::{AggExpr, AggFunc, Expr};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Kind of request sent to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    /// Row reads through the table handle.
    Select,
    /// Reads through a secondary index.
    Index,
}

/// Optional request capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestSubType {
    Basic,
    Limit,
    TopN,
    GroupBy,
}

/// Conditions split by what storage accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateSplit {
    /// Encoded form of `pushed`, `None` when nothing was pushed.
    pub predicate: Option<String>,
    pub pushed: Vec<Expr>,
    pub residual: Vec<Expr>,
}

pub trait StorageClient: Send + Sync {
    fn supports(&self, req: RequestType, sub: RequestSubType) -> bool;

    /// Split `conditions` into the ones storage can evaluate and the rest.
    fn split_pushable(&self, conditions: Vec<Expr>) -> PredicateSplit;

    fn supports_aggregate(&self, agg: &AggExpr) -> bool;
}

/// Capabilities of the default storage client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageCapabilities {
    pub select: bool,
    pub index: bool,
    pub limit: bool,
    pub top_n: bool,
    pub aggregation: bool,
    /// Functions storage cannot evaluate.
    pub blocked_functions: Vec<String>,
}

impl Default for StorageCapabilities {
    fn default() -> Self {
        Self {
            select: true,
            index: true,
            limit: true,
            top_n: true,
            aggregation: true,
            blocked_functions: Vec::new(),
        }
    }
}

impl StorageCapabilities {
    /// A storage client that evaluates nothing.
    pub fn none() -> Self {
        Self {
            select: false,
            index: false,
            limit: false,
            top_n: false,
            aggregation: false,
            blocked_functions: Vec::new(),
        }
    }
}

/// Storage client driven by a static capability set.
#[derive(Debug, Clone, Default)]
pub struct CapabilityClient {
    caps: StorageCapabilities,
}

impl CapabilityClient {
    pub fn new(caps: StorageCapabilities) -> Self {
        Self { caps }
    }

    pub fn capabilities(&self) -> &StorageCapabilities {
        &self.caps
    }

    fn can_evaluate(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Column(_) | Expr::Literal(_) => true,
            Expr::Correlated(_) => false,
            Expr::BinaryOp { left, right, .. } => self.can_evaluate(left) && self.can_evaluate(right),
            Expr::UnaryOp { operand, .. } => self.can_evaluate(operand),
            Expr::Function { name, args } => {
                !self
                    .caps
                    .blocked_functions
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(name))
                    && args.iter().all(|a| self.can_evaluate(a))
            }
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().all(|e| self.can_evaluate(e)),
        }
    }
}

impl StorageClient for CapabilityClient {
    fn supports(&self, req: RequestType, sub: RequestSubType) -> bool {
        let base = match req {
            RequestType::Select => self.caps.select,
            RequestType::Index => self.caps.index,
        };
        base && match sub {
            RequestSubType::Basic => true,
            RequestSubType::Limit => self.caps.limit,
            RequestSubType::TopN => self.caps.top_n,
            RequestSubType::GroupBy => self.caps.aggregation,
        }
    }

    fn split_pushable(&self, conditions: Vec<Expr>) -> PredicateSplit {
        let (pushed, mut residual): (Vec<Expr>, Vec<Expr>) =
            conditions.into_iter().partition(|c| self.can_evaluate(c));
        if pushed.is_empty() {
            return PredicateSplit {
                predicate: None,
                pushed,
                residual,
            };
        }
        match serde_json::to_string(&pushed) {
            Ok(encoded) => {
                trace!("Pushed {} conditions to storage", pushed.len());
                PredicateSplit {
                    predicate: Some(encoded),
                    pushed,
                    residual,
                }
            }
            Err(e) => {
                trace!("Predicate encoding failed, keeping conditions: {}", e);
                residual.extend(pushed);
                PredicateSplit {
                    predicate: None,
                    pushed: Vec::new(),
                    residual,
                }
            }
        }
    }

    fn supports_aggregate(&self, agg: &AggExpr) -> bool {
        self.caps.aggregation
            && matches!(
                agg.func,
                AggFunc::Count | AggFunc::Sum | AggFunc::Avg | AggFunc::Min | AggFunc::Max | AggFunc::FirstRow
            )
            && self.can_evaluate(&agg.arg)
    }
}
