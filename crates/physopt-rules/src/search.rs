//! # Property-Driven Physical Search
//!
//! `PhysicalSearch` converts a logical plan into the cheapest physical plan that satisfies
//! a required property. The search is top-down and recursive:
//!
//! 1. The root is asked for the empty property.
//! 2. Each node checks the memo for `(node id, property)`. On a miss it derives the
//!    properties to ask its children for, converts them, combines the results into one or
//!    more candidate plans, and keeps the cheapest.
//! 3. Whatever the candidate does not deliver natively (order, limit) is enforced on top by
//!    `enforce_property`, so every answer satisfies the property it was asked for, or has
//!    infinite cost.
//! 4. The answer is stored in the memo before returning.
//!
//! A node can be asked several times with different properties (for example once ordered
//! and once unordered by a Sort above it); each distinct request is computed once.
//!
//! ## Infeasibility
//!
//! Some requests cannot be satisfied by some operators (ordering a projection by a
//! computed column, ordering an Apply by an inner column). Those return
//! `PhysicalPlanInfo::infeasible()` or a plan with infinite cost, which always loses a
//! comparison. The root request is always satisfiable; an infinite root is reported as
//! `OptimizerError::NoFeasiblePlan`.

use crate::enforcer::enforce_property;
use physopt_core::catalog::Catalog;
use physopt_core::cost::CostModel;
use physopt_core::error::{OptimizerError, Result};
use physopt_core::expr::Schema;
use physopt_core::memo::{Memo, MemoStats, PhysicalPlanInfo};
use physopt_core::plan::{LogicalOp, LogicalPlan, PhysicalOp, PhysicalPlan};
use physopt_core::properties::RequiredProperty;
use physopt_core::pushdown::StorageClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

/// Immutable configuration of one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub cost: CostModel,
    /// Worker count hint written on hash joins for the execution layer.
    pub join_concurrency: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cost: CostModel::default(),
            join_concurrency: 5,
        }
    }
}

/// Result of a successful optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPlan {
    pub plan: PhysicalPlan,
    pub cost: f64,
    pub rows: u64,
}

/// The physical search engine.
///
/// Owns the memo of one optimization pass. Catalog and storage client are shared,
/// read-only collaborators.
pub struct PhysicalSearch {
    pub memo: Memo,
    pub catalog: Arc<dyn Catalog>,
    pub client: Arc<dyn StorageClient>,
    pub config: SearchConfig,
}

impl PhysicalSearch {
    pub fn new(catalog: Arc<dyn Catalog>, client: Arc<dyn StorageClient>, config: SearchConfig) -> Self {
        Self {
            memo: Memo::new(),
            catalog,
            client,
            config,
        }
    }

    pub fn model(&self) -> &CostModel {
        &self.config.cost
    }

    pub fn memo_stats(&self) -> MemoStats {
        self.memo.stats()
    }

    /// Optimize a whole plan under the empty property.
    pub fn optimize(&mut self, plan: &LogicalPlan) -> Result<OptimizedPlan> {
        plan.validate()?;
        debug!(
            "Starting physical search: root={}, kind={}",
            plan.id,
            plan.op.kind()
        );
        let info = self.convert(plan, None, &RequiredProperty::empty())?;
        let PhysicalPlanInfo { plan: best, cost, count } = info;
        let best = match best {
            Some(p) if !cost.is_infinite() => p,
            _ => {
                debug!("Physical search failed: no feasible plan");
                return Err(OptimizerError::NoFeasiblePlan);
            }
        };
        let stats = self.memo.stats();
        debug!(
            "Physical search complete: cost={}, rows={}, memo_entries={}, hits={}",
            cost,
            count,
            self.memo.len(),
            stats.hits
        );
        Ok(OptimizedPlan {
            plan: best,
            cost: cost.total,
            rows: count,
        })
    }

    /// Convert `node` under `prop`, consulting and populating the memo.
    ///
    /// `parent` is the logical parent of `node`; scans use it to see the filter conditions
    /// of a Selection directly above them.
    pub fn convert(
        &mut self,
        node: &LogicalPlan,
        parent: Option<&LogicalPlan>,
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        if let Some(info) = self.memo.get(node.id, prop) {
            return Ok(info);
        }
        let info = self
            .convert_uncached(node, parent, prop)
            .map_err(|e| e.at_node(node.id, node.op.kind()))?
            .sync_row_count();
        trace!(
            "Converted {} node {}: prop={}, cost={}, count={}",
            node.op.kind(),
            node.id,
            prop,
            info.cost,
            info.count
        );
        self.memo.insert(node.id, prop.clone(), info.clone());
        Ok(info)
    }

    fn convert_uncached(
        &mut self,
        node: &LogicalPlan,
        parent: Option<&LogicalPlan>,
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        match &node.op {
            LogicalOp::DataSource { .. } => self.convert_data_source(node, parent, prop),
            LogicalOp::Selection { .. } => self.convert_selection(node, prop),
            LogicalOp::Projection { .. } => self.convert_projection(node, prop),
            LogicalOp::Join { .. } => self.convert_join(node, prop),
            LogicalOp::Aggregation { .. } => self.convert_aggregation(node, prop),
            LogicalOp::Sort { .. } => self.convert_sort(node, prop),
            LogicalOp::Limit { .. } => self.convert_limit(node, prop),
            LogicalOp::Union => self.convert_union(node, prop),
            LogicalOp::Distinct => self.convert_distinct(node, prop),
            LogicalOp::Apply { .. } => self.convert_apply(node, prop),
        }
    }

    pub(crate) fn enforce(&self, prop: &RequiredProperty, info: PhysicalPlanInfo) -> PhysicalPlanInfo {
        enforce_property(prop, info, &self.config.cost)
    }
}

/// Place `op` above the plan of `info`, keeping cost and count.
pub(crate) fn add_parent(
    info: PhysicalPlanInfo,
    op: PhysicalOp,
    schema: &Schema,
    correlated: bool,
) -> PhysicalPlanInfo {
    let PhysicalPlanInfo { plan, cost, count } = info;
    match plan {
        None => PhysicalPlanInfo {
            plan: None,
            cost,
            count,
        },
        Some(child) => {
            let correlated = correlated || child.correlated;
            let plan = PhysicalPlan {
                op,
                children: vec![child],
                schema: schema.clone(),
                correlated,
                row_count: count,
            };
            PhysicalPlanInfo::new(plan, cost, count)
        }
    }
}

/// Keep the cheaper of two results; `current` wins ties.
pub(crate) fn cheaper(current: PhysicalPlanInfo, candidate: PhysicalPlanInfo) -> PhysicalPlanInfo {
    if candidate.cost < current.cost {
        candidate
    } else {
        current
    }
}

pub(crate) fn wrong_node(node: &LogicalPlan, expected: &str) -> OptimizerError {
    OptimizerError::InvalidPlan(format!(
        "node {} is a {}, expected {}",
        node.id,
        node.op.kind(),
        expected
    ))
}
