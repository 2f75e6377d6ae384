//! # Memo
//!
//! The memo caches, for every logical node, the best physical plan found for each
//! required property it was asked for. A node is typically asked several times during
//! one search (ordered and unordered, with and without limits), and the same subtree can
//! be reached from several ancestors; every answer is computed once.
//!
//! Entries are never invalidated during a search. Infeasible answers (`+∞`) are cached
//! like any other.

use crate::cost::Cost;
use crate::plan::{NodeId, PhysicalPlan};
use crate::properties::RequiredProperty;
use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

/// Result of converting a logical node under one required property.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalPlanInfo {
    /// `None` only for infeasible results.
    pub plan: Option<PhysicalPlan>,
    pub cost: Cost,
    pub count: u64,
}

impl PhysicalPlanInfo {
    pub fn new(plan: PhysicalPlan, cost: Cost, count: u64) -> Self {
        Self {
            plan: Some(plan),
            cost,
            count,
        }
    }

    pub fn infeasible() -> Self {
        Self {
            plan: None,
            cost: Cost::infinite(),
            count: 0,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.plan.is_some() && !self.cost.is_infinite()
    }

    /// A provably empty result, valid under every property.
    pub fn is_dummy(&self) -> bool {
        self.plan.as_ref().map(|p| p.is_dummy()).unwrap_or(false)
    }

    /// Mark the result as unable to satisfy the requested property.
    pub fn make_infinite(mut self) -> Self {
        self.cost = Cost::infinite();
        self
    }

    /// Keep the row-count annotation of the root plan node in sync with `count`.
    pub fn sync_row_count(mut self) -> Self {
        if let Some(p) = self.plan.as_mut() {
            p.row_count = self.count;
        }
        self
    }
}

/// Memo access counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub lookups: u64,
    pub hits: u64,
    pub inserts: u64,
}

#[derive(Debug, Default)]
pub struct Memo {
    entries: HashMap<NodeId, HashMap<RequiredProperty, PhysicalPlanInfo>>,
    stats: MemoStats,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, node: NodeId, prop: &RequiredProperty) -> Option<PhysicalPlanInfo> {
        self.stats.lookups += 1;
        let hit = self.entries.get(&node).and_then(|m| m.get(prop)).cloned();
        if hit.is_some() {
            self.stats.hits += 1;
            trace!("Memo hit: node={}, prop={}", node, prop);
        }
        hit
    }

    pub fn insert(&mut self, node: NodeId, prop: RequiredProperty, info: PhysicalPlanInfo) {
        trace!(
            "Memo insert: node={}, prop={}, cost={}, count={}",
            node,
            prop,
            info.cost,
            info.count
        );
        self.stats.inserts += 1;
        self.entries.entry(node).or_default().insert(prop, info);
    }

    pub fn stats(&self) -> MemoStats {
        self.stats
    }

    /// Number of distinct (node, property) entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
