//! # Access Path Selection
//!
//! A logical DataSource is implemented by one of several access paths:
//!
//! - **TableScan**: reads the table in handle order. When the table's integer primary
//!   key is the row handle, conditions on it become handle ranges and the scan can
//!   deliver rows ordered by the primary key.
//! - **IndexScan**: one candidate per index. Leading equality conditions fix a prefix of
//!   the index columns, the next column may be restricted by comparisons. The scan
//!   delivers rows ordered by the index columns, or by the columns after the fixed
//!   prefix. An index that does not hold every output column needs a second lookup by
//!   handle (`double_read`) and costs twice as much per row.
//! - **DummyScan**: a constant condition of the parent Selection that folds to false
//!   proves the result empty.
//!
//! The DataSource sees the conditions of a Selection directly above it and consumes
//! them: access conditions become ranges, conditions storage can evaluate are pushed
//! into the scan, and the rest stay in a `Selection { on_table: true }` above it.
//!
//! ## Cost
//!
//! `rows · network`, doubled for double-read index scans. When a limit can be pushed
//! into the scan only `offset + count` rows are read. A scan that cannot deliver the
//! requested order is not rejected; it is sorted explicitly and pays the sort.

use crate::search::{wrong_node, PhysicalSearch};
use physopt_core::catalog::{IndexInfo, TableInfo};
use physopt_core::cost::{Cost, CostModel};
use physopt_core::error::{OptimizerError, Result};
use physopt_core::expr::{ColumnRef, Expr, TableRef};
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{
    IndexScan, LogicalOp, LogicalPlan, PhysicalOp, PhysicalPlan, PushedDown, TableScan,
};
use physopt_core::properties::{match_prop, ColumnProp, RequiredProperty};
use physopt_core::pushdown::{PredicateSplit, RequestSubType, RequestType};
use physopt_core::ranges::{
    build_index_ranges, build_table_ranges, detach_index_conditions, detach_table_conditions,
    DetachedConditions, IndexRange, TableRange,
};
use physopt_core::stats::{row_count_by_index_ranges, row_count_by_table_ranges, TableStatistics};
use std::sync::Arc;
use tracing::{trace, warn};

/// An access path before the required property is applied.
struct ScanCandidate {
    /// The scan, possibly under a residual `Selection { on_table: true }`.
    plan: PhysicalPlan,
    count: u64,
    /// Columns the scan can deliver its rows ordered by.
    order: Vec<ColumnRef>,
    /// Leading entries of `order` fixed to a single value.
    eq_prefix: usize,
    double_read: bool,
}

/// Cost of reading `rows` rows through `plan`'s scan.
pub(crate) fn scan_cost(model: &CostModel, plan: &PhysicalPlan, rows: u64) -> f64 {
    let cost = model.scan_cost(rows);
    if plan.is_double_read() {
        cost * 2.0
    } else {
        cost
    }
}

/// The scan itself, when it is the plan root or directly under its residual filter.
fn scan_mut(plan: &mut PhysicalPlan) -> Option<&mut PhysicalPlan> {
    if plan.is_dist_scan() {
        return Some(plan);
    }
    match plan.op {
        PhysicalOp::Selection { on_table: true, .. } => {
            plan.children.first_mut().filter(|c| c.is_dist_scan())
        }
        _ => None,
    }
}

fn set_keep_order(plan: &mut PhysicalPlan, desc: bool) {
    let Some(scan) = scan_mut(plan) else {
        return;
    };
    match &mut scan.op {
        PhysicalOp::TableScan(ts) => {
            ts.keep_order = true;
            ts.desc = desc;
        }
        PhysicalOp::IndexScan(is) => {
            is.keep_order = true;
            is.desc = desc;
        }
        _ => {}
    }
}

/// Whether a constant condition proves the filter empty.
fn always_false(conditions: &[Expr]) -> Result<bool> {
    for cond in conditions {
        if let Some(value) = cond.as_constant() {
            if !value.to_bool()? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

impl PhysicalSearch {
    pub(crate) fn convert_data_source(
        &mut self,
        node: &LogicalPlan,
        parent: Option<&LogicalPlan>,
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        let LogicalOp::DataSource {
            table,
            columns,
            index_hints,
        } = &node.op
        else {
            return Err(wrong_node(node, "DataSource"));
        };
        let (filtered, conditions) = match parent.map(|p| &p.op) {
            Some(LogicalOp::Selection { conditions }) => (true, conditions.clone()),
            _ => (false, Vec::new()),
        };

        if always_false(&conditions)? {
            trace!("DataSource {} is provably empty", node.id);
            let dummy = PhysicalPlan::leaf(PhysicalOp::DummyScan, node.schema.clone(), node.correlated, 0);
            return Ok(PhysicalPlanInfo::new(dummy, Cost::zero(), 0));
        }
        // Constant true conditions filter nothing.
        let conditions: Vec<Expr> = conditions
            .into_iter()
            .filter(|c| c.as_constant().is_none())
            .collect();

        let info = self
            .catalog
            .table_info(table)
            .ok_or_else(|| OptimizerError::InvalidPlan(format!("unknown table {}", table)))?;
        let stats = self
            .catalog
            .table_stats(table)
            .unwrap_or_else(|| Arc::new(TableStatistics::pseudo()));

        let hinted: Vec<&IndexInfo> = info
            .indexes
            .iter()
            .filter(|i| index_hints.contains(&i.name))
            .collect();
        let (candidates, table_allowed): (Vec<&IndexInfo>, bool) = if hinted.is_empty() {
            if !index_hints.is_empty() {
                warn!(
                    "Index hints {:?} match no index of {}, ignoring them",
                    index_hints, table
                );
            }
            (info.indexes.iter().collect(), true)
        } else {
            (hinted, false)
        };

        let mut best = if table_allowed {
            let cand = self.table_scan(node, &info, &stats, conditions.clone())?;
            let result = self.match_scan_property(cand, prop);
            trace!("Access path TableScan {}: cost={}", table, result.cost);
            result
        } else {
            PhysicalPlanInfo::infeasible()
        };

        if !table_allowed || filtered || prop.has_order() {
            for index in candidates {
                let cand = self.index_scan(node, &info, &stats, index, columns, conditions.clone(), filtered)?;
                let result = self.match_scan_property(cand, prop);
                trace!(
                    "Access path IndexScan {}.{}: cost={}",
                    table,
                    index.name,
                    result.cost
                );
                if result.cost < best.cost {
                    best = result;
                }
            }
        }
        Ok(best)
    }

    fn split_for(&self, req: RequestType, conditions: Vec<Expr>) -> PredicateSplit {
        if conditions.is_empty() || !self.client.supports(req, RequestSubType::Basic) {
            return PredicateSplit {
                predicate: None,
                pushed: Vec::new(),
                residual: conditions,
            };
        }
        self.client.split_pushable(conditions)
    }

    /// Refine `base` with histogram estimates of single-column filters.
    ///
    /// Every column with a histogram is estimated as a one-column index range; the
    /// smallest estimate wins. Without any, a pushed predicate scales by the selection
    /// factor.
    fn estimate_filters(
        &self,
        stats: &TableStatistics,
        table: &TableRef,
        base: u64,
        filters: &[Expr],
        pushed: bool,
    ) -> Result<u64> {
        let model = self.model();
        let mut seen: Vec<&ColumnRef> = Vec::new();
        let mut best: Option<u64> = None;
        for cond in filters {
            let Some((col, _, _)) = cond.as_column_comparison() else {
                continue;
            };
            if seen.contains(&col) || col.table.as_deref().is_some_and(|t| t != table.name) {
                continue;
            }
            seen.push(col);
            if stats.histogram(&col.name).is_none() {
                continue;
            }
            let cols = [col.clone()];
            let access = detach_index_conditions(filters.to_vec(), &cols);
            if access.detached.access.is_empty() {
                continue;
            }
            let ranges = match build_index_ranges(&access) {
                Ok(r) => r,
                Err(e) if e.is_soft() => continue,
                Err(e) => return Err(e.into()),
            };
            let est = row_count_by_index_ranges(stats, &ranges, &cols, model)?;
            best = Some(best.map_or(est, |b| b.min(est)));
        }
        Ok(match best {
            Some(est) => est.min(base),
            None if pushed => CostModel::scale(base, model.selection),
            None => base,
        })
    }

    fn table_scan(
        &self,
        node: &LogicalPlan,
        info: &TableInfo,
        stats: &TableStatistics,
        conditions: Vec<Expr>,
    ) -> Result<ScanCandidate> {
        let table = &info.table;
        let pk = info
            .pk_handle
            .as_ref()
            .map(|h| ColumnRef::new(table.name.clone(), h.clone()));

        let mut detached = match &pk {
            Some(pk) => detach_table_conditions(conditions, pk),
            None => DetachedConditions {
                access: Vec::new(),
                residual: conditions,
            },
        };
        let ranges = match (&pk, detached.access.is_empty()) {
            (Some(pk), false) => match build_table_ranges(&detached.access, pk) {
                Ok(r) => r,
                Err(e) if e.is_soft() => {
                    warn!("Handle range on {} falls back to full range: {}", table, e);
                    let access = std::mem::take(&mut detached.access);
                    detached.residual.extend(access);
                    vec![TableRange::full()]
                }
                Err(e) => return Err(e.into()),
            },
            _ => vec![TableRange::full()],
        };

        let base = match &pk {
            Some(pk) if !detached.access.is_empty() => row_count_by_table_ranges(stats, &ranges, pk)?,
            _ => stats.count,
        };
        let split = self.split_for(RequestType::Select, detached.residual);
        let filters: Vec<Expr> = split.pushed.iter().chain(split.residual.iter()).cloned().collect();
        let count = self.estimate_filters(stats, table, base, &filters, split.predicate.is_some())?;

        let correlated = node.correlated || split.pushed.iter().any(|c| c.is_correlated());
        let scan = TableScan {
            table: table.clone(),
            columns: columns_of(node),
            pk_handle: pk.clone(),
            ranges,
            access_conditions: detached.access,
            pushdown: PushedDown {
                predicate: split.predicate,
                conditions: split.pushed,
                ..PushedDown::default()
            },
            keep_order: false,
            desc: false,
        };
        let plan = PhysicalPlan::leaf(PhysicalOp::TableScan(scan), node.schema.clone(), correlated, count);
        Ok(ScanCandidate {
            plan: with_residual(plan, split.residual, count),
            count,
            order: pk.into_iter().collect(),
            eq_prefix: 0,
            double_read: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn index_scan(
        &self,
        node: &LogicalPlan,
        info: &TableInfo,
        stats: &TableStatistics,
        index: &IndexInfo,
        columns: &[String],
        conditions: Vec<Expr>,
        filtered: bool,
    ) -> Result<ScanCandidate> {
        let table = &info.table;
        let index_columns: Vec<ColumnRef> = index
            .columns
            .iter()
            .map(|c| ColumnRef::new(table.name.clone(), c.clone()))
            .collect();

        let mut access = detach_index_conditions(conditions, &index_columns);
        let ranges = if access.detached.access.is_empty() {
            vec![IndexRange::full()]
        } else {
            match build_index_ranges(&access) {
                Ok(r) => r,
                Err(e) if e.is_soft() => {
                    warn!(
                        "Index range on {}.{} falls back to full range: {}",
                        table, index.name, e
                    );
                    let moved = std::mem::take(&mut access.detached.access);
                    access.detached.residual.extend(moved);
                    access.points.clear();
                    access.range_conditions.clear();
                    vec![IndexRange::full()]
                }
                Err(e) => return Err(e.into()),
            }
        };
        let eq_prefix = access.single_point_prefix();

        let base = if filtered && !access.detached.access.is_empty() {
            row_count_by_index_ranges(stats, &ranges, &index_columns, self.model())?
        } else {
            stats.count
        };
        let split = self.split_for(RequestType::Index, access.detached.residual);
        let filters: Vec<Expr> = split.pushed.iter().chain(split.residual.iter()).cloned().collect();
        let count = self.estimate_filters(stats, table, base, &filters, split.predicate.is_some())?;

        let double_read = !info.is_covering(index, columns);
        let correlated = node.correlated || split.pushed.iter().any(|c| c.is_correlated());
        let scan = IndexScan {
            table: table.clone(),
            index: index.clone(),
            index_columns: index_columns.clone(),
            columns: columns.to_vec(),
            ranges,
            access_conditions: access.detached.access,
            eq_prefix,
            pushdown: PushedDown {
                predicate: split.predicate,
                conditions: split.pushed,
                ..PushedDown::default()
            },
            double_read,
            keep_order: false,
            desc: false,
        };
        let plan = PhysicalPlan::leaf(PhysicalOp::IndexScan(scan), node.schema.clone(), correlated, count);
        Ok(ScanCandidate {
            plan: with_residual(plan, split.residual, count),
            count,
            order: index_columns,
            eq_prefix,
            double_read,
        })
    }

    /// Cost a candidate under `prop`, keeping scan order when it satisfies the request.
    fn match_scan_property(&self, cand: ScanCandidate, prop: &RequiredProperty) -> PhysicalPlanInfo {
        let ScanCandidate {
            mut plan,
            count,
            order,
            eq_prefix,
            double_read,
        } = cand;
        let per_row = if double_read { 2.0 } else { 1.0 };

        if prop.has_order() {
            let desc = prop.is_descending();
            let delivers = (0..=eq_prefix.min(order.len())).any(|skip| {
                let delivered = RequiredProperty::ordered(
                    order[skip..]
                        .iter()
                        .map(|c| ColumnProp {
                            col: c.clone(),
                            desc,
                        })
                        .collect(),
                );
                match_prop(prop, &delivered)
            });
            if !delivers {
                let cost = self.model().scan_cost(count) * per_row;
                return self.enforce(prop, PhysicalPlanInfo::new(plan, Cost::new(cost), count));
            }
            set_keep_order(&mut plan, desc);
        }

        let rows = self.push_scan_limit(&mut plan, prop, count);
        let cost = self.model().scan_cost(rows) * per_row;
        let info = PhysicalPlanInfo::new(plan, Cost::new(cost), count);
        self.enforce(&RequiredProperty::limit_only(prop.limit), info)
    }

    /// Push the limit of `prop` into the scan; returns the rows the scan will read.
    pub(crate) fn push_scan_limit(&self, plan: &mut PhysicalPlan, prop: &RequiredProperty, count: u64) -> u64 {
        let Some(limit) = prop.limit else {
            return count;
        };
        if !plan.is_dist_scan() || !plan.add_limit(self.client.as_ref(), limit) {
            return count;
        }
        count.min(limit.total())
    }
}

fn columns_of(node: &LogicalPlan) -> Vec<String> {
    match &node.op {
        LogicalOp::DataSource { columns, .. } => columns.clone(),
        _ => Vec::new(),
    }
}

fn with_residual(scan: PhysicalPlan, residual: Vec<Expr>, count: u64) -> PhysicalPlan {
    if residual.is_empty() {
        return scan;
    }
    let correlated = residual.iter().any(|c| c.is_correlated());
    let mut plan = PhysicalPlan::wrap(
        PhysicalOp::Selection {
            conditions: residual,
            on_table: true,
        },
        scan,
        count,
    );
    plan.correlated |= correlated;
    plan
}
