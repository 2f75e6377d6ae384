//! # Selection and Projection
//!
//! ## Selection
//!
//! A Selection directly above a DataSource has no physical node of its own: the scan
//! consumes its conditions as ranges, pushed predicates and a residual filter. The
//! Selection forwards the requested order (never the limit, which has to be applied
//! after filtering) and then handles the limit itself:
//!
//! 1. If the scan was returned bare, the limit is pushed into it and the scan is costed
//!    for `offset + count` rows; a `Limit` above still applies the offset.
//! 2. When an order and a limit are both requested, the child is also converted
//!    unordered and a top-N is pushed into the scan before sorting. The cheaper wins.
//!
//! Above anything else the Selection becomes a physical `Selection` that scales rows by
//! the selection factor. An ordered request is tried twice there too: passed down to the
//! child, and as a sort (with the limit) above the filter, which sorts fewer rows.
//!
//! ## Projection
//!
//! Only pass-through columns can carry an order through a projection. Constant items
//! do not affect order and drop out of the request; computed items cannot be ordered
//! by the child, so requesting them is infeasible.

use crate::impl_scan::scan_cost;
use crate::search::{add_parent, cheaper, wrong_node, PhysicalSearch};
use physopt_core::cost::{Cost, CostModel};
use physopt_core::error::{OptimizerError, Result};
use physopt_core::expr::Expr;
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{LogicalOp, LogicalPlan, PhysicalOp};
use physopt_core::properties::{ColumnProp, LimitBound, RequiredProperty};
use tracing::{error, trace};

impl PhysicalSearch {
    pub(crate) fn convert_selection(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Selection { conditions } = &node.op else {
            return Err(wrong_node(node, "Selection"));
        };
        let child = node.child(0)?;

        if !matches!(child.op, LogicalOp::DataSource { .. }) {
            let ordered = self.convert(child, Some(node), &prop.remove_limit())?;
            if ordered.is_dummy() {
                return Ok(ordered);
            }
            let ordered = self.filter_rows(node, conditions, ordered);
            let mut best = self.enforce(&RequiredProperty::limit_only(prop.limit), ordered);

            if prop.has_order() {
                let unordered = self.convert(child, Some(node), &RequiredProperty::empty())?;
                let sorted = self.enforce(prop, self.filter_rows(node, conditions, unordered));
                trace!(
                    "Selection {} order candidates: child={}, sort above={}",
                    node.id,
                    best.cost,
                    sorted.cost
                );
                best = cheaper(best, sorted);
            }
            return Ok(best);
        }

        let ordered = self.convert(child, Some(node), &prop.remove_limit())?;
        let Some(limit) = prop.limit else {
            return Ok(ordered);
        };
        let mut best = self.limit_scan(ordered, limit);

        if prop.has_order() {
            let unordered = self.convert(child, Some(node), &RequiredProperty::empty())?;
            let top_n = self.top_n_scan(unordered, prop);
            trace!(
                "Selection {} limit candidates: pushed={}, top_n={}",
                node.id,
                best.cost,
                top_n.cost
            );
            best = cheaper(best, top_n);
        }
        Ok(best)
    }

    /// Physical filter above a converted child.
    fn filter_rows(&self, node: &LogicalPlan, conditions: &[Expr], info: PhysicalPlanInfo) -> PhysicalPlanInfo {
        let count = CostModel::scale(info.count, self.model().selection);
        let op = PhysicalOp::Selection {
            conditions: conditions.to_vec(),
            on_table: false,
        };
        add_parent(PhysicalPlanInfo { count, ..info }, op, &node.schema, node.correlated)
    }

    /// Push `limit` into a bare scan, then enforce it.
    fn limit_scan(&self, info: PhysicalPlanInfo, limit: LimitBound) -> PhysicalPlanInfo {
        let PhysicalPlanInfo { plan, cost, count } = info;
        let info = match plan {
            Some(mut p) if p.is_dist_scan() => {
                if p.add_limit(self.client.as_ref(), limit) {
                    let cost = Cost::new(scan_cost(self.model(), &p, count.min(limit.total())));
                    PhysicalPlanInfo::new(p, cost, count.min(limit.count))
                } else {
                    PhysicalPlanInfo::new(p, cost, count)
                }
            }
            plan => PhysicalPlanInfo { plan, cost, count },
        };
        self.enforce(&RequiredProperty::limit_only(Some(limit)), info)
    }

    /// Push a top-N into a bare unordered scan, then sort above it.
    fn top_n_scan(&self, info: PhysicalPlanInfo, prop: &RequiredProperty) -> PhysicalPlanInfo {
        let PhysicalPlanInfo { plan, cost, count } = info;
        let info = match plan {
            Some(mut p) if p.is_dist_scan() => {
                if p.add_top_n(self.client.as_ref(), prop) {
                    let rows = prop.limit.map_or(count, |l| count.min(l.total()));
                    let cost = Cost::new(scan_cost(self.model(), &p, rows));
                    PhysicalPlanInfo::new(p, cost, rows)
                } else {
                    PhysicalPlanInfo::new(p, cost, count)
                }
            }
            plan => PhysicalPlanInfo { plan, cost, count },
        };
        self.enforce(prop, info)
    }

    pub(crate) fn convert_projection(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Projection { items } = &node.op else {
            return Err(wrong_node(node, "Projection"));
        };
        let child = node.child(0)?;

        let mut props: Vec<ColumnProp> = Vec::with_capacity(prop.props.len());
        let mut sort_key_len = prop.sort_key_len;
        for (i, p) in prop.props.iter().enumerate() {
            let item = node.schema.index_of(&p.col).and_then(|idx| items.get(idx));
            let Some(item) = item else {
                error!("Projection {} has no output column {}", node.id, p.col);
                return Err(OptimizerError::SchemaLookup {
                    column: p.col.clone(),
                    operation: "projection property mapping",
                });
            };
            let dropped = match &item.expr {
                Expr::Column(c) if props.iter().any(|q| q.col == *c) => true,
                Expr::Column(c) => {
                    props.push(ColumnProp {
                        col: c.clone(),
                        desc: p.desc,
                    });
                    false
                }
                Expr::Literal(_) | Expr::Correlated(_) => true,
                _ => return Ok(PhysicalPlanInfo::infeasible()),
            };
            if dropped && i < prop.sort_key_len {
                sort_key_len -= 1;
            }
        }

        let child_prop = RequiredProperty {
            props,
            sort_key_len,
            limit: prop.limit,
        };
        let info = self.convert(child, Some(node), &child_prop)?;
        let op = PhysicalOp::Projection { items: items.clone() };
        Ok(add_parent(info, op, &node.schema, node.correlated))
    }
}

#[cfg(test)]
mod tests {
    use crate::search::{PhysicalSearch, SearchConfig};
    use physopt_core::catalog::{InMemoryCatalog, TableInfo};
    use physopt_core::cost::CostModel;
    use physopt_core::expr::{BinaryOp, ColumnRef, Expr, ScalarValue, TableRef};
    use physopt_core::plan::{PhysicalOp, PlanBuilder, ProjectionItem};
    use physopt_core::properties::{ColumnProp, LimitBound, RequiredProperty};
    use physopt_core::pushdown::CapabilityClient;
    use physopt_core::stats::TableStatistics;
    use std::sync::Arc;

    fn t() -> TableRef {
        TableRef::new("db", "t")
    }

    fn search(rows: u64) -> PhysicalSearch {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(TableInfo::new(t(), &["a", "b"]), Some(TableStatistics::new(rows)));
        PhysicalSearch::new(
            Arc::new(catalog),
            Arc::new(CapabilityClient::default()),
            SearchConfig::default(),
        )
    }

    fn filter() -> Expr {
        Expr::binary(BinaryOp::Gt, Expr::col("t", "b"), Expr::int(5))
    }

    #[test]
    fn test_selection_over_scan_pushes_limit() {
        let mut s = search(10_000);
        let mut b = PlanBuilder::new();
        let scan = b.scan(t(), &["a", "b"]);
        let sel = b.select(scan, vec![filter()]);
        let prop = RequiredProperty::limit_only(Some(LimitBound::new(0, 10)));
        let out = s.convert(&sel, None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(plan.op, PhysicalOp::Limit { count: 10, .. }));
        let scan = &plan.children[0];
        let pushed = scan.pushdown().unwrap();
        assert_eq!(pushed.limit, Some(10));
        assert_eq!(pushed.conditions, vec![filter()]);
        assert_eq!(out.count, 10);
        assert_eq!(out.cost.total, 15.0);
    }

    #[test]
    fn test_selection_top_n() {
        let mut s = search(10_000);
        let mut b = PlanBuilder::new();
        let scan = b.scan(t(), &["a", "b"]);
        let sel = b.select(scan, vec![filter()]);
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::new("t", "a"))])
            .with_limit(Some(LimitBound::new(0, 3)));
        let out = s.convert(&sel, None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(plan.op, PhysicalOp::Sort { .. }));
        let pushed = plan.children[0].pushdown().unwrap();
        assert_eq!(pushed.top_n.len(), 1);
        assert_eq!(pushed.limit, Some(3));
        assert_eq!(out.count, 3);
    }

    #[test]
    fn test_selection_above_distinct_scales_rows() {
        let mut s = search(1000);
        let mut b = PlanBuilder::new();
        let l = b.scan(t(), &["a", "b"]);
        let d = b.distinct(l);
        let sel = b.select(d, vec![filter()]);
        let out = s.convert(&sel, None, &RequiredProperty::empty()).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(plan.op, PhysicalOp::Selection { on_table: false, .. }));
        // 1000 · distinct 0.7 · selection 0.8
        assert_eq!(out.count, 560);
        assert_eq!(plan.row_count, 560);
    }

    #[test]
    fn test_selection_above_distinct_sorts_after_filtering() {
        let mut s = search(1000);
        let mut b = PlanBuilder::new();
        let l = b.scan(t(), &["a", "b"]);
        let d = b.distinct(l);
        let sel = b.select(d, vec![filter()]);
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::new("t", "a"))])
            .with_limit(Some(LimitBound::new(0, 10)));
        let out = s.convert(&sel, None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        let PhysicalOp::Sort { exec_limit, .. } = &plan.op else {
            panic!("expected a sort above the filter, got\n{}", plan.display());
        };
        assert_eq!(*exec_limit, Some(LimitBound::new(0, 10)));
        assert!(matches!(plan.children[0].op, PhysicalOp::Selection { on_table: false, .. }));
        // Unordered scan, then a 10-row sort.
        let model = CostModel::default();
        assert!(out.cost.total <= 1000.0 * model.network + model.sort_cost(10) + 1e-6);
        assert_eq!(out.count, 10);
    }

    #[test]
    fn test_projection_forwards_columns() {
        let mut s = search(100);
        let mut b = PlanBuilder::new();
        let scan = b.scan(t(), &["a", "b"]);
        let proj = b.project(
            scan,
            vec![
                ProjectionItem::named(Expr::lit(ScalarValue::Int64(1)), "one"),
                ProjectionItem::column("t", "a"),
            ],
        );
        let prop = RequiredProperty::ordered(vec![
            ColumnProp::asc(ColumnRef::unqualified("one")),
            ColumnProp::asc(ColumnRef::new("t", "a")),
        ]);
        let out = s.convert(&proj, None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(plan.op, PhysicalOp::Projection { .. }));
        let PhysicalOp::Sort { by, .. } = &plan.children[0].op else {
            panic!("expected a sort under the projection");
        };
        assert_eq!(by.len(), 1);
    }

    #[test]
    fn test_projection_computed_order_is_infeasible() {
        let mut s = search(100);
        let mut b = PlanBuilder::new();
        let scan = b.scan(t(), &["a", "b"]);
        let sum = Expr::binary(BinaryOp::Add, Expr::col("t", "a"), Expr::col("t", "b"));
        let proj = b.project(scan, vec![ProjectionItem::named(sum, "s")]);
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::unqualified("s"))]);
        let out = s.convert(&proj, None, &prop).unwrap();
        assert!(!out.is_feasible());

        let missing = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::unqualified("zz"))]);
        assert!(s.convert(&proj, None, &missing).is_err());
    }
}
