//! # Correlated Apply
//!
//! Apply re-evaluates its inner child once per outer row, binding the outer row's
//! values to the inner side's correlated columns. Output order therefore follows the
//! outer child, and only requests on outer columns can be satisfied.
//!
//! Parts of the inner plan that do not depend on the outer row produce the same rows
//! on every evaluation. They are wrapped in `Cache` so they run once.

use crate::search::{wrong_node, PhysicalSearch};
use physopt_core::error::Result;
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{LogicalOp, LogicalPlan, PhysicalOp, PhysicalPlan};
use physopt_core::properties::RequiredProperty;
use tracing::trace;

/// Wrap every maximal uncorrelated subtree of `plan` in a `Cache`.
pub(crate) fn add_cache(plan: PhysicalPlan) -> PhysicalPlan {
    if !plan.correlated {
        let rows = plan.row_count;
        return PhysicalPlan::wrap(PhysicalOp::Cache, plan, rows);
    }
    let PhysicalPlan {
        op,
        children,
        schema,
        correlated,
        row_count,
    } = plan;
    PhysicalPlan {
        op,
        children: children.into_iter().map(add_cache).collect(),
        schema,
        correlated,
        row_count,
    }
}

impl PhysicalSearch {
    pub(crate) fn convert_apply(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Apply {
            join_type,
            conditions,
        } = &node.op
        else {
            return Err(wrong_node(node, "Apply"));
        };
        let outer = node.child(0)?;
        let inner = node.child(1)?;

        if prop.props.iter().any(|p| inner.schema.contains(&p.col)) || !prop.columns_in(&outer.schema) {
            trace!("Apply {} cannot deliver order {}", node.id, prop);
            return Ok(PhysicalPlanInfo::infeasible());
        }

        let inner_info = self.convert(inner, Some(node), &RequiredProperty::empty())?;
        let outer_info = self.convert(outer, Some(node), &prop.remove_limit())?;
        let (Some(outer_plan), Some(inner_plan)) = (outer_info.plan, inner_info.plan) else {
            return Ok(PhysicalPlanInfo::infeasible());
        };

        let count = outer_info.count;
        let plan = PhysicalPlan {
            op: PhysicalOp::Apply {
                join_type: *join_type,
                conditions: conditions.clone(),
            },
            children: vec![outer_plan, add_cache(inner_plan)],
            schema: node.schema.clone(),
            correlated: node.correlated,
            row_count: count,
        };
        let info = PhysicalPlanInfo::new(plan, outer_info.cost + inner_info.cost, count);
        Ok(self.enforce(&RequiredProperty::limit_only(prop.limit), info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchConfig;
    use physopt_core::catalog::{InMemoryCatalog, TableInfo};
    use physopt_core::expr::{ColumnRef, Expr, JoinType, Schema, TableRef};
    use physopt_core::plan::PlanBuilder;
    use physopt_core::properties::{ColumnProp, LimitBound};
    use physopt_core::pushdown::CapabilityClient;
    use physopt_core::stats::TableStatistics;
    use std::sync::Arc;

    fn search() -> PhysicalSearch {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "t"), &["a"]),
            Some(TableStatistics::new(100)),
        );
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "u"), &["c"]),
            Some(TableStatistics::new(50)),
        );
        PhysicalSearch::new(
            Arc::new(catalog),
            Arc::new(CapabilityClient::default()),
            SearchConfig::default(),
        )
    }

    /// `t APPLY (SELECT * FROM u WHERE u.c = t.a UNION u)`.
    fn apply_plan() -> LogicalPlan {
        let mut b = PlanBuilder::new();
        let outer = b.scan(TableRef::new("db", "t"), &["a"]);
        let correlated = b.scan(TableRef::new("db", "u"), &["c"]);
        let correlated = b.select(
            correlated,
            vec![Expr::eq(
                Expr::col("u", "c"),
                Expr::Correlated(ColumnRef::new("t", "a")),
            )],
        );
        let plain = b.scan(TableRef::new("db", "u"), &["c"]);
        let inner = b.union(vec![correlated, plain]);
        b.apply(JoinType::Semi, outer, inner, Vec::new())
    }

    #[test]
    fn test_add_cache_wraps_uncorrelated_subtrees() {
        let leaf = |correlated| PhysicalPlan::leaf(PhysicalOp::DummyScan, Schema::empty(), correlated, 1);
        let mut root = PhysicalPlan::wrap(PhysicalOp::Union, leaf(true), 2);
        root.children.push(leaf(false));
        let cached = add_cache(root);
        assert!(matches!(cached.op, PhysicalOp::Union));
        assert!(matches!(cached.children[0].op, PhysicalOp::DummyScan));
        assert!(matches!(cached.children[1].op, PhysicalOp::Cache));

        let whole = add_cache(leaf(false));
        assert!(matches!(whole.op, PhysicalOp::Cache));
    }

    #[test]
    fn test_apply_caches_inner_and_sums_cost() {
        let mut s = search();
        let plan = apply_plan();
        let prop = RequiredProperty::limit_only(Some(LimitBound::new(0, 10)));
        let out = s.convert(&plan, None, &prop).unwrap();
        let root = out.plan.as_ref().unwrap();
        assert!(matches!(root.op, PhysicalOp::Limit { count: 10, .. }));
        let apply = &root.children[0];
        assert!(matches!(apply.op, PhysicalOp::Apply { .. }));
        let union = &apply.children[1];
        assert!(matches!(union.op, PhysicalOp::Union));
        assert!(matches!(union.children[0].op, PhysicalOp::Selection { on_table: true, .. }));
        assert!(matches!(union.children[1].op, PhysicalOp::Cache));
        // Outer 100 rows, inner 50 + 50 rows, all at network cost.
        assert!((out.cost.total - 200.0 * 1.5).abs() < 1e-9);
        assert_eq!(out.count, 10);
    }

    #[test]
    fn test_order_on_inner_column_is_infeasible() {
        let mut s = search();
        let plan = apply_plan();
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::new("u", "c"))]);
        let out = s.convert(&plan, None, &prop).unwrap();
        assert!(!out.is_feasible());
    }
}
