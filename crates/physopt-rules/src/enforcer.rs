//! # Property Enforcement and Sort Conversion
//!
//! An "enforcer" is a physical operator whose sole purpose is to satisfy a required
//! property that the child plan does not deliver natively:
//!
//! - **Sort** enforces an order. When the property also carries a limit, the sort
//!   executes it (`exec_limit`) and only sorts `offset + count` rows worth of output.
//! - **Limit** enforces a limit when no order is required.
//!
//! `enforce_property` never wraps an infeasible result or a dummy scan: the former has
//! no plan, and the latter produces no rows, so it satisfies every property as is.
//!
//! ## Logical Sort
//!
//! An explicit ORDER BY asks its child twice, once for its own keys and once unordered,
//! and keeps whichever of "ordered child" and "explicit sort over the unordered child"
//! is cheaper. If the order the Sort produces does not satisfy what its own parent
//! asked for, the result has infinite cost.

use crate::search::{add_parent, wrong_node, PhysicalSearch};
use physopt_core::cost::{Cost, CostModel};
use physopt_core::error::Result;
use physopt_core::expr::{Expr, SortKey};
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{LogicalOp, LogicalPlan, PhysicalOp, PhysicalPlan};
use physopt_core::properties::{match_prop, ColumnProp, LimitBound, RequiredProperty};

/// Make `info` satisfy `prop` by adding a Sort or a Limit on top.
pub fn enforce_property(prop: &RequiredProperty, info: PhysicalPlanInfo, model: &CostModel) -> PhysicalPlanInfo {
    let PhysicalPlanInfo { plan, cost, count } = info;
    let plan = match plan {
        Some(p) if !p.is_dummy() => p,
        other => return PhysicalPlanInfo { plan: other, cost, count },
    };

    let clamped = match prop.limit {
        Some(l) if l.count < count => l.count,
        _ => count,
    };
    let (plan, cost) = if prop.has_order() {
        let by = prop
            .props
            .iter()
            .map(|p| SortKey {
                expr: Expr::Column(p.col.clone()),
                desc: p.desc,
            })
            .collect();
        let sorted_rows = prop.limit.map(|l| l.total()).unwrap_or(count);
        let sort = PhysicalOp::Sort {
            by,
            exec_limit: prop.limit,
        };
        (
            PhysicalPlan::wrap(sort, plan, clamped),
            cost + Cost::new(model.sort_cost(sorted_rows)),
        )
    } else if let Some(l) = prop.limit {
        let limit = PhysicalOp::Limit {
            offset: l.offset,
            count: l.count,
        };
        (PhysicalPlan::wrap(limit, plan, clamped), cost)
    } else {
        (plan, cost)
    };
    PhysicalPlanInfo::new(plan, cost, clamped)
}

/// Order required by the sort keys, or `None` if a key is not a plain column.
fn sort_key_property(by: &[SortKey]) -> Option<RequiredProperty> {
    let props = by
        .iter()
        .map(|k| match &k.expr {
            Expr::Column(c) => Some(ColumnProp {
                col: c.clone(),
                desc: k.desc,
            }),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(RequiredProperty::ordered(props))
}

impl PhysicalSearch {
    pub(crate) fn convert_sort(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Sort { by } = &node.op else {
            return Err(wrong_node(node, "Sort"));
        };
        let child = node.child(0)?;

        let mut self_prop = sort_key_property(by).unwrap_or_default();
        if self_prop.has_order() && !prop.has_order() && prop.limit.is_some() {
            self_prop.limit = prop.limit;
        }

        let sorted = self.convert(child, Some(node), &self_prop)?;
        let unsorted = self.convert(child, Some(node), &RequiredProperty::empty())?;
        let sort_cost = self.model().sort_cost(unsorted.count);

        let explicit = |info: PhysicalPlanInfo, exec_limit: Option<LimitBound>, cost: Cost| {
            let count = match exec_limit {
                Some(l) if l.count < info.count => l.count,
                _ => info.count,
            };
            let op = PhysicalOp::Sort {
                by: by.clone(),
                exec_limit,
            };
            let wrapped = add_parent(info, op, &node.schema, node.correlated);
            PhysicalPlanInfo {
                cost,
                count,
                ..wrapped
            }
        };

        let mut info = if !self_prop.has_order() {
            // Keys are not plain columns, so only an explicit sort can order the rows.
            let cost = unsorted.cost + Cost::new(sort_cost);
            explicit(unsorted, prop.limit, cost)
        } else if sort_cost + unsorted.cost.total < sorted.cost.total {
            let cost = unsorted.cost + Cost::new(sort_cost);
            explicit(unsorted, self_prop.limit, cost)
        } else {
            sorted
        };

        if !match_prop(prop, &self_prop) {
            info = info.make_infinite();
        }
        if self_prop.has_order() && self_prop.limit.is_none() && prop.limit.is_some() {
            info = self.enforce(&RequiredProperty::limit_only(prop.limit), info);
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use physopt_core::expr::{ColumnRef, Schema};

    fn base(count: u64) -> PhysicalPlanInfo {
        let plan = PhysicalPlan::leaf(
            PhysicalOp::Distinct,
            Schema::new(vec![ColumnRef::new("t", "a")]),
            false,
            count,
        );
        PhysicalPlanInfo::new(plan, Cost::new(10.0), count)
    }

    #[test]
    fn test_enforce_order_with_limit() {
        let model = CostModel::default();
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::new("t", "a"))])
            .with_limit(Some(LimitBound::new(5, 10)));
        let info = enforce_property(&prop, base(1000), &model);
        let plan = info.plan.as_ref().unwrap();
        assert!(matches!(
            plan.op,
            PhysicalOp::Sort {
                exec_limit: Some(_),
                ..
            }
        ));
        assert_eq!(info.count, 10);
        assert_eq!(plan.row_count, 10);
        assert!((info.cost.total - (10.0 + model.sort_cost(15))).abs() < 1e-9);
    }

    #[test]
    fn test_enforce_limit_only() {
        let model = CostModel::default();
        let prop = RequiredProperty::limit_only(Some(LimitBound::new(0, 2000)));
        let info = enforce_property(&prop, base(1000), &model);
        assert!(matches!(
            info.plan.as_ref().unwrap().op,
            PhysicalOp::Limit { count: 2000, .. }
        ));
        assert_eq!(info.count, 1000);
        assert_eq!(info.cost, Cost::new(10.0));
    }

    #[test]
    fn test_enforce_skips_dummy_and_infeasible() {
        let model = CostModel::default();
        let prop = RequiredProperty::ordered(vec![ColumnProp::desc(ColumnRef::new("t", "a"))]);
        let dummy = PhysicalPlanInfo::new(
            PhysicalPlan::leaf(PhysicalOp::DummyScan, Schema::empty(), false, 0),
            Cost::zero(),
            0,
        );
        let out = enforce_property(&prop, dummy.clone(), &model);
        assert_eq!(out, dummy);
        let out = enforce_property(&prop, PhysicalPlanInfo::infeasible(), &model);
        assert!(out.plan.is_none());
    }

    #[test]
    fn test_computed_sort_key_sorts_explicitly_with_limit() {
        use crate::search::SearchConfig;
        use physopt_core::catalog::{InMemoryCatalog, TableInfo};
        use physopt_core::expr::{BinaryOp, TableRef};
        use physopt_core::plan::PlanBuilder;
        use physopt_core::pushdown::CapabilityClient;
        use physopt_core::stats::TableStatistics;
        use std::sync::Arc;

        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "t"), &["a", "b"]),
            Some(TableStatistics::new(1000)),
        );
        let mut s = PhysicalSearch::new(
            Arc::new(catalog),
            Arc::new(CapabilityClient::default()),
            SearchConfig::default(),
        );
        let mut b = PlanBuilder::new();
        let scan = b.scan(TableRef::new("db", "t"), &["a", "b"]);
        let key = Expr::binary(BinaryOp::Add, Expr::col("t", "a"), Expr::int(1));
        let sort = b.sort(scan, vec![SortKey::asc(key)]);

        let prop = RequiredProperty::limit_only(Some(LimitBound::new(0, 5)));
        let out = s.convert(&sort, None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(
            plan.op,
            PhysicalOp::Sort {
                exec_limit: Some(LimitBound { offset: 0, count: 5 }),
                ..
            }
        ));
        assert_eq!(out.count, 5);
        let model = CostModel::default();
        assert!((out.cost.total - (1000.0 * model.network + model.sort_cost(1000))).abs() < 1e-6);
    }

    #[test]
    fn test_empty_property_is_noop() {
        let model = CostModel::default();
        let info = enforce_property(&RequiredProperty::empty(), base(7), &model);
        assert_eq!(info, base(7));
    }
}
