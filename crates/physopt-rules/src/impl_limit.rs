//! # Limit, Distinct and Union
//!
//! - **Limit** asks its child for `limit(offset, count)` and enforces whatever its own
//!   caller asked for above that.
//! - **Distinct** is hash based: the child is converted without order or limit, since
//!   neither survives deduplication, and the caller's property is enforced above.
//! - **Union** translates the caller's order column by column position into each
//!   branch. Every branch may stop after `offset + count` rows. The concatenation of
//!   ordered branches is not ordered, so order and limit are enforced above the union.

use crate::search::{add_parent, wrong_node, PhysicalSearch};
use physopt_core::cost::{Cost, CostModel};
use physopt_core::error::{OptimizerError, Result};
use physopt_core::expr::ColumnRef;
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{LogicalOp, LogicalPlan, PhysicalOp, PhysicalPlan};
use physopt_core::properties::{ColumnProp, LimitBound, RequiredProperty};
use tracing::error;

impl PhysicalSearch {
    pub(crate) fn convert_limit(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Limit { offset, count } = node.op else {
            return Err(wrong_node(node, "Limit"));
        };
        let child = node.child(0)?;
        let child_prop = RequiredProperty::limit_only(Some(LimitBound::new(offset, count)));
        let info = self.convert(child, Some(node), &child_prop)?;
        Ok(self.enforce(prop, info))
    }

    pub(crate) fn convert_distinct(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        if !matches!(node.op, LogicalOp::Distinct) {
            return Err(wrong_node(node, "Distinct"));
        }
        let child = node.child(0)?;
        let info = self.convert(child, Some(node), &RequiredProperty::empty())?;
        if info.is_dummy() {
            return Ok(info);
        }
        let count = CostModel::scale(info.count, self.model().distinct);
        let info = add_parent(
            PhysicalPlanInfo { count, ..info },
            PhysicalOp::Distinct,
            &node.schema,
            node.correlated,
        );
        Ok(self.enforce(prop, info))
    }

    pub(crate) fn convert_union(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        if !matches!(node.op, LogicalOp::Union) {
            return Err(wrong_node(node, "Union"));
        }
        let widened = prop.convert_limit_offset_to_count();

        let mut plans: Vec<PhysicalPlan> = Vec::with_capacity(node.children.len());
        let mut cost = Cost::zero();
        let mut count: u64 = 0;
        let mut feasible = true;
        for child in &node.children {
            let child_prop = RequiredProperty {
                props: translate_props(node, child, &widened)?,
                sort_key_len: widened.sort_key_len,
                limit: widened.limit,
            };
            let info = self.convert(child, Some(node), &child_prop)?;
            cost = cost + info.cost;
            count = count.saturating_add(info.count);
            match info.plan {
                Some(p) => plans.push(p),
                None => feasible = false,
            }
        }
        if !feasible || cost.is_infinite() {
            return Ok(PhysicalPlanInfo::infeasible());
        }

        let plan = PhysicalPlan {
            op: PhysicalOp::Union,
            children: plans,
            schema: node.schema.clone(),
            correlated: node.correlated,
            row_count: count,
        };
        Ok(self.enforce(prop, PhysicalPlanInfo::new(plan, cost, count)))
    }
}

/// Map the union's ordering columns onto `child`'s columns by position.
fn translate_props(node: &LogicalPlan, child: &LogicalPlan, prop: &RequiredProperty) -> Result<Vec<ColumnProp>> {
    let lookup_failed = |col: &ColumnRef| {
        error!("Union {} cannot map column {} onto its branches", node.id, col);
        OptimizerError::SchemaLookup {
            column: col.clone(),
            operation: "union property translation",
        }
    };
    prop.props
        .iter()
        .map(|p| {
            let idx = node.schema.index_of(&p.col).ok_or_else(|| lookup_failed(&p.col))?;
            let col = child.schema.get(idx).ok_or_else(|| lookup_failed(&p.col))?;
            Ok(ColumnProp {
                col: col.clone(),
                desc: p.desc,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::search::{PhysicalSearch, SearchConfig};
    use physopt_core::catalog::{InMemoryCatalog, TableInfo};
    use physopt_core::cost::Cost;
    use physopt_core::expr::{ColumnRef, TableRef};
    use physopt_core::plan::{PhysicalOp, PlanBuilder};
    use physopt_core::properties::{ColumnProp, LimitBound, RequiredProperty};
    use physopt_core::pushdown::CapabilityClient;
    use physopt_core::stats::TableStatistics;
    use std::sync::Arc;

    fn search() -> PhysicalSearch {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "t"), &["a"]),
            Some(TableStatistics::new(1000)),
        );
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "u"), &["x"]),
            Some(TableStatistics::new(3000)),
        );
        PhysicalSearch::new(
            Arc::new(catalog),
            Arc::new(CapabilityClient::default()),
            SearchConfig::default(),
        )
    }

    #[test]
    fn test_limit_reaches_scan() {
        let mut s = search();
        let mut b = PlanBuilder::new();
        let scan = b.scan(TableRef::new("db", "t"), &["a"]);
        let limit = b.limit(scan, 5, 20);
        let out = s.optimize(&limit).unwrap();
        assert!(matches!(out.plan.op, PhysicalOp::Limit { offset: 5, count: 20 }));
        assert_eq!(out.plan.children[0].pushdown().and_then(|p| p.limit), Some(25));
        assert_eq!(out.rows, 20);
        assert!((out.cost - 25.0 * 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_union_translates_and_enforces() {
        let mut s = search();
        let mut b = PlanBuilder::new();
        let l = b.scan(TableRef::new("db", "t"), &["a"]);
        let r = b.scan(TableRef::new("db", "u"), &["x"]);
        let u = b.union(vec![l, r]);
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::new("t", "a"))])
            .with_limit(Some(LimitBound::new(2, 3)));
        let out = s.convert(&u, None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(
            plan.op,
            PhysicalOp::Sort {
                exec_limit: Some(LimitBound { offset: 2, count: 3 }),
                ..
            }
        ));
        let union = &plan.children[0];
        assert!(matches!(union.op, PhysicalOp::Union));
        // Each branch is sorted on its own column and cut at offset + count.
        for branch in &union.children {
            assert!(matches!(
                branch.op,
                PhysicalOp::Sort {
                    exec_limit: Some(LimitBound { offset: 0, count: 5 }),
                    ..
                }
            ));
        }
        assert_eq!(union.row_count, 10);
        assert_eq!(out.count, 3);
    }

    #[test]
    fn test_distinct_scales_rows() {
        let mut s = search();
        let mut b = PlanBuilder::new();
        let scan = b.scan(TableRef::new("db", "u"), &["x"]);
        let d = b.distinct(scan);
        let out = s.convert(&d, None, &RequiredProperty::empty()).unwrap();
        assert_eq!(out.count, 2100);
        assert_eq!(out.cost, Cost::new(3000.0 * 1.5));
    }
}
