//! # Aggregation Strategy Selection
//!
//! ## Stream Aggregation
//!
//! Groups arrive contiguously when the child is ordered on the group-by columns, so
//! each group is folded and emitted as soon as its last row passes. The child is asked
//! for:
//!
//! - the requested columns, mapped onto group-by columns with the requested direction,
//!   as the exact prefix;
//! - every other group-by column as a don't-care tail (any direction, any position).
//!
//! Not applicable when a group-by item is computed, when an aggregate merges partial
//! results, or when the request orders by something other than group-by columns.
//!
//! **Cost**: `child + rows · cpu`.
//!
//! ## Hash Aggregation
//!
//! Only considered when no order is requested. If the child is a distributable scan
//! and storage can evaluate every aggregate, a partial aggregation runs in storage and
//! a final `HashAgg` merges the partial states. A plan that pushes the aggregation is
//! always preferred, so it is costed at zero. Otherwise a complete `HashAgg` costs
//! `child + rows · memory`.
//!
//! Both strategies scale rows by the aggregation factor. Stream aggregation must be
//! strictly cheaper to win.

use crate::search::{add_parent, cheaper, wrong_node, PhysicalSearch};
use physopt_core::cost::{Cost, CostModel};
use physopt_core::error::Result;
use physopt_core::expr::{AggExpr, AggMode, ColumnRef, Expr};
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{LogicalOp, LogicalPlan, NamedAgg, PhysicalOp, PhysicalPlan};
use physopt_core::properties::{ColumnProp, RequiredProperty};
use tracing::trace;

impl PhysicalSearch {
    pub(crate) fn convert_aggregation(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Aggregation { group_by, aggs } = &node.op else {
            return Err(wrong_node(node, "Aggregation"));
        };
        let stream = self.stream_agg(node, group_by, aggs, &prop.remove_limit())?;
        let best = if prop.has_order() {
            stream
        } else {
            let hash = self.hash_agg(node, group_by, aggs)?;
            trace!(
                "Aggregation {} candidates: hash={}, stream={}",
                node.id,
                hash.cost,
                stream.cost
            );
            cheaper(hash, stream)
        };
        Ok(self.enforce(&RequiredProperty::limit_only(prop.limit), best))
    }

    fn stream_agg(
        &mut self,
        node: &LogicalPlan,
        group_by: &[Expr],
        aggs: &[NamedAgg],
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        if aggs.iter().any(|a| a.agg.mode == AggMode::Final) {
            return Ok(PhysicalPlanInfo::infeasible());
        }
        let mut group_cols: Vec<&ColumnRef> = Vec::with_capacity(group_by.len());
        for g in group_by {
            let Expr::Column(c) = g else {
                return Ok(PhysicalPlanInfo::infeasible());
            };
            if !group_cols.contains(&c) {
                group_cols.push(c);
            }
        }

        let mut props: Vec<ColumnProp> = Vec::with_capacity(group_cols.len());
        for p in &prop.props {
            if !group_cols.contains(&&p.col) {
                return Ok(PhysicalPlanInfo::infeasible());
            }
            props.push(p.clone());
        }
        let sort_key_len = props.len();
        for c in group_cols {
            if !props.iter().any(|p| p.col == *c) {
                props.push(ColumnProp::asc(c.clone()));
            }
        }
        let child_prop = RequiredProperty {
            props,
            sort_key_len,
            limit: None,
        };

        let child = node.child(0)?;
        let info = self.convert(child, Some(node), &child_prop)?;
        let model = self.model();
        let cost = info.cost + Cost::new(info.count as f64 * model.cpu);
        let count = CostModel::scale(info.count, model.aggregation);
        let op = PhysicalOp::StreamAgg {
            group_by: group_by.to_vec(),
            aggs: aggs.to_vec(),
        };
        Ok(add_parent(
            PhysicalPlanInfo { cost, count, ..info },
            op,
            &node.schema,
            node.correlated,
        ))
    }

    fn hash_agg(&mut self, node: &LogicalPlan, group_by: &[Expr], aggs: &[NamedAgg]) -> Result<PhysicalPlanInfo> {
        let child = node.child(0)?;
        let info = self.convert(child, Some(node), &RequiredProperty::empty())?;
        let model = self.model();
        let count = CostModel::scale(info.count, model.aggregation);

        let distinct = aggs.iter().any(|a| a.agg.distinct);
        if let Some(plan) = info.plan.as_ref().filter(|p| !distinct && p.is_dist_scan()) {
            let mut partial = plan.clone();
            if partial
                .add_aggregation(self.client.as_ref(), group_by, aggs)
                .is_some()
            {
                let final_aggs = aggs
                    .iter()
                    .map(|a| NamedAgg {
                        agg: AggExpr {
                            mode: AggMode::Final,
                            ..a.agg.clone()
                        },
                        alias: a.alias.clone(),
                    })
                    .collect();
                let op = PhysicalOp::HashAgg {
                    group_by: group_by.to_vec(),
                    aggs: final_aggs,
                    mode: AggMode::Final,
                };
                let plan = PhysicalPlan {
                    op,
                    children: vec![partial],
                    schema: node.schema.clone(),
                    correlated: node.correlated || plan.correlated,
                    row_count: count,
                };
                return Ok(PhysicalPlanInfo::new(plan, Cost::zero(), count));
            }
        }

        let cost = info.cost + Cost::new(info.count as f64 * model.memory);
        let op = PhysicalOp::HashAgg {
            group_by: group_by.to_vec(),
            aggs: aggs.to_vec(),
            mode: AggMode::Complete,
        };
        Ok(add_parent(
            PhysicalPlanInfo { cost, count, ..info },
            op,
            &node.schema,
            node.correlated,
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::search::{PhysicalSearch, SearchConfig};
    use physopt_core::catalog::{InMemoryCatalog, TableInfo};
    use physopt_core::expr::{AggExpr, AggFunc, AggMode, ColumnRef, Expr, TableRef};
    use physopt_core::plan::{LogicalPlan, NamedAgg, PhysicalOp, PlanBuilder};
    use physopt_core::properties::{ColumnProp, RequiredProperty};
    use physopt_core::pushdown::{CapabilityClient, StorageCapabilities};
    use physopt_core::stats::TableStatistics;
    use std::sync::Arc;

    fn search(caps: StorageCapabilities) -> PhysicalSearch {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "t"), &["a", "b"]),
            Some(TableStatistics::new(1000)),
        );
        PhysicalSearch::new(
            Arc::new(catalog),
            Arc::new(CapabilityClient::new(caps)),
            SearchConfig::default(),
        )
    }

    fn agg_plan(group_by: Vec<Expr>, distinct: bool) -> LogicalPlan {
        let mut b = PlanBuilder::new();
        let scan = b.scan(TableRef::new("db", "t"), &["a", "b"]);
        let mut sum = AggExpr::new(AggFunc::Sum, Expr::col("t", "b"));
        sum.distinct = distinct;
        b.aggregate(scan, group_by, vec![NamedAgg::new(sum, "s")])
    }

    #[test]
    fn test_partial_aggregation_pushed() {
        let mut s = search(StorageCapabilities::default());
        let out = s
            .convert(&agg_plan(vec![Expr::col("t", "a")], false), None, &RequiredProperty::empty())
            .unwrap();
        let plan = out.plan.as_ref().unwrap();
        let PhysicalOp::HashAgg { mode, aggs, .. } = &plan.op else {
            panic!("expected a hash aggregation");
        };
        assert_eq!(*mode, AggMode::Final);
        assert_eq!(aggs[0].agg.mode, AggMode::Final);
        assert!(plan.children[0].pushdown().unwrap().aggregation.is_some());
        assert_eq!(plan.children[0].schema.len(), 2);
        assert_eq!(out.cost.total, 0.0);
        assert_eq!(out.count, 100);
    }

    #[test]
    fn test_distinct_aggregate_stays_complete() {
        let mut s = search(StorageCapabilities::default());
        let out = s
            .convert(&agg_plan(vec![Expr::col("t", "a")], true), None, &RequiredProperty::empty())
            .unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(
            plan.op,
            PhysicalOp::HashAgg {
                mode: AggMode::Complete,
                ..
            }
        ));
        assert!(plan.children[0].pushdown().unwrap().aggregation.is_none());
        // scan + rows · memory
        assert!((out.cost.total - (1000.0 * 1.5 + 1000.0 * 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_stream_aggregation_for_group_order() {
        let mut s = search(StorageCapabilities::none());
        let plan = agg_plan(vec![Expr::col("t", "a"), Expr::col("t", "b")], false);
        let prop = RequiredProperty::ordered(vec![ColumnProp::desc(ColumnRef::new("t", "b"))]);
        let out = s.convert(&plan, None, &prop).unwrap();
        let root = out.plan.as_ref().unwrap();
        assert!(matches!(root.op, PhysicalOp::StreamAgg { .. }));
        // The child sorts by b desc, then a in any direction.
        let PhysicalOp::Sort { by, .. } = &root.children[0].op else {
            panic!("expected a sort below the stream aggregation");
        };
        assert_eq!(by.len(), 2);
        assert!(by[0].desc);
    }

    #[test]
    fn test_order_on_aggregate_output_is_infeasible() {
        let mut s = search(StorageCapabilities::default());
        let plan = agg_plan(vec![Expr::col("t", "a")], false);
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::unqualified("s"))]);
        let out = s.convert(&plan, None, &prop).unwrap();
        assert!(!out.is_feasible());
    }
}
