//! # Join Strategy Selection
//!
//! Every join is a hash join. What varies is which side drives it:
//!
//! ## Left-Driven (`build_side = Right`)
//!
//! Rows stream from the left child and look up a hash table built on the right child,
//! so the output keeps the left child's order. The left child receives the request
//! when all of its columns are left columns. An inner join drops the limit (the join
//! may discard left rows); a left outer join keeps one output row per left row at
//! least, so the left child may stop after `offset + count` rows.
//!
//! ## Right-Driven (`build_side = Left`)
//!
//! The mirror image, for right outer and inner joins.
//!
//! Inner joins try both and keep the cheaper one. When the request cannot be driven
//! from either side the children are converted unordered and order and limit are
//! enforced above the join.
//!
//! ## Semi Joins
//!
//! Semi and anti-semi joins are always left-driven. Without an auxiliary column they
//! filter left rows, so the limit cannot be pushed and rows scale by the selection
//! factor. The with-aux variants emit every left row with a match flag, so the limit
//! passes through.
//!
//! ## Cost
//!
//! ```text
//! cost = left + right + build.rows · memory + stream.rows · cpu
//! ```
//!
//! Without an equality condition every streamed row meets every build row, and the stream
//! term is multiplied by `build.rows · join`.

use crate::search::{cheaper, wrong_node, PhysicalSearch};
use physopt_core::cost::{Cost, CostModel};
use physopt_core::error::{OptimizerError, Result};
use physopt_core::expr::{BuildSide, JoinConditions, JoinType};
use physopt_core::memo::PhysicalPlanInfo;
use physopt_core::plan::{LogicalOp, LogicalPlan, PhysicalOp, PhysicalPlan};
use physopt_core::properties::{ColumnProp, RequiredProperty};
use tracing::{error, trace};

impl PhysicalSearch {
    pub(crate) fn convert_join(&mut self, node: &LogicalPlan, prop: &RequiredProperty) -> Result<PhysicalPlanInfo> {
        let LogicalOp::Join { join_type, .. } = &node.op else {
            return Err(wrong_node(node, "Join"));
        };
        match join_type {
            JoinType::Semi | JoinType::AntiSemi | JoinType::SemiWithAux | JoinType::AntiSemiWithAux => {
                self.convert_semi_join(node, *join_type, prop)
            }
            JoinType::LeftOuter => self.convert_left_driven(node, *join_type, prop),
            JoinType::RightOuter => self.convert_right_driven(node, *join_type, prop),
            JoinType::Inner => {
                let left = self.convert_left_driven(node, *join_type, prop)?;
                let right = self.convert_right_driven(node, *join_type, prop)?;
                trace!(
                    "Join {} candidates: left_driven={}, right_driven={}",
                    node.id,
                    left.cost,
                    right.cost
                );
                Ok(cheaper(left, right))
            }
        }
    }

    fn convert_left_driven(
        &mut self,
        node: &LogicalPlan,
        join_type: JoinType,
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        let left = node.child(0)?;
        let right = node.child(1)?;
        let drivable = prop.columns_in(&left.schema);

        let base = if drivable {
            prop.clone()
        } else {
            RequiredProperty::empty()
        };
        let left_prop = match join_type {
            JoinType::LeftOuter => base.convert_limit_offset_to_count(),
            _ => base.remove_limit(),
        };
        let l = self.convert(left, Some(node), &left_prop)?;
        let r = self.convert(right, Some(node), &RequiredProperty::empty())?;
        let info = self.hash_join(node, join_type, l, r, BuildSide::Right);
        Ok(self.enforce_above_join(drivable, prop, info))
    }

    fn convert_right_driven(
        &mut self,
        node: &LogicalPlan,
        join_type: JoinType,
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        let left = node.child(0)?;
        let right = node.child(1)?;
        let drivable = prop.columns_in(&right.schema);

        let base = if drivable {
            RequiredProperty {
                props: map_to_right(node, left, right, prop)?,
                sort_key_len: prop.sort_key_len,
                limit: prop.limit,
            }
        } else {
            RequiredProperty::empty()
        };
        let right_prop = match join_type {
            JoinType::RightOuter => base.convert_limit_offset_to_count(),
            _ => base.remove_limit(),
        };
        let l = self.convert(left, Some(node), &RequiredProperty::empty())?;
        let r = self.convert(right, Some(node), &right_prop)?;
        let info = self.hash_join(node, join_type, l, r, BuildSide::Left);
        Ok(self.enforce_above_join(drivable, prop, info))
    }

    fn convert_semi_join(
        &mut self,
        node: &LogicalPlan,
        join_type: JoinType,
        prop: &RequiredProperty,
    ) -> Result<PhysicalPlanInfo> {
        let left = node.child(0)?;
        let right = node.child(1)?;
        let drivable = prop.columns_in(&left.schema);

        let mut left_prop = if drivable {
            prop.clone()
        } else {
            RequiredProperty::empty()
        };
        if !join_type.with_aux() {
            left_prop = left_prop.remove_limit();
        }
        let l = self.convert(left, Some(node), &left_prop)?;
        let r = self.convert(right, Some(node), &RequiredProperty::empty())?;
        let info = self.hash_join(node, join_type, l, r, BuildSide::Right);
        let info = if join_type.with_aux() {
            info
        } else {
            let count = CostModel::scale(info.count, self.model().selection);
            PhysicalPlanInfo { count, ..info }
        };

        if !drivable {
            Ok(self.enforce(prop, info))
        } else if !join_type.with_aux() {
            Ok(self.enforce(&RequiredProperty::limit_only(prop.limit), info))
        } else {
            Ok(info)
        }
    }

    fn enforce_above_join(&self, drivable: bool, prop: &RequiredProperty, info: PhysicalPlanInfo) -> PhysicalPlanInfo {
        if drivable {
            self.enforce(&RequiredProperty::limit_only(prop.limit), info)
        } else {
            self.enforce(prop, info)
        }
    }

    /// Combine converted children into a hash join driven by the non-build side.
    fn hash_join(
        &self,
        node: &LogicalPlan,
        join_type: JoinType,
        l: PhysicalPlanInfo,
        r: PhysicalPlanInfo,
        build_side: BuildSide,
    ) -> PhysicalPlanInfo {
        let conditions = match &node.op {
            LogicalOp::Join { conditions, .. } => conditions.clone(),
            _ => JoinConditions::default(),
        };
        let (Some(lp), Some(rp)) = (l.plan, r.plan) else {
            return PhysicalPlanInfo::infeasible();
        };
        let model = self.model();
        let (build, stream) = match build_side {
            BuildSide::Right => (r.count, l.count),
            BuildSide::Left => (l.count, r.count),
        };
        let mut stream_cost = stream as f64 * model.cpu;
        if conditions.equal.is_empty() {
            stream_cost *= build as f64 * model.join;
        }
        let cost = l.cost + r.cost + Cost::new(build as f64 * model.memory + stream_cost);

        let op = if join_type.is_semi() {
            PhysicalOp::HashSemiJoin {
                join_type,
                conditions,
            }
        } else {
            PhysicalOp::HashJoin {
                join_type,
                conditions,
                build_side,
                concurrency: self.config.join_concurrency,
            }
        };
        let plan = PhysicalPlan {
            op,
            children: vec![lp, rp],
            schema: node.schema.clone(),
            correlated: node.correlated,
            row_count: stream,
        };
        PhysicalPlanInfo::new(plan, cost, stream)
    }
}

/// Re-express ordering columns of the join output as columns of its right child.
fn map_to_right(
    node: &LogicalPlan,
    left: &LogicalPlan,
    right: &LogicalPlan,
    prop: &RequiredProperty,
) -> Result<Vec<ColumnProp>> {
    prop.props
        .iter()
        .map(|p| {
            let col = node
                .schema
                .index_of(&p.col)
                .and_then(|idx| idx.checked_sub(left.schema.len()))
                .and_then(|idx| right.schema.get(idx));
            match col {
                Some(col) => Ok(ColumnProp {
                    col: col.clone(),
                    desc: p.desc,
                }),
                None => {
                    error!("Join {} cannot map column {} onto its right child", node.id, p.col);
                    Err(OptimizerError::SchemaLookup {
                        column: p.col.clone(),
                        operation: "right-driven join property mapping",
                    })
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::search::{PhysicalSearch, SearchConfig};
    use physopt_core::catalog::{InMemoryCatalog, TableInfo};
    use physopt_core::cost::{Cost, CostModel};
    use physopt_core::expr::{BuildSide, ColumnRef, EqualCondition, JoinConditions, JoinType, TableRef};
    use physopt_core::plan::{LogicalPlan, PhysicalOp, PlanBuilder};
    use physopt_core::properties::{ColumnProp, LimitBound, RequiredProperty};
    use physopt_core::pushdown::CapabilityClient;
    use physopt_core::stats::TableStatistics;
    use std::sync::Arc;

    fn search() -> PhysicalSearch {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "l"), &["a"]),
            Some(TableStatistics::new(100)),
        );
        catalog.add_table(
            TableInfo::new(TableRef::new("db", "r"), &["b"]),
            Some(TableStatistics::new(40)),
        );
        PhysicalSearch::new(
            Arc::new(catalog),
            Arc::new(CapabilityClient::default()),
            SearchConfig::default(),
        )
    }

    fn join(join_type: JoinType, conditions: JoinConditions) -> LogicalPlan {
        let mut b = PlanBuilder::new();
        let l = b.scan(TableRef::new("db", "l"), &["a"]);
        let r = b.scan(TableRef::new("db", "r"), &["b"]);
        b.join(join_type, l, r, conditions)
    }

    fn eq_ab() -> JoinConditions {
        JoinConditions::on(vec![EqualCondition {
            left: ColumnRef::new("l", "a"),
            right: ColumnRef::new("r", "b"),
        }])
    }

    #[test]
    fn test_inner_join_cost() {
        let mut s = search();
        let out = s.convert(&join(JoinType::Inner, eq_ab()), None, &RequiredProperty::empty()).unwrap();
        let m = CostModel::default();
        // Left-driven builds the 40-row side and wins.
        let expected = 100.0 * m.network + 40.0 * m.network + 40.0 * m.memory + 100.0 * m.cpu;
        assert_eq!(out.cost, Cost::new(expected));
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(
            plan.op,
            PhysicalOp::HashJoin {
                build_side: BuildSide::Right,
                concurrency: 5,
                ..
            }
        ));
        assert_eq!(out.count, 100);
    }

    #[test]
    fn test_cartesian_stream_cost() {
        let mut s = search();
        let out = s
            .convert(&join(JoinType::LeftOuter, JoinConditions::default()), None, &RequiredProperty::empty())
            .unwrap();
        let m = CostModel::default();
        let expected = 140.0 * m.network + 40.0 * m.memory + 100.0 * m.cpu * 40.0 * m.join;
        assert_eq!(out.cost, Cost::new(expected));
    }

    #[test]
    fn test_right_order_drives_from_right() {
        let mut s = search();
        let prop = RequiredProperty::ordered(vec![ColumnProp::asc(ColumnRef::new("r", "b"))]);
        let out = s.convert(&join(JoinType::RightOuter, eq_ab()), None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(
            plan.op,
            PhysicalOp::HashJoin {
                build_side: BuildSide::Left,
                ..
            }
        ));
        // The right child is sorted, nothing above the join.
        assert!(matches!(plan.children[1].op, PhysicalOp::Sort { .. }));
        assert_eq!(out.count, 40);
    }

    #[test]
    fn test_left_outer_widens_limit() {
        let mut s = search();
        let prop = RequiredProperty::limit_only(Some(LimitBound::new(3, 4)));
        let out = s.convert(&join(JoinType::LeftOuter, eq_ab()), None, &prop).unwrap();
        let plan = out.plan.as_ref().unwrap();
        assert!(matches!(plan.op, PhysicalOp::Limit { offset: 3, count: 4 }));
        let left = &plan.children[0].children[0];
        assert!(matches!(left.op, PhysicalOp::Limit { offset: 0, count: 7 }));
    }

    #[test]
    fn test_semi_join_rows() {
        let mut s = search();
        let out = s.convert(&join(JoinType::Semi, eq_ab()), None, &RequiredProperty::empty()).unwrap();
        assert!(matches!(out.plan.as_ref().unwrap().op, PhysicalOp::HashSemiJoin { .. }));
        assert_eq!(out.count, 80);

        let mut s = search();
        let out = s
            .convert(&join(JoinType::SemiWithAux, eq_ab()), None, &RequiredProperty::empty())
            .unwrap();
        assert_eq!(out.count, 100);
    }
}
