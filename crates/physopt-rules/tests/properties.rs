//! Property tests over randomly sized tables and limits.
//!
//! - A tighter limit never makes the chosen plan more expensive.
//! - The chosen plan never returns more rows than the limit or the table.
//! - An ordered request is always delivered, by the scan or by a sort above it.

use physopt_core::catalog::{IndexInfo, InMemoryCatalog, TableInfo};
use physopt_core::expr::{BinaryOp, Expr, SortKey, TableRef};
use physopt_core::plan::{LogicalPlan, PhysicalOp, PhysicalPlan, PlanBuilder};
use physopt_core::pushdown::CapabilityClient;
use physopt_core::stats::TableStatistics;
use physopt_rules::{OptimizedPlan, PhysicalSearch, SearchConfig};
use proptest::prelude::*;
use std::sync::Arc;

fn optimize(rows: u64, with_index: bool, plan: &LogicalPlan) -> OptimizedPlan {
    let mut info = TableInfo::new(TableRef::new("db", "t"), &["a", "b"]);
    if with_index {
        info = info.with_index(IndexInfo::new("idx_a", &["a"]));
    }
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(info, Some(TableStatistics::new(rows)));
    let mut search = PhysicalSearch::new(
        Arc::new(catalog),
        Arc::new(CapabilityClient::default()),
        SearchConfig::default(),
    );
    search.optimize(plan).unwrap()
}

/// `SELECT a, b FROM t WHERE b > 0 LIMIT offset, count`
fn filtered_limit(offset: u64, count: u64) -> LogicalPlan {
    let mut b = PlanBuilder::new();
    let scan = b.scan(TableRef::new("db", "t"), &["a", "b"]);
    let filter = b.select(scan, vec![Expr::binary(BinaryOp::Gt, Expr::col("t", "b"), Expr::int(0))]);
    b.limit(filter, offset, count)
}

/// `SELECT a, b FROM t ORDER BY a LIMIT offset, count`
fn ordered_limit(offset: u64, count: u64) -> LogicalPlan {
    let mut b = PlanBuilder::new();
    let scan = b.scan(TableRef::new("db", "t"), &["a", "b"]);
    let sort = b.sort(scan, vec![SortKey::asc(Expr::col("t", "a"))]);
    b.limit(sort, offset, count)
}

/// Either a sort or an order-keeping scan sits on the path to the first leaf.
fn delivers_order(plan: &PhysicalPlan) -> bool {
    match &plan.op {
        PhysicalOp::Sort { .. } => true,
        PhysicalOp::TableScan(ts) => ts.keep_order,
        PhysicalOp::IndexScan(is) => is.keep_order && !is.desc,
        _ => plan.children.first().is_some_and(delivers_order),
    }
}

proptest! {
    #[test]
    fn prop_tighter_filtered_limit_is_not_costlier(
        rows in 1u64..50_000,
        offset in 0u64..100,
        small in 1u64..500,
        extra in 0u64..500,
    ) {
        let tight = optimize(rows, false, &filtered_limit(offset, small));
        let loose = optimize(rows, false, &filtered_limit(offset, small + extra));
        prop_assert!(tight.cost <= loose.cost + 1e-6);
        prop_assert!(tight.rows <= small);
        prop_assert!(loose.rows <= small + extra);
        prop_assert!(loose.rows <= rows);
    }

    #[test]
    fn prop_tighter_ordered_limit_is_not_costlier(
        rows in 1u64..50_000,
        with_index in any::<bool>(),
        small in 1u64..500,
        extra in 0u64..500,
    ) {
        let tight = optimize(rows, with_index, &ordered_limit(0, small));
        let loose = optimize(rows, with_index, &ordered_limit(0, small + extra));
        prop_assert!(tight.cost <= loose.cost + 1e-6);
        prop_assert!(tight.rows <= small);
    }

    #[test]
    fn prop_ordered_request_is_delivered(
        rows in 1u64..50_000,
        with_index in any::<bool>(),
        count in 1u64..1000,
    ) {
        let out = optimize(rows, with_index, &ordered_limit(0, count));
        prop_assert!(delivers_order(&out.plan), "{}", out.plan.display());
        prop_assert!(out.cost.is_finite());
    }
}
