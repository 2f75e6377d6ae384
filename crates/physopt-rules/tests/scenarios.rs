//! End-to-end physical search scenarios.
//!
//! Each test builds a small catalog and a logical plan, runs `PhysicalSearch::optimize`
//! and checks the shape and cost of the chosen plan:
//!
//! - Filtered table scan estimated through a histogram (row floor applied).
//! - Ordered index scan replacing an explicit sort.
//! - Left-driven join when only left columns are ordered.
//! - Stream aggregation over an index that delivers the group order.
//! - Dummy scan for a constant false filter under every property.
//! - Memo idempotence and correlated Apply caching.

use physopt_core::catalog::{IndexInfo, InMemoryCatalog, TableInfo};
use physopt_core::cost::CostModel;
use physopt_core::error::OptimizerError;
use physopt_core::expr::*;
use physopt_core::plan::{LogicalPlan, NamedAgg, PhysicalOp, PhysicalPlan, PlanBuilder};
use physopt_core::properties::{ColumnProp, LimitBound, RequiredProperty};
use physopt_core::pushdown::{CapabilityClient, StorageCapabilities};
use physopt_core::stats::{ColumnHistogram, HistogramBucket, TableStatistics};
use physopt_rules::{PhysicalSearch, SearchConfig};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn table(name: &str) -> TableRef {
    TableRef::new("db", name)
}

fn search(catalog: InMemoryCatalog, caps: StorageCapabilities) -> PhysicalSearch {
    PhysicalSearch::new(
        Arc::new(catalog),
        Arc::new(CapabilityClient::new(caps)),
        SearchConfig::default(),
    )
}

/// Distinct integer values `0..rows`, split into equal-width buckets.
fn uniform_histogram(column: &str, rows: u64, buckets: u64) -> ColumnHistogram {
    let width = rows / buckets;
    let buckets = (1..=buckets)
        .map(|i| HistogramBucket {
            upper: ScalarValue::Int64((i * width - 1) as i64),
            count: i * width,
            repeats: 1,
        })
        .collect();
    ColumnHistogram::new(column, rows, buckets)
}

/// First node in pre-order satisfying `pred`.
fn find<'a>(plan: &'a PhysicalPlan, pred: &dyn Fn(&PhysicalOp) -> bool) -> Option<&'a PhysicalPlan> {
    if pred(&plan.op) {
        return Some(plan);
    }
    plan.children.iter().find_map(|c| find(c, pred))
}

fn has_sort(plan: &PhysicalPlan) -> bool {
    find(plan, &|op| matches!(op, PhysicalOp::Sort { .. })).is_some()
}

fn col(t: &str, c: &str) -> ColumnRef {
    ColumnRef::new(t, c)
}

// ---------------------------------------------------------------------------
// Access paths
// ---------------------------------------------------------------------------

#[test]
fn test_histogram_filter_uses_table_scan() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        TableInfo::new(table("t"), &["a", "b"]),
        Some(TableStatistics::new(10_000).with_histogram(uniform_histogram("b", 10_000, 100))),
    );
    let mut b = PlanBuilder::new();
    let scan = b.scan(table("t"), &["a", "b"]);
    let filter = b.select(
        scan,
        vec![Expr::binary(BinaryOp::Lt, Expr::col("t", "b"), Expr::int(100))],
    );

    let out = search(catalog, StorageCapabilities::default())
        .optimize(&filter)
        .unwrap();
    let PhysicalOp::TableScan(ts) = &out.plan.op else {
        panic!("expected a table scan, got\n{}", out.plan.display());
    };
    assert_eq!(ts.pushdown.conditions.len(), 1);
    assert!(ts.pushdown.predicate.is_some());
    assert!(!has_sort(&out.plan));
    // About 1% of the table, raised to the 1000-row floor.
    assert_eq!(out.rows, 1000);
    assert_eq!(out.plan.row_count, 1000);
}

#[test]
fn test_ordered_index_scan_replaces_sort() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        TableInfo::new(table("t"), &["a", "b"]).with_index(IndexInfo::new("idx_a", &["a"])),
        Some(TableStatistics::new(10_000)),
    );
    let mut b = PlanBuilder::new();
    let scan = b.scan(table("t"), &["a", "b"]);
    let sort = b.sort(scan, vec![SortKey::asc(Expr::col("t", "a"))]);

    let out = search(catalog, StorageCapabilities::default())
        .optimize(&sort)
        .unwrap();
    let PhysicalOp::IndexScan(is) = &out.plan.op else {
        panic!("expected an index scan, got\n{}", out.plan.display());
    };
    assert!(is.keep_order && !is.desc);
    assert!(is.double_read);
    assert!(!has_sort(&out.plan));

    let model = CostModel::default();
    let table_scan_and_sort = 10_000.0 * model.network + model.sort_cost(10_000);
    assert!((out.cost - 30_000.0).abs() < 1e-6);
    assert!(out.cost < table_scan_and_sort);
}

#[test]
fn test_descending_order_on_pk_handle() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        TableInfo::new(table("t"), &["id", "v"]).with_pk_handle("id"),
        Some(TableStatistics::new(5000)),
    );
    let mut b = PlanBuilder::new();
    let scan = b.scan(table("t"), &["id", "v"]);
    let sort = b.sort(scan, vec![SortKey::desc(Expr::col("t", "id"))]);
    let limit = b.limit(sort, 0, 10);

    let out = search(catalog, StorageCapabilities::default())
        .optimize(&limit)
        .unwrap();
    assert!(!has_sort(&out.plan), "{}", out.plan.display());
    let scan = find(&out.plan, &|op| matches!(op, PhysicalOp::TableScan(_))).unwrap();
    let PhysicalOp::TableScan(ts) = &scan.op else {
        unreachable!();
    };
    assert!(ts.keep_order && ts.desc);
    assert_eq!(ts.pushdown.limit, Some(10));
    assert_eq!(out.rows, 10);
}

// ---------------------------------------------------------------------------
// Joins and aggregation
// ---------------------------------------------------------------------------

#[test]
fn test_left_order_drives_inner_join() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(TableInfo::new(table("t"), &["a"]), Some(TableStatistics::new(1000)));
    catalog.add_table(TableInfo::new(table("u"), &["b"]), Some(TableStatistics::new(5000)));
    let mut b = PlanBuilder::new();
    let l = b.scan(table("t"), &["a"]);
    let r = b.scan(table("u"), &["b"]);
    let join = b.join(
        JoinType::Inner,
        l,
        r,
        JoinConditions::on(vec![EqualCondition {
            left: col("t", "a"),
            right: col("u", "b"),
        }]),
    );
    let sort = b.sort(join, vec![SortKey::asc(Expr::col("t", "a"))]);

    let out = search(catalog, StorageCapabilities::default())
        .optimize(&sort)
        .unwrap();
    let PhysicalOp::HashJoin { build_side, .. } = &out.plan.op else {
        panic!("expected the join at the root, got\n{}", out.plan.display());
    };
    assert_eq!(*build_side, BuildSide::Right);
    assert!(matches!(out.plan.children[0].op, PhysicalOp::Sort { .. }));
    assert!(!has_sort(&out.plan.children[1]));
    assert_eq!(out.rows, 1000);
}

#[test]
fn test_stream_aggregation_over_ordered_index() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(
        TableInfo::new(table("t"), &["a", "b", "c"]).with_index(IndexInfo::new("idx_ab", &["a", "b"])),
        Some(TableStatistics::new(10_000)),
    );
    let mut b = PlanBuilder::new();
    let scan = b.scan(table("t"), &["a", "b"]);
    let agg = b.aggregate(
        scan,
        vec![Expr::col("t", "a"), Expr::col("t", "b")],
        vec![NamedAgg::new(AggExpr::new(AggFunc::Count, Expr::col("t", "b")), "cnt")],
    );
    let sort = b.sort(
        agg,
        vec![SortKey::asc(Expr::col("t", "a")), SortKey::asc(Expr::col("t", "b"))],
    );
    let caps = StorageCapabilities {
        aggregation: false,
        ..StorageCapabilities::default()
    };

    let out = search(catalog, caps).optimize(&sort).unwrap();
    assert!(matches!(out.plan.op, PhysicalOp::StreamAgg { .. }), "{}", out.plan.display());
    assert!(!has_sort(&out.plan));
    assert!(find(&out.plan, &|op| matches!(op, PhysicalOp::HashAgg { .. })).is_none());
    let PhysicalOp::IndexScan(is) = &out.plan.children[0].op else {
        panic!("expected an index scan below the aggregation");
    };
    assert!(is.keep_order && !is.double_read);

    let model = CostModel::default();
    let stream = 10_000.0 * model.network + 10_000.0 * model.cpu;
    let hash = 10_000.0 * model.network + 10_000.0 * model.memory;
    assert!((out.cost - stream).abs() < 1e-6);
    assert!(out.cost < hash);
    assert_eq!(out.rows, 1000);
}

// ---------------------------------------------------------------------------
// Provably empty results
// ---------------------------------------------------------------------------

#[test]
fn test_constant_false_filter_is_dummy_under_any_property() {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(TableInfo::new(table("t"), &["a"]), Some(TableStatistics::new(10_000)));
    let mut b = PlanBuilder::new();
    let scan = b.scan(table("t"), &["a"]);
    let filter = b.select(scan, vec![Expr::lit(ScalarValue::Bool(false))]);

    let props = [
        RequiredProperty::empty(),
        RequiredProperty::ordered(vec![ColumnProp::desc(col("t", "a"))]),
        RequiredProperty::limit_only(Some(LimitBound::new(5, 5))),
        RequiredProperty::ordered(vec![ColumnProp::asc(col("t", "a"))])
            .with_limit(Some(LimitBound::new(0, 1))),
    ];
    let mut s = search(catalog, StorageCapabilities::default());
    for prop in &props {
        let info = s.convert(&filter, None, prop).unwrap();
        assert!(info.is_dummy(), "not a dummy under {}", prop);
        assert_eq!(info.count, 0);
        assert_eq!(info.cost.total, 0.0);
    }

    let sort = b.sort(filter, vec![SortKey::asc(Expr::col("t", "a"))]);
    let limit = b.limit(sort, 0, 3);
    let out = s.optimize(&limit).unwrap();
    assert!(out.plan.is_dummy(), "{}", out.plan.display());
    assert_eq!(out.rows, 0);
}

// ---------------------------------------------------------------------------
// Search behaviour
// ---------------------------------------------------------------------------

fn join_plan() -> LogicalPlan {
    let mut b = PlanBuilder::new();
    let l = b.scan(table("t"), &["a"]);
    let l = b.select(l, vec![Expr::binary(BinaryOp::Gt, Expr::col("t", "a"), Expr::int(3))]);
    let r = b.scan(table("u"), &["b"]);
    let join = b.join(JoinType::LeftOuter, l, r, JoinConditions::default());
    let d = b.distinct(join);
    b.limit(d, 2, 8)
}

fn join_catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(TableInfo::new(table("t"), &["a"]), Some(TableStatistics::new(300)));
    catalog.add_table(TableInfo::new(table("u"), &["b"]), None);
    catalog
}

#[test]
fn test_optimize_is_idempotent() {
    let plan = join_plan();
    let mut s = search(join_catalog(), StorageCapabilities::default());
    let first = s.optimize(&plan).unwrap();
    let after_first = s.memo_stats();
    let second = s.optimize(&plan).unwrap();
    let after_second = s.memo_stats();

    assert_eq!(first, second);
    assert_eq!(after_second.inserts, after_first.inserts);
    assert_eq!(after_second.hits, after_first.hits + 1);
}

#[test]
fn test_missing_stats_use_pseudo_table() {
    let plan = join_plan();
    let mut s = search(join_catalog(), StorageCapabilities::default());
    let out = s.optimize(&plan).unwrap();
    let u_scan = find(&out.plan, &|op| matches!(op, PhysicalOp::TableScan(ts) if ts.table.name == "u")).unwrap();
    assert_eq!(u_scan.row_count, 10_000);
    assert!(matches!(out.plan.op, PhysicalOp::Limit { offset: 2, count: 8 }));
    assert_eq!(out.rows, 8);
}

#[test]
fn test_invalid_plans_are_rejected() {
    let mut b = PlanBuilder::new();
    let scan = b.scan(table("missing"), &["a"]);
    let mut s = search(join_catalog(), StorageCapabilities::default());
    let err = s.optimize(&scan).unwrap_err();
    assert!(matches!(
        err,
        OptimizerError::Context { ref source, .. } if matches!(**source, OptimizerError::InvalidPlan(_))
    ));

    let mut l = b.scan(table("t"), &["a"]);
    let r = b.scan(table("t"), &["a"]);
    l.id = r.id;
    let u = b.union(vec![l, r]);
    assert!(matches!(s.optimize(&u), Err(OptimizerError::InvalidPlan(_))));
}

#[test]
fn test_correlated_apply_caches_uncorrelated_inner() {
    let mut b = PlanBuilder::new();
    let outer = b.scan(table("t"), &["a"]);
    let inner = b.scan(table("u"), &["b"]);
    let inner = b.select(
        inner,
        vec![Expr::eq(Expr::col("u", "b"), Expr::Correlated(col("t", "a")))],
    );
    let agg = b.aggregate(
        inner,
        Vec::new(),
        vec![NamedAgg::new(AggExpr::new(AggFunc::Count, Expr::col("u", "b")), "cnt")],
    );
    let apply = b.apply(JoinType::LeftOuter, outer, agg, Vec::new());
    let sort = b.sort(apply, vec![SortKey::asc(Expr::col("t", "a"))]);

    let mut s = search(join_catalog(), StorageCapabilities::default());
    let out = s.optimize(&sort).unwrap();
    let apply = find(&out.plan, &|op| matches!(op, PhysicalOp::Apply { .. })).unwrap();
    let cache = find(&apply.children[1], &|op| matches!(op, PhysicalOp::Cache)).unwrap();
    assert!(cache.children[0].is_dist_scan());
    assert!(!cache.children[0].correlated);
    let filter = find(&apply.children[1], &|op| matches!(op, PhysicalOp::Selection { .. })).unwrap();
    assert!(filter.correlated);
}
