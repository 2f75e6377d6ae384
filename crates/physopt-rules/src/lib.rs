//! # Physical Conversion Strategies
//!
//! This crate turns a logical plan into the cheapest physical plan satisfying a
//! required property. `PhysicalSearch` drives the recursion and the memo; each
//! logical node kind has its own conversion strategy:
//!
//! - **`impl_scan`**: DataSource → TableScan / IndexScan / DummyScan, including range
//!   construction, predicate, limit and top-N pushdown and equality-prefix ordering.
//! - **`impl_selection`**: Selection and Projection.
//! - **`impl_join`**: Left- and right-driven hash joins, semi joins.
//! - **`impl_agg`**: Stream aggregation and (partially pushed) hash aggregation.
//! - **`impl_limit`**: Limit, Distinct and Union.
//! - **`impl_apply`**: Correlated Apply and inner-side caching.
//! - **`enforcer`**: Sort and Limit enforcers, and the logical Sort.

pub mod enforcer;
pub mod impl_agg;
pub mod impl_apply;
pub mod impl_join;
pub mod impl_limit;
pub mod impl_scan;
pub mod impl_selection;
pub mod search;

pub use enforcer::enforce_property;
pub use search::{OptimizedPlan, PhysicalSearch, SearchConfig};
