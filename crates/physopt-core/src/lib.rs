//! # physopt-core: Physical Optimizer Vocabulary
//!
//! This crate holds the data structures shared by the property-driven physical search:
//! plans, required properties, the cost model, statistics and the memo.
//!
//! ## Module Overview
//!
//! - **`expr`**: Scalar expressions, values, schemas and join/aggregate descriptors.
//! - **`plan`**: Logical and physical plan trees, `PlanBuilder`, scan pushdown and display.
//! - **`properties`**: `RequiredProperty` (order + limit) and `match_prop`.
//! - **`cost`**: The `Cost` value and the `CostModel` weighting constants.
//! - **`stats`**: Table statistics, histograms and the range-cardinality estimators.
//! - **`ranges`**: Handle and index range construction from filter conditions.
//! - **`catalog`**: Catalog trait for table metadata and statistics.
//! - **`pushdown`**: The storage client capability interface.
//! - **`memo`**: Per-node cache of (required property → physical plan info).
//! - **`error`**: Error types.

pub mod catalog;
pub mod cost;
pub mod error;
pub mod expr;
pub mod memo;
pub mod plan;
pub mod properties;
pub mod pushdown;
pub mod ranges;
pub mod stats;

pub use error::{OptimizerError, Result};
