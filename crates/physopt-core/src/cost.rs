//! # Cost Model
//!
//! This module defines the cost abstraction and the weighting constants used to compare
//! competing physical plans.
//!
//! ## Additive Costs
//!
//! The cost of a plan is the sum of its children's costs plus the local work of its
//! root operator. Local work is expressed in terms of a handful of named factors:
//!
//! ```text
//! scan          = rows * network
//! hash build    = rows * memory
//! hash lookup   = rows * cpu            (cartesian: rows * cpu * build_rows * join)
//! stream agg    = rows * cpu
//! hash agg      = rows * memory
//! sort(n)       = n * log2(n) * cpu + n * memory
//! ```
//!
//! Selectivity-like factors (`selection`, `distinct`, `aggregation`) scale row counts
//! rather than costs.
//!
//! ## Infeasibility
//!
//! `Cost::infinite()` marks a plan that cannot satisfy the requested property. It is
//! never produced by arithmetic on finite costs and always loses a comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total weighted cost. Lower is better. `f64::INFINITY` marks an infeasible plan.
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self {
            total: f64::INFINITY,
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.total.is_infinite()
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        if self.is_infinite() || other.is_infinite() {
            return self.is_infinite() && other.is_infinite();
        }
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost::new(self.total + rhs.total)
    }
}

impl Add<f64> for Cost {
    type Output = Cost;

    fn add(self, rhs: f64) -> Cost {
        Cost::new(self.total + rhs)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{:.2}", self.total)
        }
    }
}

/// Weighting constants of the cost model.
///
/// All fields have defaults, so a partial TOML `[search.cost]` section only needs to
/// name the factors it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Per-row cost of reading from storage.
    pub network: f64,
    /// Per-row cost of materializing a row in memory (hash tables, sort buffers).
    pub memory: f64,
    /// Per-row CPU cost of processing a row.
    pub cpu: f64,
    /// Row reduction of a filter whose selectivity is unknown.
    pub selection: f64,
    /// Row reduction of DISTINCT.
    pub distinct: f64,
    /// Row reduction of a grouped aggregation.
    pub aggregation: f64,
    /// Cartesian lookup multiplier for joins without equality conditions.
    pub join: f64,
    /// Dampening applied per additional equality dimension of an index range.
    pub multi_column: f64,
    /// Lower bound of an index-range estimate.
    pub row_floor: u64,
    /// An index-range estimate never exceeds `table rows / ceiling_divisor`.
    pub ceiling_divisor: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            network: 1.5,
            memory: 5.0,
            cpu: 0.9,
            selection: 0.8,
            distinct: 0.7,
            aggregation: 0.1,
            join: 0.3,
            multi_column: 100.0,
            row_floor: 1000,
            ceiling_divisor: 3,
        }
    }
}

impl CostModel {
    /// Cost of an explicit sort over `rows` rows.
    pub fn sort_cost(&self, rows: u64) -> f64 {
        if rows == 0 {
            return 0.0;
        }
        let n = rows as f64;
        n * n.log2() * self.cpu + n * self.memory
    }

    pub fn scan_cost(&self, rows: u64) -> f64 {
        rows as f64 * self.network
    }

    /// Scale a row count by a factor, rounding down.
    pub fn scale(rows: u64, factor: f64) -> u64 {
        (rows as f64 * factor) as u64
    }
}
