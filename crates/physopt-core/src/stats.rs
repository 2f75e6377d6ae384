//! # Statistics for Cost-Based Optimization
//!
//! This module holds the per-table statistics snapshot consumed by the optimizer and the
//! two range-cardinality estimators built on top of it.
//!
//! ## Statistics Hierarchy
//!
//! - **Table-level**: total row count.
//! - **Column-level**: an optional histogram of cumulative bucket counts. Columns without
//!   a histogram, and tables without any statistics, fall back to *pseudo* estimators
//!   that apply fixed fractions of the table row count.
//!
//! ## Histogram Layout
//!
//! Buckets are sorted by their upper bound. Each bucket stores the cumulative row count
//! up to and including its upper bound, and how many rows equal the upper bound
//! (`repeats`). Point and range queries locate the first bucket whose upper bound is
//! not below the looked-up value:
//!
//! ```text
//! equal(v)   = repeats            if v is a bucket bound
//!            = rows / ndv         otherwise
//! less(v)    = cumulative(b) - repeats(b)                       if v is the bound of b
//!            = (cumulative(b-1) + cumulative(b) - repeats(b)) / 2  otherwise
//! greater(v) = rows - less(v) - equal(v)
//! between    = less(high) - less(low)
//! ```
//!
//! ## Estimator Contract
//!
//! Estimates are unsigned and never exceed the table row count. The multi-dimension
//! index estimator additionally floors its result at `min(1000, rows)` and caps it at a
//! third of the table, unless a range covers the whole table.

use crate::cost::CostModel;
use crate::error::StatsError;
use crate::expr::{ColumnRef, ScalarValue};
use crate::ranges::{IndexRange, RangeValue, TableRange};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Row count assumed for tables without statistics.
pub const PSEUDO_ROW_COUNT: u64 = 10_000;
const PSEUDO_EQUAL_RATE: u64 = 1000;
const PSEUDO_LESS_RATE: u64 = 3;
const PSEUDO_BETWEEN_RATE: u64 = 40;

/// A single bucket of a column histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Upper bound of the bucket (inclusive).
    pub upper: ScalarValue,
    /// Cumulative number of non-null rows up to and including `upper`.
    pub count: u64,
    /// Number of rows equal to `upper`.
    pub repeats: u64,
}

/// Histogram of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnHistogram {
    pub column: String,
    /// Number of distinct non-null values.
    pub ndv: u64,
    #[serde(default)]
    pub null_count: u64,
    pub buckets: Vec<HistogramBucket>,
}

impl ColumnHistogram {
    pub fn new(column: impl Into<String>, ndv: u64, buckets: Vec<HistogramBucket>) -> Self {
        Self {
            column: column.into(),
            ndv,
            null_count: 0,
            buckets,
        }
    }

    /// Check that cumulative counts are non-decreasing and bounds sorted.
    pub fn validate(&self) -> Result<(), StatsError> {
        let malformed = |reason: String| StatsError::MalformedHistogram {
            column: self.column.clone(),
            reason,
        };
        let mut prev: Option<&HistogramBucket> = None;
        for (i, b) in self.buckets.iter().enumerate() {
            if b.repeats > b.count {
                return Err(malformed(format!("bucket {} repeats exceed its count", i)));
            }
            if let Some(p) = prev {
                if b.count < p.count {
                    return Err(malformed(format!("bucket {} count decreases", i)));
                }
                if b.upper.compare(&p.upper)? != Ordering::Greater {
                    return Err(malformed(format!("bucket {} bound is not increasing", i)));
                }
            }
            prev = Some(b);
        }
        Ok(())
    }

    /// Non-null rows covered by the histogram.
    pub fn total_count(&self) -> u64 {
        self.buckets.last().map(|b| b.count).unwrap_or(0)
    }

    /// First bucket whose upper bound is >= `value`, and whether it is equal.
    fn lower_bound(&self, value: &ScalarValue) -> Result<(usize, bool), StatsError> {
        let mut lo = 0usize;
        let mut hi = self.buckets.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.buckets[mid].upper.compare(value)? {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        if lo == self.buckets.len() {
            return Ok((lo, false));
        }
        let matched = self.buckets[lo].upper.compare(value)? == Ordering::Equal;
        Ok((lo, matched))
    }

    pub fn equal_row_count(&self, value: &ScalarValue) -> Result<u64, StatsError> {
        if value.is_null() {
            return Ok(self.null_count);
        }
        let (idx, matched) = self.lower_bound(value)?;
        if idx == self.buckets.len() {
            return Ok(0);
        }
        if matched {
            return Ok(self.buckets[idx].repeats);
        }
        Ok(self.total_count() / self.ndv.max(1))
    }

    pub fn less_row_count(&self, value: &ScalarValue) -> Result<u64, StatsError> {
        if value.is_null() {
            return Ok(0);
        }
        let (idx, matched) = self.lower_bound(value)?;
        if idx == self.buckets.len() {
            return Ok(self.total_count());
        }
        let bucket = &self.buckets[idx];
        let below_bound = bucket.count.saturating_sub(bucket.repeats);
        if matched {
            return Ok(below_bound);
        }
        let prev = if idx > 0 { self.buckets[idx - 1].count } else { 0 };
        Ok((prev + below_bound.max(prev)) / 2)
    }

    pub fn greater_row_count(&self, value: &ScalarValue) -> Result<u64, StatsError> {
        let less = self.less_row_count(value)?;
        let equal = self.equal_row_count(value)?;
        let not_null_equal = if value.is_null() { 0 } else { equal };
        Ok(self
            .total_count()
            .saturating_sub(less)
            .saturating_sub(not_null_equal))
    }

    pub fn between_row_count(&self, low: &ScalarValue, high: &ScalarValue) -> Result<u64, StatsError> {
        let less_high = self.less_row_count(high)?;
        let less_low = self.less_row_count(low)?;
        Ok(less_high.saturating_sub(less_low))
    }
}

/// Statistics snapshot of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub count: u64,
    #[serde(default)]
    pub columns: HashMap<String, ColumnHistogram>,
    /// Whether the statistics are assumed rather than collected.
    #[serde(default)]
    pub pseudo: bool,
}

impl TableStatistics {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            columns: HashMap::new(),
            pseudo: false,
        }
    }

    /// Assumed statistics for a table that was never analyzed.
    pub fn pseudo() -> Self {
        Self {
            count: PSEUDO_ROW_COUNT,
            columns: HashMap::new(),
            pseudo: true,
        }
    }

    pub fn with_histogram(mut self, histogram: ColumnHistogram) -> Self {
        self.columns.insert(histogram.column.clone(), histogram);
        self
    }

    pub fn validate(&self) -> Result<(), StatsError> {
        self.columns.values().try_for_each(|h| h.validate())
    }

    pub fn histogram(&self, column: &str) -> Option<&ColumnHistogram> {
        self.columns.get(column)
    }

    pub fn column(&self, column: &str) -> ColumnEstimator<'_> {
        ColumnEstimator {
            table_count: self.count,
            histogram: self.columns.get(column),
        }
    }
}

/// Estimates for one column, backed by its histogram or by pseudo rates.
#[derive(Debug, Clone, Copy)]
pub struct ColumnEstimator<'a> {
    table_count: u64,
    histogram: Option<&'a ColumnHistogram>,
}

impl ColumnEstimator<'_> {
    pub fn has_histogram(&self) -> bool {
        self.histogram.is_some()
    }

    fn clamp(&self, v: u64) -> u64 {
        v.min(self.table_count)
    }

    pub fn equal_row_count(&self, value: &ScalarValue) -> Result<u64, StatsError> {
        match self.histogram {
            Some(h) => h.equal_row_count(value).map(|v| self.clamp(v)),
            None => Ok(self.table_count / PSEUDO_EQUAL_RATE),
        }
    }

    pub fn less_row_count(&self, value: &ScalarValue) -> Result<u64, StatsError> {
        match self.histogram {
            Some(h) => h.less_row_count(value).map(|v| self.clamp(v)),
            None => Ok(self.table_count / PSEUDO_LESS_RATE),
        }
    }

    pub fn greater_row_count(&self, value: &ScalarValue) -> Result<u64, StatsError> {
        match self.histogram {
            Some(h) => h.greater_row_count(value).map(|v| self.clamp(v)),
            None => Ok(self.table_count / PSEUDO_LESS_RATE),
        }
    }

    pub fn between_row_count(&self, low: &ScalarValue, high: &ScalarValue) -> Result<u64, StatsError> {
        match self.histogram {
            Some(h) => h.between_row_count(low, high).map(|v| self.clamp(v)),
            None => Ok(self.table_count / PSEUDO_BETWEEN_RATE),
        }
    }
}

/// Estimate rows selected by handle ranges on the integer primary key.
pub fn row_count_by_table_ranges(
    stats: &TableStatistics,
    ranges: &[TableRange],
    pk_column: &ColumnRef,
) -> Result<u64, StatsError> {
    let est = stats.column(&pk_column.name);
    let mut total: u64 = 0;
    for r in ranges {
        let cnt = if r.is_full() {
            stats.count
        } else if r.low == i64::MIN {
            est.less_row_count(&ScalarValue::Int64(r.high))?
        } else if r.high == i64::MAX {
            est.greater_row_count(&ScalarValue::Int64(r.low))?
        } else if r.is_point() {
            est.equal_row_count(&ScalarValue::Int64(r.low))?
        } else {
            est.between_row_count(&ScalarValue::Int64(r.low), &ScalarValue::Int64(r.high))?
        };
        total = total.saturating_add(cnt);
    }
    Ok(total.min(stats.count))
}

/// Estimate rows selected by index ranges over `index_columns`.
pub fn row_count_by_index_ranges(
    stats: &TableStatistics,
    ranges: &[IndexRange],
    index_columns: &[ColumnRef],
    model: &CostModel,
) -> Result<u64, StatsError> {
    let table_count = stats.count;
    let mut total = 0f64;
    for range in ranges {
        let Some(last) = range.low.len().checked_sub(1) else {
            continue;
        };
        let (Some(l), Some(r), Some(col)) = (
            range.low.get(last),
            range.high.get(last),
            index_columns.get(last),
        ) else {
            continue;
        };
        let est = stats.column(&col.name);
        let row_count = match (l, r) {
            (RangeValue::Null, RangeValue::MaxValue) => return Ok(table_count),
            (RangeValue::MinNotNull, RangeValue::MaxValue) => {
                table_count.saturating_sub(est.equal_row_count(&ScalarValue::Null)?)
            }
            (RangeValue::MinNotNull, RangeValue::Value(h)) => est
                .less_row_count(h)?
                .saturating_sub(est.equal_row_count(&ScalarValue::Null)?),
            (RangeValue::Value(v), RangeValue::MaxValue) => est.greater_row_count(v)?,
            (RangeValue::Value(lv), RangeValue::Value(hv)) => {
                if lv.compare(hv)? == Ordering::Equal {
                    est.equal_row_count(lv)?
                } else {
                    est.between_row_count(lv, hv)?
                }
            }
            (RangeValue::Null, RangeValue::Value(h)) => est.less_row_count(h)?,
            _ => table_count,
        };
        let mut count = row_count as f64;
        // Each leading equality dimension is assumed to filter another 1/100.
        for _ in 0..last {
            count /= model.multi_column;
        }
        total += count;
    }
    let floor = model.row_floor.min(table_count);
    let ceiling = (table_count / model.ceiling_divisor.max(1)).max(floor);
    Ok((total as u64).clamp(floor, ceiling))
}
