//! # Access Ranges
//!
//! Scans restrict the rows they read with ranges derived from the conjuncts of the
//! parent Selection:
//!
//! - **Handle ranges** (`TableRange`): inclusive `i64` intervals over the integer
//!   primary key of a table whose primary key is the row handle. Built from
//!   `pk op constant` conjuncts and OR-lists of them.
//! - **Index ranges** (`IndexRange`): tuples of bounds over the index columns. Access
//!   conditions are an equality prefix (single equalities or OR-lists of equalities)
//!   followed by at most one column restricted by comparisons.
//!
//! Conditions not used for access are returned as residual conditions. A constant that
//! cannot be represented on an integer handle (`pk > 1.5`) is a soft `Truncated` error;
//! callers fall back to the full range and keep the condition as a residual filter.

use crate::error::{EvalError, RangeError};
use crate::expr::{BinaryOp, ColumnRef, Expr, ScalarValue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Inclusive interval of row handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRange {
    pub low: i64,
    pub high: i64,
}

impl TableRange {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub fn full() -> Self {
        Self {
            low: i64::MIN,
            high: i64::MAX,
        }
    }

    pub fn is_full(&self) -> bool {
        self.low == i64::MIN && self.high == i64::MAX
    }

    pub fn is_point(&self) -> bool {
        self.low == self.high
    }
}

impl fmt::Display for TableRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let low = if self.low == i64::MIN {
            "-inf".to_string()
        } else {
            self.low.to_string()
        };
        let high = if self.high == i64::MAX {
            "+inf".to_string()
        } else {
            self.high.to_string()
        };
        write!(f, "[{},{}]", low, high)
    }
}

/// A bound of one index dimension.
///
/// Ordering: `Null < MinNotNull < Value(_) < MaxValue`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeValue {
    Null,
    MinNotNull,
    Value(ScalarValue),
    MaxValue,
}

impl RangeValue {
    fn rank(&self) -> u8 {
        match self {
            RangeValue::Null => 0,
            RangeValue::MinNotNull => 1,
            RangeValue::Value(_) => 2,
            RangeValue::MaxValue => 3,
        }
    }

    pub fn compare(&self, other: &RangeValue) -> Result<Ordering, EvalError> {
        match (self, other) {
            (RangeValue::Value(a), RangeValue::Value(b)) => a.compare(b),
            _ => Ok(self.rank().cmp(&other.rank())),
        }
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeValue::Null => write!(f, "<nil>"),
            RangeValue::MinNotNull => write!(f, "-inf"),
            RangeValue::Value(v) => write!(f, "{}", v),
            RangeValue::MaxValue => write!(f, "+inf"),
        }
    }
}

/// A range over a prefix of the index columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub low: Vec<RangeValue>,
    pub high: Vec<RangeValue>,
    pub low_exclude: bool,
    pub high_exclude: bool,
}

impl IndexRange {
    /// The range covering every row, NULLs included.
    pub fn full() -> Self {
        Self {
            low: vec![RangeValue::Null],
            high: vec![RangeValue::MaxValue],
            low_exclude: false,
            high_exclude: false,
        }
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let l: Vec<String> = self.low.iter().map(|v| v.to_string()).collect();
        let h: Vec<String> = self.high.iter().map(|v| v.to_string()).collect();
        let open = if self.low_exclude { "(" } else { "[" };
        let close = if self.high_exclude { ")" } else { "]" };
        write!(f, "{}{} {}{}", open, l.join(" "), h.join(" "), close)
    }
}

/// Conditions of a Selection split into access conditions and the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetachedConditions {
    pub access: Vec<Expr>,
    pub residual: Vec<Expr>,
}

fn is_handle_condition(cond: &Expr, pk: &ColumnRef) -> bool {
    match cond {
        Expr::Or(arms) => !arms.is_empty() && arms.iter().all(|a| is_handle_condition(a, pk)),
        other => matches!(
            other.as_column_comparison(),
            Some((c, op, _)) if c == pk && op != BinaryOp::NotEq
        ),
    }
}

/// Split conditions into handle access conditions on `pk` and residual conditions.
pub fn detach_table_conditions(conditions: Vec<Expr>, pk: &ColumnRef) -> DetachedConditions {
    let (access, residual) = conditions
        .into_iter()
        .partition(|c| is_handle_condition(c, pk));
    DetachedConditions { access, residual }
}

fn handle_value(column: &ColumnRef, value: &ScalarValue) -> Result<Option<i64>, RangeError> {
    let truncated = || RangeError::Truncated {
        column: column.to_string(),
        value: value.to_string(),
    };
    match value {
        ScalarValue::Null => Ok(None),
        ScalarValue::Int64(v) => Ok(Some(*v)),
        ScalarValue::Bool(b) => Ok(Some(i64::from(*b))),
        ScalarValue::Float64(f) => {
            if f.0.fract() == 0.0 && f.0 >= i64::MIN as f64 && f.0 <= i64::MAX as f64 {
                Ok(Some(f.0 as i64))
            } else {
                Err(truncated())
            }
        }
        ScalarValue::Utf8(s) => {
            if let Ok(v) = s.trim().parse::<i64>() {
                return Ok(Some(v));
            }
            match s.trim().parse::<f64>() {
                Ok(f) if f.fract() == 0.0 => Ok(Some(f as i64)),
                Ok(_) => Err(truncated()),
                Err(_) => Err(EvalError::Incomparable {
                    left: column.to_string(),
                    right: value.to_string(),
                }
                .into()),
            }
        }
        ScalarValue::Date(_) => Err(EvalError::Incomparable {
            left: column.to_string(),
            right: value.to_string(),
        }
        .into()),
    }
}

fn handle_ranges_for(cond: &Expr, pk: &ColumnRef) -> Result<Vec<TableRange>, RangeError> {
    if let Expr::Or(arms) = cond {
        let mut out = Vec::new();
        for arm in arms {
            out.extend(handle_ranges_for(arm, pk)?);
        }
        return Ok(union_table_ranges(out));
    }
    let Some((_, op, value)) = cond.as_column_comparison() else {
        return Ok(vec![TableRange::full()]);
    };
    // Comparisons with NULL select nothing.
    let Some(v) = handle_value(pk, value)? else {
        return Ok(Vec::new());
    };
    let range = match op {
        BinaryOp::Eq => Some(TableRange::new(v, v)),
        BinaryOp::Lt => v.checked_sub(1).map(|h| TableRange::new(i64::MIN, h)),
        BinaryOp::LtEq => Some(TableRange::new(i64::MIN, v)),
        BinaryOp::Gt => v.checked_add(1).map(|l| TableRange::new(l, i64::MAX)),
        BinaryOp::GtEq => Some(TableRange::new(v, i64::MAX)),
        _ => Some(TableRange::full()),
    };
    Ok(range.into_iter().collect())
}

fn union_table_ranges(mut ranges: Vec<TableRange>) -> Vec<TableRange> {
    ranges.sort_by_key(|r| r.low);
    let mut out: Vec<TableRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if r.low <= last.high.saturating_add(1) => {
                last.high = last.high.max(r.high);
            }
            _ => out.push(r),
        }
    }
    out
}

fn intersect_table_ranges(a: &[TableRange], b: &[TableRange]) -> Vec<TableRange> {
    let mut out = Vec::new();
    for x in a {
        for y in b {
            let low = x.low.max(y.low);
            let high = x.high.min(y.high);
            if low <= high {
                out.push(TableRange::new(low, high));
            }
        }
    }
    union_table_ranges(out)
}

/// Build the handle ranges selected by the access conditions.
///
/// Returns the full range when there is no access condition, and an empty list when
/// the conditions contradict each other.
pub fn build_table_ranges(access: &[Expr], pk: &ColumnRef) -> Result<Vec<TableRange>, RangeError> {
    let mut ranges = vec![TableRange::full()];
    for cond in access {
        let cond_ranges = handle_ranges_for(cond, pk)?;
        ranges = intersect_table_ranges(&ranges, &cond_ranges);
    }
    Ok(ranges)
}

/// Access conditions matched against an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexAccess {
    pub detached: DetachedConditions,
    /// Point values for each leading equality column.
    pub points: Vec<Vec<ScalarValue>>,
    /// Comparisons restricting the column right after the equality prefix.
    pub range_conditions: Vec<(BinaryOp, ScalarValue)>,
}

impl IndexAccess {
    /// Leading index columns fixed to exactly one value.
    pub fn single_point_prefix(&self) -> usize {
        self.points.iter().take_while(|p| p.len() == 1).count()
    }
}

fn equality_points(cond: &Expr, col: &ColumnRef) -> Option<Vec<ScalarValue>> {
    match cond {
        Expr::Or(arms) if !arms.is_empty() => {
            let mut values = Vec::new();
            for arm in arms {
                values.extend(equality_points(arm, col)?);
            }
            Some(values)
        }
        other => match other.as_column_comparison() {
            Some((c, BinaryOp::Eq, v)) if c == col => Some(vec![v.clone()]),
            _ => None,
        },
    }
}

fn range_comparison(cond: &Expr, col: &ColumnRef) -> Option<(BinaryOp, ScalarValue)> {
    match cond.as_column_comparison() {
        Some((c, op, v)) if c == col && op != BinaryOp::NotEq => Some((op, v.clone())),
        _ => None,
    }
}

/// Split conditions into index access conditions and residual conditions.
///
/// Index columns are consumed left to right: each column fixed by an equality (or an
/// OR-list of equalities) extends the prefix; the first column that is not is
/// restricted by whatever comparisons mention it, and matching stops there.
pub fn detach_index_conditions(conditions: Vec<Expr>, index_columns: &[ColumnRef]) -> IndexAccess {
    let mut remaining = conditions;
    let mut access = IndexAccess::default();
    for col in index_columns {
        if let Some(pos) = remaining
            .iter()
            .position(|c| equality_points(c, col).is_some())
        {
            let cond = remaining.remove(pos);
            if let Some(points) = equality_points(&cond, col) {
                access.points.push(points);
            }
            access.detached.access.push(cond);
            continue;
        }
        let (ranged, rest): (Vec<Expr>, Vec<Expr>) = remaining
            .into_iter()
            .partition(|c| range_comparison(c, col).is_some());
        remaining = rest;
        for cond in ranged {
            if let Some(rc) = range_comparison(&cond, col) {
                access.range_conditions.push(rc);
            }
            access.detached.access.push(cond);
        }
        break;
    }
    access.detached.residual = remaining;
    access
}

struct Bound {
    value: RangeValue,
    exclude: bool,
}

fn tighten_low(cur: Bound, value: RangeValue, exclude: bool) -> Result<Bound, EvalError> {
    Ok(match value.compare(&cur.value)? {
        Ordering::Greater => Bound { value, exclude },
        Ordering::Equal => Bound {
            value,
            exclude: exclude || cur.exclude,
        },
        Ordering::Less => cur,
    })
}

fn tighten_high(cur: Bound, value: RangeValue, exclude: bool) -> Result<Bound, EvalError> {
    Ok(match value.compare(&cur.value)? {
        Ordering::Less => Bound { value, exclude },
        Ordering::Equal => Bound {
            value,
            exclude: exclude || cur.exclude,
        },
        Ordering::Greater => cur,
    })
}

/// Build the index ranges for matched access conditions.
///
/// The equality prefix expands into the cartesian product of its point values; the
/// range column, when present, contributes one interval appended to every point tuple.
pub fn build_index_ranges(access: &IndexAccess) -> Result<Vec<IndexRange>, RangeError> {
    if access.points.is_empty() && access.range_conditions.is_empty() {
        return Ok(vec![IndexRange::full()]);
    }

    let mut tuples: Vec<Vec<RangeValue>> = vec![Vec::new()];
    for points in &access.points {
        let mut distinct: Vec<&ScalarValue> = Vec::new();
        for p in points.iter().filter(|p| !p.is_null()) {
            if !distinct.contains(&p) {
                distinct.push(p);
            }
        }
        let mut next = Vec::with_capacity(tuples.len() * distinct.len());
        for t in &tuples {
            for p in &distinct {
                let mut t = t.clone();
                t.push(RangeValue::Value((*p).clone()));
                next.push(t);
            }
        }
        tuples = next;
    }

    if access.range_conditions.is_empty() {
        return Ok(tuples
            .into_iter()
            .map(|t| IndexRange {
                low: t.clone(),
                high: t,
                low_exclude: false,
                high_exclude: false,
            })
            .collect());
    }

    let mut low = Bound {
        value: RangeValue::MinNotNull,
        exclude: false,
    };
    let mut high = Bound {
        value: RangeValue::MaxValue,
        exclude: false,
    };
    for (op, value) in &access.range_conditions {
        if value.is_null() {
            return Ok(Vec::new());
        }
        let v = RangeValue::Value(value.clone());
        match op {
            BinaryOp::Eq => {
                low = tighten_low(low, v.clone(), false)?;
                high = tighten_high(high, v, false)?;
            }
            BinaryOp::Lt => high = tighten_high(high, v, true)?,
            BinaryOp::LtEq => high = tighten_high(high, v, false)?,
            BinaryOp::Gt => low = tighten_low(low, v, true)?,
            BinaryOp::GtEq => low = tighten_low(low, v, false)?,
            _ => {}
        }
    }
    let empty = match low.value.compare(&high.value)? {
        Ordering::Greater => true,
        Ordering::Equal => low.exclude || high.exclude,
        Ordering::Less => false,
    };
    if empty {
        return Ok(Vec::new());
    }

    Ok(tuples
        .into_iter()
        .map(|t| {
            let mut l = t.clone();
            let mut h = t;
            l.push(low.value.clone());
            h.push(high.value.clone());
            IndexRange {
                low: l,
                high: h,
                low_exclude: low.exclude,
                high_exclude: high.exclude,
            }
        })
        .collect())
}
