//! # Required Properties
//!
//! A `RequiredProperty` is what a parent demands from a child's output:
//!
//! - **Order**: an ordered list of `(column, desc)` pairs. The first `sort_key_len`
//!   entries must be delivered exactly, in order and direction. The remaining entries
//!   (the "tail") are don't-care columns: they only have to be present somewhere in the
//!   delivered order. Stream aggregation uses the tail for group-by columns whose
//!   position does not matter.
//! - **Limit**: an optional `LimitBound { offset, count }`. A limit bound means the
//!   parent will consume at most `count` rows after skipping `offset`.
//!
//! The empty property (no order, no limit) is the request at the root of the tree.
//! Properties are structural values used as memo keys.

use crate::expr::{ColumnRef, Schema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One ordering requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnProp {
    pub col: ColumnRef,
    pub desc: bool,
}

impl ColumnProp {
    pub fn asc(col: ColumnRef) -> Self {
        Self { col, desc: false }
    }

    pub fn desc(col: ColumnRef) -> Self {
        Self { col, desc: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitBound {
    pub offset: u64,
    pub count: u64,
}

impl LimitBound {
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// Rows a producer must deliver for the consumer to apply this bound.
    pub fn total(&self) -> u64 {
        self.offset.saturating_add(self.count)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequiredProperty {
    pub props: Vec<ColumnProp>,
    pub sort_key_len: usize,
    pub limit: Option<LimitBound>,
}

impl RequiredProperty {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Exact order on every column.
    pub fn ordered(props: Vec<ColumnProp>) -> Self {
        let sort_key_len = props.len();
        Self {
            props,
            sort_key_len,
            limit: None,
        }
    }

    pub fn limit_only(limit: Option<LimitBound>) -> Self {
        Self {
            props: Vec::new(),
            sort_key_len: 0,
            limit,
        }
    }

    pub fn with_limit(mut self, limit: Option<LimitBound>) -> Self {
        self.limit = limit;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.limit.is_none()
    }

    pub fn has_order(&self) -> bool {
        !self.props.is_empty()
    }

    /// Same order, no limit.
    pub fn remove_limit(&self) -> Self {
        Self {
            props: self.props.clone(),
            sort_key_len: self.sort_key_len,
            limit: None,
        }
    }

    /// Same order, limit widened to `(0, offset + count)`.
    ///
    /// Used where the consumer may drop rows after the child (outer joins, unions),
    /// so the child must not skip the offset itself.
    pub fn convert_limit_offset_to_count(&self) -> Self {
        Self {
            props: self.props.clone(),
            sort_key_len: self.sort_key_len,
            limit: self.limit.map(|l| LimitBound::new(0, l.total())),
        }
    }

    /// Whether every ordering column is part of `schema`.
    pub fn columns_in(&self, schema: &Schema) -> bool {
        self.props.iter().all(|p| schema.contains(&p.col))
    }

    pub fn is_descending(&self) -> bool {
        self.props.first().map(|p| p.desc).unwrap_or(false)
    }
}

impl fmt::Display for RequiredProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .props
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let dir = if p.desc { " desc" } else { "" };
                let tail = if i >= self.sort_key_len { "?" } else { "" };
                format!("{}{}{}", p.col, dir, tail)
            })
            .collect();
        write!(f, "[{}]", cols.join(", "))?;
        if let Some(l) = self.limit {
            write!(f, " limit {},{}", l.offset, l.count)?;
        }
        Ok(())
    }
}

/// Check that the order `delivered` satisfies `target`.
///
/// The first `target.sort_key_len` entries must match positionally, column and
/// direction. Every tail column of `target` must appear anywhere in `delivered`.
pub fn match_prop(target: &RequiredProperty, delivered: &RequiredProperty) -> bool {
    if target.props.len() > delivered.props.len() {
        return false;
    }
    let prefix = target.sort_key_len.min(target.props.len());
    if target.props[..prefix]
        .iter()
        .zip(delivered.props.iter())
        .any(|(t, d)| t != d)
    {
        return false;
    }
    target.props[prefix..]
        .iter()
        .all(|t| delivered.props.iter().any(|d| d.col == t.col))
}
