//! # Logical and Physical Plans
//!
//! ## Logical Plans
//!
//! `LogicalPlan` is the input of the physical search: a tree of closed `LogicalOp`
//! variants produced by the binder and the logical rewriter. Each node carries a
//! `NodeId` (the memo key), its output `Schema`, and whether it references columns of an
//! enclosing query scope. `PlanBuilder` assigns ids and derives schemas and correlation,
//! either through typed helpers or from an unannotated `PlanNode` tree (the JSON shape
//! accepted by the HTTP service).
//!
//! ## Physical Plans
//!
//! `PhysicalPlan` is the output: a tree of executable `PhysicalOp` variants, each node
//! annotated with its estimated row count. Plans are owned by their parent and cloned out
//! of the memo, never shared.
//!
//! Table and index scans are *distributable*: storage may evaluate pushed predicates,
//! limits, top-N and partial aggregations for them. The `add_*` methods record such
//! pushdowns on a scan at the top of a plan when the storage client supports them.

use crate::catalog::IndexInfo;
use crate::error::{OptimizerError, Result};
use crate::expr::*;
use crate::properties::{LimitBound, RequiredProperty};
use crate::pushdown::{RequestSubType, RequestType, StorageClient};
use crate::ranges::{IndexRange, TableRange};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Identifier of a logical plan node, unique within one tree.
pub type NodeId = u32;

/// A projection output item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionItem {
    pub expr: Expr,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ProjectionItem {
    pub fn column(table: &str, name: &str) -> Self {
        Self {
            expr: Expr::col(table, name),
            alias: None,
        }
    }

    pub fn named(expr: Expr, alias: &str) -> Self {
        Self {
            expr,
            alias: Some(alias.to_string()),
        }
    }

    /// Output column produced by this item.
    pub fn output(&self) -> ColumnRef {
        match (&self.expr, &self.alias) {
            (Expr::Column(c), None) => c.clone(),
            (_, Some(alias)) => ColumnRef::unqualified(alias.clone()),
            (expr, None) => ColumnRef::unqualified(expr.to_string()),
        }
    }
}

/// An aggregate function with its output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedAgg {
    pub agg: AggExpr,
    pub alias: String,
}

impl NamedAgg {
    pub fn new(agg: AggExpr, alias: &str) -> Self {
        Self {
            agg,
            alias: alias.to_string(),
        }
    }
}

/// Logical operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalOp {
    DataSource {
        table: TableRef,
        columns: Vec<String>,
        /// Restrict access paths to these indexes (no table scan) when non-empty.
        #[serde(default)]
        index_hints: Vec<String>,
    },
    Selection {
        conditions: Vec<Expr>,
    },
    Projection {
        items: Vec<ProjectionItem>,
    },
    Join {
        join_type: JoinType,
        conditions: JoinConditions,
    },
    Aggregation {
        group_by: Vec<Expr>,
        aggs: Vec<NamedAgg>,
    },
    Sort {
        by: Vec<SortKey>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
    Union,
    Distinct,
    /// Correlated join: the inner (right) child is re-evaluated per outer row.
    Apply {
        join_type: JoinType,
        conditions: Vec<Expr>,
    },
}

impl LogicalOp {
    pub fn kind(&self) -> &'static str {
        match self {
            LogicalOp::DataSource { .. } => "DataSource",
            LogicalOp::Selection { .. } => "Selection",
            LogicalOp::Projection { .. } => "Projection",
            LogicalOp::Join { .. } => "Join",
            LogicalOp::Aggregation { .. } => "Aggregation",
            LogicalOp::Sort { .. } => "Sort",
            LogicalOp::Limit { .. } => "Limit",
            LogicalOp::Union => "Union",
            LogicalOp::Distinct => "Distinct",
            LogicalOp::Apply { .. } => "Apply",
        }
    }

    fn arity_ok(&self, n: usize) -> bool {
        match self {
            LogicalOp::DataSource { .. } => n == 0,
            LogicalOp::Join { .. } | LogicalOp::Apply { .. } => n == 2,
            LogicalOp::Union => n >= 1,
            _ => n == 1,
        }
    }

    /// Scalar expressions owned by this operator.
    fn exprs(&self) -> Vec<&Expr> {
        match self {
            LogicalOp::DataSource { .. }
            | LogicalOp::Limit { .. }
            | LogicalOp::Union
            | LogicalOp::Distinct => Vec::new(),
            LogicalOp::Selection { conditions } | LogicalOp::Apply { conditions, .. } => {
                conditions.iter().collect()
            }
            LogicalOp::Projection { items } => items.iter().map(|i| &i.expr).collect(),
            LogicalOp::Join { conditions, .. } => conditions
                .left
                .iter()
                .chain(conditions.right.iter())
                .chain(conditions.other.iter())
                .collect(),
            LogicalOp::Aggregation { group_by, aggs } => group_by
                .iter()
                .chain(aggs.iter().map(|a| &a.agg.arg))
                .collect(),
            LogicalOp::Sort { by } => by.iter().map(|k| &k.expr).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalPlan {
    pub id: NodeId,
    pub op: LogicalOp,
    pub children: Vec<LogicalPlan>,
    pub schema: Schema,
    pub correlated: bool,
}

impl LogicalPlan {
    pub fn child(&self, idx: usize) -> Result<&LogicalPlan> {
        self.children.get(idx).ok_or_else(|| {
            OptimizerError::InvalidPlan(format!(
                "{} node {} has no child {}",
                self.op.kind(),
                self.id,
                idx
            ))
        })
    }

    /// Check that node ids are unique and every node has the right number of children.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        self.validate_into(&mut seen)
    }

    fn validate_into(&self, seen: &mut HashSet<NodeId>) -> Result<()> {
        if !seen.insert(self.id) {
            return Err(OptimizerError::InvalidPlan(format!(
                "duplicate node id {}",
                self.id
            )));
        }
        if !self.op.arity_ok(self.children.len()) {
            return Err(OptimizerError::InvalidPlan(format!(
                "{} node {} has {} children",
                self.op.kind(),
                self.id,
                self.children.len()
            )));
        }
        self.children.iter().try_for_each(|c| c.validate_into(seen))
    }

    /// Outer-scope columns referenced in this subtree and not bound inside it.
    pub fn outer_references(&self) -> Vec<ColumnRef> {
        fn push(c: &ColumnRef, refs: &mut Vec<ColumnRef>) {
            if !refs.contains(c) {
                refs.push(c.clone());
            }
        }
        let mut refs: Vec<ColumnRef> = Vec::new();
        for e in self.op.exprs() {
            for c in e.correlated_columns() {
                push(c, &mut refs);
            }
        }
        match (&self.op, self.children.as_slice()) {
            (LogicalOp::Apply { .. }, [outer, inner]) => {
                for c in outer.outer_references() {
                    push(&c, &mut refs);
                }
                for c in inner.outer_references() {
                    if !outer.schema.contains(&c) {
                        push(&c, &mut refs);
                    }
                }
            }
            _ => {
                for child in &self.children {
                    for c in child.outer_references() {
                        push(&c, &mut refs);
                    }
                }
            }
        }
        refs
    }
}

/// An unannotated logical tree, as submitted by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub op: LogicalOp,
    #[serde(default)]
    pub children: Vec<PlanNode>,
}

/// Builds annotated logical plans.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    next_id: NodeId,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate a client-supplied tree.
    pub fn build(&mut self, node: PlanNode) -> Result<LogicalPlan> {
        if !node.op.arity_ok(node.children.len()) {
            return Err(OptimizerError::InvalidPlan(format!(
                "{} node has {} children",
                node.op.kind(),
                node.children.len()
            )));
        }
        let children = node
            .children
            .into_iter()
            .map(|c| self.build(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.finish(node.op, children))
    }

    fn finish(&mut self, op: LogicalOp, children: Vec<LogicalPlan>) -> LogicalPlan {
        let id = self.next_id;
        self.next_id += 1;
        let schema = derive_schema(id, &op, &children);
        let mut plan = LogicalPlan {
            id,
            op,
            children,
            schema,
            correlated: false,
        };
        plan.correlated = !plan.outer_references().is_empty();
        plan
    }

    pub fn scan(&mut self, table: TableRef, columns: &[&str]) -> LogicalPlan {
        self.scan_with_hints(table, columns, &[])
    }

    pub fn scan_with_hints(&mut self, table: TableRef, columns: &[&str], hints: &[&str]) -> LogicalPlan {
        let op = LogicalOp::DataSource {
            table,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            index_hints: hints.iter().map(|h| h.to_string()).collect(),
        };
        self.finish(op, Vec::new())
    }

    pub fn select(&mut self, child: LogicalPlan, conditions: Vec<Expr>) -> LogicalPlan {
        self.finish(LogicalOp::Selection { conditions }, vec![child])
    }

    pub fn project(&mut self, child: LogicalPlan, items: Vec<ProjectionItem>) -> LogicalPlan {
        self.finish(LogicalOp::Projection { items }, vec![child])
    }

    pub fn join(
        &mut self,
        join_type: JoinType,
        left: LogicalPlan,
        right: LogicalPlan,
        conditions: JoinConditions,
    ) -> LogicalPlan {
        self.finish(
            LogicalOp::Join {
                join_type,
                conditions,
            },
            vec![left, right],
        )
    }

    pub fn aggregate(&mut self, child: LogicalPlan, group_by: Vec<Expr>, aggs: Vec<NamedAgg>) -> LogicalPlan {
        self.finish(LogicalOp::Aggregation { group_by, aggs }, vec![child])
    }

    pub fn sort(&mut self, child: LogicalPlan, by: Vec<SortKey>) -> LogicalPlan {
        self.finish(LogicalOp::Sort { by }, vec![child])
    }

    pub fn limit(&mut self, child: LogicalPlan, offset: u64, count: u64) -> LogicalPlan {
        self.finish(LogicalOp::Limit { offset, count }, vec![child])
    }

    pub fn union(&mut self, children: Vec<LogicalPlan>) -> LogicalPlan {
        self.finish(LogicalOp::Union, children)
    }

    pub fn distinct(&mut self, child: LogicalPlan) -> LogicalPlan {
        self.finish(LogicalOp::Distinct, vec![child])
    }

    pub fn apply(
        &mut self,
        join_type: JoinType,
        outer: LogicalPlan,
        inner: LogicalPlan,
        conditions: Vec<Expr>,
    ) -> LogicalPlan {
        self.finish(
            LogicalOp::Apply {
                join_type,
                conditions,
            },
            vec![outer, inner],
        )
    }
}

fn aux_column(id: NodeId) -> ColumnRef {
    ColumnRef::unqualified(format!("aux_{}", id))
}

/// Output schema of a join-like node.
fn join_schema(id: NodeId, join_type: JoinType, left: &Schema, right: &Schema) -> Schema {
    match join_type {
        JoinType::Inner | JoinType::LeftOuter | JoinType::RightOuter => left.merge(right),
        JoinType::Semi | JoinType::AntiSemi => left.clone(),
        JoinType::SemiWithAux | JoinType::AntiSemiWithAux => {
            let mut s = left.clone();
            s.columns.push(aux_column(id));
            s
        }
    }
}

/// Output schema of an aggregation: plain group-by columns, then aggregate outputs.
pub fn aggregation_schema(group_by: &[Expr], aggs: &[NamedAgg]) -> Schema {
    let mut columns: Vec<ColumnRef> = Vec::new();
    for g in group_by {
        if let Expr::Column(c) = g {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }
    columns.extend(aggs.iter().map(|a| ColumnRef::unqualified(a.alias.clone())));
    Schema::new(columns)
}

fn derive_schema(id: NodeId, op: &LogicalOp, children: &[LogicalPlan]) -> Schema {
    let child_schema = |i: usize| {
        children
            .get(i)
            .map(|c| c.schema.clone())
            .unwrap_or_default()
    };
    match op {
        LogicalOp::DataSource { table, columns, .. } => Schema::new(
            columns
                .iter()
                .map(|c| ColumnRef::new(table.name.clone(), c.clone()))
                .collect(),
        ),
        LogicalOp::Projection { items } => Schema::new(items.iter().map(|i| i.output()).collect()),
        LogicalOp::Join { join_type, .. } | LogicalOp::Apply { join_type, .. } => {
            join_schema(id, *join_type, &child_schema(0), &child_schema(1))
        }
        LogicalOp::Aggregation { group_by, aggs } => aggregation_schema(group_by, aggs),
        LogicalOp::Selection { .. }
        | LogicalOp::Sort { .. }
        | LogicalOp::Limit { .. }
        | LogicalOp::Union
        | LogicalOp::Distinct => child_schema(0),
    }
}

/// What storage evaluates on behalf of a distributable scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushedDown {
    /// Encoded pushed predicate.
    pub predicate: Option<String>,
    pub conditions: Vec<Expr>,
    pub limit: Option<u64>,
    pub top_n: Vec<SortKey>,
    pub aggregation: Option<PushedAggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushedAggregation {
    pub group_by: Vec<Expr>,
    pub aggs: Vec<AggExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScan {
    pub table: TableRef,
    pub columns: Vec<String>,
    /// Handle column when the primary key is the row handle.
    pub pk_handle: Option<ColumnRef>,
    pub ranges: Vec<TableRange>,
    pub access_conditions: Vec<Expr>,
    pub pushdown: PushedDown,
    pub keep_order: bool,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexScan {
    pub table: TableRef,
    pub index: IndexInfo,
    pub index_columns: Vec<ColumnRef>,
    pub columns: Vec<String>,
    pub ranges: Vec<IndexRange>,
    pub access_conditions: Vec<Expr>,
    /// Leading index columns fixed to a single value by the ranges.
    pub eq_prefix: usize,
    pub pushdown: PushedDown,
    /// The index does not cover every output column and rows are fetched by handle.
    pub double_read: bool,
    pub keep_order: bool,
    pub desc: bool,
}

/// Physical operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalOp {
    TableScan(TableScan),
    IndexScan(IndexScan),
    /// Produces no rows.
    DummyScan,
    Selection {
        conditions: Vec<Expr>,
        /// Residual filter directly above a scan.
        on_table: bool,
    },
    Projection {
        items: Vec<ProjectionItem>,
    },
    HashJoin {
        join_type: JoinType,
        conditions: JoinConditions,
        build_side: BuildSide,
        concurrency: usize,
    },
    HashSemiJoin {
        join_type: JoinType,
        conditions: JoinConditions,
    },
    StreamAgg {
        group_by: Vec<Expr>,
        aggs: Vec<NamedAgg>,
    },
    HashAgg {
        group_by: Vec<Expr>,
        aggs: Vec<NamedAgg>,
        mode: AggMode,
    },
    Sort {
        by: Vec<SortKey>,
        exec_limit: Option<LimitBound>,
    },
    Limit {
        offset: u64,
        count: u64,
    },
    Union,
    Distinct,
    /// Materializes its uncorrelated child once for repeated Apply evaluations.
    Cache,
    Apply {
        join_type: JoinType,
        conditions: Vec<Expr>,
    },
}

impl PhysicalOp {
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::TableScan(_) => "TableScan",
            PhysicalOp::IndexScan(_) => "IndexScan",
            PhysicalOp::DummyScan => "DummyScan",
            PhysicalOp::Selection { .. } => "Selection",
            PhysicalOp::Projection { .. } => "Projection",
            PhysicalOp::HashJoin { .. } => "HashJoin",
            PhysicalOp::HashSemiJoin { .. } => "HashSemiJoin",
            PhysicalOp::StreamAgg { .. } => "StreamAgg",
            PhysicalOp::HashAgg { .. } => "HashAgg",
            PhysicalOp::Sort { .. } => "Sort",
            PhysicalOp::Limit { .. } => "Limit",
            PhysicalOp::Union => "Union",
            PhysicalOp::Distinct => "Distinct",
            PhysicalOp::Cache => "Cache",
            PhysicalOp::Apply { .. } => "Apply",
        }
    }

    fn describe(&self) -> String {
        fn list<T: std::fmt::Display>(items: &[T]) -> String {
            items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
        }
        fn keys(by: &[SortKey]) -> String {
            by.iter()
                .map(|k| format!("{}{}", k.expr, if k.desc { " desc" } else { "" }))
                .collect::<Vec<_>>()
                .join(", ")
        }
        fn pushed(p: &PushedDown) -> String {
            let mut s = String::new();
            if !p.conditions.is_empty() {
                let _ = write!(s, " pushed=[{}]", list(&p.conditions));
            }
            if !p.top_n.is_empty() {
                let _ = write!(s, " topn=[{}]", keys(&p.top_n));
            }
            if let Some(l) = p.limit {
                let _ = write!(s, " limit={}", l);
            }
            if p.aggregation.is_some() {
                s.push_str(" partial_agg");
            }
            s
        }
        match self {
            PhysicalOp::TableScan(ts) => format!(
                "TableScan {} ranges=[{}]{}{}",
                ts.table,
                list(&ts.ranges),
                if ts.keep_order {
                    if ts.desc { " keep_order desc" } else { " keep_order" }
                } else {
                    ""
                },
                pushed(&ts.pushdown)
            ),
            PhysicalOp::IndexScan(is) => format!(
                "IndexScan {}.{} ranges=[{}]{}{}{}",
                is.table,
                is.index.name,
                list(&is.ranges),
                if is.double_read { " double_read" } else { "" },
                if is.keep_order {
                    if is.desc { " keep_order desc" } else { " keep_order" }
                } else {
                    ""
                },
                pushed(&is.pushdown)
            ),
            PhysicalOp::Selection {
                conditions,
                on_table,
            } => format!(
                "Selection [{}]{}",
                list(conditions),
                if *on_table { " on_table" } else { "" }
            ),
            PhysicalOp::Projection { items } => {
                let outs: Vec<ColumnRef> = items.iter().map(|i| i.output()).collect();
                format!("Projection [{}]", list(&outs))
            }
            PhysicalOp::HashJoin {
                join_type,
                build_side,
                concurrency,
                conditions,
            } => format!(
                "HashJoin {:?} build={:?} concurrency={} eq={}",
                join_type,
                build_side,
                concurrency,
                conditions.equal.len()
            ),
            PhysicalOp::HashSemiJoin {
                join_type,
                conditions,
            } => format!("HashSemiJoin {:?} eq={}", join_type, conditions.equal.len()),
            PhysicalOp::StreamAgg { group_by, aggs } => format!(
                "StreamAgg group=[{}] aggs={}",
                list(group_by),
                aggs.len()
            ),
            PhysicalOp::HashAgg {
                group_by,
                aggs,
                mode,
            } => format!(
                "HashAgg {:?} group=[{}] aggs={}",
                mode,
                list(group_by),
                aggs.len()
            ),
            PhysicalOp::Sort { by, exec_limit } => match exec_limit {
                Some(l) => format!("Sort [{}] limit={},{}", keys(by), l.offset, l.count),
                None => format!("Sort [{}]", keys(by)),
            },
            PhysicalOp::Limit { offset, count } => format!("Limit {},{}", offset, count),
            PhysicalOp::Apply { join_type, .. } => format!("Apply {:?}", join_type),
            other => other.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub op: PhysicalOp,
    pub children: Vec<PhysicalPlan>,
    pub schema: Schema,
    pub correlated: bool,
    pub row_count: u64,
}

impl PhysicalPlan {
    pub fn leaf(op: PhysicalOp, schema: Schema, correlated: bool, row_count: u64) -> Self {
        Self {
            op,
            children: Vec::new(),
            schema,
            correlated,
            row_count,
        }
    }

    /// Place `op` on top of `child`, keeping the child's schema.
    pub fn wrap(op: PhysicalOp, child: PhysicalPlan, row_count: u64) -> Self {
        Self {
            schema: child.schema.clone(),
            correlated: child.correlated,
            op,
            children: vec![child],
            row_count,
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.op, PhysicalOp::DummyScan)
    }

    pub fn is_dist_scan(&self) -> bool {
        matches!(self.op, PhysicalOp::TableScan(_) | PhysicalOp::IndexScan(_))
    }

    fn request_type(&self) -> Option<RequestType> {
        match self.op {
            PhysicalOp::TableScan(_) => Some(RequestType::Select),
            PhysicalOp::IndexScan(_) => Some(RequestType::Index),
            _ => None,
        }
    }

    fn pushdown_mut(&mut self) -> Option<&mut PushedDown> {
        match &mut self.op {
            PhysicalOp::TableScan(ts) => Some(&mut ts.pushdown),
            PhysicalOp::IndexScan(is) => Some(&mut is.pushdown),
            _ => None,
        }
    }

    pub fn pushdown(&self) -> Option<&PushedDown> {
        match &self.op {
            PhysicalOp::TableScan(ts) => Some(&ts.pushdown),
            PhysicalOp::IndexScan(is) => Some(&is.pushdown),
            _ => None,
        }
    }

    pub fn is_double_read(&self) -> bool {
        matches!(&self.op, PhysicalOp::IndexScan(is) if is.double_read)
    }

    /// Push `limit` into a distributable scan. Returns whether it was pushed.
    pub fn add_limit(&mut self, client: &dyn StorageClient, limit: LimitBound) -> bool {
        let Some(req) = self.request_type() else {
            return false;
        };
        if !client.supports(req, RequestSubType::Limit) {
            return false;
        }
        let Some(pushed) = self.pushdown_mut() else {
            return false;
        };
        if pushed.aggregation.is_some() {
            return false;
        }
        let total = limit.total();
        pushed.limit = Some(pushed.limit.map_or(total, |l| l.min(total)));
        true
    }

    /// Push an ordered limit into a distributable scan.
    pub fn add_top_n(&mut self, client: &dyn StorageClient, prop: &RequiredProperty) -> bool {
        let Some(limit) = prop.limit else {
            return false;
        };
        let Some(req) = self.request_type() else {
            return false;
        };
        if !client.supports(req, RequestSubType::TopN) || !prop.columns_in(&self.schema) {
            return false;
        }
        let Some(pushed) = self.pushdown_mut() else {
            return false;
        };
        if pushed.aggregation.is_some() {
            return false;
        }
        pushed.top_n = prop
            .props
            .iter()
            .map(|p| SortKey {
                expr: Expr::Column(p.col.clone()),
                desc: p.desc,
            })
            .collect();
        pushed.limit = Some(limit.total());
        true
    }

    /// Push a partial aggregation into a distributable scan.
    ///
    /// On success the scan's schema becomes the partial schema (intermediate aggregate
    /// states followed by the group-by columns), which is also returned.
    pub fn add_aggregation(
        &mut self,
        client: &dyn StorageClient,
        group_by: &[Expr],
        aggs: &[NamedAgg],
    ) -> Option<Schema> {
        let req = self.request_type()?;
        if !client.supports(req, RequestSubType::GroupBy) {
            return None;
        }
        if aggs.iter().any(|a| a.agg.distinct || !client.supports_aggregate(&a.agg)) {
            return None;
        }
        if group_by.iter().any(|g| g.is_correlated()) {
            return None;
        }
        let mut columns = Vec::new();
        for a in aggs {
            for k in 0..a.agg.partial_width() {
                columns.push(ColumnRef::unqualified(format!("{}#partial{}", a.alias, k)));
            }
        }
        for g in group_by {
            match g {
                Expr::Column(c) => columns.push(c.clone()),
                other => columns.push(ColumnRef::unqualified(other.to_string())),
            }
        }
        let pushed = self.pushdown_mut()?;
        if pushed.limit.is_some() || !pushed.top_n.is_empty() {
            return None;
        }
        pushed.aggregation = Some(PushedAggregation {
            group_by: group_by.to_vec(),
            aggs: aggs
                .iter()
                .map(|a| AggExpr {
                    mode: AggMode::Partial,
                    ..a.agg.clone()
                })
                .collect(),
        });
        let schema = Schema::new(columns);
        self.schema = schema.clone();
        Some(schema)
    }

    /// Render the plan as an indented tree.
    pub fn display(&self) -> String {
        let mut out = String::new();
        self.display_into(&mut out, 0);
        out
    }

    fn display_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(
            out,
            "{}{} rows={}",
            "  ".repeat(depth),
            self.op.describe(),
            self.row_count
        );
        for child in &self.children {
            child.display_into(out, depth + 1);
        }
    }
}
