//! # Scalar Expressions and Schemas
//!
//! This module defines the row-level vocabulary shared by logical and physical plans:
//!
//! ## Column Identity (`ColumnRef`, `Schema`)
//! A column is identified by its (optional) table qualifier and name. Every plan node
//! exposes an ordered `Schema` of unique columns; required properties name columns,
//! and the optimizer resolves them against a child's schema by equality.
//!
//! ## Scalar Values (`ScalarValue`)
//! Constants that appear in predicates and range bounds. Values of different types can
//! be compared when a numeric interpretation exists; otherwise the comparison is an
//! evaluation error that aborts the compilation.
//!
//! ## Scalar Expressions (`Expr`)
//! Column references, correlated (outer-scope) column references, literals, operators,
//! function calls and flattened AND / OR lists. Selections carry their predicate as a
//! list of conjuncts, which is what range construction and pushdown split apart.

use crate::error::EvalError;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Reference to a column.
///
/// Two references denote the same column when qualifier and name are equal. Columns
/// produced by projections or aggregations carry no table qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.table {
            write!(f, "{}.{}", t, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Ordered output columns of a plan node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnRef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnRef>) -> Self {
        Self { columns }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Position of `col` in this schema.
    pub fn index_of(&self, col: &ColumnRef) -> Option<usize> {
        self.columns.iter().position(|c| c == col)
    }

    pub fn contains(&self, col: &ColumnRef) -> bool {
        self.index_of(col).is_some()
    }

    pub fn get(&self, idx: usize) -> Option<&ColumnRef> {
        self.columns.get(idx)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnRef> {
        self.columns.iter()
    }

    /// Concatenate two schemas (join output).
    pub fn merge(&self, other: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema { columns }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.columns.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Scalar value for expressions and range bounds.
///
/// Uses `OrderedFloat` for `f64` so that floating-point values can be used in
/// Eq/Hash comparisons (needed for memo keys and structural plan equality).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL value.
    Null,
    /// Boolean true/false.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point, wrapped in OrderedFloat for Eq/Hash support.
    Float64(OrderedFloat<f64>),
    /// UTF-8 string.
    Utf8(String),
    /// Date as days since Unix epoch (1970-01-01).
    Date(i32),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::Utf8(v) => write!(f, "'{}'", v),
            Self::Date(v) => write!(f, "DATE({})", v),
        }
    }
}

impl ScalarValue {
    pub fn float(v: f64) -> Self {
        Self::Float64(OrderedFloat(v))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric interpretation used for cross-type comparison.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(v.0),
            Self::Date(v) => Some(*v as f64),
            Self::Utf8(s) => s.trim().parse::<f64>().ok(),
            Self::Null => None,
        }
    }

    /// Evaluate the value as a boolean condition. NULL is false.
    pub fn to_bool(&self) -> Result<bool, EvalError> {
        match self {
            Self::Null => Ok(false),
            Self::Bool(b) => Ok(*b),
            Self::Int64(v) => Ok(*v != 0),
            Self::Float64(v) => Ok(v.0 != 0.0),
            Self::Date(_) => Ok(true),
            Self::Utf8(s) => s
                .trim()
                .parse::<f64>()
                .map(|v| v != 0.0)
                .map_err(|_| EvalError::NotBoolean(self.to_string())),
        }
    }

    /// Total comparison between two values. NULL sorts before everything.
    pub fn compare(&self, other: &ScalarValue) -> Result<Ordering, EvalError> {
        match (self, other) {
            (Self::Null, Self::Null) => Ok(Ordering::Equal),
            (Self::Null, _) => Ok(Ordering::Less),
            (_, Self::Null) => Ok(Ordering::Greater),
            (Self::Int64(a), Self::Int64(b)) => Ok(a.cmp(b)),
            (Self::Utf8(a), Self::Utf8(b)) => Ok(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Ok(a.cmp(b)),
            (Self::Date(_), Self::Utf8(_)) | (Self::Utf8(_), Self::Date(_)) => {
                Err(EvalError::Incomparable {
                    left: self.to_string(),
                    right: other.to_string(),
                })
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Ok(OrderedFloat(a).cmp(&OrderedFloat(b))),
                _ => Err(EvalError::Incomparable {
                    left: self.to_string(),
                    right: other.to_string(),
                }),
            },
        }
    }
}

/// Scalar expressions used in predicates, projections, join conditions and sort keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column of the node's input.
    Column(ColumnRef),
    /// Reference to a column of an enclosing query scope (correlated subquery).
    Correlated(ColumnRef),
    /// Constant literal value.
    Literal(ScalarValue),
    /// Binary operation (e.g., `a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., `NOT flag`, `-value`, `IS NULL`).
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Named function call (e.g., `UPPER(name)`, `ABS(value)`).
    Function { name: String, args: Vec<Expr> },
    /// Conjunction (AND) of multiple predicates, stored flat.
    And(Vec<Expr>),
    /// Disjunction (OR) of multiple predicates.
    Or(Vec<Expr>),
}

impl Expr {
    pub fn col(table: &str, name: &str) -> Expr {
        Expr::Column(ColumnRef::new(table, name))
    }

    pub fn lit(value: ScalarValue) -> Expr {
        Expr::Literal(value)
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(v))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    /// Return all input column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols, false);
        cols
    }

    /// Return all outer-scope column references in this expression.
    pub fn correlated_columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols, true);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>, correlated: bool) {
        match self {
            Expr::Column(c) => {
                if !correlated {
                    out.push(c)
                }
            }
            Expr::Correlated(c) => {
                if correlated {
                    out.push(c)
                }
            }
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out, correlated);
                right.collect_columns(out, correlated);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out, correlated),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out, correlated);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out, correlated);
                }
            }
        }
    }

    pub fn is_correlated(&self) -> bool {
        !self.correlated_columns().is_empty()
    }

    /// A compile-time constant: a literal with no column reference.
    pub fn as_constant(&self) -> Option<&ScalarValue> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Match `column op constant` (or `constant op column`, normalized so that the
    /// column is on the left).
    pub fn as_column_comparison(&self) -> Option<(&ColumnRef, BinaryOp, &ScalarValue)> {
        let Expr::BinaryOp { op, left, right } = self else {
            return None;
        };
        if !op.is_comparison() {
            return None;
        }
        match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), Expr::Literal(v)) => Some((c, *op, v)),
            (Expr::Literal(v), Expr::Column(c)) => Some((c, op.flip(), v)),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Correlated(c) => write!(f, "outer({})", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryOp { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::UnaryOp { op, operand } => write!(f, "{:?}({})", op, operand),
            Expr::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
            Expr::And(exprs) => {
                let parts: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(" AND "))
            }
            Expr::Or(exprs) => {
                let parts: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(" OR "))
            }
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    /// The operator obtained by swapping the operands (`1 < a` is `a > 1`).
    pub fn flip(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::LtEq => BinaryOp::GtEq,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::GtEq => BinaryOp::LtEq,
            other => *other,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types handled by the physical converter.
///
/// Semi joins keep only left columns. The `WithAux` variants emit every left row
/// together with an auxiliary existence marker column instead of filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    Semi,
    AntiSemi,
    SemiWithAux,
    AntiSemiWithAux,
}

impl JoinType {
    pub fn is_semi(&self) -> bool {
        matches!(
            self,
            JoinType::Semi | JoinType::AntiSemi | JoinType::SemiWithAux | JoinType::AntiSemiWithAux
        )
    }

    pub fn with_aux(&self) -> bool {
        matches!(self, JoinType::SemiWithAux | JoinType::AntiSemiWithAux)
    }

    pub fn is_anti(&self) -> bool {
        matches!(self, JoinType::AntiSemi | JoinType::AntiSemiWithAux)
    }
}

/// Equality condition between a left column and a right column of a join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EqualCondition {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Join conditions, already split by the upstream logical optimizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinConditions {
    pub equal: Vec<EqualCondition>,
    /// Conditions referencing only left columns.
    pub left: Vec<Expr>,
    /// Conditions referencing only right columns.
    pub right: Vec<Expr>,
    /// Remaining conditions referencing both sides.
    pub other: Vec<Expr>,
}

impl JoinConditions {
    pub fn on(equal: Vec<EqualCondition>) -> Self {
        Self {
            equal,
            ..Self::default()
        }
    }

    fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.left.iter().chain(self.right.iter()).chain(self.other.iter())
    }

    pub fn is_correlated(&self) -> bool {
        self.exprs().any(|e| e.is_correlated())
    }
}

/// Aggregate expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Expr,
    pub distinct: bool,
    pub mode: AggMode,
}

impl AggExpr {
    pub fn new(func: AggFunc, arg: Expr) -> Self {
        Self {
            func,
            arg,
            distinct: false,
            mode: AggMode::Complete,
        }
    }

    /// Number of intermediate columns produced by a partial aggregation.
    pub fn partial_width(&self) -> usize {
        match self.func {
            AggFunc::Avg => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    FirstRow,
}

/// Evaluation phase of an aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggMode {
    /// Consumes raw input rows and produces the final value.
    Complete,
    /// Consumes raw input rows and produces intermediate state (pushed to storage).
    Partial,
    /// Merges intermediate states into the final value.
    Final,
}

/// Sort key of an explicit ORDER BY.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub desc: bool,
}

impl SortKey {
    pub fn asc(expr: Expr) -> Self {
        Self { expr, desc: false }
    }

    pub fn desc(expr: Expr) -> Self {
        Self { expr, desc: true }
    }
}

/// Build side for hash joins: the child materialized into the hash table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildSide {
    Left,
    Right,
}
