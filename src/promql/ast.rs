use crate::model::Matcher;

/// Arithmetic/comparison/set binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eql,
    Neq,
    Lss,
    Gtr,
    Lte,
    Gte,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Eql | BinaryOp::Neq | BinaryOp::Lss | BinaryOp::Gtr | BinaryOp::Lte | BinaryOp::Gte)
    }

    pub fn is_set_op(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Unless)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

/// Aggregation operators (§4.D.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Stddev,
    Stdvar,
    Topk,
    Bottomk,
    CountValues,
    Quantile,
    Group,
}

impl AggOp {
    /// Ops eligible for pushdown to `storage.query_aggregate` per §4.D.4.
    pub fn pushdown_eligible(self) -> bool {
        matches!(
            self,
            AggOp::Sum | AggOp::Min | AggOp::Max | AggOp::Count | AggOp::Avg | AggOp::Stddev
                | AggOp::Stdvar | AggOp::Quantile
        )
    }
}

/// `by (labels)` includes only the listed labels in the group key;
/// `without (labels)` drops them (plus `__name__`). No clause behaves like
/// `without ()` — group by the full label set minus `__name__`.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub labels: Vec<String>,
    pub without: bool,
}

/// How two vectors are matched and what cardinality is permitted, attached to
/// a `Binary` node (§4.D.3a).
#[derive(Debug, Clone)]
pub struct VectorMatching {
    /// `true` for `on(...)`, `false` for `ignoring(...)` or no clause.
    pub on: bool,
    pub labels: Vec<String>,
    pub card: Cardinality,
}

impl Default for VectorMatching {
    fn default() -> Self {
        Self { on: false, labels: Vec::new(), card: Cardinality::OneToOne }
    }
}

#[derive(Debug, Clone)]
pub enum Cardinality {
    OneToOne,
    ManyToOne(Vec<String>),
    OneToMany(Vec<String>),
    ManyToMany,
}

/// Modifiers attached to a `Binary` node: the `bool` keyword and any vector
/// matching clause.
#[derive(Debug, Clone, Default)]
pub struct BinModifier {
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
}

/// `@` modifier: pins evaluation to a fixed timestamp rather than the query's
/// own `at`. Complex `@` handling (e.g. `@start()`/`@end()`) is out of scope
/// per the non-goals; only a fixed millisecond timestamp is modeled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtModifier(pub i64);

/// Offset/`@` carried by a selector or subquery.
#[derive(Debug, Clone, Default)]
pub struct SelectorModifiers {
    pub offset_ms: Option<i64>,
    pub at: Option<AtModifier>,
}

/// The AST. Every node owns its children uniquely; there is no subexpression
/// sharing (per the redesign note replacing `unique_ptr` chains with owning
/// tree values).
#[derive(Debug, Clone)]
pub enum Expr {
    NumberLiteral(f64),
    StringLiteral(String),
    VectorSelector {
        name: Option<String>,
        matchers: Vec<Matcher>,
        modifiers: SelectorModifiers,
    },
    MatrixSelector {
        name: Option<String>,
        matchers: Vec<Matcher>,
        range_ms: i64,
        modifiers: SelectorModifiers,
    },
    Paren(Box<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        modifier: BinModifier,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Aggregate {
        op: AggOp,
        expr: Box<Expr>,
        param: Option<Box<Expr>>,
        grouping: Grouping,
    },
    Subquery {
        expr: Box<Expr>,
        range_ms: i64,
        resolution_ms: Option<i64>,
        modifiers: SelectorModifiers,
    },
}

impl Expr {
    pub fn is_vector_selector(&self) -> bool {
        matches!(self, Expr::VectorSelector { .. })
    }
}
