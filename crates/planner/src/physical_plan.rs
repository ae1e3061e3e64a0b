//! The typed physical plan.
//!
//! Produced by the typechecker, consumed by the optimizer and by
//! materialization. Plans are immutable once constructed; every node carries
//! the schema of the stream it produces and every expression carries its
//! type.

use rill_common::{Schema, Type, Value};
use serde::{Deserialize, Serialize};

/// Condition under which a grouping operator emits its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Emit once, when the source ends.
    EndOfStream,
    /// Emit changed groups whenever a watermark arrives.
    Watermark,
    /// Emit changed groups every `n` input records.
    PerRecord(usize),
}

/// A typed physical plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub schema: Schema,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Datasource(Datasource),
    Filter(Filter),
    Map(Map),
    Distinct(Distinct),
    GroupBy(GroupBy),
    StreamJoin(StreamJoin),
    LookupJoin(LookupJoin),
    OrderBy(OrderBy),
    Limit(Limit),
    Requalifier(Requalifier),
    Unnest(Unnest),
    TableValuedFunction(TableValuedFunction),
}

/// Table scan, with predicates the optimizer pushed down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub name: String,
    /// Qualifier applied to the scanned fields.
    pub alias: String,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub source: Box<Node>,
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    pub source: Box<Node>,
    /// One expression per output schema field, in order.
    pub expressions: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distinct {
    pub source: Box<Node>,
}

/// Grouping/aggregation.
///
/// `aggregates[i]` names the registry entry evaluated over
/// `aggregate_expressions[i]`. The emitted key type equals the tuple type of
/// the key expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub source: Box<Node>,
    pub key: Vec<Expr>,
    pub aggregates: Vec<String>,
    pub aggregate_expressions: Vec<Expr>,
    pub trigger: Trigger,
}

/// Symmetric retraction-aware hash join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamJoin {
    pub left: Box<Node>,
    pub right: Box<Node>,
    pub left_key: Vec<Expr>,
    pub right_key: Vec<Expr>,
}

/// Per-record re-evaluation of `joined` under the outer record's variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupJoin {
    pub source: Box<Node>,
    pub joined: Box<Node>,
}

/// Batch sort. Only valid over a no-retractions input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub source: Box<Node>,
    pub key: Vec<Expr>,
    /// `+1` ascending, `-1` descending, one per key expression.
    pub direction_multipliers: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub source: Box<Node>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requalifier {
    pub source: Box<Node>,
    pub qualifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unnest {
    pub source: Box<Node>,
    /// Resolved field name of the list-typed column.
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableValuedFunction {
    pub name: String,
    pub arguments: Vec<(String, TvfArg)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TvfArg {
    Expression(Expr),
    Table(Box<Node>),
    /// Unevaluated column reference, resolved against the table argument.
    Descriptor(String),
}

impl Node {
    /// Direct child nodes, used by describe/optimizer traversals.
    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Datasource(_) => vec![],
            NodeKind::Filter(x) => vec![x.source.as_ref()],
            NodeKind::Map(x) => vec![x.source.as_ref()],
            NodeKind::Distinct(x) => vec![x.source.as_ref()],
            NodeKind::GroupBy(x) => vec![x.source.as_ref()],
            NodeKind::StreamJoin(x) => vec![x.left.as_ref(), x.right.as_ref()],
            NodeKind::LookupJoin(x) => vec![x.source.as_ref(), x.joined.as_ref()],
            NodeKind::OrderBy(x) => vec![x.source.as_ref()],
            NodeKind::Limit(x) => vec![x.source.as_ref()],
            NodeKind::Requalifier(x) => vec![x.source.as_ref()],
            NodeKind::Unnest(x) => vec![x.source.as_ref()],
            NodeKind::TableValuedFunction(x) => x
                .arguments
                .iter()
                .filter_map(|(_, arg)| match arg {
                    TvfArg::Table(t) => Some(t.as_ref()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A typed physical expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub typ: Type,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Reference to a uniquified field name. `is_outer` marks a reference to
    /// an enclosing scope (correlated subplans).
    Variable { name: String, is_outer: bool },
    Constant(Value),
    FunctionCall { name: String, arguments: Vec<Expr> },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Coalesce(Vec<Expr>),
    Tuple(Vec<Expr>),
    /// Runtime check that the operand inhabits `typ`; fails the query
    /// otherwise.
    TypeAssertion(Box<Expr>),
    /// Correlated subplan evaluated to a single scalar per input record.
    Query(Box<Node>),
}

impl Expr {
    pub fn constant(value: Value) -> Self {
        Expr {
            typ: Type::of(&value),
            kind: ExprKind::Constant(value),
        }
    }

    pub fn variable(name: impl Into<String>, typ: Type) -> Self {
        Expr {
            typ,
            kind: ExprKind::Variable {
                name: name.into(),
                is_outer: false,
            },
        }
    }
}
