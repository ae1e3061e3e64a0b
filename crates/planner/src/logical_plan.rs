use rill_common::Value;
use serde::{Deserialize, Serialize};

/// Sort direction with its comparison multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn multiplier(self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }
}

/// Scope-unresolved plan produced by the SQL frontend.
///
/// Names are still the query's spelling; the typechecker resolves them
/// against datasource schemas and lowers the tree into the typed physical
/// plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    Datasource {
        name: String,
        alias: Option<String>,
    },
    Filter {
        predicate: LogicalExpr,
        source: Box<LogicalPlan>,
    },
    Map {
        /// `(expression, output alias)`; a missing alias derives the output
        /// name from the expression.
        expressions: Vec<(LogicalExpr, Option<String>)>,
        source: Box<LogicalPlan>,
    },
    Distinct {
        source: Box<LogicalPlan>,
    },
    GroupBy {
        key: Vec<LogicalExpr>,
        /// `(aggregate name, argument expression)`.
        aggregates: Vec<(String, LogicalExpr)>,
        source: Box<LogicalPlan>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        /// Equi-join key pairs `(left expr, right expr)`. Empty for lateral
        /// joins, where the right side re-evaluates per left record instead.
        on: Vec<(LogicalExpr, LogicalExpr)>,
        /// Right side closes over left-side columns; lowers to a lookup join.
        lateral: bool,
    },
    OrderBy {
        key: Vec<(LogicalExpr, Direction)>,
        source: Box<LogicalPlan>,
    },
    Limit {
        limit: usize,
        source: Box<LogicalPlan>,
    },
    /// Rename every field's qualifier prefix to a constant.
    Requalifier {
        qualifier: String,
        source: Box<LogicalPlan>,
    },
    /// One output record per element of the named list-typed field.
    Unnest {
        field: String,
        source: Box<LogicalPlan>,
    },
    TableValuedFunction {
        name: String,
        /// Arguments in call order; `None` names bind positionally against
        /// the function's signature.
        arguments: Vec<(Option<String>, TvfArgument)>,
    },
}

/// Argument of a table-valued function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TvfArgument {
    Expression(LogicalExpr),
    Table(Box<LogicalPlan>),
    /// Unevaluated column reference (for example a time column).
    Descriptor(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalExpr {
    Variable(String),
    Constant(Value),
    FunctionCall {
        name: String,
        arguments: Vec<LogicalExpr>,
    },
    And(Vec<LogicalExpr>),
    Or(Vec<LogicalExpr>),
    Coalesce(Vec<LogicalExpr>),
    Tuple(Vec<LogicalExpr>),
    Cast {
        expr: Box<LogicalExpr>,
        target: rill_common::Type,
    },
    /// Correlated scalar subquery.
    Subquery(Box<LogicalPlan>),
}

impl LogicalExpr {
    /// Output name a projection derives when no alias is given.
    pub fn derived_name(&self) -> Option<&str> {
        match self {
            LogicalExpr::Variable(name) => Some(rill_common::unqualified(name)),
            _ => None,
        }
    }
}
