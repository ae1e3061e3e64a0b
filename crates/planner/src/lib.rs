//! Logical/physical planning stack for Rill SQL execution.
//!
//! Architecture role:
//! - SQL frontend translation into logical plans
//! - typechecking (name/scope resolution, uniquification) into the typed
//!   physical plan
//! - optimizer rewrites
//! - plan diagnostics (`DESCRIBE` / `--explain` DAGs)
//!
//! Key modules:
//! - [`sql_frontend`]
//! - [`typecheck`]
//! - [`physical_plan`]
//! - [`optimizer`]
//! - [`describe`]

pub mod describe;
pub mod logical_plan;
pub mod optimizer;
pub mod physical_plan;
pub mod sql_frontend;
pub mod typecheck;

pub use describe::{describe_expr, describe_node, GraphNode, SchemaDetail};
pub use logical_plan::{Direction, LogicalExpr, LogicalPlan, TvfArgument};
pub use optimizer::Optimizer;
pub use physical_plan::{Expr, ExprKind, Node, NodeKind, Trigger, TvfArg};
pub use sql_frontend::{sql_to_logical, statement_to_logical};
pub use typecheck::{
    typecheck, AggregateResolver, AggregateSignature, DatasourceResolver, Environment,
    FunctionResolver, TypedQuery,
};
