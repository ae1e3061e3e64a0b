//! Streaming execution engine for Rill.
//!
//! Architecture role:
//! - pull-based record streams and the operator family (datasource, filter,
//!   map, distinct, group by, joins, sort/limit, requalifier, unnest,
//!   table-valued functions)
//! - expression evaluation over the function registry
//! - the aggregate registry with retraction-aware built-ins
//! - materialization of typed physical plans into executable trees
//! - output sinks (live/batch tables, append-only CSV/JSON, native wire)
//!
//! Key modules:
//! - [`nodes`] and the per-operator modules
//! - [`expressions`] / [`functions`] / [`aggregate`]
//! - [`materialize`]
//! - [`sink`]

pub mod aggregate;
pub mod datasource;
pub mod distinct;
pub mod expressions;
pub mod filter;
pub mod functions;
pub mod group_by;
pub mod group_key;
pub mod lookup_join;
pub mod map;
pub mod materialize;
pub mod nodes;
pub mod order_by;
pub mod requalifier;
pub mod sink;
pub mod stream_join;
pub mod table_valued;
pub mod unnest;
pub mod variables;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregate::{Aggregate, AggregateDescriptor, AggregateRegistry};
pub use expressions::Evaluator;
pub use functions::{FunctionRegistry, ScalarFunction};
pub use group_key::GroupKey;
pub use materialize::{materialize, ExecutionEnvironment};
pub use nodes::{BoxedNode, ExecNode, MemoryNode};
pub use sink::{
    run_query, CollectSink, EagerFormat, EagerSink, NativeMessage, NativeSink, QuerySink,
    SortSpec, TableSink,
};
pub use variables::Variables;
