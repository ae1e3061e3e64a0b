//! Shared vocabulary for the Rill streaming SQL engine.
//!
//! Architecture role:
//! - the tagged [`Value`] union and the [`Type`] lattice
//! - stream [`Schema`]s with event-time and no-retraction assertions
//! - the [`Record`]/[`StreamEvent`] data contract and the pull-based
//!   [`RecordStream`] trait
//! - the canonical error taxonomy and engine configuration
//!
//! Key modules:
//! - [`value`]
//! - [`types`]
//! - [`schema`]
//! - [`record`]
//! - [`error`]
//! - [`config`]

pub mod config;
pub mod error;
pub mod record;
pub mod schema;
pub mod types;
pub mod value;

pub use config::{DatabaseConfig, EngineConfig, TableConfig};
pub use error::{Result, RillError};
pub use record::{BoxedStream, CancelToken, Record, RecordStream, StreamEvent, TaskContext};
pub use schema::{unqualified, Schema, SchemaField, SchemaRef};
pub use types::{ObjectField, Type};
pub use value::Value;
