//! Datasource layer for Rill: the table catalog, the provider contract and
//! the built-in file providers.
//!
//! Key modules:
//! - [`catalog`]
//! - [`provider`]
//! - [`csv`]
//! - [`jsonl`]

pub mod catalog;
pub mod csv;
pub mod jsonl;
pub mod provider;

pub use catalog::{Catalog, TableDef};
pub use csv::{CsvFactory, CsvTable};
pub use jsonl::{JsonlFactory, JsonlTable};
pub use provider::{DatasourceRegistry, ProviderFactory, TableProvider};
