use rill_common::{Result, RillError, TableConfig};
use std::collections::HashMap;
use std::path::Path;

/// Catalog entry describing where a table's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    /// Provider format name (`csv`, `jsonl`).
    pub format: String,
    pub uri: String,
    pub options: HashMap<String, String>,
}

/// Name-to-definition catalog.
///
/// Unregistered names fall back to path resolution: a name that is an
/// existing file with a known extension becomes an implicit table, so
/// `SELECT * FROM "trades.csv"` works without configuration.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: HashMap<String, TableDef>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(tables: &[TableConfig]) -> Self {
        let mut catalog = Self::new();
        for t in tables {
            catalog.register_table(TableDef {
                name: t.name.clone(),
                format: t.format.clone(),
                uri: t.uri.clone(),
                options: t.options.clone(),
            });
        }
        catalog
    }

    /// Register a table, replacing any previous definition of the name.
    pub fn register_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Resolve a query-time table name.
    pub fn resolve(&self, name: &str) -> Result<TableDef> {
        if let Some(def) = self.tables.get(name) {
            return Ok(def.clone());
        }
        if let Some(format) = file_format(name) {
            if Path::new(name).is_file() {
                return Ok(TableDef {
                    name: name.to_string(),
                    format: format.to_string(),
                    uri: name.to_string(),
                    options: HashMap::new(),
                });
            }
        }
        Err(RillError::Datasource(format!("unknown table: {name}")))
    }
}

fn file_format(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?;
    match ext {
        "csv" => Some("csv"),
        "jsonl" | "ndjson" => Some("jsonl"),
        _ => None,
    }
}
