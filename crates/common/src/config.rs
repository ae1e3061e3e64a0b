use crate::error::{Result, RillError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One table entry of the configuration file, consumed by the storage
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Provider format name (`csv`, `jsonl`).
    pub format: String,
    /// File path or provider-specific locator.
    pub uri: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// One external database entry. Consumed by the plugin layer; the core only
/// references these for datasource resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Semver constraint, passed through to the plugin layer.
    #[serde(default)]
    pub version: Option<String>,
    /// Opaque provider configuration.
    #[serde(default)]
    pub config: serde_yaml::Value,
}

/// Engine/session configuration shared across planner and runtime layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on rows a single lookup-join probe may produce before the
    /// lookup is declared non-terminating.
    pub lookup_row_limit: usize,
    /// Default re-read interval for `poll` when the query does not pass one.
    pub default_poll_interval_ms: u64,
    pub tables: Vec<TableConfig>,
    pub databases: Vec<DatabaseConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookup_row_limit: 1_000_000,
            default_poll_interval_ms: 1_000,
            tables: Vec::new(),
            databases: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&text).map_err(|e| {
            RillError::Datasource(format!(
                "couldn't parse config file {}: {e}",
                path.as_ref().display()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.lookup_row_limit, 1_000_000);
        assert!(cfg.tables.is_empty());
    }

    #[test]
    fn parse_yaml() {
        let cfg: EngineConfig = serde_yaml::from_str(
            r#"
lookup_row_limit: 10
tables:
  - name: trades
    format: csv
    uri: ./trades.csv
databases:
  - name: pg
    type: postgres
    version: ">=0.3"
    config:
      host: localhost
      port: 5432
"#,
        )
        .expect("parse");
        assert_eq!(cfg.lookup_row_limit, 10);
        assert_eq!(cfg.tables[0].format, "csv");
        assert_eq!(cfg.databases[0].kind, "postgres");
        assert_eq!(cfg.databases[0].version.as_deref(), Some(">=0.3"));
    }
}
