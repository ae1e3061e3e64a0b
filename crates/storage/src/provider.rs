use crate::catalog::TableDef;
use rill_common::{BoxedStream, Result, RillError, Schema};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An opened table: a typed schema plus the ability to start record scans.
///
/// A provider may be scanned multiple times (`poll` re-reads its table every
/// interval); each `scan` returns a fresh stream over the current data.
pub trait TableProvider: Send + Sync {
    fn schema(&self) -> &Schema;
    fn scan(&self) -> Result<BoxedStream>;
}

/// Opens providers for one format.
pub trait ProviderFactory: Send + Sync {
    fn open(&self, table: &TableDef) -> Result<Arc<dyn TableProvider>>;
}

/// Format-keyed registry of provider factories with per-table one-shot
/// initialization: the first opener constructs the provider while holding
/// the guard, concurrent plans share the same instance afterwards.
pub struct DatasourceRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
    opened: Mutex<HashMap<String, Arc<dyn TableProvider>>>,
}

impl DatasourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_format(
        &mut self,
        format: impl Into<String>,
        factory: Arc<dyn ProviderFactory>,
    ) {
        self.factories.insert(format.into(), factory);
    }

    /// Open (or reuse) the provider for a table definition.
    pub fn open_table(&self, table: &TableDef) -> Result<Arc<dyn TableProvider>> {
        let mut opened = self.opened.lock().expect("registry lock poisoned");
        if let Some(provider) = opened.get(&table.name) {
            return Ok(provider.clone());
        }
        let factory = self.factories.get(&table.format).ok_or_else(|| {
            RillError::Datasource(format!(
                "no provider registered for format {}",
                table.format
            ))
        })?;
        tracing::debug!(table = %table.name, format = %table.format, "opening datasource");
        let provider = factory.open(table)?;
        opened.insert(table.name.clone(), provider.clone());
        Ok(provider)
    }
}

impl Default for DatasourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::{RecordStream, StreamEvent, TaskContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmptyStream;

    impl RecordStream for EmptyStream {
        fn next(&mut self, _ctx: &TaskContext) -> Result<Option<StreamEvent>> {
            Ok(None)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct CountingFactory {
        opens: AtomicUsize,
    }

    struct StaticProvider {
        schema: Schema,
    }

    impl TableProvider for StaticProvider {
        fn schema(&self) -> &Schema {
            &self.schema
        }

        fn scan(&self) -> Result<BoxedStream> {
            Ok(Box::new(EmptyStream))
        }
    }

    impl ProviderFactory for CountingFactory {
        fn open(&self, _table: &TableDef) -> Result<Arc<dyn TableProvider>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StaticProvider {
                schema: Schema::batch(vec![]),
            }))
        }
    }

    #[test]
    fn open_is_one_shot_per_table() {
        let factory = Arc::new(CountingFactory {
            opens: AtomicUsize::new(0),
        });
        let mut registry = DatasourceRegistry::new();
        registry.register_format("static", factory.clone());
        let def = TableDef {
            name: "t".into(),
            format: "static".into(),
            uri: String::new(),
            options: HashMap::new(),
        };
        let a = registry.open_table(&def).expect("first open");
        let b = registry.open_table(&def).expect("second open");
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_format_fails() {
        let registry = DatasourceRegistry::new();
        let def = TableDef {
            name: "t".into(),
            format: "parquet".into(),
            uri: String::new(),
            options: HashMap::new(),
        };
        assert!(matches!(
            registry.open_table(&def),
            Err(RillError::Datasource(_))
        ));
    }
}
