//! The engine facade: parse, typecheck, optimize, materialize and drive a
//! query into an output sink.

use rill_common::{EngineConfig, Record, Result, RillError, Schema, TaskContext};
use rill_execution::sink::{EagerFormat, EagerSink, NativeSink, SortSpec, TableSink};
use rill_execution::{
    materialize, run_query, AggregateRegistry, CollectSink, ExecutionEnvironment,
    FunctionRegistry,
};
use rill_planner::describe::{describe_node, GraphNode, SchemaDetail};
use rill_planner::logical_plan::{Direction, LogicalExpr, LogicalPlan};
use rill_planner::typecheck::{DatasourceResolver, Environment};
use rill_planner::{sql_to_logical, typecheck, Node, Optimizer};
use rill_storage::{Catalog, CsvFactory, DatasourceRegistry, JsonlFactory, TableDef};
use std::io::Write;
use std::sync::Arc;

/// Requested output shape; table outputs absorb top-level ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSpec {
    LiveTable,
    BatchTable,
    Csv,
    Json,
    StreamNative,
}

impl OutputSpec {
    fn is_table(self) -> bool {
        matches!(self, OutputSpec::LiveTable | OutputSpec::BatchTable)
    }

    fn is_append_only(self) -> bool {
        matches!(self, OutputSpec::Csv | OutputSpec::Json)
    }
}

/// A typechecked, optimized query ready to execute.
#[derive(Debug)]
pub struct Prepared {
    node: Node,
    name_map: Vec<(String, String)>,
    sort: SortSpec,
    output: OutputSpec,
}

impl Prepared {
    pub fn schema(&self) -> &Schema {
        &self.node.schema
    }

    pub fn name_map(&self) -> &[(String, String)] {
        &self.name_map
    }

    /// Plan DAG for `DESCRIBE`/`--explain` rendering.
    pub fn describe(&self, detail: SchemaDetail) -> GraphNode {
        describe_node(&self.node, detail)
    }
}

pub struct Engine {
    config: EngineConfig,
    catalog: Catalog,
    datasources: Arc<DatasourceRegistry>,
    functions: Arc<FunctionRegistry>,
    aggregates: Arc<AggregateRegistry>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut datasources = DatasourceRegistry::new();
        datasources.register_format("csv", Arc::new(CsvFactory));
        datasources.register_format("jsonl", Arc::new(JsonlFactory));
        let catalog = Catalog::from_config(&config.tables);
        Self {
            config,
            catalog,
            datasources: Arc::new(datasources),
            functions: Arc::new(FunctionRegistry::with_builtins()),
            aggregates: Arc::new(AggregateRegistry::with_builtins()),
        }
    }

    /// Register a table, replacing any config-declared definition.
    pub fn register_table(&mut self, table: TableDef) {
        self.catalog.register_table(table);
    }

    /// Parse, typecheck and (optionally) optimize a query for the given
    /// output.
    pub fn prepare(&self, sql: &str, optimize: bool, output: OutputSpec) -> Result<Prepared> {
        let logical = sql_to_logical(sql)?;
        let (logical, sort_keys, limit) = if output.is_table() {
            peel_table_ordering(logical)?
        } else {
            (logical, vec![], None)
        };

        let resolver = SchemaLookup {
            catalog: &self.catalog,
            datasources: &self.datasources,
        };
        let env = Environment {
            datasources: &resolver,
            functions: self.functions.as_ref(),
            aggregates: self.aggregates.as_ref(),
        };
        let typed = typecheck(&logical, &env)?;
        let node = if optimize {
            Optimizer::new().optimize(typed.node)?
        } else {
            typed.node
        };
        tracing::debug!(output = ?output, schema = %node.schema, "query prepared");

        let sort = resolve_sort_spec(&node.schema, &sort_keys, limit)?;
        if output.is_append_only() && !node.schema.no_retractions {
            return Err(RillError::Unsupported(
                "append-only output over a stream that may retract; use a table output"
                    .to_string(),
            ));
        }
        Ok(Prepared {
            node,
            name_map: typed.name_map,
            sort,
            output,
        })
    }

    fn execution_environment(&self) -> ExecutionEnvironment {
        ExecutionEnvironment {
            functions: self.functions.clone(),
            aggregates: self.aggregates.clone(),
            catalog: Arc::new(self.catalog.clone()),
            datasources: self.datasources.clone(),
            config: self.config.clone(),
        }
    }

    /// Materialize and drive the prepared query, writing to `out`.
    pub fn execute(
        &self,
        prepared: &Prepared,
        ctx: &TaskContext,
        out: &mut dyn Write,
    ) -> Result<()> {
        let env = self.execution_environment();
        let root = materialize(&prepared.node, &env)?;
        let schema = Arc::new(prepared.node.schema.clone());
        match prepared.output {
            OutputSpec::LiveTable => {
                let mut sink = TableSink::live(schema, prepared.sort.clone(), out);
                run_query(root.as_ref(), ctx, &mut sink)
            }
            OutputSpec::BatchTable => {
                let mut sink = TableSink::batch(schema, prepared.sort.clone(), out);
                run_query(root.as_ref(), ctx, &mut sink)
            }
            OutputSpec::Csv => {
                let mut sink = EagerSink::new(&prepared.node.schema, EagerFormat::Csv, out)?;
                run_query(root.as_ref(), ctx, &mut sink)
            }
            OutputSpec::Json => {
                let mut sink = EagerSink::new(&prepared.node.schema, EagerFormat::Json, out)?;
                run_query(root.as_ref(), ctx, &mut sink)
            }
            OutputSpec::StreamNative => {
                let mut sink = NativeSink::new(schema, out);
                run_query(root.as_ref(), ctx, &mut sink)
            }
        }
    }

    /// Run a query to completion and collect its records. Convenience for
    /// embedding and tests; bypasses output gating.
    pub fn collect(&self, sql: &str) -> Result<(Schema, Vec<Record>)> {
        let logical = sql_to_logical(sql)?;
        let resolver = SchemaLookup {
            catalog: &self.catalog,
            datasources: &self.datasources,
        };
        let env = Environment {
            datasources: &resolver,
            functions: self.functions.as_ref(),
            aggregates: self.aggregates.as_ref(),
        };
        let typed = typecheck(&logical, &env)?;
        let node = Optimizer::new().optimize(typed.node)?;
        let exec_env = self.execution_environment();
        let root = materialize(&node, &exec_env)?;
        let mut sink = CollectSink::default();
        run_query(root.as_ref(), &TaskContext::default(), &mut sink)?;
        Ok((node.schema, sink.records))
    }
}

/// Typecheck-time schema resolution over the catalog: opening the provider
/// yields the authoritative field list.
struct SchemaLookup<'a> {
    catalog: &'a Catalog,
    datasources: &'a DatasourceRegistry,
}

impl DatasourceResolver for SchemaLookup<'_> {
    fn table_schema(&self, name: &str) -> Result<Schema> {
        let def = self.catalog.resolve(name).map_err(|e| match e {
            // Unknown tables are a typecheck failure, not an I/O failure.
            RillError::Datasource(msg) => RillError::Type(msg),
            other => other,
        })?;
        let provider = self.datasources.open_table(&def)?;
        Ok(provider.schema().clone())
    }
}

/// Strip top-level LIMIT/ORDER BY into the table sink's sort spec. Only
/// plain column keys can be absorbed; anything else must be projected first.
fn peel_table_ordering(
    plan: LogicalPlan,
) -> Result<(LogicalPlan, Vec<(String, Direction)>, Option<usize>)> {
    let (limit, plan) = match plan {
        LogicalPlan::Limit { limit, source } => (Some(limit), *source),
        other => (None, other),
    };
    let (keys, plan) = match plan {
        LogicalPlan::OrderBy { key, source } => {
            let mut keys = Vec::with_capacity(key.len());
            for (expr, direction) in key {
                match expr {
                    LogicalExpr::Variable(name) => keys.push((name, direction)),
                    other => {
                        return Err(RillError::Unsupported(format!(
                            "ORDER BY expression {other:?} with a table output; project it under a name first"
                        )))
                    }
                }
            }
            (keys, *source)
        }
        other => (vec![], other),
    };
    Ok((plan, keys, limit))
}

fn resolve_sort_spec(
    schema: &Schema,
    keys: &[(String, Direction)],
    limit: Option<usize>,
) -> Result<SortSpec> {
    let mut key_indices = Vec::with_capacity(keys.len());
    let mut multipliers = Vec::with_capacity(keys.len());
    for (name, direction) in keys {
        let matches: Vec<usize> = schema
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == *name || f.unqualified() == name)
            .map(|(i, _)| i)
            .collect();
        let index = match matches.as_slice() {
            [i] => *i,
            [] => {
                return Err(RillError::Type(format!(
                    "ORDER BY column {name} is not in the output"
                )))
            }
            _ => return Err(RillError::ambiguous_name(name)),
        };
        key_indices.push(index);
        multipliers.push(direction.multiplier());
    }
    Ok(SortSpec {
        key_indices,
        multipliers,
        limit,
    })
}
