//! Lowers a logical plan into the typed physical plan.
//!
//! Name resolution walks an immutable scope chain passed by argument; field
//! names are uniquified with monotonically increasing counters so
//! identically-spelled columns at different scope levels never collide. The
//! public entry point is recoverable: internal assertion panics become a
//! returned type error.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rill_common::{unqualified, Result, RillError, Schema, SchemaField, Type};

use crate::logical_plan::{LogicalExpr, LogicalPlan, TvfArgument};
use crate::physical_plan::{self as physical, Expr, ExprKind, Node, NodeKind, Trigger, TvfArg};

/// Schema source for named tables.
pub trait DatasourceResolver {
    fn table_schema(&self, name: &str) -> Result<Schema>;
}

/// Output-type source for scalar functions; implemented over the execution
/// function registry.
pub trait FunctionResolver {
    fn function_type(&self, name: &str, args: &[Type]) -> Result<Type>;
}

/// Resolved aggregate: display name (used in output field naming) and output
/// type for the given argument type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSignature {
    pub display_name: String,
    pub output: Type,
}

/// Output-type source for aggregates; implemented over the execution
/// aggregate registry.
pub trait AggregateResolver {
    fn aggregate_type(&self, name: &str, arg: &Type) -> Result<AggregateSignature>;
}

/// Registries the typechecker resolves names against.
pub struct Environment<'a> {
    pub datasources: &'a dyn DatasourceResolver,
    pub functions: &'a dyn FunctionResolver,
    pub aggregates: &'a dyn AggregateResolver,
}

/// One visible column: its query spelling, its uniquified physical name and
/// its type.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub original: String,
    pub unique: String,
    pub typ: Type,
}

/// Immutable scope chain. Lookup walks innermost-first; the first frame
/// containing the name wins; two matches within one frame are ambiguous.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    frame: Option<Arc<Frame>>,
}

#[derive(Debug)]
struct Frame {
    entries: Vec<ScopeEntry>,
    parent: Scope,
}

impl Scope {
    pub fn push(&self, entries: Vec<ScopeEntry>) -> Scope {
        Scope {
            frame: Some(Arc::new(Frame {
                entries,
                parent: self.clone(),
            })),
        }
    }

    /// Resolve a (possibly qualified) name. Returns the entry and its frame
    /// depth (0 = innermost).
    fn lookup(&self, name: &str) -> Result<Option<(ScopeEntry, usize)>> {
        let qualified = name.contains('.');
        let mut level = 0usize;
        let mut current = self;
        while let Some(frame) = &current.frame {
            let mut found: Option<&ScopeEntry> = None;
            for entry in &frame.entries {
                let hit = if qualified {
                    entry.original == name
                } else {
                    unqualified(&entry.original) == name
                };
                if hit {
                    if found.is_some() {
                        return Err(RillError::ambiguous_name(name));
                    }
                    found = Some(entry);
                }
            }
            if let Some(entry) = found {
                return Ok(Some((entry.clone(), level)));
            }
            current = &frame.parent;
            level += 1;
        }
        Ok(None)
    }
}

/// Successfully typechecked query.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedQuery {
    pub node: Node,
    /// `original name -> uniquified name`, in creation order.
    pub name_map: Vec<(String, String)>,
}

/// Typecheck a logical plan against the environment.
///
/// Recoverable: internal assertion panics are caught at this boundary and
/// returned as [`RillError::Type`] without corrupting caller state.
pub fn typecheck(plan: &LogicalPlan, env: &Environment) -> Result<TypedQuery> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut checker = Typechecker {
            env,
            names: NameGenerator::default(),
            name_map: Vec::new(),
        };
        let (node, _) = checker.check_node(plan, &Scope::default())?;
        Ok(TypedQuery {
            node,
            name_map: checker.name_map,
        })
    }));
    match outcome {
        Ok(Ok(typed)) => {
            tracing::debug!(
                fields = typed.node.schema.fields.len(),
                names = typed.name_map.len(),
                "typecheck complete"
            );
            Ok(typed)
        }
        Ok(Err(e)) => Err(e),
        Err(payload) => Err(RillError::Type(format!(
            "internal typecheck failure: {}",
            panic_message(&payload)
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[derive(Default)]
struct NameGenerator {
    used: HashMap<String, u64>,
}

impl NameGenerator {
    fn unique(&mut self, base: &str) -> String {
        let counter = self.used.entry(base.to_string()).or_insert(0);
        let name = if *counter == 0 {
            base.to_string()
        } else {
            format!("{base}#{counter}")
        };
        *counter += 1;
        name
    }
}

struct Typechecker<'a> {
    env: &'a Environment<'a>,
    names: NameGenerator,
    name_map: Vec<(String, String)>,
}

impl Typechecker<'_> {
    /// Source-level field: uniquified against every name the query has
    /// produced, so identically-spelled columns at different scope levels
    /// never collide.
    fn field(&mut self, original: String, typ: Type) -> (SchemaField, ScopeEntry) {
        let unique = self.names.unique(&original);
        self.name_map.push((original.clone(), unique.clone()));
        (
            SchemaField::new(unique.clone(), typ.clone()),
            ScopeEntry {
                original,
                unique,
                typ,
            },
        )
    }

    /// Derived output field (Map/GroupBy): keeps its plain spelling and only
    /// deduplicates within its own frame. Derived frames replace their
    /// source frame in scope, so plain names cannot leak across levels
    /// without passing through a requalifier.
    fn output_field(
        &mut self,
        used: &mut std::collections::HashSet<String>,
        base: String,
        typ: Type,
    ) -> (SchemaField, ScopeEntry) {
        let mut unique = base.clone();
        let mut counter = 1u64;
        while !used.insert(unique.clone()) {
            unique = format!("{base}#{counter}");
            counter += 1;
        }
        self.name_map.push((base, unique.clone()));
        (
            SchemaField::new(unique.clone(), typ.clone()),
            ScopeEntry {
                original: unique.clone(),
                unique,
                typ,
            },
        )
    }

    /// Returns the physical node together with the scope entries its output
    /// fields contribute.
    fn check_node(
        &mut self,
        plan: &LogicalPlan,
        scope: &Scope,
    ) -> Result<(Node, Vec<ScopeEntry>)> {
        match plan {
            LogicalPlan::Datasource { name, alias } => {
                let table_schema = self.env.datasources.table_schema(name)?;
                let qualifier = alias.clone().unwrap_or_else(|| name.clone());
                let mut fields = Vec::with_capacity(table_schema.fields.len());
                let mut entries = Vec::with_capacity(table_schema.fields.len());
                for f in &table_schema.fields {
                    let original = format!("{qualifier}.{}", f.unqualified());
                    let (field, entry) = self.field(original, f.typ.clone());
                    fields.push(field);
                    entries.push(entry);
                }
                let schema = Schema {
                    fields,
                    time_field: table_schema.time_field,
                    no_retractions: table_schema.no_retractions,
                };
                let node = Node {
                    schema,
                    kind: NodeKind::Datasource(physical::Datasource {
                        name: name.clone(),
                        alias: qualifier,
                        predicates: vec![],
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::Filter { predicate, source } => {
                let (src, entries) = self.check_node(source, scope)?;
                let src_scope = scope.push(entries.clone());
                let predicate = self.check_expr(predicate, &src_scope)?;
                ensure_boolean(&predicate.typ, "WHERE predicate")?;
                let node = Node {
                    schema: src.schema.clone(),
                    kind: NodeKind::Filter(physical::Filter {
                        source: Box::new(src),
                        predicate,
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::Map {
                expressions,
                source,
            } => {
                let (src, src_entries) = self.check_node(source, scope)?;
                let src_scope = scope.push(src_entries);
                let src_time_name = src
                    .schema
                    .time_field
                    .map(|i| src.schema.fields[i].name.clone());

                let mut exprs = Vec::with_capacity(expressions.len());
                let mut fields = Vec::with_capacity(expressions.len());
                let mut entries = Vec::with_capacity(expressions.len());
                let mut time_field = None;
                let mut used = std::collections::HashSet::new();
                for (i, (expr, alias)) in expressions.iter().enumerate() {
                    let pe = self.check_expr(expr, &src_scope)?;
                    let base = alias
                        .clone()
                        .or_else(|| expr.derived_name().map(str::to_string))
                        .unwrap_or_else(|| format!("col_{i}"));
                    if let ExprKind::Variable { name, .. } = &pe.kind {
                        if src_time_name.as_deref() == Some(name.as_str()) {
                            time_field = Some(i);
                        }
                    }
                    let (field, entry) = self.output_field(&mut used, base, pe.typ.clone());
                    fields.push(field);
                    entries.push(entry);
                    exprs.push(pe);
                }
                let schema = Schema {
                    fields,
                    time_field,
                    no_retractions: src.schema.no_retractions,
                };
                let node = Node {
                    schema,
                    kind: NodeKind::Map(physical::Map {
                        source: Box::new(src),
                        expressions: exprs,
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::Distinct { source } => {
                let (src, entries) = self.check_node(source, scope)?;
                let node = Node {
                    schema: src.schema.clone(),
                    kind: NodeKind::Distinct(physical::Distinct {
                        source: Box::new(src),
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::GroupBy {
                key,
                aggregates,
                source,
            } => self.check_group_by(key, aggregates, source, scope),

            LogicalPlan::Join {
                left,
                right,
                on,
                lateral,
            } => self.check_join(left, right, on, *lateral, scope),

            LogicalPlan::OrderBy { key, source } => {
                let (src, entries) = self.check_node(source, scope)?;
                if !src.schema.no_retractions {
                    return Err(RillError::Unsupported(
                        "ORDER BY over a retraction-carrying stream; use a table output".into(),
                    ));
                }
                let src_scope = scope.push(entries.clone());
                let mut key_exprs = Vec::with_capacity(key.len());
                let mut multipliers = Vec::with_capacity(key.len());
                for (expr, direction) in key {
                    key_exprs.push(self.check_expr(expr, &src_scope)?);
                    multipliers.push(direction.multiplier());
                }
                let node = Node {
                    schema: src.schema.clone(),
                    kind: NodeKind::OrderBy(physical::OrderBy {
                        source: Box::new(src),
                        key: key_exprs,
                        direction_multipliers: multipliers,
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::Limit { limit, source } => {
                let (src, entries) = self.check_node(source, scope)?;
                if !src.schema.no_retractions {
                    return Err(RillError::Unsupported(
                        "LIMIT is not supported on stream outputs".into(),
                    ));
                }
                let node = Node {
                    schema: src.schema.clone(),
                    kind: NodeKind::Limit(physical::Limit {
                        source: Box::new(src),
                        limit: *limit,
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::Requalifier { qualifier, source } => {
                let (src, src_entries) = self.check_node(source, scope)?;
                let mut fields = Vec::with_capacity(src_entries.len());
                let mut entries = Vec::with_capacity(src_entries.len());
                for entry in &src_entries {
                    let original = format!("{qualifier}.{}", unqualified(&entry.original));
                    let (field, entry) = self.field(original, entry.typ.clone());
                    fields.push(field);
                    entries.push(entry);
                }
                let schema = Schema {
                    fields,
                    time_field: src.schema.time_field,
                    no_retractions: src.schema.no_retractions,
                };
                let node = Node {
                    schema,
                    kind: NodeKind::Requalifier(physical::Requalifier {
                        source: Box::new(src),
                        qualifier: qualifier.clone(),
                    }),
                };
                Ok((node, entries))
            }

            LogicalPlan::Unnest { field, source } => {
                let (src, entries) = self.check_node(source, scope)?;
                self.finish_unnest(src, entries, field, scope)
            }

            LogicalPlan::TableValuedFunction { name, arguments } => {
                self.check_tvf(name, arguments, scope)
            }
        }
    }

    fn check_group_by(
        &mut self,
        key: &[LogicalExpr],
        aggregates: &[(String, LogicalExpr)],
        source: &LogicalPlan,
        scope: &Scope,
    ) -> Result<(Node, Vec<ScopeEntry>)> {
        let (src, src_entries) = self.check_node(source, scope)?;
        let src_scope = scope.push(src_entries);
        let src_time_name = src
            .schema
            .time_field
            .map(|i| src.schema.fields[i].name.clone());

        let mut key_exprs = Vec::with_capacity(key.len());
        let mut fields = Vec::new();
        let mut entries = Vec::new();
        let mut time_field = None;
        let mut used = std::collections::HashSet::new();
        for (i, expr) in key.iter().enumerate() {
            let pe = self.check_expr(expr, &src_scope)?;
            let base = expr
                .derived_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("key_{i}"));
            if let ExprKind::Variable { name, .. } = &pe.kind {
                if src_time_name.as_deref() == Some(name.as_str()) {
                    time_field = Some(i);
                }
            }
            let (field, entry) = self.output_field(&mut used, base, pe.typ.clone());
            fields.push(field);
            entries.push(entry);
            key_exprs.push(pe);
        }

        let mut agg_names = Vec::with_capacity(aggregates.len());
        let mut agg_exprs = Vec::with_capacity(aggregates.len());
        for (agg_name, arg) in aggregates {
            let arg_expr = self.check_expr(arg, &src_scope)?;
            let signature = self
                .env
                .aggregates
                .aggregate_type(agg_name, &arg_expr.typ)?;
            let base = match &arg_expr.kind {
                ExprKind::Variable { name, .. } => {
                    format!(
                        "{}_{}",
                        strip_counter(unqualified(name)),
                        signature.display_name
                    )
                }
                _ => signature.display_name.clone(),
            };
            let (field, entry) = self.output_field(&mut used, base, signature.output.clone());
            fields.push(field);
            entries.push(entry);
            agg_names.push(agg_name.clone());
            agg_exprs.push(arg_expr);
        }

        let trigger = if src.schema.no_retractions {
            Trigger::EndOfStream
        } else if time_field.is_some() {
            Trigger::Watermark
        } else {
            Trigger::PerRecord(1)
        };
        let schema = Schema {
            fields,
            time_field,
            no_retractions: src.schema.no_retractions,
        };
        let node = Node {
            schema,
            kind: NodeKind::GroupBy(physical::GroupBy {
                source: Box::new(src),
                key: key_exprs,
                aggregates: agg_names,
                aggregate_expressions: agg_exprs,
                trigger,
            }),
        };
        Ok((node, entries))
    }

    fn check_join(
        &mut self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        on: &[(LogicalExpr, LogicalExpr)],
        lateral: bool,
        scope: &Scope,
    ) -> Result<(Node, Vec<ScopeEntry>)> {
        let (l, l_entries) = self.check_node(left, scope)?;
        if lateral {
            // The joined side re-evaluates per left record; left columns are
            // its outer scope.
            let l_scope = scope.push(l_entries.clone());
            let (r, r_entries) = self.check_node(right, &l_scope)?;
            if !on.is_empty() {
                return Err(RillError::Plan(
                    "lateral join carries no equi-join keys".into(),
                ));
            }
            let mut entries = l_entries;
            entries.extend(r_entries);
            let schema = joined_schema(&l.schema, &r.schema);
            let node = Node {
                schema,
                kind: NodeKind::LookupJoin(physical::LookupJoin {
                    source: Box::new(l),
                    joined: Box::new(r),
                }),
            };
            return Ok((node, entries));
        }

        let (r, r_entries) = self.check_node(right, scope)?;
        let l_scope = scope.push(l_entries.clone());
        let r_scope = scope.push(r_entries.clone());
        let mut left_key = Vec::with_capacity(on.len());
        let mut right_key = Vec::with_capacity(on.len());
        for (le, re) in on {
            // The query may spell the pair in either side order.
            let (lk, rk) = match (
                self.check_expr(le, &l_scope),
                self.check_expr(re, &r_scope),
            ) {
                (Ok(lk), Ok(rk)) => (lk, rk),
                (first, second) => {
                    let swapped_l = self.check_expr(re, &l_scope);
                    let swapped_r = self.check_expr(le, &r_scope);
                    match (swapped_l, swapped_r) {
                        (Ok(lk), Ok(rk)) => (lk, rk),
                        _ => {
                            first?;
                            second?;
                            unreachable!("one side must have failed")
                        }
                    }
                }
            };
            if lk.typ.meet(&rk.typ).is_empty() {
                return Err(RillError::Type(format!(
                    "join key type mismatch: {} vs {}",
                    lk.typ, rk.typ
                )));
            }
            left_key.push(lk);
            right_key.push(rk);
        }
        let mut entries = l_entries;
        entries.extend(r_entries);
        let schema = joined_schema(&l.schema, &r.schema);
        let node = Node {
            schema,
            kind: NodeKind::StreamJoin(physical::StreamJoin {
                left: Box::new(l),
                right: Box::new(r),
                left_key,
                right_key,
            }),
        };
        Ok((node, entries))
    }

    fn finish_unnest(
        &mut self,
        src: Node,
        entries: Vec<ScopeEntry>,
        field: &str,
        scope: &Scope,
    ) -> Result<(Node, Vec<ScopeEntry>)> {
        let src_scope = scope.push(entries.clone());
        let (entry, _) = src_scope
            .lookup(field)?
            .ok_or_else(|| RillError::Type(format!("unknown column: {field}")))?;
        let element = match &entry.typ {
            Type::List(elem) => (**elem).clone(),
            Type::Tuple(members) => members
                .iter()
                .fold(Type::Union(vec![]), |acc, t| acc.join(t)),
            other => {
                return Err(RillError::Type(format!(
                    "UNNEST requires a list-typed column, got {other}"
                )))
            }
        };
        let index = src
            .schema
            .index_of(&entry.unique)
            .ok_or_else(|| RillError::Plan(format!("unnest field {} not in schema", entry.unique)))?;
        let mut schema = src.schema.clone();
        schema.fields[index].typ = element.clone();
        let mut entries = entries;
        entries[index].typ = element;
        let node = Node {
            schema,
            kind: NodeKind::Unnest(physical::Unnest {
                source: Box::new(src),
                field: entry.unique,
            }),
        };
        Ok((node, entries))
    }

    fn check_tvf(
        &mut self,
        name: &str,
        arguments: &[(Option<String>, TvfArgument)],
        scope: &Scope,
    ) -> Result<(Node, Vec<ScopeEntry>)> {
        match name {
            "range" => {
                let mut bound = bind_arguments(name, arguments, &["start", "end"])?;
                let start = self.expr_argument(name, &mut bound, "start", &Type::Int, scope)?;
                let end = self.expr_argument(name, &mut bound, "end", &Type::Int, scope)?;
                let (field, entry) = self.field("range.i".to_string(), Type::Int);
                let node = Node {
                    schema: Schema::batch(vec![field]),
                    kind: NodeKind::TableValuedFunction(physical::TableValuedFunction {
                        name: name.to_string(),
                        arguments: vec![
                            ("start".into(), TvfArg::Expression(start)),
                            ("end".into(), TvfArg::Expression(end)),
                        ],
                    }),
                };
                Ok((node, vec![entry]))
            }

            "tumble" => {
                let mut bound =
                    bind_arguments(name, arguments, &["source", "time_field", "window_length"])?;
                let (child, child_entries) = self.table_argument(name, &mut bound, scope)?;
                let time_name =
                    self.descriptor_argument(name, &mut bound, "time_field", &child, &child_entries, scope)?;
                let window_length =
                    self.expr_argument(name, &mut bound, "window_length", &Type::Duration, scope)?;

                let mut fields = child.schema.fields.clone();
                let mut entries = child_entries;
                let (start_field, start_entry) = self.field("window_start".into(), Type::Time);
                let (end_field, end_entry) = self.field("window_end".into(), Type::Time);
                fields.push(start_field);
                fields.push(end_field);
                entries.push(start_entry);
                entries.push(end_entry);
                let time_field = Some(fields.len() - 1);
                let schema = Schema {
                    fields,
                    time_field,
                    no_retractions: child.schema.no_retractions,
                };
                let node = Node {
                    schema,
                    kind: NodeKind::TableValuedFunction(physical::TableValuedFunction {
                        name: name.to_string(),
                        arguments: vec![
                            ("source".into(), TvfArg::Table(Box::new(child))),
                            ("time_field".into(), TvfArg::Descriptor(time_name)),
                            ("window_length".into(), TvfArg::Expression(window_length)),
                        ],
                    }),
                };
                Ok((node, entries))
            }

            "poll" => {
                let mut bound = bind_arguments(name, arguments, &["source", "interval"])?;
                let (child, entries) = self.table_argument(name, &mut bound, scope)?;
                let interval = match bound.remove("interval") {
                    Some(TvfArgument::Expression(e)) => {
                        Some(self.checked_expr_of_type(&e, &Type::Duration, "poll interval", scope)?)
                    }
                    Some(_) => {
                        return Err(RillError::Type(
                            "poll interval must be an expression".into(),
                        ))
                    }
                    None => None,
                };
                let mut schema = child.schema.clone();
                schema.no_retractions = false;
                schema.time_field = None;
                let mut arguments = vec![("source".to_string(), TvfArg::Table(Box::new(child)))];
                if let Some(interval) = interval {
                    arguments.push(("interval".into(), TvfArg::Expression(interval)));
                }
                let node = Node {
                    schema,
                    kind: NodeKind::TableValuedFunction(physical::TableValuedFunction {
                        name: name.to_string(),
                        arguments,
                    }),
                };
                Ok((node, entries))
            }

            "max_diff_watermark" => {
                let mut bound =
                    bind_arguments(name, arguments, &["source", "time_field", "max_diff"])?;
                let (child, entries) = self.table_argument(name, &mut bound, scope)?;
                let time_name =
                    self.descriptor_argument(name, &mut bound, "time_field", &child, &entries, scope)?;
                let max_diff =
                    self.expr_argument(name, &mut bound, "max_diff", &Type::Duration, scope)?;
                let index = child.schema.index_of(&time_name).ok_or_else(|| {
                    RillError::Plan(format!("descriptor {time_name} not in schema"))
                })?;
                let mut schema = child.schema.clone();
                schema.time_field = Some(index);
                let node = Node {
                    schema,
                    kind: NodeKind::TableValuedFunction(physical::TableValuedFunction {
                        name: name.to_string(),
                        arguments: vec![
                            ("source".into(), TvfArg::Table(Box::new(child))),
                            ("time_field".into(), TvfArg::Descriptor(time_name)),
                            ("max_diff".into(), TvfArg::Expression(max_diff)),
                        ],
                    }),
                };
                Ok((node, entries))
            }

            // unnest is surfaced through TVF syntax but lowers to its own
            // node kind.
            "unnest" => {
                let mut bound = bind_arguments(name, arguments, &["source", "field"])?;
                let (child, entries) = self.table_argument(name, &mut bound, scope)?;
                let field = match bound.remove("field") {
                    Some(TvfArgument::Descriptor(d)) => d,
                    Some(TvfArgument::Expression(LogicalExpr::Variable(v))) => v,
                    _ => {
                        return Err(RillError::Type(
                            "unnest field must be a column descriptor".into(),
                        ))
                    }
                };
                self.finish_unnest(child, entries, &field, scope)
            }

            other => Err(RillError::Type(format!(
                "unknown table-valued function: {other}"
            ))),
        }
    }

    fn table_argument(
        &mut self,
        tvf: &str,
        bound: &mut HashMap<String, TvfArgument>,
        scope: &Scope,
    ) -> Result<(Node, Vec<ScopeEntry>)> {
        match bound.remove("source") {
            Some(TvfArgument::Table(plan)) => self.check_node(&plan, scope),
            Some(_) => Err(RillError::Type(format!(
                "{tvf} source must be a table argument"
            ))),
            None => Err(RillError::Type(format!("{tvf} requires a source table"))),
        }
    }

    fn expr_argument(
        &mut self,
        tvf: &str,
        bound: &mut HashMap<String, TvfArgument>,
        param: &str,
        expected: &Type,
        scope: &Scope,
    ) -> Result<Expr> {
        match bound.remove(param) {
            Some(TvfArgument::Expression(e)) => {
                self.checked_expr_of_type(&e, expected, &format!("{tvf} {param}"), scope)
            }
            Some(_) => Err(RillError::Type(format!(
                "{tvf} {param} must be an expression"
            ))),
            None => Err(RillError::Type(format!("{tvf} requires {param}"))),
        }
    }

    fn checked_expr_of_type(
        &mut self,
        expr: &LogicalExpr,
        expected: &Type,
        what: &str,
        scope: &Scope,
    ) -> Result<Expr> {
        let pe = self.check_expr(expr, scope)?;
        if !pe.typ.is_subtype_of(expected) {
            return Err(RillError::Type(format!(
                "{what} must be {expected}, got {}",
                pe.typ
            )));
        }
        Ok(pe)
    }

    /// Resolve a descriptor against the table argument's fields, defaulting
    /// to the child's event-time column.
    fn descriptor_argument(
        &mut self,
        tvf: &str,
        bound: &mut HashMap<String, TvfArgument>,
        param: &str,
        child: &Node,
        child_entries: &[ScopeEntry],
        scope: &Scope,
    ) -> Result<String> {
        match bound.remove(param) {
            Some(TvfArgument::Descriptor(name)) => {
                let child_scope = scope.push(child_entries.to_vec());
                let (entry, _) = child_scope
                    .lookup(&name)?
                    .ok_or_else(|| RillError::Type(format!("unknown column: {name}")))?;
                if !entry.typ.is_subtype_of(&Type::optional(Type::Time)) {
                    return Err(RillError::Type(format!(
                        "{tvf} {param} must name a Time column, got {}",
                        entry.typ
                    )));
                }
                Ok(entry.unique)
            }
            Some(_) => Err(RillError::Type(format!(
                "{tvf} {param} must be a DESCRIPTOR(column) argument"
            ))),
            None => match child.schema.time_field {
                Some(i) => Ok(child.schema.fields[i].name.clone()),
                None => Err(RillError::Type(format!(
                    "{tvf} requires {param}: the source has no event-time column"
                ))),
            },
        }
    }

    fn check_expr(&mut self, expr: &LogicalExpr, scope: &Scope) -> Result<Expr> {
        match expr {
            LogicalExpr::Variable(name) => match scope.lookup(name)? {
                Some((entry, level)) => Ok(Expr {
                    typ: entry.typ,
                    kind: ExprKind::Variable {
                        name: entry.unique,
                        is_outer: level > 0,
                    },
                }),
                None => Err(RillError::Type(format!("unknown column: {name}"))),
            },
            LogicalExpr::Constant(value) => Ok(Expr::constant(value.clone())),
            LogicalExpr::FunctionCall { name, arguments } => {
                let args = arguments
                    .iter()
                    .map(|a| self.check_expr(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                let types: Vec<Type> = args.iter().map(|a| a.typ.clone()).collect();
                let typ = self.env.functions.function_type(name, &types)?;
                Ok(Expr {
                    typ,
                    kind: ExprKind::FunctionCall {
                        name: name.clone(),
                        arguments: args,
                    },
                })
            }
            LogicalExpr::And(args) => self.check_connective(args, scope, ExprKind::And, "AND"),
            LogicalExpr::Or(args) => self.check_connective(args, scope, ExprKind::Or, "OR"),
            LogicalExpr::Coalesce(args) => {
                let args = args
                    .iter()
                    .map(|a| self.check_expr(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                if args.is_empty() {
                    return Err(RillError::Type("COALESCE requires arguments".into()));
                }
                let joined = args
                    .iter()
                    .fold(Type::Union(vec![]), |acc, a| acc.join(&a.typ));
                // Nullable only when every branch can be null.
                let typ = if args.iter().all(|a| a.typ.is_nullable()) {
                    joined
                } else {
                    strip_null(&joined)
                };
                Ok(Expr {
                    typ,
                    kind: ExprKind::Coalesce(args),
                })
            }
            LogicalExpr::Tuple(args) => {
                let args = args
                    .iter()
                    .map(|a| self.check_expr(a, scope))
                    .collect::<Result<Vec<_>>>()?;
                let typ = Type::Tuple(args.iter().map(|a| a.typ.clone()).collect());
                Ok(Expr {
                    typ,
                    kind: ExprKind::Tuple(args),
                })
            }
            LogicalExpr::Cast { expr, target } => {
                let inner = self.check_expr(expr, scope)?;
                if inner.typ.is_subtype_of(target) {
                    return Ok(inner);
                }
                let narrowed = inner.typ.meet(target);
                if narrowed.is_empty() {
                    return Err(RillError::Type(format!(
                        "cannot assert {} as {target}",
                        inner.typ
                    )));
                }
                Ok(Expr {
                    typ: narrowed,
                    kind: ExprKind::TypeAssertion(Box::new(inner)),
                })
            }
            LogicalExpr::Subquery(plan) => {
                let (node, _) = self.check_node(plan, scope)?;
                if node.schema.fields.len() != 1 {
                    return Err(RillError::Type(format!(
                        "scalar subquery must return exactly one column, got {}",
                        node.schema.fields.len()
                    )));
                }
                let typ = Type::optional(node.schema.fields[0].typ.clone());
                Ok(Expr {
                    typ,
                    kind: ExprKind::Query(Box::new(node)),
                })
            }
        }
    }

    fn check_connective(
        &mut self,
        args: &[LogicalExpr],
        scope: &Scope,
        build: fn(Vec<Expr>) -> ExprKind,
        what: &str,
    ) -> Result<Expr> {
        let args = args
            .iter()
            .map(|a| self.check_expr(a, scope))
            .collect::<Result<Vec<_>>>()?;
        for a in &args {
            ensure_boolean(&a.typ, what)?;
        }
        let typ = if args.iter().any(|a| a.typ.is_nullable()) {
            Type::optional(Type::Boolean)
        } else {
            Type::Boolean
        };
        Ok(Expr {
            typ,
            kind: build(args),
        })
    }
}

/// Drop a trailing `#N` uniquifier so derived names stay readable.
fn strip_counter(name: &str) -> &str {
    match name.rsplit_once('#') {
        Some((base, counter)) if counter.chars().all(|c| c.is_ascii_digit()) => base,
        _ => name,
    }
}

fn ensure_boolean(typ: &Type, what: &str) -> Result<()> {
    if typ.is_subtype_of(&Type::optional(Type::Boolean)) {
        Ok(())
    } else {
        Err(RillError::Type(format!("{what} must be Boolean, got {typ}")))
    }
}

fn strip_null(typ: &Type) -> Type {
    match typ {
        Type::Union(members) => {
            let kept: Vec<Type> = members.iter().filter(|m| **m != Type::Null).cloned().collect();
            match kept.len() {
                0 => Type::Null,
                1 => kept.into_iter().next().expect("len checked"),
                _ => Type::Union(kept),
            }
        }
        other => other.clone(),
    }
}

fn joined_schema(left: &Schema, right: &Schema) -> Schema {
    let mut fields = left.fields.clone();
    fields.extend(right.fields.iter().cloned());
    Schema {
        fields,
        time_field: None,
        no_retractions: left.no_retractions && right.no_retractions,
    }
}

/// Bind call-order arguments against a signature's parameter names. Unnamed
/// arguments fill the leftmost unbound parameter.
fn bind_arguments(
    tvf: &str,
    arguments: &[(Option<String>, TvfArgument)],
    params: &[&str],
) -> Result<HashMap<String, TvfArgument>> {
    let mut bound: HashMap<String, TvfArgument> = HashMap::new();
    for (name, arg) in arguments {
        let param = match name {
            Some(n) => {
                if !params.contains(&n.as_str()) {
                    return Err(RillError::Type(format!(
                        "{tvf} has no argument named {n}"
                    )));
                }
                n.clone()
            }
            None => params
                .iter()
                .find(|p| !bound.contains_key(**p))
                .map(|p| p.to_string())
                .ok_or_else(|| RillError::Type(format!("too many arguments to {tvf}")))?,
        };
        if bound.insert(param.clone(), arg.clone()).is_some() {
            return Err(RillError::Type(format!(
                "duplicate argument {param} to {tvf}"
            )));
        }
    }
    Ok(bound)
}
