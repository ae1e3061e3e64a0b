//! Lowers a typed physical plan into the executable operator tree.
//!
//! Total for well-typed plans; the only failure modes are datasource
//! construction errors (missing files, unregistered formats).

use crate::aggregate::AggregateRegistry;
use crate::datasource::DatasourceExec;
use crate::distinct::DistinctExec;
use crate::expressions::Evaluator;
use crate::filter::FilterExec;
use crate::functions::FunctionRegistry;
use crate::group_by::{AggregateSpec, GroupByExec};
use crate::lookup_join::LookupJoinExec;
use crate::map::MapExec;
use crate::nodes::BoxedNode;
use crate::order_by::{LimitExec, OrderByExec};
use crate::requalifier::RequalifierExec;
use crate::stream_join::StreamJoinExec;
use crate::table_valued::{MaxDiffWatermarkExec, PollExec, RangeExec, TumbleExec};
use crate::unnest::UnnestExec;
use rill_common::{EngineConfig, Result, RillError, Value};
use rill_planner::physical_plan::{
    Expr, ExprKind, Node, NodeKind, TableValuedFunction, TvfArg,
};
use rill_storage::{Catalog, DatasourceRegistry};
use std::sync::Arc;

/// Registries and configuration the executable tree closes over.
pub struct ExecutionEnvironment {
    pub functions: Arc<FunctionRegistry>,
    pub aggregates: Arc<AggregateRegistry>,
    pub catalog: Arc<Catalog>,
    pub datasources: Arc<DatasourceRegistry>,
    pub config: EngineConfig,
}

pub fn materialize(node: &Node, env: &ExecutionEnvironment) -> Result<BoxedNode> {
    let schema = Arc::new(node.schema.clone());
    Ok(match &node.kind {
        NodeKind::Datasource(d) => {
            let def = env.catalog.resolve(&d.name)?;
            let provider = env.datasources.open_table(&def)?;
            Box::new(DatasourceExec {
                provider,
                predicates: d
                    .predicates
                    .iter()
                    .map(|p| materialize_expr(p, env).map(Arc::new))
                    .collect::<Result<Vec<_>>>()?,
                schema,
            })
        }
        NodeKind::Filter(f) => Box::new(FilterExec {
            source: materialize(&f.source, env)?,
            predicate: Arc::new(materialize_expr(&f.predicate, env)?),
            schema,
        }),
        NodeKind::Map(m) => Box::new(MapExec {
            source: materialize(&m.source, env)?,
            expressions: m
                .expressions
                .iter()
                .map(|e| materialize_expr(e, env).map(Arc::new))
                .collect::<Result<Vec<_>>>()?,
            schema,
        }),
        NodeKind::Distinct(d) => Box::new(DistinctExec {
            source: materialize(&d.source, env)?,
            schema,
        }),
        NodeKind::GroupBy(g) => {
            let mut aggregates = Vec::with_capacity(g.aggregates.len());
            for (name, expr) in g.aggregates.iter().zip(&g.aggregate_expressions) {
                // Resolved here so missing names fail materialization, not
                // the first processed record.
                env.aggregates.get(name)?;
                let registry = env.aggregates.clone();
                let agg_name = name.clone();
                let arg_type = expr.typ.clone();
                aggregates.push(AggregateSpec {
                    factory: Arc::new(move || {
                        registry
                            .get(&agg_name)
                            .expect("aggregate resolved during materialization")
                            .fresh(&arg_type)
                    }),
                    argument: Arc::new(materialize_expr(expr, env)?),
                });
            }
            Box::new(GroupByExec {
                batch: g.source.schema.no_retractions,
                source: materialize(&g.source, env)?,
                key: g
                    .key
                    .iter()
                    .map(|k| materialize_expr(k, env).map(Arc::new))
                    .collect::<Result<Vec<_>>>()?,
                aggregates,
                trigger: g.trigger,
                schema,
            })
        }
        NodeKind::StreamJoin(j) => Box::new(StreamJoinExec {
            left: materialize(&j.left, env)?,
            right: materialize(&j.right, env)?,
            left_key: j
                .left_key
                .iter()
                .map(|k| materialize_expr(k, env).map(Arc::new))
                .collect::<Result<Vec<_>>>()?,
            right_key: j
                .right_key
                .iter()
                .map(|k| materialize_expr(k, env).map(Arc::new))
                .collect::<Result<Vec<_>>>()?,
            schema,
        }),
        NodeKind::LookupJoin(j) => Box::new(LookupJoinExec {
            source: materialize(&j.source, env)?,
            joined: Arc::from(materialize(&j.joined, env)?),
            row_limit: env.config.lookup_row_limit,
            schema,
        }),
        NodeKind::OrderBy(o) => Box::new(OrderByExec {
            source: materialize(&o.source, env)?,
            key: o
                .key
                .iter()
                .map(|k| materialize_expr(k, env).map(Arc::new))
                .collect::<Result<Vec<_>>>()?,
            direction_multipliers: o.direction_multipliers.clone(),
            schema,
        }),
        NodeKind::Limit(l) => Box::new(LimitExec {
            source: materialize(&l.source, env)?,
            limit: l.limit,
            schema,
        }),
        NodeKind::Requalifier(r) => Box::new(RequalifierExec {
            source: materialize(&r.source, env)?,
            schema,
        }),
        NodeKind::Unnest(u) => Box::new(UnnestExec {
            source: materialize(&u.source, env)?,
            field_index: node.schema.index_of(&u.field).ok_or_else(|| {
                RillError::Plan(format!("unnest field {} not in schema", u.field))
            })?,
            schema,
        }),
        NodeKind::TableValuedFunction(tvf) => materialize_tvf(node, tvf, env)?,
    })
}

fn materialize_tvf(
    node: &Node,
    tvf: &TableValuedFunction,
    env: &ExecutionEnvironment,
) -> Result<BoxedNode> {
    let schema = Arc::new(node.schema.clone());
    match tvf.name.as_str() {
        "range" => Ok(Box::new(RangeExec {
            start: Arc::new(materialize_expr(expr_arg(tvf, "start")?, env)?),
            end: Arc::new(materialize_expr(expr_arg(tvf, "end")?, env)?),
            schema,
        })),
        "tumble" => {
            let source = table_arg(tvf)?;
            let time_index = descriptor_index(tvf, "time_field", source)?;
            Ok(Box::new(TumbleExec {
                source: materialize(source, env)?,
                time_index,
                window_length: Arc::new(materialize_expr(
                    expr_arg(tvf, "window_length")?,
                    env,
                )?),
                schema,
            }))
        }
        "poll" => {
            let source = table_arg(tvf)?;
            let interval = match find_arg(tvf, "interval") {
                Some(TvfArg::Expression(e)) => materialize_expr(e, env)?,
                _ => Evaluator::Constant(Value::Duration(
                    env.config.default_poll_interval_ms as i64 * 1_000_000,
                )),
            };
            Ok(Box::new(PollExec {
                source: Arc::from(materialize(source, env)?),
                interval: Arc::new(interval),
                schema,
            }))
        }
        "max_diff_watermark" => {
            let source = table_arg(tvf)?;
            let time_index = descriptor_index(tvf, "time_field", source)?;
            Ok(Box::new(MaxDiffWatermarkExec {
                source: materialize(source, env)?,
                time_index,
                max_diff: Arc::new(materialize_expr(expr_arg(tvf, "max_diff")?, env)?),
                schema,
            }))
        }
        other => Err(RillError::Plan(format!(
            "no executable operator for table-valued function {other}"
        ))),
    }
}

fn find_arg<'a>(tvf: &'a TableValuedFunction, name: &str) -> Option<&'a TvfArg> {
    tvf.arguments
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, arg)| arg)
}

fn expr_arg<'a>(tvf: &'a TableValuedFunction, name: &str) -> Result<&'a Expr> {
    match find_arg(tvf, name) {
        Some(TvfArg::Expression(e)) => Ok(e),
        _ => Err(RillError::Plan(format!(
            "{} is missing expression argument {name}",
            tvf.name
        ))),
    }
}

fn table_arg(tvf: &TableValuedFunction) -> Result<&Node> {
    match find_arg(tvf, "source") {
        Some(TvfArg::Table(t)) => Ok(t),
        _ => Err(RillError::Plan(format!(
            "{} is missing its table argument",
            tvf.name
        ))),
    }
}

fn descriptor_index(
    tvf: &TableValuedFunction,
    name: &str,
    source: &Node,
) -> Result<usize> {
    let column = match find_arg(tvf, name) {
        Some(TvfArg::Descriptor(d)) => d.as_str(),
        _ => {
            return Err(RillError::Plan(format!(
                "{} is missing descriptor argument {name}",
                tvf.name
            )))
        }
    };
    source.schema.index_of(column).ok_or_else(|| {
        RillError::Plan(format!("descriptor {column} not in source schema"))
    })
}

pub fn materialize_expr(expr: &Expr, env: &ExecutionEnvironment) -> Result<Evaluator> {
    Ok(match &expr.kind {
        ExprKind::Variable { name, .. } => Evaluator::Variable(name.clone()),
        ExprKind::Constant(value) => Evaluator::Constant(value.clone()),
        ExprKind::FunctionCall { name, arguments } => Evaluator::FunctionCall {
            function: env.functions.get(name)?,
            arguments: arguments
                .iter()
                .map(|a| materialize_expr(a, env))
                .collect::<Result<Vec<_>>>()?,
        },
        ExprKind::And(args) => Evaluator::And(materialize_all(args, env)?),
        ExprKind::Or(args) => Evaluator::Or(materialize_all(args, env)?),
        ExprKind::Coalesce(args) => Evaluator::Coalesce(materialize_all(args, env)?),
        ExprKind::Tuple(args) => Evaluator::Tuple(materialize_all(args, env)?),
        ExprKind::TypeAssertion(inner) => Evaluator::TypeAssertion {
            target: expr.typ.clone(),
            inner: Box::new(materialize_expr(inner, env)?),
        },
        // Correlated subplans close over outer variables through the
        // variable context at evaluation time.
        ExprKind::Query(subplan) => Evaluator::Subquery(Arc::from(materialize(subplan, env)?)),
    })
}

fn materialize_all(args: &[Expr], env: &ExecutionEnvironment) -> Result<Vec<Evaluator>> {
    args.iter().map(|a| materialize_expr(a, env)).collect()
}
