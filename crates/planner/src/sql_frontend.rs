//! Lowers the external parser's syntax tree into the logical plan.
//!
//! The supported dialect is what the operator set executes: single SELECT
//! statements with WHERE/GROUP BY/ORDER BY/LIMIT/DISTINCT, equi-joins,
//! lateral subqueries, table-valued function calls in FROM, scalar
//! subqueries, and inlined CTEs. Everything else returns `Unsupported` with
//! the construct named.

use std::collections::HashMap;

use rill_common::{Result, RillError, Type, Value};
use sqlparser::ast::{
    BinaryOperator, DataType, DateTimeField, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    FunctionArguments, GroupByExpr, Ident, JoinConstraint, JoinOperator, ObjectName, Query,
    Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, UnaryOperator,
    Value as SqlValue,
};

use crate::logical_plan::{Direction, LogicalExpr, LogicalPlan, TvfArgument};

/// Aggregates recognized in projection position. Display names equal the
/// registry names, which output-field naming relies on.
const AGGREGATES: &[&str] = &[
    "count",
    "sum",
    "avg",
    "min",
    "max",
    "first",
    "last",
    "array_agg",
];

/// Table-valued functions whose leading argument is a table.
const TABLE_PARAM_TVFS: &[&str] = &["tumble", "poll", "max_diff_watermark", "unnest"];

/// Convert SQL text into a [`LogicalPlan`].
pub fn sql_to_logical(sql: &str) -> Result<LogicalPlan> {
    let statements = rill_sql::parse_sql(sql)?;
    if statements.len() != 1 {
        return Err(RillError::Unsupported(
            "only single-statement SQL is supported".to_string(),
        ));
    }
    statement_to_logical(&statements[0])
}

/// Convert one parsed statement into a [`LogicalPlan`].
pub fn statement_to_logical(stmt: &Statement) -> Result<LogicalPlan> {
    match stmt {
        Statement::Query(q) => query_to_logical(q, &HashMap::new()),
        other => Err(RillError::Unsupported(format!(
            "only SELECT queries are supported, got {}",
            statement_kind(other)
        ))),
    }
}

fn statement_kind(stmt: &Statement) -> &'static str {
    match stmt {
        Statement::Insert(_) => "INSERT",
        Statement::CreateTable(_) => "CREATE TABLE",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete(_) => "DELETE",
        _ => "a non-SELECT statement",
    }
}

type CteMap = HashMap<String, LogicalPlan>;

fn query_to_logical(q: &Query, parent_ctes: &CteMap) -> Result<LogicalPlan> {
    let mut ctes = parent_ctes.clone();
    if let Some(with) = &q.with {
        if with.recursive {
            return Err(RillError::Unsupported("WITH RECURSIVE".to_string()));
        }
        for cte in &with.cte_tables {
            let plan = query_to_logical(&cte.query, &ctes)?;
            ctes.insert(cte.alias.name.value.clone(), plan);
        }
    }

    let mut plan = match &*q.body {
        SetExpr::Select(s) => select_to_logical(s.as_ref(), &ctes)?,
        SetExpr::Query(inner) => query_to_logical(inner, &ctes)?,
        other => {
            return Err(RillError::Unsupported(format!(
                "query body {other} (only plain SELECT is supported)"
            )))
        }
    };

    if let Some(order_by) = &q.order_by {
        let mut key = Vec::with_capacity(order_by.exprs.len());
        for item in &order_by.exprs {
            let direction = match item.asc {
                Some(false) => Direction::Descending,
                _ => Direction::Ascending,
            };
            key.push((expr_to_logical(&item.expr, &ctes)?, direction));
        }
        plan = LogicalPlan::OrderBy {
            key,
            source: Box::new(plan),
        };
    }

    if let Some(limit) = &q.limit {
        let n = match expr_to_logical(limit, &ctes)? {
            LogicalExpr::Constant(Value::Int(n)) if n >= 0 => n as usize,
            _ => {
                return Err(RillError::Parse(
                    "LIMIT requires a non-negative integer literal".to_string(),
                ))
            }
        };
        plan = LogicalPlan::Limit {
            limit: n,
            source: Box::new(plan),
        };
    }

    Ok(plan)
}

fn select_to_logical(select: &Select, ctes: &CteMap) -> Result<LogicalPlan> {
    let mut plan = from_to_logical(&select.from, ctes)?;

    if let Some(predicate) = &select.selection {
        plan = LogicalPlan::Filter {
            predicate: expr_to_logical(predicate, ctes)?,
            source: Box::new(plan),
        };
    }

    let group_key = match &select.group_by {
        GroupByExpr::Expressions(exprs, _mods) => exprs
            .iter()
            .map(|e| expr_to_logical(e, ctes))
            .collect::<Result<Vec<_>>>()?,
        GroupByExpr::All(_) => {
            return Err(RillError::Unsupported("GROUP BY ALL".to_string()));
        }
    };
    let has_aggregates = select
        .projection
        .iter()
        .any(|item| matches!(item, SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } if aggregate_call(e).is_some()));

    if select.having.is_some() {
        return Err(RillError::Unsupported("HAVING".to_string()));
    }

    plan = if has_aggregates || !group_key.is_empty() {
        grouped_projection(select, plan, group_key, ctes)?
    } else {
        plain_projection(select, plan, ctes)?
    };

    if select.distinct.is_some() {
        plan = LogicalPlan::Distinct {
            source: Box::new(plan),
        };
    }
    Ok(plan)
}

/// `SELECT cols` without aggregation: wildcard is the identity, anything else
/// becomes a Map.
fn plain_projection(
    select: &Select,
    plan: LogicalPlan,
    ctes: &CteMap,
) -> Result<LogicalPlan> {
    if let [SelectItem::Wildcard(_)] = select.projection.as_slice() {
        return Ok(plan);
    }
    let mut expressions = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(e) => {
                expressions.push((expr_to_logical(e, ctes)?, None));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                expressions.push((expr_to_logical(expr, ctes)?, Some(alias.value.clone())));
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                return Err(RillError::Unsupported(
                    "wildcard mixed with other projection items".to_string(),
                ));
            }
        }
    }
    Ok(LogicalPlan::Map {
        expressions,
        source: Box::new(plan),
    })
}

/// Aggregating SELECT: a GroupBy followed by a Map projecting the requested
/// items. The Map references the GroupBy's derived output names (`k`,
/// `v_sum`, `count`, ...).
fn grouped_projection(
    select: &Select,
    plan: LogicalPlan,
    group_key: Vec<LogicalExpr>,
    ctes: &CteMap,
) -> Result<LogicalPlan> {
    let mut aggregates: Vec<(String, LogicalExpr)> = Vec::new();
    let mut outputs: Vec<(LogicalExpr, Option<String>)> = Vec::new();

    for (i, item) in select.projection.iter().enumerate() {
        let (expr, alias) = match item {
            SelectItem::UnnamedExpr(e) => (e, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            _ => {
                return Err(RillError::Unsupported(
                    "wildcard projection with GROUP BY".to_string(),
                ))
            }
        };
        if let Some((agg_name, arg)) = aggregate_call(expr) {
            let arg = match arg {
                Some(e) => expr_to_logical(&e, ctes)?,
                // COUNT(*) counts records.
                None => LogicalExpr::Constant(Value::Boolean(true)),
            };
            let output_name = aggregate_output_name(&agg_name, &arg);
            aggregates.push((agg_name, arg));
            outputs.push((LogicalExpr::Variable(output_name), alias));
            continue;
        }
        let logical = expr_to_logical(expr, ctes)?;
        let key_index = group_key.iter().position(|k| *k == logical).ok_or_else(|| {
            RillError::Type(format!(
                "projection item {i} must be an aggregate or appear in GROUP BY"
            ))
        })?;
        let key_name = group_key[key_index]
            .derived_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("key_{key_index}"));
        outputs.push((LogicalExpr::Variable(key_name), alias));
    }

    let grouped = LogicalPlan::GroupBy {
        key: group_key,
        aggregates,
        source: Box::new(plan),
    };
    Ok(LogicalPlan::Map {
        expressions: outputs,
        source: Box::new(grouped),
    })
}

/// Output field name the typechecker derives for an aggregate.
fn aggregate_output_name(agg_name: &str, arg: &LogicalExpr) -> String {
    match arg.derived_name() {
        Some(column) => format!("{column}_{agg_name}"),
        None => agg_name.to_string(),
    }
}

/// Recognize `agg(x)` / `COUNT(*)` in projection position. Returns the
/// lowercase aggregate name and its argument (`None` for `*`).
fn aggregate_call(expr: &SqlExpr) -> Option<(String, Option<SqlExpr>)> {
    let SqlExpr::Function(f) = expr else {
        return None;
    };
    let name = object_name_to_string(&f.name).to_ascii_lowercase();
    if !AGGREGATES.contains(&name.as_str()) {
        return None;
    }
    match &f.args {
        FunctionArguments::List(list) => {
            // DISTINCT-qualified aggregates are not implemented; fall through
            // so the expression path reports them instead of silently
            // dropping the qualifier.
            if list.duplicate_treatment.is_some() {
                return None;
            }
            match list.args.as_slice() {
                [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => Some((name, None)),
                [FunctionArg::Unnamed(FunctionArgExpr::Expr(e))] => {
                    Some((name, Some(e.clone())))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn from_to_logical(from: &[TableWithJoins], ctes: &CteMap) -> Result<LogicalPlan> {
    let mut tables = from.iter();
    let first = tables
        .next()
        .ok_or_else(|| RillError::Unsupported("SELECT without FROM".to_string()))?;
    let mut plan = table_with_joins_to_logical(first, ctes)?;
    // Comma-separated factors are only supported for LATERAL subqueries.
    for next in tables {
        if !next.joins.is_empty() {
            return Err(RillError::Unsupported(
                "mixing comma-separated tables with JOIN".to_string(),
            ));
        }
        let (factor_plan, lateral) = factor_to_logical(&next.relation, ctes)?;
        if !lateral {
            return Err(RillError::Unsupported(
                "comma cross joins (use JOIN ... ON or LATERAL)".to_string(),
            ));
        }
        plan = LogicalPlan::Join {
            left: Box::new(plan),
            right: Box::new(factor_plan),
            on: vec![],
            lateral: true,
        };
    }
    Ok(plan)
}

fn table_with_joins_to_logical(twj: &TableWithJoins, ctes: &CteMap) -> Result<LogicalPlan> {
    let (mut plan, _) = factor_to_logical(&twj.relation, ctes)?;
    for join in &twj.joins {
        let constraint = match &join.join_operator {
            JoinOperator::Inner(c) => c,
            JoinOperator::CrossJoin => {
                let (right, lateral) = factor_to_logical(&join.relation, ctes)?;
                if !lateral {
                    return Err(RillError::Unsupported(
                        "CROSS JOIN of non-lateral tables".to_string(),
                    ));
                }
                plan = LogicalPlan::Join {
                    left: Box::new(plan),
                    right: Box::new(right),
                    on: vec![],
                    lateral: true,
                };
                continue;
            }
            other => {
                return Err(RillError::Unsupported(format!(
                    "join type {other:?} (only INNER JOIN is supported)"
                )))
            }
        };
        let (right, lateral) = factor_to_logical(&join.relation, ctes)?;
        let on = match constraint {
            JoinConstraint::On(expr) => equi_join_keys(expr, ctes)?,
            JoinConstraint::None if lateral => vec![],
            other => {
                return Err(RillError::Unsupported(format!(
                    "join constraint {other:?} (use ON with equality predicates)"
                )))
            }
        };
        plan = LogicalPlan::Join {
            left: Box::new(plan),
            right: Box::new(right),
            on,
            lateral,
        };
    }
    Ok(plan)
}

/// Split an ON clause into `(left, right)` equality pairs.
fn equi_join_keys(expr: &SqlExpr, ctes: &CteMap) -> Result<Vec<(LogicalExpr, LogicalExpr)>> {
    match expr {
        SqlExpr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut keys = equi_join_keys(left, ctes)?;
            keys.extend(equi_join_keys(right, ctes)?);
            Ok(keys)
        }
        SqlExpr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => Ok(vec![(
            expr_to_logical(left, ctes)?,
            expr_to_logical(right, ctes)?,
        )]),
        SqlExpr::Nested(inner) => equi_join_keys(inner, ctes),
        other => Err(RillError::Unsupported(format!(
            "join condition {other} (only conjunctions of equalities)"
        ))),
    }
}

/// Lower one FROM factor. The boolean marks a LATERAL subquery.
fn factor_to_logical(factor: &TableFactor, ctes: &CteMap) -> Result<(LogicalPlan, bool)> {
    match factor {
        TableFactor::Table {
            name, alias, args, ..
        } => {
            let table = object_name_to_string(name);
            if let Some(args) = args {
                let plan = tvf_to_logical(&table, &args.args, ctes)?;
                let plan = match alias {
                    Some(alias) => LogicalPlan::Requalifier {
                        qualifier: alias.name.value.clone(),
                        source: Box::new(plan),
                    },
                    None => plan,
                };
                return Ok((plan, false));
            }
            if let Some(cte) = ctes.get(&table) {
                let qualifier = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table.clone());
                return Ok((
                    LogicalPlan::Requalifier {
                        qualifier,
                        source: Box::new(cte.clone()),
                    },
                    false,
                ));
            }
            Ok((
                LogicalPlan::Datasource {
                    name: table,
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                },
                false,
            ))
        }
        TableFactor::Derived {
            lateral,
            subquery,
            alias,
        } => {
            let plan = query_to_logical(subquery, ctes)?;
            let plan = match alias {
                Some(alias) => LogicalPlan::Requalifier {
                    qualifier: alias.name.value.clone(),
                    source: Box::new(plan),
                },
                None => plan,
            };
            Ok((plan, *lateral))
        }
        other => Err(RillError::Unsupported(format!(
            "FROM item {other} (tables, table functions and subqueries only)"
        ))),
    }
}

/// Lower a table-valued function call in FROM position.
fn tvf_to_logical(
    name: &str,
    args: &[FunctionArg],
    ctes: &CteMap,
) -> Result<LogicalPlan> {
    let name = name.to_ascii_lowercase();
    let mut arguments = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let (param, value) = match arg {
            FunctionArg::Named { name, arg, .. } => {
                (Some(name.value.to_ascii_lowercase()), arg)
            }
            FunctionArg::Unnamed(value) => (None, value),
        };
        let value = match value {
            FunctionArgExpr::Expr(e) => e,
            other => {
                return Err(RillError::Unsupported(format!(
                    "table function argument {other}"
                )))
            }
        };
        let first_positional_table = param.as_deref() == Some("source")
            || (param.is_none() && i == 0 && TABLE_PARAM_TVFS.contains(&name.as_str()));
        arguments.push((param, tvf_argument(value, first_positional_table, ctes)?));
    }
    Ok(LogicalPlan::TableValuedFunction { name, arguments })
}

fn tvf_argument(
    expr: &SqlExpr,
    table_position: bool,
    ctes: &CteMap,
) -> Result<TvfArgument> {
    match expr {
        SqlExpr::Function(f) => {
            let fname = object_name_to_string(&f.name).to_ascii_uppercase();
            match fname.as_str() {
                "DESCRIPTOR" => {
                    let column = single_function_arg(f)?;
                    match column {
                        SqlExpr::Identifier(id) => Ok(TvfArgument::Descriptor(id.value.clone())),
                        SqlExpr::CompoundIdentifier(ids) => {
                            Ok(TvfArgument::Descriptor(idents_to_name(ids)))
                        }
                        other => Err(RillError::Parse(format!(
                            "DESCRIPTOR requires a column name, got {other}"
                        ))),
                    }
                }
                "TABLE" => {
                    let inner = single_function_arg(f)?;
                    match inner {
                        SqlExpr::Identifier(id) => Ok(TvfArgument::Table(Box::new(
                            named_table(&id.value, ctes),
                        ))),
                        other => Err(RillError::Parse(format!(
                            "TABLE requires a table name, got {other}"
                        ))),
                    }
                }
                _ => Ok(TvfArgument::Expression(expr_to_logical(expr, ctes)?)),
            }
        }
        SqlExpr::Identifier(id) if table_position => {
            Ok(TvfArgument::Table(Box::new(named_table(&id.value, ctes))))
        }
        SqlExpr::Subquery(q) => Ok(TvfArgument::Table(Box::new(query_to_logical(q, ctes)?))),
        // '1s'-style duration shorthands in argument position.
        SqlExpr::Value(SqlValue::SingleQuotedString(s)) => match parse_duration(s) {
            Some(nanos) => Ok(TvfArgument::Expression(LogicalExpr::Constant(
                Value::Duration(nanos),
            ))),
            None => Ok(TvfArgument::Expression(LogicalExpr::Constant(Value::Str(
                s.clone(),
            )))),
        },
        other => Ok(TvfArgument::Expression(expr_to_logical(other, ctes)?)),
    }
}

fn named_table(name: &str, ctes: &CteMap) -> LogicalPlan {
    match ctes.get(name) {
        Some(plan) => LogicalPlan::Requalifier {
            qualifier: name.to_string(),
            source: Box::new(plan.clone()),
        },
        None => LogicalPlan::Datasource {
            name: name.to_string(),
            alias: None,
        },
    }
}

fn single_function_arg(f: &sqlparser::ast::Function) -> Result<&SqlExpr> {
    if let FunctionArguments::List(list) = &f.args {
        if let [FunctionArg::Unnamed(FunctionArgExpr::Expr(e))] = list.args.as_slice() {
            return Ok(e);
        }
    }
    Err(RillError::Parse(format!(
        "{} requires exactly one argument",
        object_name_to_string(&f.name)
    )))
}

fn expr_to_logical(expr: &SqlExpr, ctes: &CteMap) -> Result<LogicalExpr> {
    match expr {
        SqlExpr::Identifier(id) => Ok(LogicalExpr::Variable(id.value.clone())),
        SqlExpr::CompoundIdentifier(ids) => Ok(LogicalExpr::Variable(idents_to_name(ids))),
        SqlExpr::Value(v) => Ok(LogicalExpr::Constant(sql_value_to_value(v)?)),
        SqlExpr::Interval(interval) => {
            Ok(LogicalExpr::Constant(Value::Duration(interval_nanos(interval)?)))
        }
        SqlExpr::Nested(inner) => expr_to_logical(inner, ctes),
        SqlExpr::BinaryOp { left, op, right } => {
            let l = expr_to_logical(left, ctes)?;
            let r = expr_to_logical(right, ctes)?;
            match op {
                BinaryOperator::And => Ok(LogicalExpr::And(vec![l, r])),
                BinaryOperator::Or => Ok(LogicalExpr::Or(vec![l, r])),
                other => {
                    let name = binary_function_name(other)?;
                    Ok(LogicalExpr::FunctionCall {
                        name: name.to_string(),
                        arguments: vec![l, r],
                    })
                }
            }
        }
        SqlExpr::UnaryOp { op, expr } => {
            let inner = expr_to_logical(expr, ctes)?;
            match op {
                UnaryOperator::Not => Ok(LogicalExpr::FunctionCall {
                    name: "not".to_string(),
                    arguments: vec![inner],
                }),
                UnaryOperator::Minus => Ok(LogicalExpr::FunctionCall {
                    name: "neg".to_string(),
                    arguments: vec![inner],
                }),
                UnaryOperator::Plus => Ok(inner),
                other => Err(RillError::Unsupported(format!("unary operator {other}"))),
            }
        }
        SqlExpr::IsNull(inner) => Ok(LogicalExpr::FunctionCall {
            name: "is_null".to_string(),
            arguments: vec![expr_to_logical(inner, ctes)?],
        }),
        SqlExpr::IsNotNull(inner) => Ok(LogicalExpr::FunctionCall {
            name: "not".to_string(),
            arguments: vec![LogicalExpr::FunctionCall {
                name: "is_null".to_string(),
                arguments: vec![expr_to_logical(inner, ctes)?],
            }],
        }),
        SqlExpr::Cast {
            expr, data_type, ..
        } => Ok(LogicalExpr::Cast {
            expr: Box::new(expr_to_logical(expr, ctes)?),
            target: data_type_to_type(data_type)?,
        }),
        SqlExpr::Function(f) => {
            let name = object_name_to_string(&f.name).to_ascii_lowercase();
            let mut arguments = Vec::new();
            if let FunctionArguments::List(list) = &f.args {
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => {
                            arguments.push(expr_to_logical(e, ctes)?)
                        }
                        other => {
                            return Err(RillError::Unsupported(format!(
                                "function argument {other}"
                            )))
                        }
                    }
                }
            }
            if name == "coalesce" {
                return Ok(LogicalExpr::Coalesce(arguments));
            }
            if AGGREGATES.contains(&name.as_str()) {
                return Err(RillError::Type(format!(
                    "aggregate {name} outside of SELECT projection"
                )));
            }
            Ok(LogicalExpr::FunctionCall { name, arguments })
        }
        SqlExpr::Tuple(exprs) => Ok(LogicalExpr::Tuple(
            exprs
                .iter()
                .map(|e| expr_to_logical(e, ctes))
                .collect::<Result<Vec<_>>>()?,
        )),
        SqlExpr::Subquery(q) => Ok(LogicalExpr::Subquery(Box::new(query_to_logical(
            q, ctes,
        )?))),
        other => Err(RillError::Unsupported(format!("expression {other}"))),
    }
}

fn binary_function_name(op: &BinaryOperator) -> Result<&'static str> {
    Ok(match op {
        BinaryOperator::Plus => "+",
        BinaryOperator::Minus => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Modulo => "%",
        BinaryOperator::Eq => "=",
        BinaryOperator::NotEq => "!=",
        BinaryOperator::Lt => "<",
        BinaryOperator::LtEq => "<=",
        BinaryOperator::Gt => ">",
        BinaryOperator::GtEq => ">=",
        other => {
            return Err(RillError::Unsupported(format!("binary operator {other}")))
        }
    })
}

fn sql_value_to_value(v: &SqlValue) -> Result<Value> {
    match v {
        SqlValue::Number(text, _) => {
            if let Ok(n) = text.parse::<i64>() {
                Ok(Value::Int(n))
            } else {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| RillError::Parse(format!("invalid number literal: {text}")))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Value::Str(s.clone()))
        }
        SqlValue::Boolean(b) => Ok(Value::Boolean(*b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(RillError::Unsupported(format!("literal {other}"))),
    }
}

fn data_type_to_type(dt: &DataType) -> Result<Type> {
    Ok(match dt {
        DataType::Int(_) | DataType::Integer(_) | DataType::BigInt(_) => Type::Int,
        DataType::Float(_) | DataType::Real | DataType::Double | DataType::DoublePrecision => {
            Type::Float
        }
        DataType::Text | DataType::Varchar(_) => Type::Str,
        DataType::Boolean => Type::Boolean,
        DataType::Timestamp(_, _) => Type::Time,
        DataType::Interval => Type::Duration,
        other => {
            return Err(RillError::Unsupported(format!("cast target type {other}")))
        }
    })
}

fn interval_nanos(interval: &sqlparser::ast::Interval) -> Result<i64> {
    let magnitude: i64 = match interval.value.as_ref() {
        SqlExpr::Value(SqlValue::SingleQuotedString(s)) | SqlExpr::Value(SqlValue::Number(s, _)) => {
            s.parse().map_err(|_| {
                RillError::Parse(format!("invalid interval magnitude: {s}"))
            })?
        }
        other => {
            return Err(RillError::Unsupported(format!(
                "interval expression {other}"
            )))
        }
    };
    let unit = match interval.leading_field {
        Some(DateTimeField::Hour) => 3_600_000_000_000,
        Some(DateTimeField::Minute) => 60_000_000_000,
        None | Some(DateTimeField::Second) => 1_000_000_000,
        Some(DateTimeField::Millisecond) | Some(DateTimeField::Milliseconds) => 1_000_000,
        Some(ref other) => {
            return Err(RillError::Unsupported(format!("interval unit {other}")))
        }
    };
    Ok(magnitude * unit)
}

/// Parse `'1s'` / `'250ms'` / `'5m'` / `'2h'` shorthands into nanoseconds.
fn parse_duration(s: &str) -> Option<i64> {
    let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit())?);
    let magnitude: i64 = digits.parse().ok()?;
    let scale = match unit {
        "ns" => 1,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        "h" => 3_600_000_000_000,
        _ => return None,
    };
    Some(magnitude * scale)
}

fn object_name_to_string(name: &ObjectName) -> String {
    idents_to_name(&name.0)
}

fn idents_to_name(idents: &[Ident]) -> String {
    idents
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_star_is_identity_over_scan() {
        let plan = sql_to_logical("SELECT * FROM trades").expect("plan");
        assert_eq!(
            plan,
            LogicalPlan::Datasource {
                name: "trades".into(),
                alias: None
            }
        );
    }

    #[test]
    fn where_and_projection() {
        let plan = sql_to_logical("SELECT v AS x FROM t WHERE v > 3").expect("plan");
        let LogicalPlan::Map { expressions, source } = plan else {
            panic!("expected map")
        };
        assert_eq!(
            expressions,
            vec![(LogicalExpr::Variable("v".into()), Some("x".into()))]
        );
        assert!(matches!(*source, LogicalPlan::Filter { .. }));
    }

    #[test]
    fn group_by_splits_into_group_and_map() {
        let plan = sql_to_logical("SELECT k, SUM(v) FROM t GROUP BY k").expect("plan");
        let LogicalPlan::Map { expressions, source } = plan else {
            panic!("expected map")
        };
        assert_eq!(
            expressions,
            vec![
                (LogicalExpr::Variable("k".into()), None),
                (LogicalExpr::Variable("v_sum".into()), None),
            ]
        );
        let LogicalPlan::GroupBy { key, aggregates, .. } = *source else {
            panic!("expected group by")
        };
        assert_eq!(key, vec![LogicalExpr::Variable("k".into())]);
        assert_eq!(
            aggregates,
            vec![("sum".to_string(), LogicalExpr::Variable("v".into()))]
        );
    }

    #[test]
    fn count_star_counts_records() {
        let plan = sql_to_logical("SELECT COUNT(*) FROM t").expect("plan");
        let LogicalPlan::Map { expressions, source } = plan else {
            panic!("expected map")
        };
        assert_eq!(
            expressions,
            vec![(LogicalExpr::Variable("count".into()), None)]
        );
        let LogicalPlan::GroupBy { key, aggregates, .. } = *source else {
            panic!("expected group by")
        };
        assert!(key.is_empty());
        assert_eq!(
            aggregates,
            vec![(
                "count".to_string(),
                LogicalExpr::Constant(Value::Boolean(true))
            )]
        );
    }

    #[test]
    fn equi_join_keys_extracted() {
        let plan =
            sql_to_logical("SELECT * FROM a JOIN b ON a.x = b.y AND a.z = b.w").expect("plan");
        let LogicalPlan::Join { on, lateral, .. } = plan else {
            panic!("expected join")
        };
        assert!(!lateral);
        assert_eq!(on.len(), 2);
        assert_eq!(on[0].0, LogicalExpr::Variable("a.x".into()));
        assert_eq!(on[1].1, LogicalExpr::Variable("b.w".into()));
    }

    #[test]
    fn order_by_and_limit() {
        let plan = sql_to_logical("SELECT * FROM t ORDER BY v DESC LIMIT 2").expect("plan");
        let LogicalPlan::Limit { limit, source } = plan else {
            panic!("expected limit")
        };
        assert_eq!(limit, 2);
        let LogicalPlan::OrderBy { key, .. } = *source else {
            panic!("expected order by")
        };
        assert_eq!(key[0].1, Direction::Descending);
    }

    #[test]
    fn tvf_with_positional_and_named_arguments() {
        let plan = sql_to_logical("SELECT * FROM range(0, 5)").expect("plan");
        let LogicalPlan::TableValuedFunction { name, arguments } = plan else {
            panic!("expected tvf")
        };
        assert_eq!(name, "range");
        assert_eq!(arguments.len(), 2);
        assert!(arguments.iter().all(|(n, _)| n.is_none()));

        let plan = sql_to_logical(
            "SELECT * FROM tumble(source => events, time_field => DESCRIPTOR(ts), \
             window_length => INTERVAL '10' SECOND)",
        )
        .expect("plan");
        let LogicalPlan::TableValuedFunction { name, arguments } = plan else {
            panic!("expected tvf")
        };
        assert_eq!(name, "tumble");
        assert_eq!(
            arguments[1],
            (
                Some("time_field".to_string()),
                TvfArgument::Descriptor("ts".into())
            )
        );
        assert_eq!(
            arguments[2],
            (
                Some("window_length".to_string()),
                TvfArgument::Expression(LogicalExpr::Constant(Value::Duration(
                    10_000_000_000
                )))
            )
        );
    }

    #[test]
    fn poll_accepts_duration_shorthand() {
        let plan = sql_to_logical("SELECT * FROM poll(t, '1s')").expect("plan");
        let LogicalPlan::TableValuedFunction { arguments, .. } = plan else {
            panic!("expected tvf")
        };
        assert!(matches!(
            &arguments[0].1,
            TvfArgument::Table(t) if matches!(**t, LogicalPlan::Datasource { .. })
        ));
        assert_eq!(
            arguments[1].1,
            TvfArgument::Expression(LogicalExpr::Constant(Value::Duration(1_000_000_000)))
        );
    }

    #[test]
    fn ctes_inline_with_requalifier() {
        let plan =
            sql_to_logical("WITH w AS (SELECT * FROM t) SELECT * FROM w").expect("plan");
        let LogicalPlan::Requalifier { qualifier, source } = plan else {
            panic!("expected requalifier, got {plan:?}")
        };
        assert_eq!(qualifier, "w");
        assert!(matches!(*source, LogicalPlan::Datasource { .. }));
    }

    #[test]
    fn unsupported_constructs_are_named() {
        let err = sql_to_logical("INSERT INTO t VALUES (1)").expect_err("reject");
        assert!(err.to_string().contains("INSERT"), "{err}");
        let err = sql_to_logical("SELECT * FROM a UNION SELECT * FROM b").expect_err("reject");
        assert!(matches!(err, RillError::Unsupported(_)), "{err}");
    }

    #[test]
    fn scalar_subquery_in_predicate() {
        let plan =
            sql_to_logical("SELECT * FROM t WHERE v = (SELECT MAX(v) FROM t)").expect("plan");
        let LogicalPlan::Filter { predicate, .. } = plan else {
            panic!("expected filter")
        };
        let LogicalExpr::FunctionCall { arguments, .. } = predicate else {
            panic!("expected comparison")
        };
        assert!(matches!(arguments[1], LogicalExpr::Subquery(_)));
    }
}
