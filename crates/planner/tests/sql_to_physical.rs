//! Pipeline tests: SQL text through the frontend, typechecker and optimizer.

use rill_common::{Result, RillError, Schema, SchemaField, Type};
use rill_planner::describe::{describe_node, SchemaDetail};
use rill_planner::typecheck::{
    AggregateResolver, AggregateSignature, DatasourceResolver, Environment, FunctionResolver,
};
use rill_planner::{sql_to_logical, typecheck, NodeKind, Optimizer};

struct Registries;

impl DatasourceResolver for Registries {
    fn table_schema(&self, name: &str) -> Result<Schema> {
        match name {
            "trades" => Ok(Schema::batch(vec![
                SchemaField::new("symbol", Type::Str),
                SchemaField::new("price", Type::Float),
                SchemaField::new("size", Type::Int),
            ])),
            other => Err(RillError::Type(format!("unknown table: {other}"))),
        }
    }
}

impl FunctionResolver for Registries {
    fn function_type(&self, name: &str, args: &[Type]) -> Result<Type> {
        match (name, args) {
            ("+" | "-" | "*", [Type::Int, Type::Int]) => Ok(Type::Int),
            ("+" | "-" | "*" | "/", [a, b])
                if matches!(a, Type::Int | Type::Float)
                    && matches!(b, Type::Int | Type::Float) =>
            {
                Ok(Type::Float)
            }
            ("=" | "!=" | "<" | "<=" | ">" | ">=", [_, _]) => Ok(Type::Boolean),
            _ => Err(RillError::unknown_function(name)),
        }
    }
}

impl AggregateResolver for Registries {
    fn aggregate_type(&self, name: &str, arg: &Type) -> Result<AggregateSignature> {
        match name {
            "sum" => Ok(AggregateSignature {
                display_name: "sum".into(),
                output: arg.clone(),
            }),
            "count" => Ok(AggregateSignature {
                display_name: "count".into(),
                output: Type::Int,
            }),
            other => Err(RillError::Type(format!("unknown aggregate: {other}"))),
        }
    }
}

fn check(sql: &str) -> Result<rill_planner::Node> {
    let fixture = Registries;
    let env = Environment {
        datasources: &fixture,
        functions: &fixture,
        aggregates: &fixture,
    };
    let logical = sql_to_logical(sql)?;
    Ok(typecheck(&logical, &env)?.node)
}

#[test]
fn grouped_query_derives_combined_output_names() {
    let node = check("SELECT symbol, SUM(price) FROM trades GROUP BY symbol").expect("plan");
    let names: Vec<&str> = node.schema.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["symbol", "price_sum"]);
}

#[test]
fn predicate_pushdown_collapses_filter_into_scan() {
    let node = check("SELECT * FROM trades WHERE size > 10").expect("plan");
    assert!(matches!(node.kind, NodeKind::Filter(_)));
    let optimized = Optimizer::new().optimize(node).expect("optimize");
    let NodeKind::Datasource(d) = &optimized.kind else {
        panic!("expected pushed-down scan, got {:?}", optimized.kind)
    };
    assert_eq!(d.predicates.len(), 1);
    assert_eq!(optimized.schema.fields.len(), 3);
}

#[test]
fn describe_of_optimized_plan_is_deterministic() {
    let sql = "SELECT symbol, SUM(size) FROM trades WHERE price > 1.5 GROUP BY symbol";
    let a = Optimizer::new().optimize(check(sql).expect("plan")).expect("optimize");
    let b = Optimizer::new().optimize(check(sql).expect("plan")).expect("optimize");
    assert_eq!(a, b);
    assert_eq!(
        describe_node(&a, SchemaDetail::Include).to_dot(),
        describe_node(&b, SchemaDetail::Include).to_dot()
    );
}

#[test]
fn physical_plan_round_trips_through_serde() {
    let node = check("SELECT symbol, size * 2 AS doubled FROM trades WHERE size > 1")
        .expect("plan");
    let encoded = serde_json::to_string(&node).expect("encode");
    let decoded: rill_planner::Node = serde_json::from_str(&encoded).expect("decode");
    assert_eq!(node, decoded);
}

#[test]
fn join_of_unknown_column_fails_with_its_name() {
    let err = check("SELECT * FROM trades a JOIN trades b ON a.symbol = b.ticker")
        .expect_err("reject");
    assert!(err.to_string().contains("ticker"), "{err}");
}
