use rill_client::{Engine, OutputSpec};
use rill_common::{EngineConfig, RillError, TaskContext, Value};
use std::collections::HashMap;
use std::io::Write;

fn engine_with_csv(name: &str, content: &str) -> (Engine, tempfile::NamedTempFile) {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .expect("tempfile");
    file.write_all(content.as_bytes()).expect("write fixture");
    let mut engine = Engine::new(EngineConfig::default());
    engine.register_table(rill_storage::TableDef {
        name: name.to_string(),
        format: "csv".to_string(),
        uri: file.path().to_string_lossy().into_owned(),
        options: HashMap::new(),
    });
    (engine, file)
}

fn values(records: &[rill_common::Record]) -> Vec<Vec<Value>> {
    records.iter().map(|r| r.values().to_vec()).collect()
}

#[test]
fn select_star_emits_rows_in_file_order() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\na,2\nb,3\n");
    let (schema, records) = engine.collect("SELECT * FROM t").expect("collect");
    assert!(schema.no_retractions);
    assert!(records.iter().all(|r| !r.is_retraction()));
    assert_eq!(
        values(&records),
        vec![
            vec![Value::Str("a".into()), Value::Int(1)],
            vec![Value::Str("a".into()), Value::Int(2)],
            vec![Value::Str("b".into()), Value::Int(3)],
        ]
    );
}

#[test]
fn count_star_counts_all_rows() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\na,2\nb,3\n");
    let (_, records) = engine.collect("SELECT COUNT(*) FROM t").expect("collect");
    assert_eq!(values(&records), vec![vec![Value::Int(3)]]);
}

#[test]
fn count_over_empty_input_is_zero() {
    let (engine, _file) = engine_with_csv("t", "k,v\n");
    let (_, records) = engine.collect("SELECT COUNT(*) FROM t").expect("collect");
    assert_eq!(values(&records), vec![vec![Value::Int(0)]]);
}

#[test]
fn grouped_sum_matches_expected_groups() {
    // Scenario: (a,1),(a,2),(b,3) grouped by k, summed over v.
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\na,2\nb,3\n");
    let (schema, records) = engine
        .collect("SELECT k, SUM(v) FROM t GROUP BY k")
        .expect("collect");
    assert_eq!(schema.fields[0].name, "k");
    assert_eq!(schema.fields[1].name, "v_sum");
    let mut rows = values(&records);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec![Value::Str("a".into()), Value::Int(3)],
            vec![Value::Str("b".into()), Value::Int(3)],
        ]
    );
}

#[test]
fn range_self_join_on_value_equality() {
    let engine = Engine::new(EngineConfig::default());
    let (_, records) = engine
        .collect("SELECT * FROM range(0, 5) r1 JOIN range(0, 5) r2 ON r1.i = r2.i")
        .expect("collect");
    let mut rows = values(&records);
    rows.sort();
    assert_eq!(
        rows,
        (0..5)
            .map(|i| vec![Value::Int(i), Value::Int(i)])
            .collect::<Vec<_>>()
    );
}

#[test]
fn order_by_desc_limit_two() {
    let (engine, _file) = engine_with_csv("t", "v\n1\n3\n2\n5\n4\n");
    let (_, records) = engine
        .collect("SELECT * FROM t ORDER BY v DESC LIMIT 2")
        .expect("collect");
    assert_eq!(
        values(&records),
        vec![vec![Value::Int(5)], vec![Value::Int(4)]]
    );
}

#[test]
fn describe_prints_projected_schema() {
    // SELECT a+1 AS x FROM t(a INT) has schema {x: Int}.
    let (engine, _file) = engine_with_csv("t", "a\n7\n");
    let prepared = engine
        .prepare("SELECT a + 1 AS x FROM t", true, OutputSpec::BatchTable)
        .expect("prepare");
    assert_eq!(prepared.schema().to_string(), "{x: Int}");
}

#[test]
fn where_filters_rows() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\nb,5\nc,3\n");
    let (_, records) = engine
        .collect("SELECT k FROM t WHERE v > 2")
        .expect("collect");
    assert_eq!(
        values(&records),
        vec![vec![Value::Str("b".into())], vec![Value::Str("c".into())]]
    );
}

#[test]
fn distinct_deduplicates() {
    let (engine, _file) = engine_with_csv("t", "k\na\nb\na\na\n");
    let (_, records) = engine.collect("SELECT DISTINCT k FROM t").expect("collect");
    assert_eq!(
        values(&records),
        vec![vec![Value::Str("a".into())], vec![Value::Str("b".into())]]
    );
}

#[test]
fn scalar_subquery_compares_against_aggregate() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\nb,5\nc,3\n");
    let (_, records) = engine
        .collect("SELECT k FROM t WHERE v = (SELECT MAX(v) FROM t)")
        .expect("collect");
    assert_eq!(values(&records), vec![vec![Value::Str("b".into())]]);
}

#[test]
fn cte_inlines_with_its_own_qualifier() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\nb,2\n");
    let (_, records) = engine
        .collect("WITH big AS (SELECT * FROM t WHERE v > 1) SELECT k FROM big")
        .expect("collect");
    assert_eq!(values(&records), vec![vec![Value::Str("b".into())]]);
}

#[test]
fn csv_output_writes_header_and_rows() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\nb,2\n");
    let prepared = engine
        .prepare("SELECT * FROM t", true, OutputSpec::Csv)
        .expect("prepare");
    let mut out = Vec::new();
    engine
        .execute(&prepared, &TaskContext::default(), &mut out)
        .expect("execute");
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(text, "t.k,t.v\na,1\nb,2\n");
}

#[test]
fn batch_table_output_honors_order_and_limit() {
    let (engine, _file) = engine_with_csv("t", "v\n1\n3\n2\n5\n4\n");
    let prepared = engine
        .prepare(
            "SELECT * FROM t ORDER BY v DESC LIMIT 2",
            true,
            OutputSpec::BatchTable,
        )
        .expect("prepare");
    let mut out = Vec::new();
    engine
        .execute(&prepared, &TaskContext::default(), &mut out)
        .expect("execute");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("| 5"), "{text}");
    assert!(text.contains("| 4"), "{text}");
    assert!(!text.contains("| 3"), "limit 2: {text}");
}

#[test]
fn limit_on_stream_output_is_rejected() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\n");
    let err = engine
        .prepare("SELECT * FROM poll(t) LIMIT 2", true, OutputSpec::Csv)
        .expect_err("reject");
    assert!(matches!(err, RillError::Unsupported(_)), "{err}");
}

#[test]
fn append_only_output_over_retracting_stream_is_rejected() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\n");
    let err = engine
        .prepare("SELECT * FROM poll(t)", true, OutputSpec::Csv)
        .expect_err("reject");
    assert!(matches!(err, RillError::Unsupported(_)), "{err}");
}

#[test]
fn unknown_table_is_a_type_error() {
    let engine = Engine::new(EngineConfig::default());
    let err = engine.collect("SELECT * FROM missing").expect_err("reject");
    assert!(matches!(err, RillError::Type(_)), "{err}");
}

#[test]
fn unknown_column_names_the_offender() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\n");
    let err = engine.collect("SELECT nope FROM t").expect_err("reject");
    assert!(err.to_string().contains("nope"), "{err}");
}

#[test]
fn cancellation_surfaces_and_close_succeeds() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\nb,2\n");
    let prepared = engine
        .prepare("SELECT * FROM t", true, OutputSpec::BatchTable)
        .expect("prepare");
    let cancel = rill_common::CancelToken::new();
    cancel.cancel();
    let ctx = TaskContext::new(cancel);
    let mut out = Vec::new();
    let err = engine
        .execute(&prepared, &ctx, &mut out)
        .expect_err("cancelled");
    assert!(matches!(err, RillError::Cancelled), "{err}");
}

#[test]
fn implicit_file_table_resolves_by_path() {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .expect("tempfile");
    file.write_all(b"x\n42\n").expect("write");
    let engine = Engine::new(EngineConfig::default());
    let sql = format!("SELECT * FROM \"{}\"", file.path().display());
    let (_, records) = engine.collect(&sql).expect("collect");
    assert_eq!(values(&records), vec![vec![Value::Int(42)]]);
}

#[test]
fn lateral_subquery_closes_over_outer_columns() {
    let (mut engine, _t) = engine_with_csv("t", "v\n1\n2\n");
    let mut one = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .expect("tempfile");
    one.write_all(b"x\n0\n").expect("write");
    engine.register_table(rill_storage::TableDef {
        name: "one".to_string(),
        format: "csv".to_string(),
        uri: one.path().to_string_lossy().into_owned(),
        options: HashMap::new(),
    });
    let (_, records) = engine
        .collect("SELECT * FROM t, LATERAL (SELECT v + 1 AS w FROM one) s")
        .expect("collect");
    assert_eq!(
        values(&records),
        vec![
            vec![Value::Int(1), Value::Int(2)],
            vec![Value::Int(2), Value::Int(3)],
        ]
    );
}

#[test]
fn preparing_twice_yields_equal_schemas_and_name_maps() {
    let (engine, _file) = engine_with_csv("t", "k,v\na,1\n");
    let sql = "SELECT k, SUM(v) FROM t GROUP BY k";
    let a = engine
        .prepare(sql, true, OutputSpec::BatchTable)
        .expect("first");
    let b = engine
        .prepare(sql, true, OutputSpec::BatchTable)
        .expect("second");
    assert_eq!(a.schema(), b.schema());
    assert_eq!(a.name_map(), b.name_map());
}
