//! Output sinks: the loop that drives the root operator, the
//! retraction-aware table sinks, the append-only CSV/JSON sinks and the
//! native length-prefixed wire sink.

use crate::nodes::ExecNode;
use crate::variables::Variables;
use chrono::{DateTime, Utc};
use rill_common::{
    Record, Result, RillError, Schema, SchemaRef, StreamEvent, TaskContext, Value,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Write;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Consumes the events the sink loop pulls from the root.
pub trait QuerySink {
    fn event(&mut self, event: &StreamEvent) -> Result<()>;
    /// End of input. Not called when the query fails or is cancelled.
    fn finish(&mut self) -> Result<()>;
}

/// Drive the root operator to completion. `close` runs on every exit path,
/// including errors and cancellation.
pub fn run_query(
    root: &dyn ExecNode,
    ctx: &TaskContext,
    sink: &mut dyn QuerySink,
) -> Result<()> {
    tracing::debug!(root = root.name(), "starting query");
    let mut stream = root.stream(ctx, &Variables::new())?;
    let outcome = loop {
        match stream.next(ctx) {
            Ok(Some(event)) => {
                if let Err(e) = sink.event(&event) {
                    break Err(e);
                }
            }
            Ok(None) => break sink.finish(),
            Err(e) => break Err(e),
        }
    };
    let closed = stream.close();
    outcome?;
    closed
}

// -----------------------------
// Table sinks
// -----------------------------

/// Ordering configuration for the table buffer.
#[derive(Debug, Clone, Default)]
pub struct SortSpec {
    pub key_indices: Vec<usize>,
    /// `+1` ascending, `-1` descending, parallel to `key_indices`.
    pub multipliers: Vec<i32>,
    /// Render only the first N rows after ordering.
    pub limit: Option<usize>,
}

/// One sort-key element with its direction baked into `Ord`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SortValue {
    Ascending(Value),
    Descending(Value),
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Ascending(a), SortValue::Ascending(b)) => a.cmp(b),
            (SortValue::Descending(a), SortValue::Descending(b)) => b.cmp(a),
            // Keys in one buffer always share directions.
            _ => Ordering::Equal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RowKey {
    key: Vec<SortValue>,
    row: Vec<Value>,
}

/// Buffers the materialized result as an ordered multimap keyed by sort key;
/// retractions decrement. Live mode redraws the whole table after every
/// record, batch mode renders once at end of input.
pub struct TableSink<W: Write> {
    schema: SchemaRef,
    sort: SortSpec,
    rows: BTreeMap<RowKey, usize>,
    live: bool,
    out: W,
}

impl<W: Write> TableSink<W> {
    pub fn live(schema: SchemaRef, sort: SortSpec, out: W) -> Self {
        Self {
            schema,
            sort,
            rows: BTreeMap::new(),
            live: true,
            out,
        }
    }

    pub fn batch(schema: SchemaRef, sort: SortSpec, out: W) -> Self {
        Self {
            schema,
            sort,
            rows: BTreeMap::new(),
            live: false,
            out,
        }
    }

    fn row_key(&self, record: &Record) -> RowKey {
        let key = self
            .sort
            .key_indices
            .iter()
            .zip(&self.sort.multipliers)
            .map(|(i, m)| {
                let value = record.values()[*i].clone();
                if *m < 0 {
                    SortValue::Descending(value)
                } else {
                    SortValue::Ascending(value)
                }
            })
            .collect();
        RowKey {
            key,
            row: record.values().to_vec(),
        }
    }

    fn render(&mut self) -> Result<()> {
        let mut builder = Builder::default();
        builder.push_record(self.schema.fields.iter().map(|f| f.name.clone()));
        let limit = self.sort.limit.unwrap_or(usize::MAX);
        let mut rendered = 0usize;
        'rows: for (key, count) in &self.rows {
            for _ in 0..*count {
                if rendered >= limit {
                    break 'rows;
                }
                builder.push_record(key.row.iter().map(render_cell));
                rendered += 1;
            }
        }
        let mut table = builder.build();
        table.with(Style::ascii());
        if self.live {
            // Redraw in place when attached to a terminal-style device.
            write!(self.out, "\x1b[2J\x1b[H")?;
        }
        writeln!(self.out, "{table}")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> QuerySink for TableSink<W> {
    fn event(&mut self, event: &StreamEvent) -> Result<()> {
        let record = match event {
            StreamEvent::Record(record) => record,
            StreamEvent::Watermark(_) => return Ok(()),
        };
        let key = self.row_key(record);
        if record.is_retraction() {
            match self.rows.get_mut(&key) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    if *count == 0 {
                        self.rows.remove(&key);
                    }
                }
                _ => {
                    return Err(RillError::InvariantViolation(
                        "table sink: retraction for a row the table does not contain"
                            .to_string(),
                    ))
                }
            }
        } else {
            *self.rows.entry(key).or_insert(0) += 1;
        }
        if self.live {
            self.render()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.live {
            self.render()?;
        }
        Ok(())
    }
}

// -----------------------------
// Eager (append-only) sinks
// -----------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EagerFormat {
    Csv,
    Json,
}

/// Writes each record the moment it arrives. Requires a no-retractions
/// input; the engine gates that before construction, so a retraction here is
/// an engine bug.
pub struct EagerSink<W: Write> {
    format: EagerFormat,
    fields: Vec<String>,
    out: W,
}

impl<W: Write> EagerSink<W> {
    pub fn new(schema: &Schema, format: EagerFormat, mut out: W) -> Result<Self> {
        let fields: Vec<String> = schema.fields.iter().map(|f| f.name.clone()).collect();
        if format == EagerFormat::Csv {
            writeln!(out, "{}", fields.iter().map(|f| csv_cell(f)).collect::<Vec<_>>().join(","))?;
        }
        Ok(Self {
            format,
            fields,
            out,
        })
    }
}

impl<W: Write> QuerySink for EagerSink<W> {
    fn event(&mut self, event: &StreamEvent) -> Result<()> {
        let record = match event {
            StreamEvent::Record(record) => record,
            StreamEvent::Watermark(_) => return Ok(()),
        };
        if record.is_retraction() {
            return Err(RillError::InvariantViolation(
                "append-only sink received a retraction".to_string(),
            ));
        }
        match self.format {
            EagerFormat::Csv => {
                let line = record
                    .values()
                    .iter()
                    .map(|v| csv_cell(&render_cell(v)))
                    .collect::<Vec<_>>()
                    .join(",");
                writeln!(self.out, "{line}")?;
            }
            EagerFormat::Json => {
                let object: serde_json::Map<String, serde_json::Value> = self
                    .fields
                    .iter()
                    .zip(record.values())
                    .map(|(name, value)| (name.clone(), value_to_json(value)))
                    .collect();
                writeln!(self.out, "{}", serde_json::Value::Object(object))?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// -----------------------------
// Native stream sink
// -----------------------------

/// One message of the self-describing wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeMessage {
    /// Always the first message of a stream.
    Schema { schema: Schema },
    Record {
        values: Vec<Value>,
        retraction: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        time: Option<DateTime<Utc>>,
    },
    Watermark { time: DateTime<Utc> },
}

/// Length-prefixed sequence of self-describing JSON messages: a schema
/// descriptor, then records (with retraction bit and timestamp) and
/// watermarks.
pub struct NativeSink<W: Write> {
    schema: SchemaRef,
    wrote_schema: bool,
    out: W,
}

impl<W: Write> NativeSink<W> {
    pub fn new(schema: SchemaRef, out: W) -> Self {
        Self {
            schema,
            wrote_schema: false,
            out,
        }
    }

    fn write_message(&mut self, message: &NativeMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| RillError::Runtime(format!("native sink encoding: {e}")))?;
        let length = u32::try_from(payload.len()).map_err(|_| {
            RillError::Runtime("native sink message exceeds u32 length".to_string())
        })?;
        self.out.write_all(&length.to_le_bytes())?;
        self.out.write_all(&payload)?;
        Ok(())
    }

    fn ensure_schema(&mut self) -> Result<()> {
        if !self.wrote_schema {
            self.wrote_schema = true;
            let message = NativeMessage::Schema {
                schema: (*self.schema).clone(),
            };
            self.write_message(&message)?;
        }
        Ok(())
    }
}

impl<W: Write> QuerySink for NativeSink<W> {
    fn event(&mut self, event: &StreamEvent) -> Result<()> {
        self.ensure_schema()?;
        let message = match event {
            StreamEvent::Record(record) => NativeMessage::Record {
                values: record.values().to_vec(),
                retraction: record.is_retraction(),
                time: record.event_time(),
            },
            StreamEvent::Watermark(time) => NativeMessage::Watermark { time: *time },
        };
        self.write_message(&message)
    }

    fn finish(&mut self) -> Result<()> {
        self.ensure_schema()?;
        self.out.flush()?;
        Ok(())
    }
}

// -----------------------------
// Collection sink (embedding, tests)
// -----------------------------

/// Collects records and watermarks in memory.
#[derive(Default)]
pub struct CollectSink {
    pub records: Vec<Record>,
    pub watermarks: Vec<DateTime<Utc>>,
}

impl QuerySink for CollectSink {
    fn event(&mut self, event: &StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Record(record) => self.records.push(record.clone()),
            StreamEvent::Watermark(time) => self.watermarks.push(*time),
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

// -----------------------------
// Cell rendering
// -----------------------------

/// Human rendering for table and CSV cells; unlike [`Value`]'s `Display`,
/// strings are unquoted and nulls empty.
fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_cell(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Time(t) => serde_json::Value::String(t.to_rfc3339()),
        Value::Duration(_) => serde_json::Value::String(value.to_string()),
        Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Object(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::SchemaField;
    use rill_common::Type;
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::batch(vec![
            SchemaField::new("k", Type::Str),
            SchemaField::new("v", Type::Int),
        ]))
    }

    fn rec(k: &str, v: i64) -> StreamEvent {
        StreamEvent::Record(Record::new(
            ["k".to_string(), "v".to_string()].into_iter().collect(),
            vec![Value::Str(k.into()), Value::Int(v)],
        ))
    }

    fn retract(k: &str, v: i64) -> StreamEvent {
        let StreamEvent::Record(r) = rec(k, v) else {
            unreachable!()
        };
        StreamEvent::Record(r.with_retraction(true))
    }

    #[test]
    fn batch_table_renders_once_in_sorted_order() {
        let mut out = Vec::new();
        {
            let mut sink = TableSink::batch(
                schema(),
                SortSpec {
                    key_indices: vec![1],
                    multipliers: vec![-1],
                    limit: Some(2),
                },
                &mut out,
            );
            for event in [rec("a", 1), rec("b", 3), rec("c", 2)] {
                sink.event(&event).expect("event");
            }
            sink.finish().expect("finish");
        }
        let text = String::from_utf8(out).expect("utf8");
        let b = text.find("b").expect("b row");
        let c = text.find("c").expect("c row");
        assert!(b < c, "descending by v: b(3) before c(2): {text}");
        assert!(!text.contains("| a"), "limit 2 drops a(1): {text}");
    }

    #[test]
    fn retraction_removes_row_from_table() {
        let mut out = Vec::new();
        {
            let mut sink = TableSink::batch(schema(), SortSpec::default(), &mut out);
            sink.event(&rec("a", 1)).expect("event");
            sink.event(&rec("a", 1)).expect("event");
            sink.event(&retract("a", 1)).expect("event");
            sink.finish().expect("finish");
        }
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches("| a").count(), 1, "{text}");
    }

    #[test]
    fn retraction_of_absent_row_is_fatal() {
        let mut out = Vec::new();
        let mut sink = TableSink::batch(schema(), SortSpec::default(), &mut out);
        assert!(matches!(
            sink.event(&retract("a", 1)),
            Err(RillError::InvariantViolation(_))
        ));
    }

    #[test]
    fn eager_csv_appends_lines_with_header() {
        let mut out = Vec::new();
        {
            let mut sink =
                EagerSink::new(&schema(), EagerFormat::Csv, &mut out).expect("sink");
            sink.event(&rec("x,y", 1)).expect("event");
            sink.event(&rec("plain", 2)).expect("event");
            sink.finish().expect("finish");
        }
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "k,v\n\"x,y\",1\nplain,2\n");
    }

    #[test]
    fn eager_sink_rejects_retractions() {
        let mut out = Vec::new();
        let mut sink = EagerSink::new(&schema(), EagerFormat::Json, &mut out).expect("sink");
        assert!(matches!(
            sink.event(&retract("a", 1)),
            Err(RillError::InvariantViolation(_))
        ));
    }

    #[test]
    fn native_sink_frames_schema_then_messages() {
        let mut out = Vec::new();
        {
            let mut sink = NativeSink::new(schema(), &mut out);
            sink.event(&rec("a", 1)).expect("event");
            sink.event(&StreamEvent::Watermark(
                chrono::DateTime::from_timestamp(5, 0).expect("time"),
            ))
            .expect("event");
            sink.finish().expect("finish");
        }
        let mut offset = 0usize;
        let mut messages = Vec::new();
        while offset < out.len() {
            let length =
                u32::from_le_bytes(out[offset..offset + 4].try_into().expect("prefix")) as usize;
            offset += 4;
            let message: NativeMessage =
                serde_json::from_slice(&out[offset..offset + length]).expect("decode");
            offset += length;
            messages.push(message);
        }
        assert_eq!(messages.len(), 3);
        assert!(matches!(messages[0], NativeMessage::Schema { .. }));
        assert_eq!(
            messages[1],
            NativeMessage::Record {
                values: vec![Value::Str("a".into()), Value::Int(1)],
                retraction: false,
                time: None,
            }
        );
        assert!(matches!(messages[2], NativeMessage::Watermark { .. }));
    }
}
