//! JSON-lines table provider: one object per line.
//!
//! The field set is the union over a bounded sample; fields absent from some
//! sampled rows get nullable types.

use crate::catalog::TableDef;
use crate::provider::{ProviderFactory, TableProvider};
use indexmap::IndexMap;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, RillError, Schema, SchemaField, StreamEvent,
    TaskContext, Type, Value,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INFERENCE_SAMPLE_LINES: usize = 1024;

pub struct JsonlFactory;

impl ProviderFactory for JsonlFactory {
    fn open(&self, table: &TableDef) -> Result<Arc<dyn TableProvider>> {
        Ok(Arc::new(JsonlTable::open(&table.uri)?))
    }
}

#[derive(Debug)]
pub struct JsonlTable {
    path: PathBuf,
    schema: Schema,
}

impl JsonlTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            RillError::Datasource(format!("couldn't open {}: {e}", path.display()))
        })?;

        let mut columns: IndexMap<String, Type> = IndexMap::new();
        let mut sampled = 0usize;
        for line in BufReader::new(file).lines().take(INFERENCE_SAMPLE_LINES) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let object = parse_object(&path, sampled + 1, &line)?;
            for (name, value) in &object {
                let typ = Type::of(value);
                match columns.get_mut(name) {
                    Some(existing) => *existing = existing.join(&typ),
                    None => {
                        // Seen first past row one: earlier rows lacked it.
                        let typ = if sampled > 0 { Type::optional(typ) } else { typ };
                        columns.insert(name.clone(), typ);
                    }
                }
            }
            for (name, typ) in columns.iter_mut() {
                if !object.contains_key(name) {
                    *typ = Type::optional(typ.clone());
                }
            }
            sampled += 1;
        }

        let fields = columns
            .into_iter()
            .map(|(name, typ)| SchemaField::new(name, typ))
            .collect();
        Ok(Self {
            path,
            schema: Schema::batch(fields),
        })
    }
}

impl TableProvider for JsonlTable {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn scan(&self) -> Result<BoxedStream> {
        let file = File::open(&self.path).map_err(|e| {
            RillError::Datasource(format!("couldn't open {}: {e}", self.path.display()))
        })?;
        Ok(Box::new(JsonlStream {
            path: self.path.clone(),
            lines: Some(BufReader::new(file).lines()),
            fields: self.schema.field_names(),
            line_number: 0,
        }))
    }
}

struct JsonlStream {
    path: PathBuf,
    lines: Option<std::io::Lines<BufReader<File>>>,
    fields: Arc<[String]>,
    line_number: usize,
}

impl RecordStream for JsonlStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        ctx.check_cancelled()?;
        let lines = match self.lines.as_mut() {
            Some(lines) => lines,
            None => return Ok(None),
        };
        loop {
            let Some(line) = lines.next().transpose()? else {
                self.lines = None;
                return Ok(None);
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let mut object = parse_object(&self.path, self.line_number, &line)?;
            let values = self
                .fields
                .iter()
                .map(|name| object.shift_remove(name).unwrap_or(Value::Null))
                .collect();
            return Ok(Some(StreamEvent::Record(Record::new(
                self.fields.clone(),
                values,
            ))));
        }
    }

    fn close(&mut self) -> Result<()> {
        self.lines = None;
        Ok(())
    }
}

fn parse_object(path: &Path, line_number: usize, line: &str) -> Result<IndexMap<String, Value>> {
    let parsed: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        RillError::Datasource(format!("{}:{line_number}: invalid JSON: {e}", path.display()))
    })?;
    match json_to_value(parsed) {
        Value::Object(m) => Ok(m),
        other => Err(RillError::Datasource(format!(
            "{}:{line_number}: expected a JSON object per line, got {}",
            path.display(),
            other.type_name()
        ))),
    }
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::Tuple(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}
