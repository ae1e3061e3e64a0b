//! CSV table provider.
//!
//! The header row names the fields; per-column types are inferred from a
//! bounded sample with the Int < Float < String widening walk, plus Boolean
//! and RFC3339 Time literals. Scans re-read the file, so a `poll` wrapper
//! observes edits.

use crate::catalog::TableDef;
use crate::provider::{ProviderFactory, TableProvider};
use chrono::{DateTime, Utc};
use rill_common::{
    BoxedStream, RecordStream, Result, RillError, Schema, SchemaField, StreamEvent, TaskContext,
    Type, Value,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INFERENCE_SAMPLE_LINES: usize = 1024;

pub struct CsvFactory;

impl ProviderFactory for CsvFactory {
    fn open(&self, table: &TableDef) -> Result<Arc<dyn TableProvider>> {
        Ok(Arc::new(CsvTable::open(&table.uri)?))
    }
}

pub struct CsvTable {
    path: PathBuf,
    schema: Schema,
}

impl CsvTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            RillError::Datasource(format!("couldn't open {}: {e}", path.display()))
        })?;
        let mut lines = BufReader::new(file).lines();
        let header = lines
            .next()
            .transpose()?
            .ok_or_else(|| {
                RillError::Datasource(format!("{} is empty, expected a header row", path.display()))
            })?;
        let names = split_csv_line(&header);

        let mut column_types: Vec<Type> = vec![Type::Union(vec![]); names.len()];
        for line in lines.take(INFERENCE_SAMPLE_LINES) {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let cells = split_csv_line(&line);
            if cells.len() != names.len() {
                return Err(RillError::Datasource(format!(
                    "{}: row has {} cells, header has {}",
                    path.display(),
                    cells.len(),
                    names.len()
                )));
            }
            for (typ, cell) in column_types.iter_mut().zip(&cells) {
                *typ = typ.join(&infer_cell_type(cell));
            }
        }

        let fields = names
            .into_iter()
            .zip(column_types)
            .map(|(name, typ)| {
                // A column with no sampled rows stays readable as strings.
                let typ = if typ.is_empty() { Type::Str } else { typ };
                SchemaField::new(name, typ)
            })
            .collect();
        Ok(Self {
            path,
            schema: Schema::batch(fields),
        })
    }
}

impl TableProvider for CsvTable {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn scan(&self) -> Result<BoxedStream> {
        let file = File::open(&self.path).map_err(|e| {
            RillError::Datasource(format!("couldn't open {}: {e}", self.path.display()))
        })?;
        let mut lines = BufReader::new(file).lines();
        // Skip the header.
        lines.next().transpose()?;
        Ok(Box::new(CsvStream {
            path: self.path.clone(),
            lines: Some(lines),
            fields: self.schema.field_names(),
            types: self.schema.fields.iter().map(|f| f.typ.clone()).collect(),
            line_number: 1,
        }))
    }
}

struct CsvStream {
    path: PathBuf,
    lines: Option<std::io::Lines<BufReader<File>>>,
    fields: Arc<[String]>,
    types: Vec<Type>,
    line_number: usize,
}

impl RecordStream for CsvStream {
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
            if line.is_empty() {
                continue;
            }
            let cells = split_csv_line(&line);
            if cells.len() != self.fields.len() {
                return Err(RillError::Datasource(format!(
                    "{}:{}: row has {} cells, schema has {}",
                    self.path.display(),
                    self.line_number,
                    cells.len(),
                    self.fields.len()
                )));
            }
            let values = cells
                .iter()
                .zip(&self.types)
                .map(|(cell, typ)| parse_cell(cell, typ))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| match e {
                    RillError::Datasource(msg) => RillError::Datasource(format!(
                        "{}:{}: {msg}",
                        self.path.display(),
                        self.line_number
                    )),
                    other => other,
                })?;
            return Ok(Some(StreamEvent::Record(rill_common::Record::new(
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

/// Split one CSV line, honoring double-quoted cells with `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                cells.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    cells.push(current);
    cells
}

fn infer_cell_type(cell: &str) -> Type {
    if cell.is_empty() {
        return Type::Null;
    }
    if cell.parse::<i64>().is_ok() {
        return Type::Int;
    }
    if cell.parse::<f64>().is_ok() {
        return Type::Float;
    }
    if cell == "true" || cell == "false" {
        return Type::Boolean;
    }
    if DateTime::parse_from_rfc3339(cell).is_ok() {
        return Type::Time;
    }
    Type::Str
}

fn parse_cell(cell: &str, typ: &Type) -> Result<Value> {
    if cell.is_empty() {
        return Ok(Value::Null);
    }
    let base = match typ {
        Type::Union(members) => members
            .iter()
            .find(|m| !matches!(m, Type::Null))
            .unwrap_or(&Type::Str),
        other => other,
    };
    match base {
        Type::Int => cell
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RillError::Datasource(format!("invalid Int cell: {cell}"))),
        Type::Float => cell
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| RillError::Datasource(format!("invalid Float cell: {cell}"))),
        Type::Boolean => match cell {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(RillError::Datasource(format!("invalid Boolean cell: {cell}"))),
        },
        Type::Time => DateTime::parse_from_rfc3339(cell)
            .map(|t| Value::Time(t.with_timezone(&Utc)))
            .map_err(|_| RillError::Datasource(format!("invalid Time cell: {cell}"))),
        _ => Ok(Value::Str(cell.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .expect("tempfile");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    fn drain(table: &CsvTable) -> Vec<Vec<Value>> {
        let ctx = TaskContext::default();
        let mut stream = table.scan().expect("scan");
        let mut rows = Vec::new();
        while let Some(event) = stream.next(&ctx).expect("next") {
            match event {
                StreamEvent::Record(r) => {
                    assert!(!r.is_retraction());
                    rows.push(r.values().to_vec());
                }
                StreamEvent::Watermark(_) => panic!("csv emits no watermarks"),
            }
        }
        stream.close().expect("close");
        rows
    }

    #[test]
    fn infers_types_and_scans_in_file_order() {
        let file = write_csv("k,v\na,1\na,2\nb,3\n");
        let table = CsvTable::open(file.path()).expect("open");
        assert_eq!(table.schema().fields[0].typ, Type::Str);
        assert_eq!(table.schema().fields[1].typ, Type::Int);
        assert!(table.schema().no_retractions);
        let rows = drain(&table);
        assert_eq!(
            rows,
            vec![
                vec![Value::Str("a".into()), Value::Int(1)],
                vec![Value::Str("a".into()), Value::Int(2)],
                vec![Value::Str("b".into()), Value::Int(3)],
            ]
        );
    }

    #[test]
    fn int_widens_to_float_and_empty_cells_are_null() {
        let file = write_csv("x\n1\n2.5\n\n");
        let table = CsvTable::open(file.path()).expect("open");
        assert_eq!(
            table.schema().fields[0].typ,
            Type::optional(Type::Float)
        );
        let rows = drain(&table);
        assert_eq!(rows[0], vec![Value::Float(1.0)]);
        assert_eq!(rows[1], vec![Value::Float(2.5)]);
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let file = write_csv("name\n\"a,b\"\n\"say \"\"hi\"\"\"\n");
        let table = CsvTable::open(file.path()).expect("open");
        let rows = drain(&table);
        assert_eq!(rows[0], vec![Value::Str("a,b".into())]);
        assert_eq!(rows[1], vec![Value::Str("say \"hi\"".into())]);
    }

    #[test]
    fn ragged_row_is_a_datasource_error() {
        let file = write_csv("a,b\n1\n");
        let table = CsvTable::open(file.path());
        assert!(matches!(table, Err(RillError::Datasource(_))));
    }

    #[test]
    fn missing_file_fails_at_open() {
        assert!(matches!(
            CsvTable::open("/nonexistent/rill.csv"),
            Err(RillError::Datasource(_))
        ));
    }

    #[test]
    fn cancellation_surfaces_between_records() {
        let file = write_csv("x\n1\n2\n");
        let table = CsvTable::open(file.path()).expect("open");
        let cancel = rill_common::CancelToken::new();
        let ctx = TaskContext::new(cancel.clone());
        let mut stream = table.scan().expect("scan");
        stream.next(&ctx).expect("first record");
        cancel.cancel();
        assert!(matches!(stream.next(&ctx), Err(RillError::Cancelled)));
        assert!(stream.close().is_ok());
    }
}
