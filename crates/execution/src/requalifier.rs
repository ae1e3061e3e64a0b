//! Requalifier: rename every field's qualifier prefix; values pass through.

use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, SchemaRef, StreamEvent, TaskContext,
};
use std::sync::Arc;

pub struct RequalifierExec {
    pub source: BoxedNode,
    pub schema: SchemaRef,
}

impl ExecNode for RequalifierExec {
    fn name(&self) -> &'static str {
        "requalifier"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(RequalifierStream {
            source: self.source.stream(ctx, vars)?,
            fields: self.schema.field_names(),
        }))
    }
}

struct RequalifierStream {
    source: BoxedStream,
    fields: Arc<[String]>,
}

impl RecordStream for RequalifierStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        match self.source.next(ctx)? {
            Some(StreamEvent::Record(record)) => {
                let retraction = record.is_retraction();
                let event_time = record.event_time();
                Ok(Some(StreamEvent::Record(
                    Record::new(self.fields.clone(), record.into_values())
                        .with_retraction(retraction)
                        .with_event_time(event_time),
                )))
            }
            other => Ok(other),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use rill_common::{Type, Value};

    #[test]
    fn renames_fields_keeps_values() {
        let input = batch_schema(&[("t.a", Type::Int), ("t.b", Type::Str)]);
        let output = batch_schema(&[("u.a", Type::Int), ("u.b", Type::Str)]);
        let node = RequalifierExec {
            source: Box::new(memory(
                &input,
                vec![record(&input, vec![Value::Int(1), Value::Str("x".into())])],
            )),
            schema: output,
        };
        let records = drain_records(&node);
        assert_eq!(
            records[0].fields().as_ref(),
            ["u.a".to_string(), "u.b".to_string()]
        );
        assert_eq!(records[0].values(), [Value::Int(1), Value::Str("x".into())]);
    }
}
