//! Unnest: one output record per element of the named list-typed field.

use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, RillError, SchemaRef, StreamEvent, TaskContext,
    Value,
};
use std::collections::VecDeque;
use std::sync::Arc;

pub struct UnnestExec {
    pub source: BoxedNode,
    pub field_index: usize,
    pub schema: SchemaRef,
}

impl ExecNode for UnnestExec {
    fn name(&self) -> &'static str {
        "unnest"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(UnnestStream {
            source: self.source.stream(ctx, vars)?,
            field_index: self.field_index,
            fields: self.schema.field_names(),
            pending: VecDeque::new(),
        }))
    }
}

struct UnnestStream {
    source: BoxedStream,
    field_index: usize,
    fields: Arc<[String]>,
    pending: VecDeque<Record>,
}

impl RecordStream for UnnestStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(StreamEvent::Record(record)));
            }
            match self.source.next(ctx)? {
                Some(StreamEvent::Record(record)) => {
                    let elements = match &record.values()[self.field_index] {
                        Value::Tuple(items) => items.clone(),
                        Value::Null => continue,
                        other => {
                            return Err(RillError::Runtime(format!(
                                "unnest: expected a list, got {}",
                                other.type_name()
                            )))
                        }
                    };
                    for element in elements {
                        let mut values = record.values().to_vec();
                        values[self.field_index] = element;
                        self.pending.push_back(
                            Record::new(self.fields.clone(), values)
                                .with_retraction(record.is_retraction())
                                .with_event_time(record.event_time()),
                        );
                    }
                }
                other => return Ok(other),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.source.close()
    }
}
