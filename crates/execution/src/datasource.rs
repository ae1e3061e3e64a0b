//! Datasource leaf: scans a table provider, requalifies field names and
//! applies pushed-down predicates.

use crate::expressions::Evaluator;
use crate::nodes::ExecNode;
use crate::variables::Variables;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, SchemaRef, StreamEvent, TaskContext, Value,
};
use rill_storage::TableProvider;
use std::sync::Arc;

pub struct DatasourceExec {
    pub provider: Arc<dyn TableProvider>,
    pub predicates: Vec<Arc<Evaluator>>,
    pub schema: SchemaRef,
}

impl ExecNode for DatasourceExec {
    fn name(&self) -> &'static str {
        "datasource"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, _ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(DatasourceStream {
            inner: Some(self.provider.scan()?),
            fields: self.schema.field_names(),
            time_field: self.schema.time_field,
            predicates: self.predicates.clone(),
            vars: vars.clone(),
        }))
    }
}

struct DatasourceStream {
    inner: Option<BoxedStream>,
    fields: Arc<[String]>,
    time_field: Option<usize>,
    predicates: Vec<Arc<Evaluator>>,
    vars: Variables,
}

impl RecordStream for DatasourceStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Ok(None),
        };
        loop {
            match inner.next(ctx)? {
                Some(StreamEvent::Record(r)) => {
                    let retraction = r.is_retraction();
                    let values = r.into_values();
                    let event_time = self
                        .time_field
                        .and_then(|i| values.get(i))
                        .and_then(Value::as_time);
                    let record = Record::new(self.fields.clone(), values)
                        .with_retraction(retraction)
                        .with_event_time(event_time);
                    let keep = self
                        .predicates
                        .iter()
                        .map(|p| p.evaluate(ctx, &record, &self.vars))
                        .try_fold(true, |acc, v| v.map(|v| acc && v.is_truthy()))?;
                    if keep {
                        return Ok(Some(StreamEvent::Record(record)));
                    }
                }
                Some(watermark @ StreamEvent::Watermark(_)) => return Ok(Some(watermark)),
                None => {
                    self.inner = None;
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.close()?;
        }
        Ok(())
    }
}
