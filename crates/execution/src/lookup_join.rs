//! Lookup join: re-parameterize the joined subplan per outer record and
//! drain it fully. A lookup that exceeds the configured row bound is
//! declared non-terminating.

use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, RillError, SchemaRef, StreamEvent, TaskContext,
};
use std::sync::Arc;

pub struct LookupJoinExec {
    pub source: BoxedNode,
    pub joined: Arc<dyn ExecNode>,
    pub row_limit: usize,
    pub schema: SchemaRef,
}

impl ExecNode for LookupJoinExec {
    fn name(&self) -> &'static str {
        "lookup join"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(LookupJoinStream {
            source: self.source.stream(ctx, vars)?,
            joined: self.joined.clone(),
            fields: self.schema.field_names(),
            vars: vars.clone(),
            row_limit: self.row_limit,
            current: None,
        }))
    }
}

struct LookupJoinStream {
    source: BoxedStream,
    joined: Arc<dyn ExecNode>,
    fields: Arc<[String]>,
    vars: Variables,
    row_limit: usize,
    current: Option<Lookup>,
}

struct Lookup {
    outer: Record,
    inner: BoxedStream,
    rows: usize,
}

impl RecordStream for LookupJoinStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(lookup) = self.current.as_mut() {
                match lookup.inner.next(ctx)? {
                    Some(StreamEvent::Record(inner)) => {
                        lookup.rows += 1;
                        if lookup.rows > self.row_limit {
                            return Err(RillError::Runtime(format!(
                                "lookup join: joined side produced more than {} rows for one record; lookup must be finite",
                                self.row_limit
                            )));
                        }
                        let mut values = lookup.outer.values().to_vec();
                        values.extend_from_slice(inner.values());
                        let retraction =
                            lookup.outer.is_retraction() ^ inner.is_retraction();
                        return Ok(Some(StreamEvent::Record(
                            Record::new(self.fields.clone(), values)
                                .with_retraction(retraction)
                                .with_event_time(lookup.outer.event_time()),
                        )));
                    }
                    // Subplan watermarks carry no meaning across lookups.
                    Some(StreamEvent::Watermark(_)) => continue,
                    None => {
                        let mut finished = self.current.take().expect("current checked");
                        finished.inner.close()?;
                    }
                }
                continue;
            }
            match self.source.next(ctx)? {
                Some(StreamEvent::Record(outer)) => {
                    let scoped = self
                        .vars
                        .with_record(outer.fields().clone(), outer.values().to_vec());
                    let inner = self.joined.stream(ctx, &scoped)?;
                    self.current = Some(Lookup {
                        outer,
                        inner,
                        rows: 0,
                    });
                }
                other => return Ok(other),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut lookup) = self.current.take() {
            lookup.inner.close()?;
        }
        self.source.close()
    }
}
