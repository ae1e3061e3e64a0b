//! The executable-node contract and the in-memory replay node.

use crate::variables::Variables;
use rill_common::{BoxedStream, RecordStream, Result, SchemaRef, StreamEvent, TaskContext};
use std::collections::VecDeque;

/// A materialized operator instance.
///
/// `stream` starts one pull-based scan of this operator under the given
/// variable context; lookup joins and correlated subqueries call it many
/// times with different contexts.
pub trait ExecNode {
    /// Stable operator name for logging and error context.
    fn name(&self) -> &'static str;

    /// Schema of every record the streams produce.
    fn schema(&self) -> &SchemaRef;

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream>;
}

pub type BoxedNode = Box<dyn ExecNode>;

/// Replays a fixed event sequence. The leaf under operator tests, and the
/// carrier for retraction/watermark scenarios that file sources cannot
/// express.
pub struct MemoryNode {
    schema: SchemaRef,
    events: Vec<StreamEvent>,
}

impl MemoryNode {
    pub fn new(schema: SchemaRef, events: Vec<StreamEvent>) -> Self {
        Self { schema, events }
    }
}

impl ExecNode for MemoryNode {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, _ctx: &TaskContext, _vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(MemoryStream {
            events: self.events.clone().into(),
        }))
    }
}

struct MemoryStream {
    events: VecDeque<StreamEvent>,
}

impl RecordStream for MemoryStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        ctx.check_cancelled()?;
        Ok(self.events.pop_front())
    }

    fn close(&mut self) -> Result<()> {
        self.events.clear();
        Ok(())
    }
}
