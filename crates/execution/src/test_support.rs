//! Shared fixtures for operator tests.

use crate::nodes::{ExecNode, MemoryNode};
use crate::variables::Variables;
use rill_common::{Record, Schema, SchemaField, SchemaRef, StreamEvent, TaskContext, Type, Value};
use std::sync::Arc;

pub(crate) fn batch_schema(fields: &[(&str, Type)]) -> SchemaRef {
    Arc::new(Schema::batch(
        fields
            .iter()
            .map(|(n, t)| SchemaField::new(*n, t.clone()))
            .collect(),
    ))
}

pub(crate) fn stream_schema(fields: &[(&str, Type)]) -> SchemaRef {
    Arc::new(Schema::stream(
        fields
            .iter()
            .map(|(n, t)| SchemaField::new(*n, t.clone()))
            .collect(),
    ))
}

pub(crate) fn record(schema: &SchemaRef, values: Vec<Value>) -> StreamEvent {
    StreamEvent::Record(Record::new(schema.field_names(), values))
}

pub(crate) fn retraction(schema: &SchemaRef, values: Vec<Value>) -> StreamEvent {
    StreamEvent::Record(Record::retraction(schema.field_names(), values))
}

pub(crate) fn memory(schema: &SchemaRef, events: Vec<StreamEvent>) -> MemoryNode {
    MemoryNode::new(schema.clone(), events)
}

/// Drain a node to completion, panicking on errors, dropping watermarks.
pub(crate) fn drain_records(node: &dyn ExecNode) -> Vec<Record> {
    drain_events(node)
        .into_iter()
        .filter_map(|e| match e {
            StreamEvent::Record(r) => Some(r),
            StreamEvent::Watermark(_) => None,
        })
        .collect()
}

/// Drain a node to completion, panicking on errors.
pub(crate) fn drain_events(node: &dyn ExecNode) -> Vec<StreamEvent> {
    let ctx = TaskContext::default();
    let mut stream = node
        .stream(&ctx, &Variables::new())
        .expect("stream construction");
    let mut events = Vec::new();
    while let Some(event) = stream.next(&ctx).expect("next") {
        events.push(event);
    }
    stream.close().expect("close");
    events
}

/// `(values, retraction)` pairs for terse assertions.
pub(crate) fn rows(records: &[Record]) -> Vec<(Vec<Value>, bool)> {
    records
        .iter()
        .map(|r| (r.values().to_vec(), r.is_retraction()))
        .collect()
}
