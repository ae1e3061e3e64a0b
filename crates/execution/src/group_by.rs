//! Grouping and aggregation.
//!
//! Batch path (no-retractions source): consume everything, then emit one
//! record per group in insertion order. Streaming path: maintain incremental
//! aggregate state per group and, at each trigger point, emit a retraction
//! of the previous emission followed by the new value for every changed
//! group; a group whose contributions reach zero emits only the retraction.

use crate::aggregate::Aggregate;
use crate::expressions::Evaluator;
use crate::group_key::GroupKey;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use indexmap::{IndexMap, IndexSet};
use rill_common::{
    BoxedStream, Record, RecordStream, Result, RillError, SchemaRef, StreamEvent, TaskContext,
    Value,
};
use rill_planner::Trigger;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::collections::VecDeque;
use std::sync::Arc;

/// One configured aggregate: fresh-state factory plus its argument.
pub struct AggregateSpec {
    pub factory: Arc<dyn Fn() -> Box<dyn Aggregate>>,
    pub argument: Arc<Evaluator>,
}

pub struct GroupByExec {
    pub source: BoxedNode,
    pub key: Vec<Arc<Evaluator>>,
    pub aggregates: Vec<AggregateSpec>,
    pub trigger: Trigger,
    /// Source asserted `no_retractions`: take the batch path.
    pub batch: bool,
    pub schema: SchemaRef,
}

impl ExecNode for GroupByExec {
    fn name(&self) -> &'static str {
        "group by"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        let mut groups: Groups = IndexMap::default();
        if self.key.is_empty() {
            // A single global group exists even before (or without) input.
            groups.insert(GroupKey::unit(), self.fresh_group());
        }
        Ok(Box::new(GroupByStream {
            source: self.source.stream(ctx, vars)?,
            key: self.key.clone(),
            aggregates: self
                .aggregates
                .iter()
                .map(|a| (a.factory.clone(), a.argument.clone()))
                .collect(),
            trigger: self.trigger,
            batch: self.batch,
            fields: self.schema.field_names(),
            time_field: self.schema.time_field,
            vars: vars.clone(),
            groups,
            last_emitted: FxHashMap::default(),
            changed: IndexSet::default(),
            pending: VecDeque::new(),
            since_trigger: 0,
            source_done: false,
            drain_index: 0,
        }))
    }
}

impl GroupByExec {
    fn fresh_group(&self) -> GroupState {
        GroupState {
            aggregates: self.aggregates.iter().map(|a| (a.factory)()).collect(),
            record_count: 0,
        }
    }
}

struct GroupState {
    aggregates: Vec<Box<dyn Aggregate>>,
    record_count: i64,
}

type Groups = IndexMap<GroupKey, GroupState, FxBuildHasher>;
type Factory = Arc<dyn Fn() -> Box<dyn Aggregate>>;

struct GroupByStream {
    source: BoxedStream,
    key: Vec<Arc<Evaluator>>,
    aggregates: Vec<(Factory, Arc<Evaluator>)>,
    trigger: Trigger,
    batch: bool,
    fields: Arc<[String]>,
    time_field: Option<usize>,
    vars: Variables,
    groups: Groups,
    /// Previous emission per key, for retraction-then-update sequences.
    last_emitted: FxHashMap<GroupKey, Vec<Value>>,
    changed: IndexSet<GroupKey, FxBuildHasher>,
    pending: VecDeque<StreamEvent>,
    since_trigger: usize,
    source_done: bool,
    drain_index: usize,
}

impl RecordStream for GroupByStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.source_done {
                if !self.batch {
                    return Ok(None);
                }
                let Some((key, state)) = self.groups.get_index(self.drain_index) else {
                    return Ok(None);
                };
                self.drain_index += 1;
                let values = output_values(key, state);
                return Ok(Some(StreamEvent::Record(self.output_record(values, false))));
            }
            match self.source.next(ctx)? {
                Some(StreamEvent::Record(record)) => {
                    self.process(ctx, &record)?;
                    if !self.batch {
                        if let Trigger::PerRecord(n) = self.trigger {
                            self.since_trigger += 1;
                            if self.since_trigger >= n {
                                self.since_trigger = 0;
                                self.flush_changed();
                            }
                        }
                    }
                }
                Some(StreamEvent::Watermark(watermark)) => {
                    if !self.batch && self.trigger == Trigger::Watermark {
                        self.flush_changed();
                    }
                    self.pending.push_back(StreamEvent::Watermark(watermark));
                }
                None => {
                    self.source_done = true;
                    if !self.batch {
                        self.flush_changed();
                    }
                }
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.source.close()
    }
}

impl GroupByStream {
    fn process(&mut self, ctx: &TaskContext, record: &Record) -> Result<()> {
        let key = if self.key.is_empty() {
            GroupKey::unit()
        } else {
            GroupKey(
                self.key
                    .iter()
                    .map(|k| k.evaluate(ctx, record, &self.vars))
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        let arguments = self
            .aggregates
            .iter()
            .map(|(_, arg)| arg.evaluate(ctx, record, &self.vars))
            .collect::<Result<Vec<_>>>()?;

        let state = if record.is_retraction() {
            self.groups.get_mut(&key).ok_or_else(|| {
                RillError::InvariantViolation(
                    "group by: retraction for a group that was never added".to_string(),
                )
            })?
        } else {
            let factories = &self.aggregates;
            self.groups.entry(key.clone()).or_insert_with(|| GroupState {
                aggregates: factories.iter().map(|(f, _)| f()).collect(),
                record_count: 0,
            })
        };

        if record.is_retraction() {
            for (aggregate, value) in state.aggregates.iter_mut().zip(arguments) {
                aggregate.retract(value)?;
            }
            state.record_count -= 1;
            if state.record_count < 0 {
                return Err(RillError::InvariantViolation(
                    "group by: group record count went negative".to_string(),
                ));
            }
        } else {
            for (aggregate, value) in state.aggregates.iter_mut().zip(arguments) {
                aggregate.add(value)?;
            }
            state.record_count += 1;
        }
        if !self.batch {
            self.changed.insert(key);
        }
        Ok(())
    }

    /// Emit retraction-then-update pairs for every group whose output
    /// changed since its previous emission.
    fn flush_changed(&mut self) {
        let keys: Vec<GroupKey> = self.changed.drain(..).collect();
        for key in keys {
            let live = self
                .groups
                .get(&key)
                .filter(|state| state.record_count > 0)
                .map(|state| output_values(&key, state));
            match live {
                Some(current) => {
                    if let Some(previous) = self.last_emitted.get(&key) {
                        if *previous == current {
                            continue;
                        }
                        let retraction = self.output_record(previous.clone(), true);
                        self.pending.push_back(StreamEvent::Record(retraction));
                    }
                    let addition = self.output_record(current.clone(), false);
                    self.pending.push_back(StreamEvent::Record(addition));
                    self.last_emitted.insert(key, current);
                }
                None => {
                    if let Some(previous) = self.last_emitted.remove(&key) {
                        let retraction = self.output_record(previous, true);
                        self.pending.push_back(StreamEvent::Record(retraction));
                    }
                    self.groups.shift_remove(&key);
                }
            }
        }
    }

    fn output_record(&self, values: Vec<Value>, retraction: bool) -> Record {
        let event_time = self
            .time_field
            .and_then(|i| values.get(i))
            .and_then(Value::as_time);
        Record::new(self.fields.clone(), values)
            .with_retraction(retraction)
            .with_event_time(event_time)
    }
}

fn output_values(key: &GroupKey, state: &GroupState) -> Vec<Value> {
    let mut values = key.values().to_vec();
    values.extend(state.aggregates.iter().map(|a| a.value()));
    values
}
