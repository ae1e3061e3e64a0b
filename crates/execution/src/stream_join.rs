//! Symmetric retraction-aware hash join.
//!
//! Two multiset indices keyed by join-key tuples, one per side. Each
//! incoming record probes the opposite index, emits one combined record per
//! stored match (retractions of the input retract all previously emitted
//! pairs involving it), then updates its own index. Output for a given pair
//! follows the arrival of the second participant.

use crate::expressions::Evaluator;
use crate::group_key::GroupKey;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use chrono::{DateTime, Utc};
use rill_common::{
    BoxedStream, Record, RecordStream, Result, RillError, SchemaRef, StreamEvent, TaskContext,
    Value,
};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct StreamJoinExec {
    pub left: BoxedNode,
    pub right: BoxedNode,
    pub left_key: Vec<Arc<Evaluator>>,
    pub right_key: Vec<Arc<Evaluator>>,
    pub schema: SchemaRef,
}

impl ExecNode for StreamJoinExec {
    fn name(&self) -> &'static str {
        "stream join"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(StreamJoinStream {
            sides: [
                Side::new(self.left.stream(ctx, vars)?, self.left_key.clone()),
                Side::new(self.right.stream(ctx, vars)?, self.right_key.clone()),
            ],
            fields: self.schema.field_names(),
            vars: vars.clone(),
            pending: VecDeque::new(),
            emitted_watermark: None,
            turn: 0,
        }))
    }
}

struct Stored {
    values: Vec<Value>,
    event_time: Option<DateTime<Utc>>,
}

struct Side {
    stream: BoxedStream,
    key: Vec<Arc<Evaluator>>,
    index: FxHashMap<GroupKey, Vec<Stored>>,
    watermark: Option<DateTime<Utc>>,
    done: bool,
}

impl Side {
    fn new(stream: BoxedStream, key: Vec<Arc<Evaluator>>) -> Self {
        Self {
            stream,
            key,
            index: FxHashMap::default(),
            watermark: None,
            done: false,
        }
    }
}

struct StreamJoinStream {
    /// `[left, right]`.
    sides: [Side; 2],
    fields: Arc<[String]>,
    vars: Variables,
    pending: VecDeque<StreamEvent>,
    emitted_watermark: Option<DateTime<Utc>>,
    turn: usize,
}

impl RecordStream for StreamJoinStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            let side = match (self.sides[0].done, self.sides[1].done) {
                (true, true) => return Ok(None),
                (true, false) => 1,
                (false, true) => 0,
                (false, false) => {
                    // Alternate pulls so neither side starves the other's
                    // index.
                    self.turn ^= 1;
                    self.turn
                }
            };
            match self.sides[side].stream.next(ctx)? {
                Some(StreamEvent::Record(record)) => self.process(ctx, side, record)?,
                Some(StreamEvent::Watermark(watermark)) => {
                    let current = &mut self.sides[side].watermark;
                    *current = Some(current.map_or(watermark, |w| w.max(watermark)));
                    if let (Some(l), Some(r)) =
                        (self.sides[0].watermark, self.sides[1].watermark)
                    {
                        let combined = l.min(r);
                        if self.emitted_watermark.is_none_or(|w| combined > w) {
                            self.emitted_watermark = Some(combined);
                            self.pending.push_back(StreamEvent::Watermark(combined));
                        }
                    }
                }
                None => self.sides[side].done = true,
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        let first = self.sides[0].stream.close();
        let second = self.sides[1].stream.close();
        first.and(second)
    }
}

impl StreamJoinStream {
    fn process(&mut self, ctx: &TaskContext, side: usize, record: Record) -> Result<()> {
        let key = GroupKey(
            self.sides[side]
                .key
                .iter()
                .map(|k| k.evaluate(ctx, &record, &self.vars))
                .collect::<Result<Vec<_>>>()?,
        );

        // 1. Probe the opposite index.
        if let Some(matches) = self.sides[side ^ 1].index.get(&key) {
            for stored in matches {
                let mut values =
                    Vec::with_capacity(record.values().len() + stored.values.len());
                if side == 0 {
                    values.extend_from_slice(record.values());
                    values.extend_from_slice(&stored.values);
                } else {
                    values.extend_from_slice(&stored.values);
                    values.extend_from_slice(record.values());
                }
                let event_time = match (record.event_time(), stored.event_time) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                self.pending.push_back(StreamEvent::Record(
                    Record::new(self.fields.clone(), values)
                        .with_retraction(record.is_retraction())
                        .with_event_time(event_time),
                ));
            }
        }

        // 2. Update this side's index.
        let index = &mut self.sides[side].index;
        if record.is_retraction() {
            let entries = index.get_mut(&key).ok_or_else(|| {
                RillError::InvariantViolation(
                    "stream join: retraction with no stored match".to_string(),
                )
            })?;
            let position = entries
                .iter()
                .position(|stored| stored.values == record.values())
                .ok_or_else(|| {
                    RillError::InvariantViolation(
                        "stream join: retraction with no stored match".to_string(),
                    )
                })?;
            // Positional remove keeps the index in arrival order for later
            // probes.
            entries.remove(position);
            if entries.is_empty() {
                index.remove(&key);
            }
        } else {
            index.entry(key).or_default().push(Stored {
                event_time: record.event_time(),
                values: record.into_values(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use rill_common::Type;

    fn join(
        left: Vec<StreamEvent>,
        right: Vec<StreamEvent>,
        batch: bool,
    ) -> StreamJoinExec {
        let (ls, rs, out) = if batch {
            (
                batch_schema(&[("l.i", Type::Int)]),
                batch_schema(&[("r.i", Type::Int)]),
                batch_schema(&[("l.i", Type::Int), ("r.i", Type::Int)]),
            )
        } else {
            (
                stream_schema(&[("l.i", Type::Int)]),
                stream_schema(&[("r.i", Type::Int)]),
                stream_schema(&[("l.i", Type::Int), ("r.i", Type::Int)]),
            )
        };
        StreamJoinExec {
            left: Box::new(memory(&ls, left)),
            right: Box::new(memory(&rs, right)),
            left_key: vec![Arc::new(Evaluator::Variable("l.i".into()))],
            right_key: vec![Arc::new(Evaluator::Variable("r.i".into()))],
            schema: out,
        }
    }

    fn ints(schema: &SchemaRef, values: &[i64]) -> Vec<StreamEvent> {
        values
            .iter()
            .map(|v| record(schema, vec![Value::Int(*v)]))
            .collect()
    }

    #[test]
    fn self_equijoin_of_range_matches_pairwise() {
        let ls = batch_schema(&[("l.i", Type::Int)]);
        let rs = batch_schema(&[("r.i", Type::Int)]);
        let node = join(ints(&ls, &[0, 1, 2, 3, 4]), ints(&rs, &[0, 1, 2, 3, 4]), true);
        let mut seen = rows(&drain_records(&node));
        seen.sort();
        assert_eq!(
            seen,
            (0..5)
                .map(|i| (vec![Value::Int(i), Value::Int(i)], false))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn incoming_retraction_retracts_all_emitted_pairs() {
        let ls = stream_schema(&[("l.i", Type::Int)]);
        let rs = stream_schema(&[("r.i", Type::Int)]);
        let node = join(
            vec![
                record(&ls, vec![Value::Int(1)]),
                retraction(&ls, vec![Value::Int(1)]),
            ],
            vec![record(&rs, vec![Value::Int(1)])],
            false,
        );
        let records = drain_records(&node);
        // One emitted pair, later retracted: the stream settles empty.
        let additions = records.iter().filter(|r| !r.is_retraction()).count();
        let retractions = records.iter().filter(|r| r.is_retraction()).count();
        assert_eq!(additions, 1);
        assert_eq!(retractions, 1);
        assert_eq!(records[0].values(), records[1].values());
    }

    #[test]
    fn fully_retracted_streams_settle_to_empty_output() {
        let ls = stream_schema(&[("l.i", Type::Int)]);
        let rs = stream_schema(&[("r.i", Type::Int)]);
        let node = join(
            vec![
                record(&ls, vec![Value::Int(1)]),
                record(&ls, vec![Value::Int(2)]),
                retraction(&ls, vec![Value::Int(1)]),
                retraction(&ls, vec![Value::Int(2)]),
            ],
            vec![
                record(&rs, vec![Value::Int(1)]),
                record(&rs, vec![Value::Int(2)]),
                retraction(&rs, vec![Value::Int(1)]),
                retraction(&rs, vec![Value::Int(2)]),
            ],
            false,
        );
        let records = drain_records(&node);
        // Every emitted addition has a matching retraction.
        let mut net: std::collections::HashMap<Vec<Value>, i64> = Default::default();
        for r in &records {
            *net.entry(r.values().to_vec()).or_default() +=
                if r.is_retraction() { -1 } else { 1 };
        }
        assert!(net.values().all(|n| *n == 0), "{net:?}");
    }

    #[test]
    fn watermark_is_min_combined_and_monotonic() {
        let ls = stream_schema(&[("l.i", Type::Int)]);
        let rs = stream_schema(&[("r.i", Type::Int)]);
        let t0 = chrono::DateTime::from_timestamp(100, 0).expect("time");
        let t1 = chrono::DateTime::from_timestamp(200, 0).expect("time");
        let node = join(
            vec![StreamEvent::Watermark(t1)],
            vec![StreamEvent::Watermark(t0)],
            false,
        );
        let events = drain_events(&node);
        assert_eq!(events, vec![StreamEvent::Watermark(t0)]);
    }

    #[test]
    fn no_match_no_output() {
        let ls = batch_schema(&[("l.i", Type::Int)]);
        let rs = batch_schema(&[("r.i", Type::Int)]);
        let node = join(ints(&ls, &[1, 2]), ints(&rs, &[3, 4]), true);
        assert!(drain_records(&node).is_empty());
    }
}
