//! Distinct: multiset on the full value tuple. Emits on the 0→1 transition,
//! retracts on the 1→0 transition; a negative count is an engine bug.

use crate::group_key::GroupKey;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{
    BoxedStream, RecordStream, Result, RillError, SchemaRef, StreamEvent, TaskContext,
};
use rustc_hash::FxHashMap;

pub struct DistinctExec {
    pub source: BoxedNode,
    pub schema: SchemaRef,
}

impl ExecNode for DistinctExec {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(DistinctStream {
            source: self.source.stream(ctx, vars)?,
            counts: FxHashMap::default(),
        }))
    }
}

struct DistinctStream {
    source: BoxedStream,
    counts: FxHashMap<GroupKey, usize>,
}

impl RecordStream for DistinctStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            match self.source.next(ctx)? {
                Some(StreamEvent::Record(record)) => {
                    let key = GroupKey(record.values().to_vec());
                    if record.is_retraction() {
                        let count = self.counts.get_mut(&key).ok_or_else(|| {
                            RillError::InvariantViolation(
                                "distinct count would go negative".to_string(),
                            )
                        })?;
                        *count -= 1;
                        if *count == 0 {
                            self.counts.remove(&key);
                            return Ok(Some(StreamEvent::Record(record)));
                        }
                    } else {
                        let count = self.counts.entry(key).or_insert(0);
                        *count += 1;
                        if *count == 1 {
                            return Ok(Some(StreamEvent::Record(record)));
                        }
                    }
                }
                other => return Ok(other),
            }
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

    fn distinct_over(events: Vec<StreamEvent>, schema: SchemaRef) -> DistinctExec {
        DistinctExec {
            source: Box::new(memory(&schema, events)),
            schema,
        }
    }

    #[test]
    fn emits_only_first_occurrence() {
        let schema = batch_schema(&[("t.v", Type::Int)]);
        let node = distinct_over(
            vec![
                record(&schema, vec![Value::Int(1)]),
                record(&schema, vec![Value::Int(1)]),
                record(&schema, vec![Value::Int(2)]),
                record(&schema, vec![Value::Int(1)]),
            ],
            schema.clone(),
        );
        assert_eq!(
            rows(&drain_records(&node)),
            vec![
                (vec![Value::Int(1)], false),
                (vec![Value::Int(2)], false),
            ]
        );
    }

    #[test]
    fn replaying_a_batch_input_is_idempotent() {
        let schema = batch_schema(&[("t.v", Type::Int)]);
        let batch = vec![
            record(&schema, vec![Value::Int(1)]),
            record(&schema, vec![Value::Int(2)]),
        ];
        let once = drain_records(&distinct_over(batch.clone(), schema.clone()));
        let mut doubled = batch.clone();
        doubled.extend(batch);
        let twice = drain_records(&distinct_over(doubled, schema.clone()));
        assert_eq!(rows(&once), rows(&twice));
    }

    #[test]
    fn retraction_emits_only_on_last_copy() {
        let schema = stream_schema(&[("t.v", Type::Int)]);
        let node = distinct_over(
            vec![
                record(&schema, vec![Value::Int(1)]),
                record(&schema, vec![Value::Int(1)]),
                retraction(&schema, vec![Value::Int(1)]),
                retraction(&schema, vec![Value::Int(1)]),
            ],
            schema.clone(),
        );
        assert_eq!(
            rows(&drain_records(&node)),
            vec![(vec![Value::Int(1)], false), (vec![Value::Int(1)], true)]
        );
    }

    #[test]
    fn negative_transition_is_fatal() {
        let schema = stream_schema(&[("t.v", Type::Int)]);
        let node = distinct_over(
            vec![retraction(&schema, vec![Value::Int(1)])],
            schema.clone(),
        );
        let ctx = TaskContext::default();
        let mut stream = node.stream(&ctx, &Variables::new()).expect("stream");
        assert!(matches!(
            stream.next(&ctx),
            Err(RillError::InvariantViolation(_))
        ));
    }
}
