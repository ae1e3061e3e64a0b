//! Batch sort and limit. Both require a no-retractions input, enforced at
//! typecheck time.

use crate::expressions::Evaluator;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, SchemaRef, StreamEvent, TaskContext, Value,
};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct OrderByExec {
    pub source: BoxedNode,
    pub key: Vec<Arc<Evaluator>>,
    /// `+1` ascending, `-1` descending per key expression.
    pub direction_multipliers: Vec<i32>,
    pub schema: SchemaRef,
}

impl ExecNode for OrderByExec {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(OrderByStream {
            source: Some(self.source.stream(ctx, vars)?),
            key: self.key.clone(),
            direction_multipliers: self.direction_multipliers.clone(),
            vars: vars.clone(),
            sorted: VecDeque::new(),
        }))
    }
}

struct OrderByStream {
    source: Option<BoxedStream>,
    key: Vec<Arc<Evaluator>>,
    direction_multipliers: Vec<i32>,
    vars: Variables,
    sorted: VecDeque<Record>,
}

impl RecordStream for OrderByStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        if let Some(mut source) = self.source.take() {
            let mut keyed: Vec<(Vec<Value>, Record)> = Vec::new();
            loop {
                match source.next(ctx) {
                    Ok(Some(StreamEvent::Record(record))) => {
                        let key = self
                            .key
                            .iter()
                            .map(|k| k.evaluate(ctx, &record, &self.vars))
                            .collect::<Result<Vec<_>>>()?;
                        keyed.push((key, record));
                    }
                    Ok(Some(StreamEvent::Watermark(_))) => {}
                    Ok(None) => break,
                    Err(e) => {
                        source.close().ok();
                        return Err(e);
                    }
                }
            }
            source.close()?;
            let multipliers = self.direction_multipliers.clone();
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &multipliers));
            self.sorted = keyed.into_iter().map(|(_, r)| r).collect();
        }
        Ok(self.sorted.pop_front().map(StreamEvent::Record))
    }

    fn close(&mut self) -> Result<()> {
        self.sorted.clear();
        if let Some(mut source) = self.source.take() {
            source.close()?;
        }
        Ok(())
    }
}

fn compare_keys(a: &[Value], b: &[Value], multipliers: &[i32]) -> Ordering {
    for ((x, y), multiplier) in a.iter().zip(b).zip(multipliers) {
        let ord = x.cmp(y);
        let ord = if *multiplier < 0 { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

pub struct LimitExec {
    pub source: BoxedNode,
    pub limit: usize,
    pub schema: SchemaRef,
}

impl ExecNode for LimitExec {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(LimitStream {
            source: self.source.stream(ctx, vars)?,
            remaining: self.limit,
        }))
    }
}

struct LimitStream {
    source: BoxedStream,
    remaining: usize,
}

impl RecordStream for LimitStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.source.next(ctx)? {
            Some(StreamEvent::Record(record)) => {
                self.remaining -= 1;
                Ok(Some(StreamEvent::Record(record)))
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
    use rill_common::Type;

    fn ints(schema: &SchemaRef, values: &[i64]) -> Vec<StreamEvent> {
        values
            .iter()
            .map(|v| record(schema, vec![Value::Int(*v)]))
            .collect()
    }

    fn sort_desc(events: Vec<StreamEvent>, schema: SchemaRef) -> OrderByExec {
        OrderByExec {
            source: Box::new(memory(&schema, events)),
            key: vec![Arc::new(Evaluator::Variable("t.v".into()))],
            direction_multipliers: vec![-1],
            schema,
        }
    }

    #[test]
    fn sorts_descending_with_limit_two() {
        // (1),(3),(2),(5),(4) ORDER BY v DESC LIMIT 2 => (5),(4)
        let schema = batch_schema(&[("t.v", Type::Int)]);
        let sorted = sort_desc(ints(&schema, &[1, 3, 2, 5, 4]), schema.clone());
        let node = LimitExec {
            source: Box::new(sorted),
            limit: 2,
            schema: schema.clone(),
        };
        assert_eq!(
            rows(&drain_records(&node)),
            vec![(vec![Value::Int(5)], false), (vec![Value::Int(4)], false)]
        );
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let schema = batch_schema(&[("t.v", Type::Int), ("t.tag", Type::Str)]);
        let node = OrderByExec {
            source: Box::new(memory(
                &schema,
                vec![
                    record(&schema, vec![Value::Int(1), Value::Str("first".into())]),
                    record(&schema, vec![Value::Int(1), Value::Str("second".into())]),
                ],
            )),
            key: vec![Arc::new(Evaluator::Variable("t.v".into()))],
            direction_multipliers: vec![1],
            schema: schema.clone(),
        };
        let records = drain_records(&node);
        assert_eq!(records[0].values()[1], Value::Str("first".into()));
        assert_eq!(records[1].values()[1], Value::Str("second".into()));
    }

    #[test]
    fn limit_zero_emits_nothing() {
        let schema = batch_schema(&[("t.v", Type::Int)]);
        let node = LimitExec {
            source: Box::new(memory(&schema, ints(&schema, &[1, 2]))),
            limit: 0,
            schema: schema.clone(),
        };
        assert!(drain_records(&node).is_empty());
    }
}
