//! Map: evaluate output expressions per record under the node's schema.

use crate::expressions::Evaluator;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, SchemaRef, StreamEvent, TaskContext, Value,
};
use std::sync::Arc;

pub struct MapExec {
    pub source: BoxedNode,
    pub expressions: Vec<Arc<Evaluator>>,
    pub schema: SchemaRef,
}

impl ExecNode for MapExec {
    fn name(&self) -> &'static str {
        "map"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(MapStream {
            source: self.source.stream(ctx, vars)?,
            expressions: self.expressions.clone(),
            fields: self.schema.field_names(),
            time_field: self.schema.time_field,
            vars: vars.clone(),
        }))
    }
}

struct MapStream {
    source: BoxedStream,
    expressions: Vec<Arc<Evaluator>>,
    fields: Arc<[String]>,
    time_field: Option<usize>,
    vars: Variables,
}

impl RecordStream for MapStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        match self.source.next(ctx)? {
            Some(StreamEvent::Record(record)) => {
                let values = self
                    .expressions
                    .iter()
                    .map(|e| e.evaluate(ctx, &record, &self.vars))
                    .collect::<Result<Vec<_>>>()?;
                let event_time = self
                    .time_field
                    .and_then(|i| values.get(i))
                    .and_then(Value::as_time)
                    .or_else(|| record.event_time());
                Ok(Some(StreamEvent::Record(
                    Record::new(self.fields.clone(), values)
                        .with_retraction(record.is_retraction())
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
    use crate::functions::FunctionRegistry;
    use crate::test_support::*;
    use rill_common::Type;

    #[test]
    fn evaluates_expressions_under_output_schema() {
        let input = batch_schema(&[("t.a", Type::Int)]);
        let output = batch_schema(&[("x", Type::Int)]);
        let registry = FunctionRegistry::with_builtins();
        let node = MapExec {
            source: Box::new(memory(
                &input,
                vec![
                    record(&input, vec![Value::Int(1)]),
                    record(&input, vec![Value::Int(2)]),
                ],
            )),
            expressions: vec![Arc::new(Evaluator::FunctionCall {
                function: registry.get("+").expect("fn"),
                arguments: vec![
                    Evaluator::Variable("t.a".into()),
                    Evaluator::Constant(Value::Int(1)),
                ],
            })],
            schema: output,
        };
        let records = drain_records(&node);
        assert_eq!(
            rows(&records),
            vec![(vec![Value::Int(2)], false), (vec![Value::Int(3)], false)]
        );
        assert_eq!(records[0].fields().as_ref(), ["x".to_string()]);
    }

    #[test]
    fn retraction_propagates_through_map() {
        let input = stream_schema(&[("t.a", Type::Int)]);
        let output = stream_schema(&[("a", Type::Int)]);
        let node = MapExec {
            source: Box::new(memory(
                &input,
                vec![retraction(&input, vec![Value::Int(9)])],
            )),
            expressions: vec![Arc::new(Evaluator::Variable("t.a".into()))],
            schema: output,
        };
        assert_eq!(
            rows(&drain_records(&node)),
            vec![(vec![Value::Int(9)], true)]
        );
    }
}
