//! Filter: keep records whose predicate is true; retraction bit and
//! watermarks pass through unchanged.

use crate::expressions::Evaluator;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use rill_common::{BoxedStream, RecordStream, Result, SchemaRef, StreamEvent, TaskContext};
use std::sync::Arc;

pub struct FilterExec {
    pub source: BoxedNode,
    pub predicate: Arc<Evaluator>,
    pub schema: SchemaRef,
}

impl ExecNode for FilterExec {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        Ok(Box::new(FilterStream {
            source: self.source.stream(ctx, vars)?,
            predicate: self.predicate.clone(),
            vars: vars.clone(),
        }))
    }
}

struct FilterStream {
    source: BoxedStream,
    predicate: Arc<Evaluator>,
    vars: Variables,
}

impl RecordStream for FilterStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            match self.source.next(ctx)? {
                Some(StreamEvent::Record(record)) => {
                    if self
                        .predicate
                        .evaluate(ctx, &record, &self.vars)?
                        .is_truthy()
                    {
                        return Ok(Some(StreamEvent::Record(record)));
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
    use crate::functions::FunctionRegistry;
    use crate::test_support::*;
    use rill_common::{Type, Value};

    fn keep_positive(source: crate::nodes::MemoryNode, schema: SchemaRef) -> FilterExec {
        let registry = FunctionRegistry::with_builtins();
        FilterExec {
            source: Box::new(source),
            predicate: Arc::new(Evaluator::FunctionCall {
                function: registry.get(">").expect("fn"),
                arguments: vec![
                    Evaluator::Variable("t.v".into()),
                    Evaluator::Constant(Value::Int(0)),
                ],
            }),
            schema,
        }
    }

    #[test]
    fn keeps_truthy_discards_rest() {
        let schema = batch_schema(&[("t.v", Type::Int)]);
        let node = keep_positive(
            memory(
                &schema,
                vec![
                    record(&schema, vec![Value::Int(1)]),
                    record(&schema, vec![Value::Int(-1)]),
                    record(&schema, vec![Value::Int(2)]),
                ],
            ),
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
    fn retraction_bit_propagates_unchanged() {
        let schema = stream_schema(&[("t.v", Type::Int)]);
        let node = keep_positive(
            memory(
                &schema,
                vec![
                    record(&schema, vec![Value::Int(3)]),
                    retraction(&schema, vec![Value::Int(3)]),
                ],
            ),
            schema.clone(),
        );
        assert_eq!(
            rows(&drain_records(&node)),
            vec![(vec![Value::Int(3)], false), (vec![Value::Int(3)], true)]
        );
    }

    #[test]
    fn null_predicate_discards() {
        let schema = batch_schema(&[("t.v", Type::optional(Type::Int))]);
        let node = keep_positive(
            memory(&schema, vec![record(&schema, vec![Value::Null])]),
            schema.clone(),
        );
        assert!(drain_records(&node).is_empty());
    }

    #[test]
    fn watermarks_pass_through() {
        let schema = stream_schema(&[("t.v", Type::Int)]);
        let wm = chrono::Utc::now();
        let node = keep_positive(
            memory(
                &schema,
                vec![
                    record(&schema, vec![Value::Int(-5)]),
                    StreamEvent::Watermark(wm),
                ],
            ),
            schema.clone(),
        );
        assert_eq!(drain_events(&node), vec![StreamEvent::Watermark(wm)]);
    }
}
