//! Expression evaluators lowered from typed physical expressions.

use crate::functions::ScalarFunction;
use crate::nodes::ExecNode;
use crate::variables::Variables;
use rill_common::{Record, Result, RillError, StreamEvent, TaskContext, Type, Value};
use std::sync::Arc;

/// A callable scalar evaluator. Variables resolve against the current record
/// first, then against the enclosing variable chain (correlated references).
pub enum Evaluator {
    Variable(String),
    Constant(Value),
    FunctionCall {
        function: Arc<ScalarFunction>,
        arguments: Vec<Evaluator>,
    },
    And(Vec<Evaluator>),
    Or(Vec<Evaluator>),
    Coalesce(Vec<Evaluator>),
    Tuple(Vec<Evaluator>),
    TypeAssertion {
        target: Type,
        inner: Box<Evaluator>,
    },
    /// Correlated scalar subplan, re-streamed per evaluation under the
    /// current record's variables.
    Subquery(Arc<dyn ExecNode>),
}

impl Evaluator {
    pub fn evaluate(
        &self,
        ctx: &TaskContext,
        record: &Record,
        vars: &Variables,
    ) -> Result<Value> {
        match self {
            Evaluator::Variable(name) => {
                if let Some(v) = record.value(name) {
                    return Ok(v.clone());
                }
                vars.get(name).cloned().ok_or_else(|| {
                    RillError::InvariantViolation(format!(
                        "variable {name} missing at runtime"
                    ))
                })
            }
            Evaluator::Constant(value) => Ok(value.clone()),
            Evaluator::FunctionCall {
                function,
                arguments,
            } => {
                let args = arguments
                    .iter()
                    .map(|a| a.evaluate(ctx, record, vars))
                    .collect::<Result<Vec<_>>>()?;
                function.evaluate(&args)
            }
            // SQL three-valued logic: false dominates, then unknown.
            Evaluator::And(arguments) => {
                let mut saw_null = false;
                for arg in arguments {
                    match arg.evaluate(ctx, record, vars)? {
                        Value::Boolean(false) => return Ok(Value::Boolean(false)),
                        Value::Boolean(true) => {}
                        Value::Null => saw_null = true,
                        other => return connective_type_error("AND", &other),
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Boolean(true)
                })
            }
            Evaluator::Or(arguments) => {
                let mut saw_null = false;
                for arg in arguments {
                    match arg.evaluate(ctx, record, vars)? {
                        Value::Boolean(true) => return Ok(Value::Boolean(true)),
                        Value::Boolean(false) => {}
                        Value::Null => saw_null = true,
                        other => return connective_type_error("OR", &other),
                    }
                }
                Ok(if saw_null {
                    Value::Null
                } else {
                    Value::Boolean(false)
                })
            }
            Evaluator::Coalesce(arguments) => {
                for arg in arguments {
                    let v = arg.evaluate(ctx, record, vars)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Ok(Value::Null)
            }
            Evaluator::Tuple(arguments) => Ok(Value::Tuple(
                arguments
                    .iter()
                    .map(|a| a.evaluate(ctx, record, vars))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Evaluator::TypeAssertion { target, inner } => {
                let v = inner.evaluate(ctx, record, vars)?;
                if target.contains(&v) {
                    Ok(v)
                } else {
                    Err(RillError::Runtime(format!(
                        "type assertion failed: {} is not {target}",
                        v.type_name()
                    )))
                }
            }
            Evaluator::Subquery(node) => {
                let scoped =
                    vars.with_record(record.fields().clone(), record.values().to_vec());
                let mut stream = node.stream(ctx, &scoped)?;
                let mut result: Option<Value> = None;
                let outcome = loop {
                    match stream.next(ctx) {
                        Ok(Some(StreamEvent::Record(inner))) => {
                            if result.is_some() {
                                break Err(RillError::Runtime(
                                    "scalar subquery returned more than one row".to_string(),
                                ));
                            }
                            result = Some(inner.values()[0].clone());
                        }
                        Ok(Some(StreamEvent::Watermark(_))) => {}
                        Ok(None) => break Ok(result.unwrap_or(Value::Null)),
                        Err(e) => break Err(e),
                    }
                };
                stream.close()?;
                outcome
            }
        }
    }
}

fn connective_type_error(what: &str, got: &Value) -> Result<Value> {
    Err(RillError::Runtime(format!(
        "{what} operand must be boolean, got {}",
        got.type_name()
    )))
}
