//! The record/retraction/watermark data contract and the pull-based stream
//! trait every operator implements.

use crate::error::{Result, RillError};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One row flowing through the engine.
///
/// The field-name slice is shared with the producing operator's schema by
/// position. `retraction = true` undoes a previously emitted record with
/// identical values.
#[derive(Clone)]
pub struct Record {
    fields: Arc<[String]>,
    values: Vec<Value>,
    retraction: bool,
    event_time: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(fields: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(fields.len(), values.len());
        Self {
            fields,
            values,
            retraction: false,
            event_time: None,
        }
    }

    pub fn retraction(fields: Arc<[String]>, values: Vec<Value>) -> Self {
        Self {
            retraction: true,
            ..Self::new(fields, values)
        }
    }

    pub fn with_retraction(mut self, retraction: bool) -> Self {
        self.retraction = retraction;
        self
    }

    pub fn with_event_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.event_time = time;
        self
    }

    pub fn fields(&self) -> &Arc<[String]> {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn is_retraction(&self) -> bool {
        self.retraction
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time
    }

    /// Value of the field with this exact name.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f == field)
            .map(|i| &self.values[i])
    }
}

impl PartialEq for Record {
    /// Field names, values and the retraction bit; event time is carried
    /// metadata and does not participate.
    fn eq(&self, other: &Self) -> bool {
        self.retraction == other.retraction
            && self.fields[..] == other.fields[..]
            && self.values == other.values
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.retraction { "-" } else { "+" };
        write!(f, "{sign}(")?;
        for (i, (name, value)) in self.fields.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, ")")
    }
}

/// A payload message pulled from a stream.
///
/// `Watermark(t)` guarantees no following record has `event_time <= t`;
/// watermarks are monotonic non-decreasing within a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Record(Record),
    Watermark(DateTime<Utc>),
}

/// Cooperative cancellation signal shared between the caller and every
/// operator of a running query.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-query execution context threaded through every `next` call.
#[derive(Clone, Default)]
pub struct TaskContext {
    cancel: CancelToken,
}

impl TaskContext {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    /// Operators call this between records and return [`RillError::Cancelled`]
    /// when it fires.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(RillError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Pull-based single-consumer record stream.
///
/// `Ok(None)` is the end-of-stream terminal; behavior of further `next`
/// calls after it is undefined. One call to `next` may pull any number of
/// events from child streams. `close` is idempotent, releases resources
/// transitively, and is safe after any `next` outcome.
pub trait RecordStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>>;
    fn close(&mut self) -> Result<()>;
}

pub type BoxedStream = Box<dyn RecordStream>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fields(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn record_lookup_by_name() {
        let r = Record::new(fields(&["t.a", "t.b"]), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(r.value("t.b"), Some(&Value::Int(2)));
        assert_eq!(r.value("b"), None);
    }

    #[test]
    fn retraction_pairs_with_matching_addition() {
        let add = Record::new(fields(&["v"]), vec![Value::Int(7)]);
        let undo = Record::retraction(fields(&["v"]), vec![Value::Int(7)]);
        assert_ne!(add, undo);
        assert_eq!(add, undo.clone().with_retraction(false));
    }

    #[test]
    fn event_time_does_not_affect_equality() {
        let a = Record::new(fields(&["v"]), vec![Value::Int(1)]);
        let b = a.clone().with_event_time(Some(Utc::now()));
        assert_eq!(a, b);
    }

    #[test]
    fn cancel_token_trips_context() {
        let token = CancelToken::new();
        let ctx = TaskContext::new(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert!(matches!(
            ctx.check_cancelled(),
            Err(RillError::Cancelled)
        ));
    }
}
