//! Table-valued function operators: `range`, `tumble`, `poll`,
//! `max_diff_watermark`.

use crate::expressions::Evaluator;
use crate::group_key::GroupKey;
use crate::nodes::{BoxedNode, ExecNode};
use crate::variables::Variables;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rill_common::{
    BoxedStream, Record, RecordStream, Result, RillError, SchemaRef, StreamEvent, TaskContext,
    Value,
};
use rustc_hash::FxBuildHasher;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

fn empty_record() -> Record {
    let fields: Arc<[String]> = Vec::<String>::new().into();
    Record::new(fields, vec![])
}

fn eval_scalar(
    evaluator: &Evaluator,
    ctx: &TaskContext,
    vars: &Variables,
) -> Result<Value> {
    evaluator.evaluate(ctx, &empty_record(), vars)
}

fn expect_int(value: Value, what: &str) -> Result<i64> {
    value
        .as_int()
        .ok_or_else(|| RillError::Runtime(format!("{what} must be an integer")))
}

fn expect_duration(value: Value, what: &str) -> Result<i64> {
    match value {
        Value::Duration(nanos) => Ok(nanos),
        other => Err(RillError::Runtime(format!(
            "{what} must be a duration, got {}",
            other.type_name()
        ))),
    }
}

// -----------------------------
// range
// -----------------------------

/// Half-open integer sequence `[start, end)`.
pub struct RangeExec {
    pub start: Arc<Evaluator>,
    pub end: Arc<Evaluator>,
    pub schema: SchemaRef,
}

impl ExecNode for RangeExec {
    fn name(&self) -> &'static str {
        "range"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        let start = expect_int(eval_scalar(&self.start, ctx, vars)?, "range start")?;
        let end = expect_int(eval_scalar(&self.end, ctx, vars)?, "range end")?;
        Ok(Box::new(RangeStream {
            next: start,
            end,
            fields: self.schema.field_names(),
        }))
    }
}

struct RangeStream {
    next: i64,
    end: i64,
    fields: Arc<[String]>,
}

impl RecordStream for RangeStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        ctx.check_cancelled()?;
        if self.next >= self.end {
            return Ok(None);
        }
        let value = self.next;
        self.next += 1;
        Ok(Some(StreamEvent::Record(Record::new(
            self.fields.clone(),
            vec![Value::Int(value)],
        ))))
    }

    fn close(&mut self) -> Result<()> {
        self.next = self.end;
        Ok(())
    }
}

// -----------------------------
// tumble
// -----------------------------

/// Assigns each record to a fixed-width event-time window, appending
/// `window_start`/`window_end` columns; the window end becomes the record's
/// event time.
pub struct TumbleExec {
    pub source: BoxedNode,
    /// Index of the time column in the source schema.
    pub time_index: usize,
    pub window_length: Arc<Evaluator>,
    pub schema: SchemaRef,
}

impl ExecNode for TumbleExec {
    fn name(&self) -> &'static str {
        "tumble"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        let length = expect_duration(
            eval_scalar(&self.window_length, ctx, vars)?,
            "tumble window_length",
        )?;
        if length <= 0 {
            return Err(RillError::Runtime(
                "tumble window_length must be positive".to_string(),
            ));
        }
        Ok(Box::new(TumbleStream {
            source: self.source.stream(ctx, vars)?,
            time_index: self.time_index,
            window_nanos: length,
            fields: self.schema.field_names(),
        }))
    }
}

struct TumbleStream {
    source: BoxedStream,
    time_index: usize,
    window_nanos: i64,
    fields: Arc<[String]>,
}

impl RecordStream for TumbleStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        match self.source.next(ctx)? {
            Some(StreamEvent::Record(record)) => {
                let time = record.values()[self.time_index]
                    .as_time()
                    .ok_or_else(|| {
                        RillError::Runtime(
                            "tumble: record has no event time in its time column".to_string(),
                        )
                    })?;
                let nanos = time.timestamp_nanos_opt().ok_or_else(|| {
                    RillError::Runtime("tumble: timestamp out of range".to_string())
                })?;
                let start = nanos.div_euclid(self.window_nanos) * self.window_nanos;
                let end = start + self.window_nanos;
                let window_end = DateTime::from_timestamp_nanos(end);
                let mut values = record.values().to_vec();
                values.push(Value::Time(DateTime::from_timestamp_nanos(start)));
                values.push(Value::Time(window_end));
                Ok(Some(StreamEvent::Record(
                    Record::new(self.fields.clone(), values)
                        .with_retraction(record.is_retraction())
                        .with_event_time(Some(window_end)),
                )))
            }
            other => Ok(other),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}

// -----------------------------
// poll
// -----------------------------

/// Re-scans the underlying table every interval, diffing consecutive
/// snapshots: removed rows are emitted as retractions, new rows as
/// additions. Unbounded; only cancellation ends the stream.
pub struct PollExec {
    /// Shared so every tick can start a fresh scan.
    pub source: Arc<dyn ExecNode>,
    pub interval: Arc<Evaluator>,
    pub schema: SchemaRef,
}

impl ExecNode for PollExec {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        let interval = expect_duration(eval_scalar(&self.interval, ctx, vars)?, "poll interval")?;
        Ok(Box::new(PollStream {
            node: self.source.clone(),
            interval: StdDuration::from_nanos(interval.max(0) as u64),
            fields: self.schema.field_names(),
            vars: vars.clone(),
            previous: None,
            pending: VecDeque::new(),
        }))
    }
}

struct PollStream {
    node: Arc<dyn ExecNode>,
    interval: StdDuration,
    fields: Arc<[String]>,
    vars: Variables,
    previous: Option<Snapshot>,
    pending: VecDeque<Record>,
}

type Snapshot = IndexMap<GroupKey, usize, FxBuildHasher>;

impl PollStream {
    fn scan(&mut self, ctx: &TaskContext) -> Result<Snapshot> {
        let mut snapshot: Snapshot = IndexMap::default();
        let mut stream = self.node.stream(ctx, &self.vars)?;
        let outcome = loop {
            match stream.next(ctx) {
                Ok(Some(StreamEvent::Record(record))) => {
                    *snapshot
                        .entry(GroupKey(record.into_values()))
                        .or_insert(0) += 1;
                }
                Ok(Some(StreamEvent::Watermark(_))) => {}
                Ok(None) => break Ok(snapshot),
                Err(e) => break Err(e),
            }
        };
        stream.close()?;
        outcome
    }

    fn diff_into_pending(&mut self, current: Snapshot) {
        if let Some(previous) = &self.previous {
            for (row, count) in previous {
                let now = current.get(row).copied().unwrap_or(0);
                for _ in now..*count {
                    self.pending.push_back(Record::retraction(
                        self.fields.clone(),
                        row.values().to_vec(),
                    ));
                }
            }
            for (row, count) in &current {
                let before = previous.get(row).copied().unwrap_or(0);
                for _ in before..*count {
                    self.pending.push_back(Record::new(
                        self.fields.clone(),
                        row.values().to_vec(),
                    ));
                }
            }
        } else {
            for (row, count) in &current {
                for _ in 0..*count {
                    self.pending.push_back(Record::new(
                        self.fields.clone(),
                        row.values().to_vec(),
                    ));
                }
            }
        }
        self.previous = Some(current);
    }

    fn sleep_interval(&self, ctx: &TaskContext) -> Result<()> {
        let deadline = Instant::now() + self.interval;
        while Instant::now() < deadline {
            ctx.check_cancelled()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(StdDuration::from_millis(10)));
        }
        ctx.check_cancelled()
    }
}

impl RecordStream for PollStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(StreamEvent::Record(record)));
            }
            ctx.check_cancelled()?;
            if self.previous.is_some() {
                self.sleep_interval(ctx)?;
            }
            let current = self.scan(ctx)?;
            self.diff_into_pending(current);
        }
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}

// -----------------------------
// max_diff_watermark
// -----------------------------

/// Forwards records and emits the watermark `max_seen_time - max_diff`,
/// never receding.
pub struct MaxDiffWatermarkExec {
    pub source: BoxedNode,
    /// Index of the time column in the source schema.
    pub time_index: usize,
    pub max_diff: Arc<Evaluator>,
    pub schema: SchemaRef,
}

impl ExecNode for MaxDiffWatermarkExec {
    fn name(&self) -> &'static str {
        "max_diff_watermark"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn stream(&self, ctx: &TaskContext, vars: &Variables) -> Result<BoxedStream> {
        let max_diff = expect_duration(
            eval_scalar(&self.max_diff, ctx, vars)?,
            "max_diff_watermark max_diff",
        )?;
        Ok(Box::new(MaxDiffWatermarkStream {
            source: self.source.stream(ctx, vars)?,
            time_index: self.time_index,
            max_diff: chrono::Duration::nanoseconds(max_diff),
            watermark: None,
            pending: VecDeque::new(),
        }))
    }
}

struct MaxDiffWatermarkStream {
    source: BoxedStream,
    time_index: usize,
    max_diff: chrono::Duration,
    watermark: Option<DateTime<Utc>>,
    pending: VecDeque<StreamEvent>,
}

impl RecordStream for MaxDiffWatermarkStream {
    fn next(&mut self, ctx: &TaskContext) -> Result<Option<StreamEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.source.next(ctx)? {
                Some(StreamEvent::Record(record)) => {
                    let time = record.values()[self.time_index].as_time();
                    self.pending.push_back(StreamEvent::Record(record));
                    if let Some(time) = time {
                        let candidate = time - self.max_diff;
                        // The watermark never recedes.
                        if self.watermark.is_none_or(|w| candidate > w) {
                            self.watermark = Some(candidate);
                            self.pending.push_back(StreamEvent::Watermark(candidate));
                        }
                    }
                }
                // This operator owns watermarking for its stream.
                Some(StreamEvent::Watermark(_)) => continue,
                None => return Ok(None),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.pending.clear();
        self.source.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use rill_common::Type;
    use std::sync::Mutex;

    #[test]
    fn range_emits_half_open_sequence() {
        let schema = batch_schema(&[("range.i", Type::Int)]);
        let node = RangeExec {
            start: Arc::new(Evaluator::Constant(Value::Int(0))),
            end: Arc::new(Evaluator::Constant(Value::Int(5))),
            schema,
        };
        assert_eq!(
            rows(&drain_records(&node)),
            (0..5)
                .map(|i| (vec![Value::Int(i)], false))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_range_is_empty() {
        let schema = batch_schema(&[("range.i", Type::Int)]);
        let node = RangeExec {
            start: Arc::new(Evaluator::Constant(Value::Int(3))),
            end: Arc::new(Evaluator::Constant(Value::Int(3))),
            schema,
        };
        assert!(drain_records(&node).is_empty());
    }

    #[test]
    fn tumble_assigns_fixed_windows() {
        let input = stream_schema(&[("t.ts", Type::Time)]);
        let output = stream_schema(&[
            ("t.ts", Type::Time),
            ("window_start", Type::Time),
            ("window_end", Type::Time),
        ]);
        let t = |secs: i64| DateTime::from_timestamp(secs, 0).expect("time");
        let node = TumbleExec {
            source: Box::new(memory(
                &input,
                vec![
                    record(&input, vec![Value::Time(t(3))]),
                    record(&input, vec![Value::Time(t(17))]),
                ],
            )),
            time_index: 0,
            window_length: Arc::new(Evaluator::Constant(Value::Duration(10_000_000_000))),
            schema: output,
        };
        let records = drain_records(&node);
        assert_eq!(
            records[0].values(),
            [Value::Time(t(3)), Value::Time(t(0)), Value::Time(t(10))]
        );
        assert_eq!(records[0].event_time(), Some(t(10)));
        assert_eq!(
            records[1].values(),
            [Value::Time(t(17)), Value::Time(t(10)), Value::Time(t(20))]
        );
    }

    #[test]
    fn max_diff_watermark_trails_max_seen_time() {
        let input = stream_schema(&[("t.ts", Type::Time)]);
        let t = |secs: i64| DateTime::from_timestamp(secs, 0).expect("time");
        let node = MaxDiffWatermarkExec {
            source: Box::new(memory(
                &input,
                vec![
                    record(&input, vec![Value::Time(t(100))]),
                    // Late record: the watermark must not recede.
                    record(&input, vec![Value::Time(t(90))]),
                    record(&input, vec![Value::Time(t(120))]),
                ],
            )),
            time_index: 0,
            max_diff: Arc::new(Evaluator::Constant(Value::Duration(5_000_000_000))),
            schema: input.clone(),
        };
        let events = drain_events(&node);
        let watermarks: Vec<DateTime<Utc>> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Watermark(w) => Some(*w),
                _ => None,
            })
            .collect();
        assert_eq!(watermarks, vec![t(95), t(115)]);
    }

    /// Each `stream` call replays the next configured snapshot.
    struct SnapshotNode {
        schema: SchemaRef,
        snapshots: Mutex<VecDeque<Vec<StreamEvent>>>,
    }

    impl ExecNode for SnapshotNode {
        fn name(&self) -> &'static str {
            "snapshots"
        }

        fn schema(&self) -> &SchemaRef {
            &self.schema
        }

        fn stream(&self, _ctx: &TaskContext, _vars: &Variables) -> Result<BoxedStream> {
            let events = self
                .snapshots
                .lock()
                .expect("snapshot lock")
                .pop_front()
                .unwrap_or_default();
            Ok(Box::new(ReplayStream {
                events: events.into(),
            }))
        }
    }

    struct ReplayStream {
        events: VecDeque<StreamEvent>,
    }

    impl RecordStream for ReplayStream {
        fn next(&mut self, _ctx: &TaskContext) -> Result<Option<StreamEvent>> {
            Ok(self.events.pop_front())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn poll_emits_retraction_for_removed_row() {
        let schema = stream_schema(&[("t.v", Type::Int)]);
        let first = vec![
            record(&schema, vec![Value::Int(1)]),
            record(&schema, vec![Value::Int(2)]),
        ];
        let second = vec![record(&schema, vec![Value::Int(2)])];
        let node = PollExec {
            source: Arc::new(SnapshotNode {
                schema: schema.clone(),
                snapshots: Mutex::new(VecDeque::from(vec![first, second])),
            }),
            interval: Arc::new(Evaluator::Constant(Value::Duration(0))),
            schema: schema.clone(),
        };
        let cancel = rill_common::CancelToken::new();
        let ctx = TaskContext::new(cancel.clone());
        let mut stream = node
            .stream(&ctx, &Variables::new())
            .expect("stream");
        let mut seen = Vec::new();
        for _ in 0..3 {
            let Some(StreamEvent::Record(r)) = stream.next(&ctx).expect("next") else {
                panic!("poll stream is unbounded")
            };
            seen.push((r.values().to_vec(), r.is_retraction()));
        }
        assert_eq!(
            seen,
            vec![
                (vec![Value::Int(1)], false),
                (vec![Value::Int(2)], false),
                // The second snapshot dropped row 1.
                (vec![Value::Int(1)], true),
            ]
        );
        cancel.cancel();
        assert!(matches!(stream.next(&ctx), Err(RillError::Cancelled)));
        stream.close().expect("close");
    }
}
