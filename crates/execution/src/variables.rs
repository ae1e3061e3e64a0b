//! The variable context threaded through expression evaluation and
//! re-parameterized subplans.

use rill_common::Value;
use std::sync::Arc;

/// Immutable scope chain of field frames. Pushing a record produces a new
/// chain sharing the parent, so correlated subplans can hold their outer
/// context across `stream` calls.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    frame: Option<Arc<Frame>>,
}

#[derive(Debug)]
struct Frame {
    fields: Arc<[String]>,
    values: Vec<Value>,
    parent: Variables,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a record frame; its fields shadow identically named outer fields.
    pub fn with_record(&self, fields: Arc<[String]>, values: Vec<Value>) -> Variables {
        Variables {
            frame: Some(Arc::new(Frame {
                fields,
                values,
                parent: self.clone(),
            })),
        }
    }

    /// Innermost-first lookup by exact field name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut current = self;
        while let Some(frame) = &current.frame {
            if let Some(i) = frame.fields.iter().position(|f| f == name) {
                return Some(&frame.values[i]);
            }
            current = &frame.parent;
        }
        None
    }
}
