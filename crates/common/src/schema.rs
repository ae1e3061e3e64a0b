//! Stream schemas: ordered typed fields plus stream-level assertions.

use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub typ: Type,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }

    /// The part after the last qualifier dot, or the whole name.
    pub fn unqualified(&self) -> &str {
        unqualified(&self.name)
    }
}

/// Ordered field list plus the optional event-time column and the
/// no-retractions assertion.
///
/// `no_retractions = true` guarantees the producing stream never emits a
/// retraction record; operators use it to pick the batch path and to gate
/// batch-only operators (ORDER BY, LIMIT, append-only sinks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<SchemaField>,
    /// Index of the event-time column, if the stream has one.
    pub time_field: Option<usize>,
    pub no_retractions: bool,
}

pub type SchemaRef = Arc<Schema>;

impl Schema {
    /// Schema of a bounded source: no time field, no retractions.
    pub fn batch(fields: Vec<SchemaField>) -> Self {
        Self {
            fields,
            time_field: None,
            no_retractions: true,
        }
    }

    /// Schema of an unbounded source that may retract.
    pub fn stream(fields: Vec<SchemaField>) -> Self {
        Self {
            fields,
            time_field: None,
            no_retractions: false,
        }
    }

    pub fn with_time_field(mut self, index: usize) -> Self {
        self.time_field = Some(index);
        self
    }

    pub fn with_no_retractions(mut self, no_retractions: bool) -> Self {
        self.no_retractions = no_retractions;
        self
    }

    /// Index of the field with this exact name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// The shared field-name slice handed to records produced under this
    /// schema.
    pub fn field_names(&self) -> Arc<[String]> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Strip a `qualifier.` prefix if present.
pub fn unqualified(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((_, n)) => n,
        None => name,
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.typ)?;
            if self.time_field == Some(i) {
                write!(f, " [event time]")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_unqualified() {
        let s = Schema::batch(vec![
            SchemaField::new("t.a", Type::Int),
            SchemaField::new("b", Type::Str),
        ]);
        assert_eq!(s.index_of("t.a"), Some(0));
        assert_eq!(s.index_of("a"), None);
        assert_eq!(s.fields[0].unqualified(), "a");
        assert_eq!(s.fields[1].unqualified(), "b");
        assert!(s.no_retractions);
    }

    #[test]
    fn display_marks_time_field() {
        let s = Schema::stream(vec![
            SchemaField::new("ts", Type::Time),
            SchemaField::new("v", Type::Int),
        ])
        .with_time_field(0);
        assert_eq!(s.to_string(), "{ts: Time [event time], v: Int}");
    }
}
