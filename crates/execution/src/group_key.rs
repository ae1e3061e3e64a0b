//! Composite keys for the grouping and join hash maps.

use rill_common::Value;

/// Tuple of key values. Equality is element-wise [`Value`] equality; hashing
/// inherits the per-variant seed mixing of [`Value`]'s `Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(pub Vec<Value>);

impl GroupKey {
    /// Canonical singleton key used when the key tuple is empty, so a single
    /// global group exists.
    pub fn unit() -> Self {
        GroupKey(vec![])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}
