//! The aggregate registry and its built-in implementations.
//!
//! Each registry entry is a factory producing fresh per-group state exposing
//! add/retract/get, keyed by `(name, argument type)`. Retracting a value
//! that was never added is an invariant violation: the engine guarantees a
//! retraction always follows its matching addition.

use rill_common::{Result, RillError, Type, Value};
use rill_planner::typecheck::{AggregateResolver, AggregateSignature};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Incremental per-group aggregate state.
pub trait Aggregate {
    fn add(&mut self, value: Value) -> Result<()>;
    fn retract(&mut self, value: Value) -> Result<()>;
    fn value(&self) -> Value;
    /// No remaining contributions; the group can be dropped.
    fn is_empty(&self) -> bool;
}

pub struct AggregateDescriptor {
    pub name: &'static str,
    /// Appears in output field names (`price_sum`).
    pub display_name: &'static str,
    output_type: fn(&Type) -> Result<Type>,
    factory: fn(&Type) -> Box<dyn Aggregate>,
}

impl AggregateDescriptor {
    pub fn fresh(&self, arg: &Type) -> Box<dyn Aggregate> {
        (self.factory)(arg)
    }
}

pub struct AggregateRegistry {
    aggregates: FxHashMap<&'static str, AggregateDescriptor>,
}

impl AggregateRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            aggregates: FxHashMap::default(),
        };
        for descriptor in builtins() {
            registry.aggregates.insert(descriptor.name, descriptor);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Result<&AggregateDescriptor> {
        self.aggregates
            .get(name)
            .ok_or_else(|| RillError::Type(format!("unknown aggregate: {name}")))
    }
}

impl AggregateResolver for AggregateRegistry {
    fn aggregate_type(&self, name: &str, arg: &Type) -> Result<AggregateSignature> {
        let descriptor = self.get(name)?;
        Ok(AggregateSignature {
            display_name: descriptor.display_name.to_string(),
            output: (descriptor.output_type)(arg)?,
        })
    }
}

fn base_type(arg: &Type) -> Type {
    match arg {
        Type::Union(members) => {
            let kept: Vec<Type> = members
                .iter()
                .filter(|m| **m != Type::Null)
                .cloned()
                .collect();
            match kept.len() {
                0 => Type::Null,
                1 => kept.into_iter().next().expect("len checked"),
                _ => Type::Union(kept),
            }
        }
        other => other.clone(),
    }
}

fn numeric_output(name: &str, arg: &Type) -> Result<Type> {
    let base = base_type(arg);
    match base {
        Type::Int | Type::Float | Type::Duration => Ok(Type::optional(base)),
        other => Err(RillError::Type(format!(
            "{name} requires a numeric argument, got {other}"
        ))),
    }
}

fn retraction_underflow(name: &str) -> RillError {
    RillError::InvariantViolation(format!("{name}: retraction without matching addition"))
}

// -----------------------------
// count / sum / avg
// -----------------------------

#[derive(Default)]
struct Count {
    count: i64,
}

impl Aggregate for Count {
    fn add(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            self.count += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            self.count -= 1;
            if self.count < 0 {
                return Err(retraction_underflow("count"));
            }
        }
        Ok(())
    }

    fn value(&self) -> Value {
        Value::Int(self.count)
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Default)]
struct IntSum {
    sum: i64,
    count: i64,
}

impl Aggregate for IntSum {
    fn add(&mut self, value: Value) -> Result<()> {
        if let Value::Int(n) = value {
            self.sum += n;
            self.count += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        if let Value::Int(n) = value {
            self.sum -= n;
            self.count -= 1;
            if self.count < 0 {
                return Err(retraction_underflow("sum"));
            }
        }
        Ok(())
    }

    fn value(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Int(self.sum)
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Default)]
struct FloatSum {
    sum: f64,
    count: i64,
}

impl Aggregate for FloatSum {
    fn add(&mut self, value: Value) -> Result<()> {
        if let Some(n) = value.as_float() {
            self.sum += n;
            self.count += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        if let Some(n) = value.as_float() {
            self.sum -= n;
            self.count -= 1;
            if self.count < 0 {
                return Err(retraction_underflow("sum"));
            }
        }
        Ok(())
    }

    fn value(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum)
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Default)]
struct DurationSum {
    nanos: i64,
    count: i64,
}

impl Aggregate for DurationSum {
    fn add(&mut self, value: Value) -> Result<()> {
        if let Value::Duration(n) = value {
            self.nanos += n;
            self.count += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        if let Value::Duration(n) = value {
            self.nanos -= n;
            self.count -= 1;
            if self.count < 0 {
                return Err(retraction_underflow("sum"));
            }
        }
        Ok(())
    }

    fn value(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Duration(self.nanos)
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Default)]
struct Avg {
    sum: f64,
    count: i64,
}

impl Aggregate for Avg {
    fn add(&mut self, value: Value) -> Result<()> {
        if let Some(n) = value.as_float() {
            self.sum += n;
            self.count += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        if let Some(n) = value.as_float() {
            self.sum -= n;
            self.count -= 1;
            if self.count < 0 {
                return Err(retraction_underflow("avg"));
            }
        }
        Ok(())
    }

    fn value(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// -----------------------------
// min / max
// -----------------------------

/// Ordered multiset so a retraction restores the runner-up.
#[derive(Default)]
struct Extremum {
    counts: BTreeMap<Value, usize>,
    maximum: bool,
}

impl Aggregate for Extremum {
    fn add(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            *self.counts.entry(value).or_insert(0) += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let name = if self.maximum { "max" } else { "min" };
        match self.counts.get_mut(&value) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.counts.remove(&value);
                }
                Ok(())
            }
            None => Err(retraction_underflow(name)),
        }
    }

    fn value(&self) -> Value {
        let entry = if self.maximum {
            self.counts.keys().next_back()
        } else {
            self.counts.keys().next()
        };
        entry.cloned().unwrap_or(Value::Null)
    }

    fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

// -----------------------------
// first / last / array_agg
// -----------------------------

/// Arrival-ordered multiset; retraction removes one earliest occurrence.
struct Sequence {
    items: Vec<Value>,
    name: &'static str,
}

impl Sequence {
    fn remove_one(&mut self, value: &Value) -> Result<()> {
        match self.items.iter().position(|v| v == value) {
            Some(i) => {
                self.items.remove(i);
                Ok(())
            }
            None => Err(retraction_underflow(self.name)),
        }
    }
}

struct First(Sequence);

impl Aggregate for First {
    fn add(&mut self, value: Value) -> Result<()> {
        self.0.items.push(value);
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        self.0.remove_one(&value)
    }

    fn value(&self) -> Value {
        self.0.items.first().cloned().unwrap_or(Value::Null)
    }

    fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }
}

struct Last(Sequence);

impl Aggregate for Last {
    fn add(&mut self, value: Value) -> Result<()> {
        self.0.items.push(value);
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        self.0.remove_one(&value)
    }

    fn value(&self) -> Value {
        self.0.items.last().cloned().unwrap_or(Value::Null)
    }

    fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }
}

struct ArrayAgg(Sequence);

impl Aggregate for ArrayAgg {
    fn add(&mut self, value: Value) -> Result<()> {
        self.0.items.push(value);
        Ok(())
    }

    fn retract(&mut self, value: Value) -> Result<()> {
        self.0.remove_one(&value)
    }

    fn value(&self) -> Value {
        Value::Tuple(self.0.items.clone())
    }

    fn is_empty(&self) -> bool {
        self.0.items.is_empty()
    }
}

fn builtins() -> Vec<AggregateDescriptor> {
    vec![
        AggregateDescriptor {
            name: "count",
            display_name: "count",
            output_type: |_| Ok(Type::Int),
            factory: |_| Box::<Count>::default(),
        },
        AggregateDescriptor {
            name: "sum",
            display_name: "sum",
            output_type: |arg| numeric_output("sum", arg),
            factory: |arg| match base_type(arg) {
                Type::Float => Box::<FloatSum>::default(),
                Type::Duration => Box::<DurationSum>::default(),
                _ => Box::<IntSum>::default(),
            },
        },
        AggregateDescriptor {
            name: "avg",
            display_name: "avg",
            output_type: |arg| {
                numeric_output("avg", arg)?;
                Ok(Type::optional(Type::Float))
            },
            factory: |_| Box::<Avg>::default(),
        },
        AggregateDescriptor {
            name: "min",
            display_name: "min",
            output_type: |arg| Ok(Type::optional(base_type(arg))),
            factory: |_| {
                Box::new(Extremum {
                    counts: BTreeMap::new(),
                    maximum: false,
                })
            },
        },
        AggregateDescriptor {
            name: "max",
            display_name: "max",
            output_type: |arg| Ok(Type::optional(base_type(arg))),
            factory: |_| {
                Box::new(Extremum {
                    counts: BTreeMap::new(),
                    maximum: true,
                })
            },
        },
        AggregateDescriptor {
            name: "first",
            display_name: "first",
            output_type: |arg| Ok(Type::optional(base_type(arg))),
            factory: |_| {
                Box::new(First(Sequence {
                    items: vec![],
                    name: "first",
                }))
            },
        },
        AggregateDescriptor {
            name: "last",
            display_name: "last",
            output_type: |arg| Ok(Type::optional(base_type(arg))),
            factory: |_| {
                Box::new(Last(Sequence {
                    items: vec![],
                    name: "last",
                }))
            },
        },
        AggregateDescriptor {
            name: "array_agg",
            display_name: "array_agg",
            output_type: |arg| Ok(Type::List(Box::new(base_type(arg)))),
            factory: |_| {
                Box::new(ArrayAgg(Sequence {
                    items: vec![],
                    name: "array_agg",
                }))
            },
        },
    ]
}
