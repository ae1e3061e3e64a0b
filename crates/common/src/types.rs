//! The type lattice used by the typechecker.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A field of an [`Type::Object`] type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectField {
    pub name: String,
    pub typ: Type,
}

/// Static type of an expression or schema field.
///
/// The lattice has the value variants as its base, `Union` as the join of
/// incomparable members, and `Any` as its top. Nullability is carried as the
/// canonical union-with-`Null` form; [`Type::optional`] and
/// [`Type::is_nullable`] expose it as a marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    Null,
    Boolean,
    Int,
    Float,
    Str,
    Time,
    Duration,
    /// Variable-length homogeneous collection (unnest input, array_agg
    /// output). At runtime these are `Value::Tuple`s.
    List(Box<Type>),
    /// Fixed-arity positional tuple (group keys).
    Tuple(Vec<Type>),
    Object(Vec<ObjectField>),
    /// Canonical member set: flattened, deduplicated, sorted, len >= 2.
    Union(Vec<Type>),
    /// Top of the lattice.
    Any,
}

impl Type {
    /// Nullable version of `typ`.
    pub fn optional(typ: Type) -> Type {
        Type::Null.join(&typ)
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Type::Null | Type::Any => true,
            Type::Union(members) => members.iter().any(|m| m.is_nullable()),
            _ => false,
        }
    }

    /// `self <= other`: every concrete value of `self` is a value of `other`.
    pub fn is_subtype_of(&self, other: &Type) -> bool {
        match (self, other) {
            (_, Type::Any) => true,
            (Type::Union(members), _) => members.iter().all(|m| m.is_subtype_of(other)),
            (_, Type::Union(members)) => members.iter().any(|m| self.is_subtype_of(m)),
            (Type::List(a), Type::List(b)) => a.is_subtype_of(b),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_subtype_of(y))
            }
            (Type::Object(a), Type::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|(x, y)| x.name == y.name && x.typ.is_subtype_of(&y.typ))
            }
            (a, b) => a == b,
        }
    }

    /// Least upper bound.
    pub fn join(&self, other: &Type) -> Type {
        if self.is_subtype_of(other) {
            return other.clone();
        }
        if other.is_subtype_of(self) {
            return self.clone();
        }
        match (self, other) {
            (Type::List(a), Type::List(b)) => Type::List(Box::new(a.join(b))),
            (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => {
                Type::Tuple(a.iter().zip(b).map(|(x, y)| x.join(y)).collect())
            }
            _ => {
                let mut members = self.leaves();
                members.extend(other.leaves());
                canonical_union(members)
            }
        }
    }

    /// Greatest lower bound. Incomparable base types meet at the bottom,
    /// reported as an empty-member union rendered `<none>`; callers treat a
    /// non-inhabited meet as a type error.
    pub fn meet(&self, other: &Type) -> Type {
        if self.is_subtype_of(other) {
            return self.clone();
        }
        if other.is_subtype_of(self) {
            return other.clone();
        }
        let members: Vec<Type> = self
            .leaves()
            .into_iter()
            .filter(|m| m.is_subtype_of(other))
            .collect();
        canonical_union(members)
    }

    /// `true` when no value inhabits this type (empty meet result).
    pub fn is_empty(&self) -> bool {
        matches!(self, Type::Union(ms) if ms.is_empty())
    }

    /// Non-union members, flattened.
    fn leaves(&self) -> Vec<Type> {
        match self {
            Type::Union(members) => members.iter().flat_map(|m| m.leaves()).collect(),
            other => vec![other.clone()],
        }
    }

    /// Runtime type of a value. Tuples report as fixed-arity tuples; empty
    /// tuples as `List(Any)`.
    pub fn of(value: &Value) -> Type {
        match value {
            Value::Null => Type::Null,
            Value::Boolean(_) => Type::Boolean,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::Time(_) => Type::Time,
            Value::Duration(_) => Type::Duration,
            Value::Tuple(vs) if vs.is_empty() => Type::List(Box::new(Type::Any)),
            Value::Tuple(vs) => Type::Tuple(vs.iter().map(Type::of).collect()),
            Value::Object(m) => Type::Object(
                m.iter()
                    .map(|(name, v)| ObjectField {
                        name: name.clone(),
                        typ: Type::of(v),
                    })
                    .collect(),
            ),
        }
    }

    /// `true` when `value` inhabits this type.
    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (Type::Any, _) => true,
            (Type::Union(members), v) => members.iter().any(|m| m.contains(v)),
            (Type::List(elem), Value::Tuple(vs)) => vs.iter().all(|v| elem.contains(v)),
            (Type::Tuple(ts), Value::Tuple(vs)) => {
                ts.len() == vs.len() && ts.iter().zip(vs).all(|(t, v)| t.contains(v))
            }
            (Type::Object(fs), Value::Object(m)) => {
                fs.len() == m.len()
                    && fs
                        .iter()
                        .all(|f| m.get(&f.name).is_some_and(|v| f.typ.contains(v)))
            }
            (t, v) => *t == Type::of(v),
        }
    }
}

fn canonical_union(mut members: Vec<Type>) -> Type {
    members.sort();
    members.dedup();
    if members.iter().any(|m| matches!(m, Type::Any)) {
        return Type::Any;
    }
    match members.len() {
        1 => members.pop().expect("len checked"),
        _ => Type::Union(members),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Null => write!(f, "Null"),
            Type::Boolean => write!(f, "Boolean"),
            Type::Int => write!(f, "Int"),
            Type::Float => write!(f, "Float"),
            Type::Str => write!(f, "String"),
            Type::Time => write!(f, "Time"),
            Type::Duration => write!(f, "Duration"),
            Type::List(elem) => write!(f, "[{elem}]"),
            Type::Tuple(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Type::Object(fs) => {
                write!(f, "{{")?;
                for (i, field) in fs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.typ)?;
                }
                write!(f, "}}")
            }
            Type::Union(members) if members.is_empty() => write!(f, "<none>"),
            Type::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
            Type::Any => write!(f, "Any"),
        }
    }
}
