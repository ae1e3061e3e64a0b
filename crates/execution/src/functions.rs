//! The scalar function registry: overload tables consulted by the
//! typechecker and evaluation entry points used by the expression layer.

use rill_common::{Result, RillError, Type, Value};
use rill_planner::typecheck::FunctionResolver;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

pub struct ScalarFunction {
    pub name: &'static str,
    /// `(parameter types, return type)`, tried in order.
    overloads: Vec<(Vec<Type>, Type)>,
    /// SQL null propagation: any Null argument short-circuits to Null.
    propagates_nulls: bool,
    eval: fn(&[Value]) -> Result<Value>,
}

impl ScalarFunction {
    pub fn evaluate(&self, args: &[Value]) -> Result<Value> {
        if self.propagates_nulls && args.iter().any(Value::is_null) {
            return Ok(Value::Null);
        }
        (self.eval)(args).map_err(|e| match e {
            RillError::Runtime(msg) => RillError::Runtime(format!("{}: {msg}", self.name)),
            other => other,
        })
    }

    fn output_type(&self, args: &[Type]) -> Option<Type> {
        let stripped: Vec<Type> = args.iter().map(strip_null).collect();
        let nullable = args.iter().any(Type::is_nullable);
        for (params, ret) in &self.overloads {
            if params.len() != args.len() {
                continue;
            }
            let matches = params
                .iter()
                .zip(&stripped)
                .zip(args)
                .all(|((param, stripped), raw)| {
                    *raw == Type::Null || stripped.is_subtype_of(param)
                });
            if matches {
                return Some(if nullable && self.propagates_nulls {
                    Type::optional(ret.clone())
                } else {
                    ret.clone()
                });
            }
        }
        None
    }
}

fn strip_null(typ: &Type) -> Type {
    match typ {
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

pub struct FunctionRegistry {
    functions: FxHashMap<&'static str, Arc<ScalarFunction>>,
}

impl FunctionRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            functions: FxHashMap::default(),
        };
        for function in builtins() {
            registry.functions.insert(function.name, Arc::new(function));
        }
        registry
    }

    pub fn get(&self, name: &str) -> Result<Arc<ScalarFunction>> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| RillError::unknown_function(name))
    }
}

impl FunctionResolver for FunctionRegistry {
    fn function_type(&self, name: &str, args: &[Type]) -> Result<Type> {
        let function = self.get(name)?;
        function.output_type(args).ok_or_else(|| {
            let rendered: Vec<String> = args.iter().map(Type::to_string).collect();
            RillError::Type(format!(
                "no overload of {name} accepts ({})",
                rendered.join(", ")
            ))
        })
    }
}

// -----------------------------
// Evaluation helpers
// -----------------------------

/// Numeric-aware comparison; equality across non-numeric variants is simply
/// unequal, ordering across them is a runtime error.
pub fn compare_values(a: &Value, b: &Value, ordering: bool) -> Result<Option<Ordering>> {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) => Ok(Some((*x as f64).total_cmp(y))),
        (Value::Float(x), Value::Int(y)) => Ok(Some(x.total_cmp(&(*y as f64)))),
        (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => Ok(Some(a.cmp(b))),
        _ if !ordering => Ok(None),
        _ => Err(RillError::Runtime(format!(
            "cannot order {} against {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn int_op(
    a: i64,
    b: i64,
    checked: fn(i64, i64) -> Option<i64>,
    what: &str,
) -> Result<Value> {
    checked(a, b)
        .map(Value::Int)
        .ok_or_else(|| RillError::Runtime(format!("integer {what} overflow")))
}

fn eval_add(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b, i64::checked_add, "addition"),
        (Value::Duration(a), Value::Duration(b)) => {
            int_op(*a, *b, i64::checked_add, "duration addition").map(|v| match v {
                Value::Int(n) => Value::Duration(n),
                other => other,
            })
        }
        (Value::Time(t), Value::Duration(d)) | (Value::Duration(d), Value::Time(t)) => {
            Ok(Value::Time(*t + chrono::Duration::nanoseconds(*d)))
        }
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => Err(RillError::Runtime(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn eval_sub(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b, i64::checked_sub, "subtraction"),
        (Value::Duration(a), Value::Duration(b)) => Ok(Value::Duration(a - b)),
        (Value::Time(t), Value::Duration(d)) => {
            Ok(Value::Time(*t - chrono::Duration::nanoseconds(*d)))
        }
        (Value::Time(a), Value::Time(b)) => Ok(Value::Duration(
            (*a - *b).num_nanoseconds().ok_or_else(|| {
                RillError::Runtime("time difference overflows Duration".to_string())
            })?,
        )),
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(a - b)),
            _ => Err(RillError::Runtime(format!(
                "cannot subtract {} from {}",
                b.type_name(),
                a.type_name()
            ))),
        },
    }
}

fn eval_mul(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b, i64::checked_mul, "multiplication"),
        (Value::Duration(d), Value::Int(n)) | (Value::Int(n), Value::Duration(d)) => {
            int_op(*d, *n, i64::checked_mul, "duration multiplication").map(|v| match v {
                Value::Int(nanos) => Value::Duration(nanos),
                other => other,
            })
        }
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(a * b)),
            _ => Err(RillError::Runtime(format!(
                "cannot multiply {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn eval_div(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => {
            Err(RillError::Runtime("division by zero".to_string()))
        }
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
        (a, b) => match (a.as_float(), b.as_float()) {
            (Some(a), Some(b)) => Ok(Value::Float(a / b)),
            _ => Err(RillError::Runtime(format!(
                "cannot divide {} by {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn eval_mod(args: &[Value]) -> Result<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(_), Value::Int(0)) => {
            Err(RillError::Runtime("modulo by zero".to_string()))
        }
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a % b)),
        (a, b) => Err(RillError::Runtime(format!(
            "cannot take {} modulo {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn comparison(
    args: &[Value],
    ordering: bool,
    accept: fn(Ordering) -> bool,
    mismatch: bool,
) -> Result<Value> {
    match compare_values(&args[0], &args[1], ordering)? {
        Some(ord) => Ok(Value::Boolean(accept(ord))),
        None => Ok(Value::Boolean(mismatch)),
    }
}

fn builtins() -> Vec<ScalarFunction> {
    use Type::*;
    vec![
        ScalarFunction {
            name: "+",
            overloads: vec![
                (vec![Int, Int], Int),
                (vec![Float, Float], Float),
                (vec![Int, Float], Float),
                (vec![Float, Int], Float),
                (vec![Duration, Duration], Duration),
                (vec![Time, Duration], Time),
                (vec![Duration, Time], Time),
                (vec![Str, Str], Str),
            ],
            propagates_nulls: true,
            eval: eval_add,
        },
        ScalarFunction {
            name: "-",
            overloads: vec![
                (vec![Int, Int], Int),
                (vec![Float, Float], Float),
                (vec![Int, Float], Float),
                (vec![Float, Int], Float),
                (vec![Duration, Duration], Duration),
                (vec![Time, Duration], Time),
                (vec![Time, Time], Duration),
            ],
            propagates_nulls: true,
            eval: eval_sub,
        },
        ScalarFunction {
            name: "*",
            overloads: vec![
                (vec![Int, Int], Int),
                (vec![Float, Float], Float),
                (vec![Int, Float], Float),
                (vec![Float, Int], Float),
                (vec![Duration, Int], Duration),
                (vec![Int, Duration], Duration),
            ],
            propagates_nulls: true,
            eval: eval_mul,
        },
        ScalarFunction {
            name: "/",
            overloads: vec![
                (vec![Int, Int], Int),
                (vec![Float, Float], Float),
                (vec![Int, Float], Float),
                (vec![Float, Int], Float),
            ],
            propagates_nulls: true,
            eval: eval_div,
        },
        ScalarFunction {
            name: "%",
            overloads: vec![(vec![Int, Int], Int)],
            propagates_nulls: true,
            eval: eval_mod,
        },
        ScalarFunction {
            name: "=",
            overloads: vec![(vec![Any, Any], Boolean)],
            propagates_nulls: true,
            eval: |args| comparison(args, false, Ordering::is_eq, false),
        },
        ScalarFunction {
            name: "!=",
            overloads: vec![(vec![Any, Any], Boolean)],
            propagates_nulls: true,
            eval: |args| comparison(args, false, Ordering::is_ne, true),
        },
        ScalarFunction {
            name: "<",
            overloads: vec![(vec![Any, Any], Boolean)],
            propagates_nulls: true,
            eval: |args| comparison(args, true, Ordering::is_lt, false),
        },
        ScalarFunction {
            name: "<=",
            overloads: vec![(vec![Any, Any], Boolean)],
            propagates_nulls: true,
            eval: |args| comparison(args, true, Ordering::is_le, false),
        },
        ScalarFunction {
            name: ">",
            overloads: vec![(vec![Any, Any], Boolean)],
            propagates_nulls: true,
            eval: |args| comparison(args, true, Ordering::is_gt, false),
        },
        ScalarFunction {
            name: ">=",
            overloads: vec![(vec![Any, Any], Boolean)],
            propagates_nulls: true,
            eval: |args| comparison(args, true, Ordering::is_ge, false),
        },
        ScalarFunction {
            name: "not",
            overloads: vec![(vec![Boolean], Boolean)],
            propagates_nulls: true,
            eval: |args| match &args[0] {
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                other => Err(RillError::Runtime(format!(
                    "expected boolean, got {}",
                    other.type_name()
                ))),
            },
        },
        ScalarFunction {
            name: "neg",
            overloads: vec![
                (vec![Int], Int),
                (vec![Float], Float),
                (vec![Duration], Duration),
            ],
            propagates_nulls: true,
            eval: |args| match &args[0] {
                Value::Int(n) => int_op(0, *n, i64::checked_sub, "negation"),
                Value::Float(n) => Ok(Value::Float(-n)),
                Value::Duration(n) => Ok(Value::Duration(-n)),
                other => Err(RillError::Runtime(format!(
                    "cannot negate {}",
                    other.type_name()
                ))),
            },
        },
        ScalarFunction {
            name: "is_null",
            overloads: vec![(vec![Any], Boolean)],
            propagates_nulls: false,
            eval: |args| Ok(Value::Boolean(args[0].is_null())),
        },
        ScalarFunction {
            name: "upper",
            overloads: vec![(vec![Str], Str)],
            propagates_nulls: true,
            eval: |args| match &args[0] {
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => Err(RillError::Runtime(format!(
                    "expected string, got {}",
                    other.type_name()
                ))),
            },
        },
        ScalarFunction {
            name: "lower",
            overloads: vec![(vec![Str], Str)],
            propagates_nulls: true,
            eval: |args| match &args[0] {
                Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                other => Err(RillError::Runtime(format!(
                    "expected string, got {}",
                    other.type_name()
                ))),
            },
        },
        ScalarFunction {
            name: "length",
            overloads: vec![
                (vec![Str], Int),
                (vec![List(Box::new(Any))], Int),
            ],
            propagates_nulls: true,
            eval: |args| match &args[0] {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
                other => Err(RillError::Runtime(format!(
                    "expected string or list, got {}",
                    other.type_name()
                ))),
            },
        },
        ScalarFunction {
            name: "abs",
            overloads: vec![(vec![Int], Int), (vec![Float], Float)],
            propagates_nulls: true,
            eval: |args| match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| RillError::Runtime("integer abs overflow".to_string())),
                Value::Float(n) => Ok(Value::Float(n.abs())),
                other => Err(RillError::Runtime(format!(
                    "expected numeric, got {}",
                    other.type_name()
                ))),
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_resolution_widen_to_float() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry.function_type("+", &[Type::Int, Type::Int]).expect("type"),
            Type::Int
        );
        assert_eq!(
            registry
                .function_type("+", &[Type::Int, Type::Float])
                .expect("type"),
            Type::Float
        );
    }

    #[test]
    fn nullable_arguments_make_nullable_results() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(
            registry
                .function_type("+", &[Type::optional(Type::Int), Type::Int])
                .expect("type"),
            Type::optional(Type::Int)
        );
    }

    #[test]
    fn unknown_function_and_bad_arity() {
        let registry = FunctionRegistry::with_builtins();
        assert!(matches!(
            registry.function_type("frobnicate", &[]),
            Err(RillError::Type(_))
        ));
        let err = registry
            .function_type("+", &[Type::Int])
            .expect_err("arity");
        assert!(err.to_string().contains("no overload"), "{err}");
    }

    #[test]
    fn null_propagation() {
        let registry = FunctionRegistry::with_builtins();
        let plus = registry.get("+").expect("fn");
        assert_eq!(
            plus.evaluate(&[Value::Null, Value::Int(1)]).expect("eval"),
            Value::Null
        );
        let is_null = registry.get("is_null").expect("fn");
        assert_eq!(
            is_null.evaluate(&[Value::Null]).expect("eval"),
            Value::Boolean(true)
        );
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let registry = FunctionRegistry::with_builtins();
        let div = registry.get("/").expect("fn");
        let err = div
            .evaluate(&[Value::Int(1), Value::Int(0)])
            .expect_err("div by zero");
        assert!(matches!(err, RillError::Runtime(_)), "{err}");
    }

    #[test]
    fn comparisons_mix_int_and_float() {
        let registry = FunctionRegistry::with_builtins();
        let lt = registry.get("<").expect("fn");
        assert_eq!(
            lt.evaluate(&[Value::Int(1), Value::Float(1.5)]).expect("eval"),
            Value::Boolean(true)
        );
        let eq = registry.get("=").expect("fn");
        assert_eq!(
            eq.evaluate(&[Value::Int(2), Value::Float(2.0)]).expect("eval"),
            Value::Boolean(true)
        );
        // Equality across unrelated variants is unequal, not an error.
        assert_eq!(
            eq.evaluate(&[Value::Int(2), Value::Str("2".into())])
                .expect("eval"),
            Value::Boolean(false)
        );
    }

    #[test]
    fn time_arithmetic() {
        let registry = FunctionRegistry::with_builtins();
        let t0 = chrono::DateTime::from_timestamp(1_000, 0).expect("time");
        let plus = registry.get("+").expect("fn");
        let shifted = plus
            .evaluate(&[Value::Time(t0), Value::Duration(2_000_000_000)])
            .expect("eval");
        assert_eq!(
            shifted,
            Value::Time(chrono::DateTime::from_timestamp(1_002, 0).expect("time"))
        );
        let minus = registry.get("-").expect("fn");
        assert_eq!(
            minus.evaluate(&[shifted, Value::Time(t0)]).expect("eval"),
            Value::Duration(2_000_000_000)
        );
    }
}
