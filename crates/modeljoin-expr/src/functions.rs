//! Built-in functions: aggregates over grouped values plus a few helpers.
//!
//! Aggregates accept a list or a single value and ignore null elements.

use crate::interpreter::{compare, integral, overflow, Num};
use modeljoin_model::Value;
use modeljoin_transform::EvalError;
use std::cmp::Ordering;

pub const BUILTINS: &[&str] = &[
    "size", "sum", "min", "max", "avg", "first", "concat", "isNull",
];

pub(crate) fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "size" => size(&single(name, args)?),
        "sum" => sum(&single(name, args)?),
        "min" => extreme(&single(name, args)?, Ordering::Less),
        "max" => extreme(&single(name, args)?, Ordering::Greater),
        "avg" => avg(&single(name, args)?),
        "first" => Ok(single(name, args)?
            .elements()
            .first()
            .cloned()
            .unwrap_or_default()),
        "isNull" => Ok(Value::Bool(single(name, args)?.is_null())),
        "concat" => Ok(concat(args)),
        _ => Err(EvalError::Other(format!("unknown function '{name}'"))),
    }
}

fn single(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let count = args.len();
    let mut args = args.into_iter();
    match (args.next(), count) {
        (Some(arg), 1) => Ok(arg),
        _ => Err(EvalError::Other(format!(
            "function '{name}' expects 1 argument, got {count}"
        ))),
    }
}

fn non_null(value: &Value) -> impl Iterator<Item = &Value> {
    value.elements().iter().filter(|v| !v.is_null())
}

fn size(value: &Value) -> Result<Value, EvalError> {
    let size = match value {
        Value::Null => 0,
        Value::List(items) => items.len(),
        Value::String(s) => s.chars().count(),
        _ => 1,
    };
    i64::try_from(size)
        .map(|size| integral(size, false))
        .map_err(|_| overflow())
}

fn numbers(value: &Value, function: &str) -> Result<Vec<Num>, EvalError> {
    non_null(value)
        .map(|v| {
            Num::of(v).ok_or_else(|| {
                EvalError::Type(format!(
                    "{function}() expects numbers, got {}",
                    v.type_name()
                ))
            })
        })
        .collect()
}

fn sum(value: &Value) -> Result<Value, EvalError> {
    let numbers = numbers(value, "sum")?;
    if numbers.iter().any(|n| matches!(n, Num::Float(_))) {
        return Ok(Value::Double(numbers.iter().map(|n| n.as_f64()).sum()));
    }
    let mut total: i64 = 0;
    let mut wide = false;
    for n in numbers {
        if let Num::Int { value, wide: w } = n {
            total = total.checked_add(value).ok_or_else(overflow)?;
            wide |= w;
        }
    }
    Ok(integral(total, wide))
}

fn avg(value: &Value) -> Result<Value, EvalError> {
    let numbers = numbers(value, "avg")?;
    if numbers.is_empty() {
        return Ok(Value::Null);
    }
    let total: f64 = numbers.iter().map(|n| n.as_f64()).sum();
    Ok(Value::Double(total / numbers.len() as f64))
}

/// Smallest (`Less`) or largest (`Greater`) element, keeping its type.
fn extreme(value: &Value, wanted: Ordering) -> Result<Value, EvalError> {
    let mut best: Option<&Value> = None;
    for candidate in non_null(value) {
        let Some(current) = best else {
            best = Some(candidate);
            continue;
        };
        let ordering = compare(candidate, current).ok_or_else(|| {
            EvalError::Type(format!(
                "cannot compare {} with {}",
                candidate.type_name(),
                current.type_name()
            ))
        })?;
        if ordering == wanted {
            best = Some(candidate);
        }
    }
    Ok(best.cloned().unwrap_or_default())
}

/// List concatenation when any argument is a list, string concatenation
/// otherwise. Nulls are skipped.
fn concat(args: Vec<Value>) -> Value {
    if args.iter().any(|arg| matches!(arg, Value::List(_))) {
        let mut out = Vec::new();
        for arg in args {
            match arg {
                Value::Null => {}
                Value::List(items) => out.extend(items),
                other => out.push(other),
            }
        }
        return Value::List(out);
    }
    Value::String(
        args.iter()
            .filter(|arg| !arg.is_null())
            .map(ToString::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: Vec<Value>) -> Value {
        Value::List(items)
    }

    #[test]
    fn test_aggregates_over_ints() {
        let values = list(vec![Value::Int(4), Value::Null, Value::Int(5), Value::Int(3)]);
        assert_eq!(call("size", vec![values.clone()]), Ok(Value::Int(4)));
        assert_eq!(call("sum", vec![values.clone()]), Ok(Value::Int(12)));
        assert_eq!(call("min", vec![values.clone()]), Ok(Value::Int(3)));
        assert_eq!(call("max", vec![values.clone()]), Ok(Value::Int(5)));
        assert_eq!(call("avg", vec![values.clone()]), Ok(Value::Double(4.0)));
        assert_eq!(call("first", vec![values]), Ok(Value::Int(4)));
    }

    #[test]
    fn test_aggregates_over_empty_input() {
        let empty = list(Vec::new());
        assert_eq!(call("sum", vec![empty.clone()]), Ok(Value::Int(0)));
        assert_eq!(call("min", vec![empty.clone()]), Ok(Value::Null));
        assert_eq!(call("avg", vec![empty.clone()]), Ok(Value::Null));
        assert_eq!(call("first", vec![empty.clone()]), Ok(Value::Null));
        assert_eq!(call("size", vec![Value::Null]), Ok(Value::Int(0)));
    }

    #[test]
    fn test_sum_widens_and_mixes() {
        assert_eq!(
            call("sum", vec![list(vec![Value::Long(1), Value::Int(2)])]),
            Ok(Value::Long(3))
        );
        assert_eq!(
            call("sum", vec![list(vec![Value::Double(1.5), Value::Int(2)])]),
            Ok(Value::Double(3.5))
        );
        assert!(matches!(
            call("sum", vec![list(vec![Value::String("x".into())])]),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_min_max_on_strings() {
        let names = list(vec!["pear".into(), "apple".into(), "plum".into()]);
        assert_eq!(call("min", vec![names.clone()]), Ok(Value::String("apple".into())));
        assert_eq!(call("max", vec![names]), Ok(Value::String("plum".into())));
    }

    #[test]
    fn test_concat() {
        assert_eq!(
            call("concat", vec!["a".into(), Value::Int(1), Value::Null, "b".into()]),
            Ok(Value::String("a1b".into()))
        );
        assert_eq!(
            call("concat", vec![list(vec![Value::Int(1)]), Value::Int(2)]),
            Ok(list(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn test_arity_and_unknown_function() {
        assert!(call("size", vec![]).is_err());
        assert!(call("isNull", vec![Value::Null, Value::Null]).is_err());
        assert_eq!(call("isNull", vec![Value::Null]), Ok(Value::Bool(true)));
        assert_eq!(
            call("nope", vec![]),
            Err(EvalError::Other("unknown function 'nope'".into()))
        );
    }
}
