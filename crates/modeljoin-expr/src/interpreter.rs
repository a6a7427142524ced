//! Tree-walking interpreter over source models.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::functions;
use modeljoin_model::{ModelSet, Value};
use modeljoin_transform::{Bindings, EvalError};
use std::cmp::Ordering;

/// Evaluates parsed expressions. Feature reads resolve objects against the
/// registered source models.
#[derive(Clone, Copy)]
pub struct Interpreter<'a> {
    sources: &'a ModelSet,
}

impl<'a> Interpreter<'a> {
    pub fn new(sources: &'a ModelSet) -> Self {
        Self { sources }
    }

    pub fn eval(&self, expr: &Expr, bindings: &Bindings) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Expr::Member(target, feature) => {
                let target = self.eval(target, bindings)?;
                self.read(target, feature)
            }
            Expr::Unary(op, operand) => unary(*op, self.eval(operand, bindings)?),
            Expr::Binary(BinaryOp::And, left, right) => {
                if !expect_bool(&self.eval(left, bindings)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(&self.eval(right, bindings)?, "&&")?))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                if expect_bool(&self.eval(left, bindings)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(&self.eval(right, bindings)?, "||")?))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, bindings)?;
                let right = self.eval(right, bindings)?;
                binary(*op, &left, &right)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                functions::call(name, args)
            }
        }
    }

    /// Feature read. Lists map element-wise and flatten; nulls propagate.
    fn read(&self, target: Value, feature: &str) -> Result<Value, EvalError> {
        match target {
            Value::Null => Ok(Value::Null),
            Value::Object(obj) => self
                .sources
                .get_by_name(obj, feature)
                .cloned()
                .map_err(|err| EvalError::Model(err.to_string())),
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.read(item, feature)? {
                        Value::Null => {}
                        Value::List(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                Ok(Value::List(out))
            }
            other => Err(EvalError::Type(format!(
                "cannot read feature '{feature}' of a {} value",
                other.type_name()
            ))),
        }
    }
}

fn expect_bool(value: &Value, op: &str) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| {
        EvalError::Type(format!(
            "operator '{op}' expects boolean operands, got {}",
            value.type_name()
        ))
    })
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Byte(v)) => Ok(integral(-i64::from(v), false)),
        (UnaryOp::Neg, Value::Short(v)) => Ok(integral(-i64::from(v), false)),
        (UnaryOp::Neg, Value::Int(v)) => Ok(integral(-i64::from(v), false)),
        (UnaryOp::Neg, Value::Long(v)) => v.checked_neg().map(Value::Long).ok_or_else(overflow),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Neg, Value::Double(v)) => Ok(Value::Double(-v)),
        (op, other) => Err(EvalError::Type(format!(
            "operator '{}' cannot be applied to {}",
            match op {
                UnaryOp::Not => "!",
                UnaryOp::Neg => "-",
            },
            other.type_name()
        ))),
    }
}

// ============================================================================
// Numbers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    /// Integral value; `wide` once a `long` took part.
    Int { value: i64, wide: bool },
    Float(f64),
}

impl Num {
    pub(crate) fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Long(v) => Some(Num::Int {
                value: *v,
                wide: true,
            }),
            Value::Float(_) | Value::Double(_) => value.as_f64().map(Num::Float),
            other => other.as_i64().map(|value| Num::Int { value, wide: false }),
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int { value, .. } => value as f64,
            Num::Float(v) => v,
        }
    }
}

/// `int` when it fits and no `long` took part, `long` otherwise.
pub(crate) fn integral(value: i64, wide: bool) -> Value {
    if !wide {
        if let Ok(narrow) = i32::try_from(value) {
            return Value::Int(narrow);
        }
    }
    Value::Long(value)
}

pub(crate) fn overflow() -> EvalError {
    EvalError::Other("integer overflow".to_string())
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| mismatch(op, left, right))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
            Ok(Value::String(format!("{left}{right}")))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Some(l), Some(r)) = (Num::of(left), Num::of(right)) else {
                return Err(mismatch(op, left, right));
            };
            arithmetic(op, l, r)
        }
        BinaryOp::And | BinaryOp::Or => {
            let l = expect_bool(left, op.symbol())?;
            let r = expect_bool(right, op.symbol())?;
            Ok(Value::Bool(if op == BinaryOp::And { l && r } else { l || r }))
        }
    }
}

fn arithmetic(op: BinaryOp, left: Num, right: Num) -> Result<Value, EvalError> {
    if let (
        Num::Int { value: l, wide: lw },
        Num::Int { value: r, wide: rw },
    ) = (left, right)
    {
        if matches!(op, BinaryOp::Div | BinaryOp::Rem) && r == 0 {
            return Err(EvalError::Other("division by zero".to_string()));
        }
        let result = match op {
            BinaryOp::Add => l.checked_add(r),
            BinaryOp::Sub => l.checked_sub(r),
            BinaryOp::Mul => l.checked_mul(r),
            BinaryOp::Div => l.checked_div(r),
            _ => l.checked_rem(r),
        };
        return result.map(|v| integral(v, lw || rw)).ok_or_else(overflow);
    }
    let (l, r) = (left.as_f64(), right.as_f64());
    Ok(Value::Double(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        _ => l % r,
    }))
}

/// Numbers compare by value across widths; everything else structurally.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (Num::of(left), Num::of(right)) {
        (Some(Num::Int { value: l, .. }), Some(Num::Int { value: r, .. })) => l == r,
        (Some(l), Some(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

/// Ordering for numbers, strings and chars; `None` when incomparable.
pub(crate) fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Char(l), Value::Char(r)) => Some(l.cmp(r)),
        _ => match (Num::of(left)?, Num::of(right)?) {
            (Num::Int { value: l, .. }, Num::Int { value: r, .. }) => Some(l.cmp(&r)),
            (l, r) => l.as_f64().partial_cmp(&r.as_f64()),
        },
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::Type(format!(
        "operator '{op}' cannot be applied to {} and {}",
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn eval(text: &str, bindings: &Bindings) -> Result<Value, EvalError> {
        let sources = ModelSet::new();
        Interpreter::new(&sources).eval(&parse(text).unwrap(), bindings)
    }

    #[test]
    fn test_arithmetic_promotion() {
        let none = Bindings::new();
        assert_eq!(eval("1 + 2 * 3", &none), Ok(Value::Int(7)));
        assert_eq!(eval("7 / 2", &none), Ok(Value::Int(3)));
        assert_eq!(eval("7 % 4", &none), Ok(Value::Int(3)));
        assert_eq!(eval("7 / 2.0", &none), Ok(Value::Double(3.5)));
        assert_eq!(eval("2147483647 + 1", &none), Ok(Value::Long(2_147_483_648)));
        assert_eq!(eval("-3", &none), Ok(Value::Int(-3)));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("1 / 0", &Bindings::new()).unwrap_err();
        assert_eq!(err.category(), "EvaluationError");
    }

    #[test]
    fn test_string_concatenation() {
        let bindings = Bindings::new().with("n", Value::Int(3));
        assert_eq!(
            eval("'x' + n + null", &bindings),
            Ok(Value::String("x3null".into()))
        );
    }

    #[test]
    fn test_comparisons_across_widths() {
        let bindings = Bindings::new()
            .with("l", Value::Long(5))
            .with("f", Value::Float(5.0));
        assert_eq!(eval("l == 5", &bindings), Ok(Value::Bool(true)));
        assert_eq!(eval("f == l", &bindings), Ok(Value::Bool(true)));
        assert_eq!(eval("l < 6.5", &bindings), Ok(Value::Bool(true)));
        assert_eq!(eval("'abc' >= 'abd'", &bindings), Ok(Value::Bool(false)));
        assert_eq!(eval("null == null", &bindings), Ok(Value::Bool(true)));
        assert!(matches!(eval("'a' < 1", &bindings), Err(EvalError::Type(_))));
    }

    #[test]
    fn test_logic_short_circuits() {
        // `missing` would fail with an unknown variable if evaluated
        let none = Bindings::new();
        assert_eq!(eval("false && missing", &none), Ok(Value::Bool(false)));
        assert_eq!(eval("true || missing", &none), Ok(Value::Bool(true)));
        assert_eq!(
            eval("true && missing", &none),
            Err(EvalError::UnknownVariable("missing".into()))
        );
        assert!(matches!(eval("1 && true", &none), Err(EvalError::Type(_))));
        assert_eq!(eval("!(1 == 2)", &none), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_member_access_on_non_object() {
        let bindings = Bindings::new().with("x", Value::Int(1)).with("n", Value::Null);
        assert!(matches!(eval("x.name", &bindings), Err(EvalError::Type(_))));
        assert_eq!(eval("n.name", &bindings), Ok(Value::Null));
    }
}
