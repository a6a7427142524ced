//! Expression evaluation glue.
//!
//! The engine never interprets expression text. It hands an [`Expression`]
//! and a set of [`Bindings`] to an [`ExpressionEvaluator`] and maps failures
//! to [`TransformError`]s carrying the expression's source location.

use crate::error::{TransformError, TransformErrorKind};
use crate::tuple::{GroupedTuple, RowTuple};
use modeljoin_model::{ModelSet, Value};
use modeljoin_plan::{Expression, FromClause, SourceDescriptor};
use thiserror::Error;

/// Failure reported by an evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("{0}")]
    Syntax(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Model(String),
    #[error("{0}")]
    Other(String),
}

impl EvalError {
    pub fn category(&self) -> &'static str {
        match self {
            EvalError::Syntax(_) => "SyntaxError",
            EvalError::UnknownVariable(_) => "UnknownVariable",
            EvalError::Type(_) => "TypeError",
            EvalError::Model(_) => "ModelError",
            EvalError::Other(_) => "EvaluationError",
        }
    }
}

/// The evaluator capability the engine depends on.
pub trait ExpressionEvaluator {
    fn evaluate(&self, expression: &Expression, bindings: &Bindings) -> Result<Value, EvalError>;
}

impl<F> ExpressionEvaluator for F
where
    F: Fn(&Expression, &Bindings) -> Result<Value, EvalError>,
{
    fn evaluate(&self, expression: &Expression, bindings: &Bindings) -> Result<Value, EvalError> {
        self(expression, bindings)
    }
}

/// Named values visible to an expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    vars: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, replacing an existing binding of the same name.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Pair `froms` with `values` positionally. Every aliased from binds its
    /// alias. When there is exactly one from, its value is also bound to
    /// `self_alias`. With `limit = Some(i)`, froms after index `i` stay
    /// invisible.
    pub fn for_froms<I>(froms: &[&FromClause], values: I, limit: Option<usize>, self_alias: &str) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut bindings = Bindings::new();
        for (index, (from, value)) in froms.iter().zip(values).enumerate() {
            if index == 0 && froms.len() == 1 {
                bindings.bind(self_alias, value.clone());
            }
            if let Some(alias) = &from.alias {
                bindings.bind(alias.clone(), value);
            }
            if limit == Some(index) {
                break;
            }
        }
        bindings
    }
}

/// Bindings paired with the evaluator that consumes them.
pub struct EvaluationContext<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
    bindings: &'a Bindings,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator, bindings: &'a Bindings) -> Self {
        Self {
            evaluator,
            bindings,
        }
    }

    pub fn evaluate_expression(&self, expression: &Expression) -> Result<Value, TransformError> {
        self.evaluator
            .evaluate(expression, self.bindings)
            .map_err(|err| {
                TransformError::new(TransformErrorKind::Evaluation {
                    category: err.category(),
                    message: err.to_string(),
                })
                .at(expression.location.as_ref())
            })
    }

    /// Evaluate and require a boolean result.
    pub fn evaluate_condition(&self, condition: &Expression) -> Result<bool, TransformError> {
        match self.evaluate_expression(condition)? {
            Value::Bool(b) => Ok(b),
            other => Err(TransformError::new(TransformErrorKind::ConditionType {
                actual: other.type_name().to_string(),
            })
            .at(condition.location.as_ref())),
        }
    }
}

/// Everything the pipeline stages of one source descriptor share.
pub struct SourceScope<'a> {
    pub(crate) sources: &'a ModelSet,
    pub(crate) evaluator: &'a dyn ExpressionEvaluator,
    pub(crate) descriptor: &'a SourceDescriptor,
    froms: Vec<&'a FromClause>,
    self_alias: String,
}

impl<'a> SourceScope<'a> {
    pub fn new(
        sources: &'a ModelSet,
        evaluator: &'a dyn ExpressionEvaluator,
        descriptor: &'a SourceDescriptor,
        self_alias: impl Into<String>,
    ) -> Self {
        Self {
            sources,
            evaluator,
            descriptor,
            froms: descriptor.all_froms(),
            self_alias: self_alias.into(),
        }
    }

    pub fn bindings(&self, values: Vec<Value>, limit: Option<usize>) -> Bindings {
        Bindings::for_froms(&self.froms, values, limit, &self.self_alias)
    }

    pub fn row_bindings(&self, row: &RowTuple, limit: Option<usize>) -> Bindings {
        self.bindings(row.values(), limit)
    }

    pub fn grouped_bindings(&self, group: &GroupedTuple) -> Bindings {
        self.bindings(group.values(), None)
    }

    pub fn evaluator(&self) -> &'a dyn ExpressionEvaluator {
        self.evaluator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from(alias: Option<&str>) -> FromClause {
        FromClause {
            metamodel: "m".into(),
            class: "C".into(),
            alias: alias.map(str::to_string),
        }
    }

    #[test]
    fn single_from_binds_self_alias() {
        let a = from(Some("r"));
        let bindings = Bindings::for_froms(&[&a], vec![Value::Int(1)], None, "it");
        assert_eq!(bindings.get("it"), Some(&Value::Int(1)));
        assert_eq!(bindings.get("r"), Some(&Value::Int(1)));

        let unaliased = from(None);
        let bindings = Bindings::for_froms(&[&unaliased], vec![Value::Int(1)], None, "it");
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn multiple_froms_skip_self_alias_and_respect_limit() {
        let a = from(Some("a"));
        let b = from(None);
        let c = from(Some("c"));
        let values = vec![Value::Int(1), Value::Null, Value::Int(3)];

        let all = Bindings::for_froms(&[&a, &b, &c], values.clone(), None, "it");
        assert_eq!(all.get("it"), None);
        assert_eq!(all.get("a"), Some(&Value::Int(1)));
        assert_eq!(all.get("c"), Some(&Value::Int(3)));

        let limited = Bindings::for_froms(&[&a, &b, &c], values, Some(1), "it");
        assert_eq!(limited.get("a"), Some(&Value::Int(1)));
        assert_eq!(limited.get("c"), None);
    }

    #[test]
    fn evaluator_failures_map_to_transform_errors() {
        let failing = |_: &Expression, _: &Bindings| -> Result<Value, EvalError> {
            Err(EvalError::Type("cannot add string and boolean".into()))
        };
        let bindings = Bindings::new();
        let context = EvaluationContext::new(&failing, &bindings);
        let err = context
            .evaluate_expression(&Expression::new("x + true"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to transform models: error during expression evaluation: [TypeError] cannot add string and boolean"
        );
    }

    #[test]
    fn non_boolean_conditions_are_rejected() {
        let constant = |_: &Expression, _: &Bindings| -> Result<Value, EvalError> { Ok(Value::Int(1)) };
        let bindings = Bindings::new();
        let context = EvaluationContext::new(&constant, &bindings);
        let err = context
            .evaluate_condition(&Expression::new("1"))
            .unwrap_err();
        assert_eq!(
            err.kind,
            TransformErrorKind::ConditionType {
                actual: "int".into()
            }
        );
    }
}
