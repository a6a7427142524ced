//! modeljoin-expr: the reference expression language.
//!
//! A small, dynamically typed language for conditions, join predicates,
//! grouping keys and feature values in query plans:
//!
//! ```text
//! r.name == p.name && p.rating >= 4
//! concat(r.name, " (", size(r.menu), ")")
//! avg(p.rating)
//! ```
//!
//! [`ExprEvaluator`] implements the engine's
//! [`ExpressionEvaluator`](modeljoin_transform::ExpressionEvaluator)
//! capability. Parsed expressions are cached by text.

pub mod ast;
pub mod functions;
pub mod interpreter;
pub mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use interpreter::Interpreter;
pub use parser::{parse, ParseError};

use ahash::AHashMap;
use modeljoin_model::{ModelSet, Value};
use modeljoin_plan::{Expression, QueryPlan, SourceLocation};
use modeljoin_transform::{Bindings, EvalError, ExpressionEvaluator};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

// ============================================================================
// Evaluator
// ============================================================================

pub struct ExprEvaluator<'a> {
    interpreter: Interpreter<'a>,
    cache: RefCell<AHashMap<String, Rc<Expr>>>,
}

impl<'a> ExprEvaluator<'a> {
    pub fn new(sources: &'a ModelSet) -> Self {
        Self {
            interpreter: Interpreter::new(sources),
            cache: RefCell::new(AHashMap::new()),
        }
    }

    fn parsed(&self, text: &str) -> Result<Rc<Expr>, EvalError> {
        if let Some(expr) = self.cache.borrow().get(text) {
            return Ok(Rc::clone(expr));
        }
        let expr = Rc::new(parse(text).map_err(|err| EvalError::Syntax(err.to_string()))?);
        trace!(expression = text, "parsed expression");
        self.cache
            .borrow_mut()
            .insert(text.to_string(), Rc::clone(&expr));
        Ok(expr)
    }
}

impl ExpressionEvaluator for ExprEvaluator<'_> {
    fn evaluate(&self, expression: &Expression, bindings: &Bindings) -> Result<Value, EvalError> {
        let expr = self.parsed(&expression.text)?;
        self.interpreter.eval(&expr, bindings)
    }
}

// ============================================================================
// Static checks
// ============================================================================

/// A problem found in a plan's expression without running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionIssue {
    pub text: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// Every expression in the plan, in plan order.
pub fn plan_expressions(plan: &QueryPlan) -> Vec<&Expression> {
    let mut out = Vec::new();
    for class in &plan.classes {
        if let Some(source) = &class.source {
            for join in &source.joins {
                out.extend(&join.expression_conditions);
            }
            out.extend(&source.condition);
            out.extend(&source.group_by);
        }
        for feature in &class.features {
            out.extend(feature.expression());
        }
    }
    out
}

/// Parse every expression and flag syntax errors and unknown functions.
pub fn check_plan(plan: &QueryPlan) -> Vec<ExpressionIssue> {
    let mut issues = Vec::new();
    for expression in plan_expressions(plan) {
        let issue = |message: String| ExpressionIssue {
            text: expression.text.clone(),
            message,
            location: expression.location.clone(),
        };
        match parse(&expression.text) {
            Ok(expr) => {
                let mut unknown = Vec::new();
                collect_unknown_calls(&expr, &mut unknown);
                issues.extend(
                    unknown
                        .into_iter()
                        .map(|name| issue(format!("unknown function '{name}'"))),
                );
            }
            Err(err) => issues.push(issue(err.to_string())),
        }
    }
    issues
}

fn collect_unknown_calls<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
    match expr {
        Expr::Literal(_) | Expr::Var(_) => {}
        Expr::Member(target, _) => collect_unknown_calls(target, out),
        Expr::Unary(_, operand) => collect_unknown_calls(operand, out),
        Expr::Binary(_, left, right) => {
            collect_unknown_calls(left, out);
            collect_unknown_calls(right, out);
        }
        Expr::Call(name, args) => {
            if !functions::BUILTINS.contains(&name.as_str()) {
                out.push(name);
            }
            args.iter().for_each(|arg| collect_unknown_calls(arg, out));
        }
    }
}
