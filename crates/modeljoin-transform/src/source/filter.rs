use super::RowStream;
use crate::evaluation::{EvaluationContext, SourceScope};
use modeljoin_plan::Expression;

/// Keep rows for which `condition` evaluates to `true`.
pub fn filter<'s>(rows: RowStream<'s>, condition: &'s Expression, scope: &'s SourceScope<'_>) -> RowStream<'s> {
    Box::new(rows.filter_map(move |row| {
        let row = match row {
            Ok(row) => row,
            Err(err) => return Some(Err(err)),
        };
        let bindings = scope.row_bindings(&row, None);
        match EvaluationContext::new(scope.evaluator(), &bindings).evaluate_condition(condition) {
            Ok(true) => Some(Ok(row)),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }))
}
