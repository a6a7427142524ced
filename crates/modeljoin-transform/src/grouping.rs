//! The `group by` stage.
//!
//! Consumes its row stream eagerly, partitions rows by the list of evaluated
//! grouping expressions and transposes each partition into a
//! [`GroupedTuple`]. Keys compare by strict structural equality of
//! [`Value`]s, and groups come out in the order their first row arrived.

use crate::error::TransformError;
use crate::evaluation::{EvaluationContext, SourceScope};
use crate::source::RowStream;
use crate::tuple::{GroupedTuple, RowTuple};
use indexmap::IndexMap;
use modeljoin_model::Value;
use modeljoin_plan::Expression;

pub fn group(
    rows: RowStream<'_>,
    group_by: &[Expression],
    scope: &SourceScope<'_>,
) -> Result<Vec<GroupedTuple>, TransformError> {
    let mut groups: IndexMap<Vec<Value>, Vec<RowTuple>> = IndexMap::new();
    for row in rows {
        let row = row?;
        let bindings = scope.row_bindings(&row, None);
        let context = EvaluationContext::new(scope.evaluator(), &bindings);
        let key = group_by
            .iter()
            .map(|expression| context.evaluate_expression(expression))
            .collect::<Result<Vec<_>, _>>()?;
        groups.entry(key).or_default().push(row);
    }

    tracing::debug!(groups = groups.len(), "grouped source rows");
    Ok(groups
        .into_values()
        .map(|rows| GroupedTuple::transpose(&rows))
        .collect())
}
