use super::{FromSource, RowStream};
use crate::error::TransformError;
use crate::evaluation::{EvaluationContext, SourceScope};
use crate::tuple::RowTuple;
use modeljoin_model::ObjRef;
use modeljoin_plan::{Join, JoinType};

/// Nested-loop join of `left` with every instance of `right`.
///
/// `slot` is the tuple position the joined instance occupies. Inner joins
/// emit one extended row per match; left joins emit a single row with an
/// empty right slot when nothing matches.
pub fn join<'s>(
    left: RowStream<'s>,
    right: FromSource<'s>,
    clause: &'s Join,
    slot: usize,
    scope: &'s SourceScope<'_>,
) -> RowStream<'s> {
    Box::new(left.flat_map(move |row| -> RowStream<'s> {
        let row = match row {
            Ok(row) => row,
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };
        let padded = match clause.join_type {
            JoinType::Inner => None,
            JoinType::Left => Some(row.clone()),
        };
        let matches = right.instances().filter_map(move |candidate| {
            match row_matches(scope, clause, slot, &row, candidate) {
                Ok(true) => Some(Ok(row.extend(Some(candidate)))),
                Ok(false) => None,
                Err(err) => Some(Err(err)),
            }
        });
        match padded {
            None => Box::new(matches),
            Some(padded) => Box::new(DefaultIfEmpty::new(matches, move || Ok(padded.extend(None)))),
        }
    }))
}

/// Feature conditions first, then expression conditions; all must hold.
fn row_matches(
    scope: &SourceScope<'_>,
    clause: &Join,
    slot: usize,
    left: &RowTuple,
    right: ObjRef,
) -> Result<bool, TransformError> {
    for condition in &clause.feature_conditions {
        let Some(Some(other)) = left.get(condition.other_index) else {
            return Ok(false);
        };
        for feature in &condition.features {
            let left_value = scope.sources.get_by_name(other, feature)?;
            let right_value = scope.sources.get_by_name(right, feature)?;
            if left_value != right_value {
                return Ok(false);
            }
        }
    }

    if clause.expression_conditions.is_empty() {
        return Ok(true);
    }
    let bindings = scope.row_bindings(&left.extend(Some(right)), Some(slot));
    let context = EvaluationContext::new(scope.evaluator(), &bindings);
    for condition in &clause.expression_conditions {
        if !context.evaluate_condition(condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Yields `inner`'s items, or the item built by `fallback` once if `inner`
/// is empty.
struct DefaultIfEmpty<I, F> {
    inner: I,
    fallback: Option<F>,
}

impl<I, F> DefaultIfEmpty<I, F> {
    fn new(inner: I, fallback: F) -> Self {
        Self {
            inner,
            fallback: Some(fallback),
        }
    }
}

impl<I, F> Iterator for DefaultIfEmpty<I, F>
where
    I: Iterator,
    F: FnOnce() -> I::Item,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next() {
            Some(item) => {
                self.fallback = None;
                Some(item)
            }
            None => self.fallback.take().map(|fallback| fallback()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_if_empty() {
        let empty: Vec<i32> = Vec::new();
        assert_eq!(
            DefaultIfEmpty::new(empty.into_iter(), || 9).collect::<Vec<_>>(),
            vec![9]
        );
        let mut built = false;
        assert_eq!(
            DefaultIfEmpty::new(vec![1, 2].into_iter(), || {
                built = true;
                9
            })
            .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(!built);
    }
}
