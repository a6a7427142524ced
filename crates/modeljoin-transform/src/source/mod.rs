//! Lazy source-tuple pipelines.
//!
//! A pipeline for a source descriptor is `From → Join* → Filter?`, each stage
//! a boxed iterator of row tuples. Nothing is materialised here: rows are
//! produced on demand and errors travel in-band as `Err` items, so the first
//! failing row stops consumption.

mod filter;
mod from;
mod join;

pub use filter::filter;
pub use from::FromSource;
pub use join::join;

use crate::error::TransformError;
use crate::evaluation::SourceScope;
use crate::tuple::RowTuple;

pub type RowStream<'s> = Box<dyn Iterator<Item = Result<RowTuple, TransformError>> + 's>;

/// Build the row pipeline for the scope's source descriptor.
pub fn build<'s>(scope: &'s SourceScope<'_>) -> Result<RowStream<'s>, TransformError> {
    let descriptor = scope.descriptor;
    let mut rows = FromSource::resolve(scope.sources, &descriptor.from)?.rows();

    for (index, clause) in descriptor.joins.iter().enumerate() {
        let right = FromSource::resolve(scope.sources, &clause.from)?;
        // join `index` fills tuple slot `index + 1`
        rows = join(rows, right, clause, index + 1, scope);
    }

    if let Some(condition) = &descriptor.condition {
        rows = filter(rows, condition, scope);
    }
    Ok(rows)
}
