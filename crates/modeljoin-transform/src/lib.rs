//! modeljoin-transform: the model-to-model transformation engine.
//!
//! Given a [`QueryPlan`](modeljoin_plan::QueryPlan), a set of read-only
//! source models and the target metamodel, [`Transformator`] builds a new
//! target model in two phases:
//!
//! 1. For every target class (root first) a lazy source pipeline
//!    (`from → join* → filter?`, optionally followed by grouping) yields row
//!    tuples; each tuple becomes an empty target instance registered in the
//!    [`TargetMap`] against its source instances.
//! 2. Queued population tasks fill in attributes and references, resolving
//!    source instances to target instances through the target map and
//!    enforcing containment exclusivity.
//!
//! Expressions are evaluated through the [`ExpressionEvaluator`] capability;
//! the engine never parses expression text itself.

pub mod error;
pub mod evaluation;
pub mod grouping;
pub mod options;
pub mod source;
pub mod target_map;
pub mod transformator;
pub mod tuple;

pub use error::{TransformError, TransformErrorKind};
pub use evaluation::{Bindings, EvalError, EvaluationContext, ExpressionEvaluator, SourceScope};
pub use options::TransformOptions;
pub use target_map::{Mapping, MappingError, TargetMap};
pub use transformator::{PendingPopulation, PopulationQueue, PopulationTask, TargetModel, Transformator};
pub use tuple::{GroupedTuple, RowTuple};
