use modeljoin_model::ModelError;
use modeljoin_plan::SourceLocation;
use thiserror::Error;

/// A user-facing transformation failure. The transformation is fail-fast: no
/// partially built target model is returned alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to transform models: {kind}")]
pub struct TransformError {
    pub kind: TransformErrorKind,
    /// Location of the expression that caused the failure, if known.
    pub location: Option<SourceLocation>,
}

impl TransformError {
    pub fn new(kind: TransformErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    pub fn at(mut self, location: Option<&SourceLocation>) -> Self {
        if self.location.is_none() {
            self.location = location.cloned();
        }
        self
    }

    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::new(TransformErrorKind::InvalidPlan {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformErrorKind {
    #[error("error during expression evaluation: [{category}] {message}")]
    Evaluation {
        category: &'static str,
        message: String,
    },
    #[error("error during condition evaluation: unexpected result type: expected = boolean, actual = {actual}")]
    ConditionType { actual: String },
    #[error("no target instance of class '{target_class}' found for source instance of class '{source_class}'")]
    MissingMapping {
        target_class: String,
        source_class: String,
    },
    #[error("multiple target instances of class '{target_class}' found for source instance of class '{source_class}'")]
    AmbiguousMapping {
        target_class: String,
        source_class: String,
    },
    #[error("expected exactly one root instance of type {class}, but found {count}")]
    RootCardinality { class: String, count: usize },
    #[error("cannot add target instance of class '{child_class}' to containment reference '{container_class}.{feature}' because it is already contained in another instance of class '{current_container_class}'")]
    ContainmentViolation {
        child_class: String,
        container_class: String,
        feature: String,
        current_container_class: String,
    },
    /// Inconsistencies that plan validation upstream should have ruled out.
    #[error("invalid plan: {message}")]
    InvalidPlan { message: String },
}

impl From<TransformErrorKind> for TransformError {
    fn from(kind: TransformErrorKind) -> Self {
        TransformError::new(kind)
    }
}

impl From<ModelError> for TransformError {
    fn from(err: ModelError) -> Self {
        TransformError::invalid_plan(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_common_prefix() {
        let err = TransformError::new(TransformErrorKind::RootCardinality {
            class: "Root".into(),
            count: 2,
        });
        assert_eq!(
            err.to_string(),
            "Failed to transform models: expected exactly one root instance of type Root, but found 2"
        );
    }

    #[test]
    fn first_location_wins() {
        let first = SourceLocation {
            file: "a.mj".into(),
            start_line: 1,
            start_column: 1,
            end_line: 1,
            end_column: 2,
            length: 1,
        };
        let second = SourceLocation {
            file: "b.mj".into(),
            ..first.clone()
        };
        let err = TransformError::invalid_plan("x")
            .at(Some(&first))
            .at(Some(&second));
        assert_eq!(err.location, Some(first));
    }
}
