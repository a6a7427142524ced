//! modeljoin-plan: the compiled query plan.
//!
//! A [`QueryPlan`] lists one [`TargetClassPlan`] per target class. Each target
//! class optionally reads from a [`SourceDescriptor`] (`from`, joins, filter
//! condition, grouping expressions) and derives each target feature through a
//! [`FeaturePlan`]. Expressions are opaque text with an optional
//! [`SourceLocation`]; interpreting them is the evaluator's job.
//!
//! Plans are produced upstream by the query compiler and shipped as JSON.
//! [`QueryPlan::validate`] checks internal consistency (indices in range);
//! [`QueryPlan::validate_against`] additionally resolves every class and feature
//! name against the source and target metamodels.

use modeljoin_model::{DataType, FeatureType, Metamodel, UNBOUNDED};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid plan JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("root index {root} is out of range ({count} target classes)")]
    RootOutOfRange { root: usize, count: usize },
    #[error("duplicate target class '{name}'")]
    DuplicateClass { name: String },
    #[error("feature '{class}.{feature}' references target class index {target}, which does not exist")]
    ReferenceTargetOutOfRange {
        class: String,
        feature: String,
        target: usize,
    },
    #[error("join {join} of '{class}' compares with source {other_index}, which is not an earlier source")]
    JoinConditionIndex {
        class: String,
        join: usize,
        other_index: usize,
    },
    #[error("{message}")]
    Unresolved { message: String },
}

// ============================================================================
// Plan IR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub export: Export,
    pub classes: Vec<TargetClassPlan>,
    /// Index of the root class in `classes`.
    pub root: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetClassPlan {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,
    #[serde(default)]
    pub features: Vec<FeaturePlan>,
}

impl TargetClassPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            features: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_feature(mut self, feature: FeaturePlan) -> Self {
        self.features.push(feature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub from: FromClause,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
    #[serde(default)]
    pub group_by: Vec<Expression>,
}

impl SourceDescriptor {
    pub fn new(from: FromClause) -> Self {
        Self {
            from,
            joins: Vec::new(),
            condition: None,
            group_by: Vec::new(),
        }
    }

    pub fn with_join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_group_by(mut self, expression: Expression) -> Self {
        self.group_by.push(expression);
        self
    }

    /// The main `from` followed by every join's `from`; row tuple slot `i`
    /// holds an instance of `all_froms()[i]`.
    pub fn all_froms(&self) -> Vec<&FromClause> {
        std::iter::once(&self.from)
            .chain(self.joins.iter().map(|j| &j.from))
            .collect()
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }
}

/// A source class read from one source metamodel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromClause {
    pub metamodel: String,
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl FromClause {
    pub fn new(metamodel: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            metamodel: metamodel.into(),
            class: class.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    #[serde(rename = "type")]
    pub join_type: JoinType,
    pub from: FromClause,
    #[serde(default)]
    pub feature_conditions: Vec<FeatureCondition>,
    #[serde(default)]
    pub expression_conditions: Vec<Expression>,
}

impl Join {
    pub fn new(join_type: JoinType, from: FromClause) -> Self {
        Self {
            join_type,
            from,
            feature_conditions: Vec::new(),
            expression_conditions: Vec::new(),
        }
    }

    pub fn inner(from: FromClause) -> Self {
        Self::new(JoinType::Inner, from)
    }

    pub fn left(from: FromClause) -> Self {
        Self::new(JoinType::Left, from)
    }

    pub fn on_features<I, S>(mut self, other_index: usize, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_conditions.push(FeatureCondition {
            other_index,
            features: features.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn on_expression(mut self, expression: Expression) -> Self {
        self.expression_conditions.push(expression);
        self
    }
}

/// Equality of each named feature between the tuple slot `other_index` and
/// the joined instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCondition {
    pub other_index: usize,
    pub features: Vec<String>,
}

// ============================================================================
// Features
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePlan {
    pub name: String,
    pub kind: FeatureKind,
    #[serde(default)]
    pub options: FeatureOptions,
    #[serde(rename = "type")]
    pub ty: FeaturePlanType,
}

impl FeaturePlan {
    pub fn new(name: impl Into<String>, kind: FeatureKind, ty: FeaturePlanType) -> Self {
        Self {
            name: name.into(),
            kind,
            options: FeatureOptions::default(),
            ty,
        }
    }

    pub fn with_options(mut self, options: FeatureOptions) -> Self {
        self.options = options;
        self
    }

    pub fn many(mut self) -> Self {
        self.options.upper = UNBOUNDED;
        self
    }

    pub fn containment(mut self) -> Self {
        self.options.containment = true;
        self
    }

    /// Keep repeated elements of a many-valued feature.
    pub fn not_unique(mut self) -> Self {
        self.options.unique = false;
        self
    }

    /// The value-producing expression, if any.
    pub fn expression(&self) -> Option<&Expression> {
        match &self.kind {
            FeatureKind::Copy { expression, .. } => expression.as_ref(),
            FeatureKind::Calculate { expression } => Some(expression),
            FeatureKind::Generate => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Copies a source feature. Without an expression the feature is read
    /// directly from the main source instance.
    Copy {
        source: FeatureRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expression: Option<Expression>,
    },
    Calculate {
        expression: Expression,
    },
    /// Filled by the transformation itself (root containment references).
    Generate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRef {
    pub metamodel: String,
    pub class: String,
    pub feature: String,
}

impl FeatureRef {
    pub fn new(
        metamodel: impl Into<String>,
        class: impl Into<String>,
        feature: impl Into<String>,
    ) -> Self {
        Self {
            metamodel: metamodel.into(),
            class: class.into(),
            feature: feature.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeaturePlanType {
    Data { datatype: DataType },
    Enum { enumeration: String },
    /// Index into [`QueryPlan::classes`].
    Reference { target: usize },
}

impl FeaturePlanType {
    pub fn is_reference(&self) -> bool {
        matches!(self, FeaturePlanType::Reference { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOptions {
    pub lower: i32,
    pub upper: i32,
    pub ordered: bool,
    pub unique: bool,
    pub changeable: bool,
    pub transient: bool,
    pub volatile: bool,
    pub unsettable: bool,
    pub derived: bool,
    pub id: bool,
    pub containment: bool,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            lower: 0,
            upper: 1,
            ordered: true,
            unique: true,
            changeable: true,
            transient: false,
            volatile: false,
            unsettable: false,
            derived: false,
            id: false,
            containment: false,
        }
    }
}

impl FeatureOptions {
    pub fn is_many(&self) -> bool {
        self.upper == UNBOUNDED || self.upper > 1
    }

    pub fn is_required(&self) -> bool {
        self.lower > 0
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Expression {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub length: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.start_line, self.start_column)
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl QueryPlan {
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let plan: QueryPlan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn root_class(&self) -> Option<&TargetClassPlan> {
        self.classes.get(self.root)
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    /// Index-level consistency: root and reference targets in range, join
    /// conditions only look at earlier sources, class names unique.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.root >= self.classes.len() {
            return Err(PlanError::RootOutOfRange {
                root: self.root,
                count: self.classes.len(),
            });
        }
        for (i, class) in self.classes.iter().enumerate() {
            if self.classes[..i].iter().any(|c| c.name == class.name) {
                return Err(PlanError::DuplicateClass {
                    name: class.name.clone(),
                });
            }
            for feature in &class.features {
                if let FeaturePlanType::Reference { target } = feature.ty {
                    if target >= self.classes.len() {
                        return Err(PlanError::ReferenceTargetOutOfRange {
                            class: class.name.clone(),
                            feature: feature.name.clone(),
                            target,
                        });
                    }
                }
            }
            if let Some(source) = &class.source {
                for (j, join) in source.joins.iter().enumerate() {
                    // join j occupies tuple slot j + 1
                    for condition in &join.feature_conditions {
                        if condition.other_index > j {
                            return Err(PlanError::JoinConditionIndex {
                                class: class.name.clone(),
                                join: j,
                                other_index: condition.other_index,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve every class and feature name the plan mentions. Returns all
    /// findings rather than stopping at the first.
    pub fn validate_against(
        &self,
        sources: &[&Metamodel],
        target: Option<&Metamodel>,
    ) -> Vec<PlanError> {
        let mut issues = Vec::new();
        if let Err(err) = self.validate() {
            issues.push(err);
            return issues;
        }
        let unresolved = |message: String| PlanError::Unresolved { message };
        let source_mm = |name: &str| sources.iter().copied().find(|m| m.name() == name);

        for class in &self.classes {
            if let Some(source) = &class.source {
                let froms = source.all_froms();
                for from in &froms {
                    match source_mm(&from.metamodel) {
                        None => issues.push(unresolved(format!(
                            "'{}': unknown source metamodel '{}'",
                            class.name, from.metamodel
                        ))),
                        Some(mm) => {
                            if let Err(err) = mm.class_by_name(&from.class) {
                                issues.push(unresolved(format!("'{}': {err}", class.name)));
                            }
                        }
                    }
                }
                for (j, join) in source.joins.iter().enumerate() {
                    for condition in &join.feature_conditions {
                        for side in [froms[condition.other_index], froms[j + 1]] {
                            let Some(mm) = source_mm(&side.metamodel) else {
                                continue;
                            };
                            let Ok(c) = mm.class_by_name(&side.class) else {
                                continue;
                            };
                            for name in &condition.features {
                                if c.feature_by_name(name).is_none() {
                                    issues.push(unresolved(format!(
                                        "'{}': join condition uses unknown feature '{}.{}'",
                                        class.name, side.class, name
                                    )));
                                }
                            }
                        }
                    }
                }
            }

            for feature in &class.features {
                if let FeatureKind::Copy { source, .. } = &feature.kind {
                    let resolved = source_mm(&source.metamodel)
                        .and_then(|mm| mm.class_by_name(&source.class).ok())
                        .and_then(|c| c.feature_by_name(&source.feature));
                    if resolved.is_none() {
                        issues.push(unresolved(format!(
                            "'{}.{}': copied feature '{}.{}' does not resolve",
                            class.name, feature.name, source.class, source.feature
                        )));
                    }
                }
            }

            if let Some(target) = target {
                self.check_target_class(class, target, &mut issues);
            }
        }
        issues
    }

    fn check_target_class(
        &self,
        class: &TargetClassPlan,
        target: &Metamodel,
        issues: &mut Vec<PlanError>,
    ) {
        let desc = match target.class_by_name(&class.name) {
            Ok(desc) => desc,
            Err(err) => {
                issues.push(PlanError::Unresolved {
                    message: err.to_string(),
                });
                return;
            }
        };
        for feature in &class.features {
            let Some(target_feature) = desc.feature_by_name(&feature.name) else {
                issues.push(PlanError::Unresolved {
                    message: format!("target class '{}' has no feature '{}'", class.name, feature.name),
                });
                continue;
            };
            let matches = match (&feature.ty, target_feature.ty()) {
                (FeaturePlanType::Data { datatype }, FeatureType::Data(actual)) => datatype == actual,
                (FeaturePlanType::Enum { enumeration }, FeatureType::Enum(actual)) => {
                    enumeration == actual
                }
                (FeaturePlanType::Reference { target: index }, FeatureType::Reference(actual)) => self
                    .classes
                    .get(*index)
                    .and_then(|c| target.class_by_name(&c.name).ok())
                    .is_some_and(|c| c.id() == *actual),
                _ => false,
            };
            if !matches {
                issues.push(PlanError::Unresolved {
                    message: format!(
                        "feature '{}.{}' does not match the target metamodel's declaration",
                        class.name, feature.name
                    ),
                });
            }
        }
    }
}
