//! Two-phase construction of the target model.
//!
//! Phase 1 walks the target classes (root first), runs each class's source
//! pipeline and creates one empty target instance ("shell") per row or group.
//! Every shell is registered in the [`TargetMap`] against each non-null source
//! instance it came from, and a [`PopulationTask`] is queued for it. The root
//! receives one generated containment reference per other target class.
//!
//! Phase 2 runs the queued tasks in order. Because every shell exists by then,
//! references can point at instances created after the referencing one.
//!
//! The phases are typestates: [`Transformator::create_instances`] consumes the
//! transformator and returns a [`PendingPopulation`], whose
//! [`populate`](PendingPopulation::populate) consumes it in turn.

use crate::error::{TransformError, TransformErrorKind};
use crate::evaluation::{Bindings, EvaluationContext, ExpressionEvaluator, SourceScope};
use crate::grouping;
use crate::options::TransformOptions;
use crate::source;
use crate::target_map::{MappingError, TargetMap};
use indexmap::IndexSet;
use modeljoin_model::{cast, ClassId, Feature, FeatureType, Metamodel, Model, ModelSet, ObjRef, Value};
use modeljoin_plan::{FeatureKind, FeaturePlan, FeaturePlanType, FeatureRef, QueryPlan};
use std::sync::Arc;
use tracing::{debug, info};

/// The finished target model and its root instance.
#[derive(Debug)]
pub struct TargetModel {
    pub model: Model,
    pub root: ObjRef,
}

/// Deferred population of one shell.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationTask {
    /// Index of the target class plan.
    pub class: usize,
    pub target: ObjRef,
    /// Source instance implicit copies read from.
    pub main_source: Option<ObjRef>,
    pub bindings: Bindings,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationQueue {
    tasks: Vec<PopulationTask>,
}

impl PopulationQueue {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PopulationTask> {
        self.tasks.iter()
    }

    fn push(&mut self, task: PopulationTask) {
        self.tasks.push(task);
    }
}

impl IntoIterator for PopulationQueue {
    type Item = PopulationTask;
    type IntoIter = std::vec::IntoIter<PopulationTask>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.into_iter()
    }
}

struct Engine<'a> {
    plan: &'a QueryPlan,
    sources: &'a ModelSet,
    evaluator: &'a dyn ExpressionEvaluator,
    options: TransformOptions,
    target: Model,
    target_map: TargetMap,
}

/// A transformation that has not run yet.
pub struct Transformator<'a> {
    engine: Engine<'a>,
}

impl<'a> Transformator<'a> {
    pub fn new(
        plan: &'a QueryPlan,
        target_metamodel: Arc<Metamodel>,
        sources: &'a ModelSet,
        evaluator: &'a dyn ExpressionEvaluator,
    ) -> Self {
        Self {
            engine: Engine {
                plan,
                sources,
                evaluator,
                options: TransformOptions::default(),
                target: Model::new(target_metamodel),
                target_map: TargetMap::new(),
            },
        }
    }

    pub fn with_options(mut self, options: TransformOptions) -> Self {
        self.engine.options = options;
        self
    }

    /// Run both phases.
    pub fn transform(self) -> Result<TargetModel, TransformError> {
        self.create_instances()?.populate()
    }

    /// Phase 1: create every target instance and queue its population.
    pub fn create_instances(mut self) -> Result<PendingPopulation<'a>, TransformError> {
        let (root, queue) = self.engine.create_instances()?;
        Ok(PendingPopulation {
            engine: self.engine,
            root,
            queue,
        })
    }
}

/// All shells exist; features are not populated yet.
pub struct PendingPopulation<'a> {
    engine: Engine<'a>,
    root: ObjRef,
    queue: PopulationQueue,
}

impl<'a> PendingPopulation<'a> {
    pub fn root(&self) -> ObjRef {
        self.root
    }

    pub fn target(&self) -> &Model {
        &self.engine.target
    }

    pub fn target_map(&self) -> &TargetMap {
        &self.engine.target_map
    }

    pub fn queue(&self) -> &PopulationQueue {
        &self.queue
    }

    /// Phase 2: run the queued tasks in order.
    pub fn populate(self) -> Result<TargetModel, TransformError> {
        let PendingPopulation {
            mut engine,
            root,
            queue,
        } = self;
        debug!(tasks = queue.len(), "populating target instances");
        for task in queue {
            engine.populate_instance(root, &task)?;
        }
        info!(objects = engine.target.len(), "transformation finished");
        Ok(TargetModel {
            model: engine.target,
            root,
        })
    }
}

impl<'a> Engine<'a> {
    fn create_instances(&mut self) -> Result<(ObjRef, PopulationQueue), TransformError> {
        let plan = self.plan;
        let mut queue = PopulationQueue::default();

        let Some(root_plan) = plan.root_class() else {
            return Err(TransformError::invalid_plan(format!(
                "root index {} is out of range",
                plan.root
            )));
        };
        let roots = self.transform_target_class(plan.root, &mut queue)?;
        let [root] = roots[..] else {
            return Err(TransformErrorKind::RootCardinality {
                class: root_plan.name.clone(),
                count: roots.len(),
            }
            .into());
        };

        for (index, class_plan) in plan.classes.iter().enumerate() {
            if index == plan.root {
                continue;
            }
            let instances = self.transform_target_class(index, &mut queue)?;
            let reference = self.options.root_reference_name(&class_plan.name);
            let feature = self.target.class_of(root)?.feature_id(&reference)?;
            let value = Value::List(instances.into_iter().map(Value::Object).collect());
            self.target.set(root, feature, value)?;
        }
        Ok((root, queue))
    }

    fn transform_target_class(
        &mut self,
        index: usize,
        queue: &mut PopulationQueue,
    ) -> Result<Vec<ObjRef>, TransformError> {
        let plan = self.plan;
        let class_plan = &plan.classes[index];
        let class = self
            .target
            .metamodel()
            .class_by_name(&class_plan.name)
            .map_err(|_| {
                TransformError::invalid_plan(format!(
                    "no class named '{}' found in target metamodel",
                    class_plan.name
                ))
            })?
            .id();

        let Some(descriptor) = &class_plan.source else {
            let shell = self.create_instance(
                index,
                class,
                None,
                std::iter::empty(),
                Bindings::new(),
                queue,
            )?;
            debug!(class = %class_plan.name, "created sourceless target instance");
            return Ok(vec![shell]);
        };

        let scope = SourceScope::new(
            self.sources,
            self.evaluator,
            descriptor,
            self.options.self_alias.clone(),
        );
        let rows = source::build(&scope)?;

        let mut instances = Vec::new();
        if descriptor.is_grouped() {
            for group in grouping::group(rows, &descriptor.group_by, &scope)? {
                let bindings = scope.grouped_bindings(&group);
                let shell = self.create_instance(
                    index,
                    class,
                    group.main_source(),
                    group.sources(),
                    bindings,
                    queue,
                )?;
                instances.push(shell);
            }
        } else {
            for row in rows {
                let row = row?;
                let bindings = scope.row_bindings(&row, None);
                let shell = self.create_instance(
                    index,
                    class,
                    row.main_source(),
                    row.iter().flatten(),
                    bindings,
                    queue,
                )?;
                instances.push(shell);
            }
        }

        debug!(class = %class_plan.name, instances = instances.len(), "created target instances");
        Ok(instances)
    }

    fn create_instance(
        &mut self,
        index: usize,
        class: ClassId,
        main_source: Option<ObjRef>,
        sources: impl IntoIterator<Item = ObjRef>,
        bindings: Bindings,
        queue: &mut PopulationQueue,
    ) -> Result<ObjRef, TransformError> {
        let target = self.target.create(class)?;
        for source in sources {
            self.target_map.register(source, index, target);
        }
        queue.push(PopulationTask {
            class: index,
            target,
            main_source,
            bindings,
        });
        Ok(target)
    }

    fn populate_instance(&mut self, root: ObjRef, task: &PopulationTask) -> Result<(), TransformError> {
        let plan = self.plan;
        let Some(class_plan) = plan.classes.get(task.class) else {
            return Err(TransformError::invalid_plan(format!(
                "population task for unknown target class index {}",
                task.class
            )));
        };
        let context = EvaluationContext::new(self.evaluator, &task.bindings);

        for feature in &class_plan.features {
            if matches!(feature.kind, FeatureKind::Generate) {
                continue;
            }
            let location = feature.expression().and_then(|e| e.location.as_ref());
            let value = self.evaluate_feature(feature, task.main_source, &context)?;
            let result = match feature.ty {
                FeaturePlanType::Reference { target } => {
                    self.populate_reference(root, task.target, feature, target, value)
                }
                FeaturePlanType::Data { .. } | FeaturePlanType::Enum { .. } => {
                    self.populate_attribute(task.target, feature, value)
                }
            };
            result.map_err(|err| err.at(location))?;
        }
        Ok(())
    }

    fn evaluate_feature(
        &self,
        feature: &FeaturePlan,
        main_source: Option<ObjRef>,
        context: &EvaluationContext<'_>,
    ) -> Result<Value, TransformError> {
        if let Some(expression) = feature.expression() {
            return context.evaluate_expression(expression);
        }
        match &feature.kind {
            FeatureKind::Copy { source, .. } => {
                let Some(main) = main_source else {
                    return Err(TransformError::invalid_plan(format!(
                        "feature '{}' copies '{}.{}' but has no source instance to read from",
                        feature.name, source.class, source.feature
                    )));
                };
                self.check_copy_source(main, feature, source)?;
                Ok(self.sources.get_by_name(main, &source.feature)?.clone())
            }
            _ => Err(TransformError::invalid_plan(format!(
                "feature '{}' has no value expression",
                feature.name
            ))),
        }
    }

    /// An implicit copy reads from the main source instance, which must be
    /// an instance of the copied feature's class (or a subclass).
    fn check_copy_source(
        &self,
        main: ObjRef,
        feature: &FeaturePlan,
        source: &FeatureRef,
    ) -> Result<(), TransformError> {
        let metamodel = self.sources.metamodel_of(main)?;
        let actual = self.sources.class_of(main)?;
        let conforms = metamodel.name() == source.metamodel
            && metamodel
                .class_by_name(&source.class)
                .is_ok_and(|expected| metamodel.is_subclass_of(actual.id(), expected.id()));
        if conforms {
            return Ok(());
        }
        Err(TransformError::invalid_plan(format!(
            "feature '{}' copies '{}.{}.{}' but its source instance is a '{}.{}'",
            feature.name,
            source.metamodel,
            source.class,
            source.feature,
            metamodel.name(),
            actual.name()
        )))
    }

    fn target_feature(&self, target: ObjRef, name: &str) -> Result<Feature, TransformError> {
        let class = self.target.class_of(target)?;
        class.feature_by_name(name).cloned().ok_or_else(|| {
            TransformError::invalid_plan(format!(
                "target class '{}' has no feature '{}'",
                class.name(),
                name
            ))
        })
    }

    fn populate_attribute(
        &mut self,
        target: ObjRef,
        feature: &FeaturePlan,
        value: Value,
    ) -> Result<(), TransformError> {
        let target_feature = self.target_feature(target, &feature.name)?;
        let value = match target_feature.ty() {
            FeatureType::Enum(enumeration) => {
                remap_enum(value, enumeration, self.target.metamodel())?
            }
            FeatureType::Data(datatype) => cast(&value, *datatype)?,
            FeatureType::Reference(_) => {
                return Err(TransformError::invalid_plan(format!(
                    "attribute '{}' is a reference in the target metamodel",
                    feature.name
                )))
            }
        };
        let value = if feature.options.unique {
            distinct(value)
        } else {
            value
        };
        let value = shape(value, target_feature.is_many());
        self.target.set(target, target_feature.id(), value)?;
        Ok(())
    }

    fn populate_reference(
        &mut self,
        root: ObjRef,
        target: ObjRef,
        feature: &FeaturePlan,
        target_class: usize,
        value: Value,
    ) -> Result<(), TransformError> {
        let target_feature = self.target_feature(target, &feature.name)?;
        let mapped = match value {
            Value::Null => Value::Null,
            Value::List(items) => Value::List(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| self.map_instance(item, target_class))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => self.map_instance(&other, target_class)?,
        };
        let mapped = if feature.options.unique || target_feature.is_containment() {
            distinct(mapped)
        } else {
            mapped
        };

        if target_feature.is_containment() {
            for child in mapped.elements().iter().filter_map(Value::as_object) {
                self.check_not_contained(root, target, child, &feature.name)?;
            }
        }

        let mapped = shape(mapped, target_feature.is_many());
        self.target.set(target, target_feature.id(), mapped)?;
        Ok(())
    }

    fn map_instance(&self, value: &Value, target_class: usize) -> Result<Value, TransformError> {
        let Some(source) = value.as_object() else {
            return Err(TransformError::invalid_plan(format!(
                "expected a source instance, found {}",
                value.type_name()
            )));
        };
        self.target_map
            .get(source, target_class)
            .map(Value::Object)
            .map_err(|err| {
                let target_class = self
                    .plan
                    .classes
                    .get(target_class)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let source_class = self
                    .sources
                    .class_of(source)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default();
                TransformError::from(match err {
                    MappingError::Missing => TransformErrorKind::MissingMapping {
                        target_class,
                        source_class,
                    },
                    MappingError::Ambiguous => TransformErrorKind::AmbiguousMapping {
                        target_class,
                        source_class,
                    },
                })
            })
    }

    /// A child may only be claimed by a containment reference while it is
    /// uncontained or held by the root's generated references.
    fn check_not_contained(
        &self,
        root: ObjRef,
        target: ObjRef,
        child: ObjRef,
        feature: &str,
    ) -> Result<(), TransformError> {
        let Some((parent, _)) = self.target.container(child)? else {
            return Ok(());
        };
        if parent == root {
            return Ok(());
        }
        let class_name = |obj: ObjRef| -> Result<String, TransformError> {
            Ok(self.target.class_of(obj)?.name().to_string())
        };
        Err(TransformErrorKind::ContainmentViolation {
            child_class: class_name(child)?,
            container_class: class_name(target)?,
            feature: feature.to_string(),
            current_container_class: class_name(parent)?,
        }
        .into())
    }
}

/// Re-point enum literals at the target enumeration by literal name.
fn remap_enum(value: Value, enumeration: &str, metamodel: &Metamodel) -> Result<Value, TransformError> {
    match value {
        Value::List(items) => items
            .into_iter()
            .map(|item| remap_enum(item, enumeration, metamodel))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Enum { literal, .. } => {
            if !metamodel.has_literal(enumeration, &literal) {
                return Err(TransformError::invalid_plan(format!(
                    "target enumeration '{enumeration}' has no literal '{literal}'"
                )));
            }
            Ok(Value::Enum {
                enumeration: enumeration.to_string(),
                literal,
            })
        }
        other => Ok(other),
    }
}

/// Drops repeated list elements, keeping each first occurrence in place.
fn distinct(value: Value) -> Value {
    match value {
        Value::List(items) => Value::List(
            items
                .into_iter()
                .collect::<IndexSet<_>>()
                .into_iter()
                .collect(),
        ),
        other => other,
    }
}

/// Multi-valued features always receive a list.
fn shape(value: Value, many: bool) -> Value {
    match (many, value) {
        (true, Value::Null) => Value::List(Vec::new()),
        (true, Value::List(items)) => Value::List(items),
        (true, single) => Value::List(vec![single]),
        (false, value) => value,
    }
}
