//! Source model registry.

use crate::{Class, Metamodel, Model, ModelError, ModelId, ObjRef, Value};
use ahash::AHashMap;

/// Read-only source models keyed by the name of the metamodel they
/// instantiate. At most one model per metamodel.
#[derive(Debug, Default)]
pub struct ModelSet {
    models: Vec<Model>,
    by_metamodel: AHashMap<String, usize>,
    by_id: AHashMap<ModelId, usize>,
}

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: Model) -> Result<(), ModelError> {
        let name = model.metamodel().name().to_string();
        if self.by_metamodel.contains_key(&name) {
            return Err(ModelError::DuplicateMetamodel { metamodel: name });
        }
        let slot = self.models.len();
        self.by_metamodel.insert(name, slot);
        self.by_id.insert(model.id(), slot);
        self.models.push(model);
        Ok(())
    }

    pub fn with_model(mut self, model: Model) -> Result<Self, ModelError> {
        self.insert(model)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter()
    }

    /// The model instantiating the named metamodel.
    pub fn for_metamodel(&self, metamodel: &str) -> Option<&Model> {
        self.by_metamodel.get(metamodel).map(|&i| &self.models[i])
    }

    /// The model that owns `obj`.
    pub fn model_of(&self, obj: ObjRef) -> Result<&Model, ModelError> {
        self.by_id
            .get(&obj.model)
            .map(|&i| &self.models[i])
            .ok_or(ModelError::UnknownObject { object: obj })
    }

    pub fn metamodel_of(&self, obj: ObjRef) -> Result<&Metamodel, ModelError> {
        Ok(self.model_of(obj)?.metamodel())
    }

    pub fn class_of(&self, obj: ObjRef) -> Result<&Class, ModelError> {
        self.model_of(obj)?.class_of(obj)
    }

    /// Read a feature by name from any registered object.
    pub fn get_by_name(&self, obj: ObjRef, feature: &str) -> Result<&Value, ModelError> {
        self.model_of(obj)?.get_by_name(obj, feature)
    }
}
