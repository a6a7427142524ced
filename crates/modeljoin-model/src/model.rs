//! Object graphs instantiating a metamodel.
//!
//! A [`Model`] owns an arena of [`Object`]s. Each object has one slot per
//! effective feature of its class; multi-valued slots always hold a
//! `Value::List`. A per-class roaring bitmap indexes objects by exact class, and
//! [`Model::all_instances`] unions the bitmaps of every subclass so that
//! enumeration follows insertion order.
//!
//! Containment is tracked on the child: setting a containment feature records
//! `(parent, feature)` on every child and detaches it from any previous
//! container first.

use crate::cast::datatype_of;
use crate::{
    Class, ClassId, DataType, Feature, FeatureId, FeatureType, Metamodel, ModelError, ModelId,
    ObjRef, Value,
};
use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Object {
    class: ClassId,
    slots: Vec<Value>,
    container: Option<(ObjRef, FeatureId)>,
    key: Option<String>,
}

impl Object {
    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub fn container(&self) -> Option<(ObjRef, FeatureId)> {
        self.container
    }

    /// External identifier from the document the object was loaded from.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

#[derive(Debug)]
pub struct Model {
    id: ModelId,
    metamodel: Arc<Metamodel>,
    objects: Vec<Object>,
    /// Exact class -> object indices
    class_index: AHashMap<ClassId, RoaringBitmap>,
}

impl Model {
    pub fn new(metamodel: Arc<Metamodel>) -> Self {
        Self {
            id: ModelId::next(),
            metamodel,
            objects: Vec::new(),
            class_index: AHashMap::new(),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Create an object of a concrete class with empty slots.
    pub fn create(&mut self, class: ClassId) -> Result<ObjRef, ModelError> {
        let class_desc = self.class_desc(class)?;
        if class_desc.is_abstract() {
            return Err(ModelError::AbstractClass {
                class: class_desc.name().to_string(),
            });
        }
        let slots = class_desc
            .features()
            .iter()
            .map(|f| {
                if f.is_many() {
                    Value::List(Vec::new())
                } else {
                    Value::Null
                }
            })
            .collect();

        let index = self.objects.len() as u32;
        self.objects.push(Object {
            class,
            slots,
            container: None,
            key: None,
        });
        self.class_index
            .entry(class)
            .or_insert_with(RoaringBitmap::new)
            .insert(index);

        Ok(ObjRef {
            model: self.id,
            index,
        })
    }

    pub fn create_by_name(&mut self, class: &str) -> Result<ObjRef, ModelError> {
        let id = self.metamodel.class_by_name(class)?.id();
        self.create(id)
    }

    pub fn object(&self, obj: ObjRef) -> Result<&Object, ModelError> {
        if obj.model != self.id {
            return Err(ModelError::ForeignObject { object: obj });
        }
        self.objects
            .get(obj.index as usize)
            .ok_or(ModelError::UnknownObject { object: obj })
    }

    fn object_mut(&mut self, obj: ObjRef) -> Result<&mut Object, ModelError> {
        if obj.model != self.id {
            return Err(ModelError::ForeignObject { object: obj });
        }
        self.objects
            .get_mut(obj.index as usize)
            .ok_or(ModelError::UnknownObject { object: obj })
    }

    fn class_desc(&self, class: ClassId) -> Result<&Class, ModelError> {
        self.metamodel
            .class(class)
            .ok_or_else(|| ModelError::UnknownClass {
                metamodel: self.metamodel.name().to_string(),
                class: format!("#{}", class.raw()),
            })
    }

    pub fn class_of(&self, obj: ObjRef) -> Result<&Class, ModelError> {
        let class = self.object(obj)?.class;
        self.class_desc(class)
    }

    pub fn is_instance_of(&self, obj: ObjRef, class: ClassId) -> bool {
        self.object(obj)
            .is_ok_and(|o| self.metamodel.is_subclass_of(o.class, class))
    }

    pub fn get(&self, obj: ObjRef, feature: FeatureId) -> Result<&Value, ModelError> {
        let object = self.object(obj)?;
        object.slots.get(feature.index()).ok_or_else(|| {
            let class = self
                .metamodel
                .class(object.class)
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            ModelError::UnknownFeature {
                class,
                feature: format!("#{}", feature.raw()),
            }
        })
    }

    pub fn get_by_name(&self, obj: ObjRef, feature: &str) -> Result<&Value, ModelError> {
        let id = self.class_of(obj)?.feature_id(feature)?;
        self.get(obj, id)
    }

    pub fn container(&self, obj: ObjRef) -> Result<Option<(ObjRef, FeatureId)>, ModelError> {
        Ok(self.object(obj)?.container)
    }

    pub fn key(&self, obj: ObjRef) -> Result<Option<&str>, ModelError> {
        Ok(self.object(obj)?.key())
    }

    pub fn set_key(&mut self, obj: ObjRef, key: impl Into<String>) -> Result<(), ModelError> {
        self.object_mut(obj)?.key = Some(key.into());
        Ok(())
    }

    /// Set a feature. Multi-valued features take a `Value::List` (or `Null`
    /// for the empty list); single-valued features take a single value or
    /// `Null`. Every element is checked against the feature type.
    pub fn set(&mut self, obj: ObjRef, feature: FeatureId, value: Value) -> Result<(), ModelError> {
        let class = self.class_of(obj)?;
        let Some(feature_desc) = class.feature(feature) else {
            return Err(ModelError::UnknownFeature {
                class: class.name().to_string(),
                feature: format!("#{}", feature.raw()),
            });
        };
        let class_name = class.name().to_string();
        let feature_desc = feature_desc.clone();

        let invalid = |message: String| ModelError::InvalidValue {
            class: class_name.clone(),
            feature: feature_desc.name().to_string(),
            message,
        };

        let value = match (feature_desc.is_many(), value) {
            (true, Value::Null) => Value::List(Vec::new()),
            (true, Value::List(items)) => Value::List(items),
            (true, other) => {
                return Err(invalid(format!(
                    "expected a list, found {}",
                    other.type_name()
                )))
            }
            (false, Value::List(_)) => {
                return Err(invalid("expected a single value, found a list".to_string()))
            }
            (false, other) => other,
        };

        for element in value.elements() {
            self.check_element(&feature_desc, element)
                .map_err(&invalid)?;
        }

        if feature_desc.is_containment() {
            self.reparent(obj, feature, &value)?;
        }

        let object = self.object_mut(obj)?;
        object.slots[feature.index()] = value;
        Ok(())
    }

    pub fn set_by_name(&mut self, obj: ObjRef, feature: &str, value: Value) -> Result<(), ModelError> {
        let id = self.class_of(obj)?.feature_id(feature)?;
        self.set(obj, id, value)
    }

    fn check_element(&self, feature: &Feature, element: &Value) -> Result<(), String> {
        match (feature.ty(), element) {
            (_, Value::Null) if feature.is_many() => Err("lists cannot hold null".to_string()),
            (_, Value::Null) => Ok(()),
            (_, Value::List(_)) => Err("nested lists are not supported".to_string()),
            (FeatureType::Data(DataType::Any), Value::Object(_) | Value::Enum { .. }) => {
                Err(format!("expected a primitive, found {}", element.type_name()))
            }
            (FeatureType::Data(DataType::Any), _) => Ok(()),
            (FeatureType::Data(dt), v) if datatype_of(v) == Some(*dt) => Ok(()),
            (FeatureType::Data(dt), v) => Err(format!(
                "expected {}, found {}",
                dt.name(),
                v.type_name()
            )),
            (
                FeatureType::Enum(expected),
                Value::Enum {
                    enumeration,
                    literal,
                },
            ) => {
                if enumeration != expected {
                    Err(format!("expected enum {expected}, found enum {enumeration}"))
                } else if !self.metamodel.has_literal(enumeration, literal) {
                    Err(format!("enum {enumeration} has no literal {literal}"))
                } else {
                    Ok(())
                }
            }
            (FeatureType::Enum(expected), v) => {
                Err(format!("expected enum {expected}, found {}", v.type_name()))
            }
            (FeatureType::Reference(target), Value::Object(child)) => {
                let child_class = self.object(*child).map_err(|e| e.to_string())?.class;
                if self.metamodel.is_subclass_of(child_class, *target) {
                    Ok(())
                } else {
                    let name = |c: ClassId| {
                        self.metamodel
                            .class(c)
                            .map(|c| c.name().to_string())
                            .unwrap_or_default()
                    };
                    Err(format!(
                        "expected an instance of {}, found {}",
                        name(*target),
                        name(child_class)
                    ))
                }
            }
            (FeatureType::Reference(_), v) => {
                Err(format!("expected an object, found {}", v.type_name()))
            }
        }
    }

    /// Move the children in `value` under `(parent, feature)`.
    fn reparent(&mut self, parent: ObjRef, feature: FeatureId, value: &Value) -> Result<(), ModelError> {
        let children: Vec<ObjRef> = value.elements().iter().filter_map(Value::as_object).collect();

        if let Some(previous) = self.object(parent)?.slots.get(feature.index()) {
            let orphaned: Vec<ObjRef> = previous
                .elements()
                .iter()
                .filter_map(Value::as_object)
                .filter(|c| !children.contains(c))
                .collect();
            for child in orphaned {
                self.object_mut(child)?.container = None;
            }
        }

        for &child in &children {
            if let Some((old_parent, old_feature)) = self.object(child)?.container {
                if old_parent != parent || old_feature != feature {
                    self.detach(old_parent, old_feature, child)?;
                }
            }
            self.object_mut(child)?.container = Some((parent, feature));
        }
        Ok(())
    }

    fn detach(&mut self, parent: ObjRef, feature: FeatureId, child: ObjRef) -> Result<(), ModelError> {
        let object = self.object_mut(parent)?;
        if let Some(slot) = object.slots.get_mut(feature.index()) {
            match slot {
                Value::List(items) => items.retain(|v| v.as_object() != Some(child)),
                Value::Object(current) if *current == child => *slot = Value::Null,
                _ => {}
            }
        }
        Ok(())
    }

    /// All objects in insertion order.
    pub fn objects(&self) -> impl Iterator<Item = ObjRef> + '_ {
        (0..self.objects.len() as u32).map(move |index| ObjRef {
            model: self.id,
            index,
        })
    }

    /// All instances of `class` and its subclasses, in insertion order.
    pub fn all_instances(&self, class: ClassId) -> impl Iterator<Item = ObjRef> + '_ {
        let mut bits = RoaringBitmap::new();
        for (&exact, ids) in &self.class_index {
            if self.metamodel.is_subclass_of(exact, class) {
                bits |= ids;
            }
        }
        let model = self.id;
        bits.into_iter().map(move |index| ObjRef { model, index })
    }

    /// Objects without a container.
    pub fn roots(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.objects()
            .filter(|obj| self.objects[obj.index as usize].container.is_none())
    }

    // ------------------------------------------------------------------------
    // JSON interchange
    // ------------------------------------------------------------------------

    pub fn from_doc(metamodel: Arc<Metamodel>, doc: &ModelDoc) -> Result<Self, ModelError> {
        if doc.metamodel != metamodel.name() {
            return Err(ModelError::Document {
                message: format!(
                    "document instantiates '{}', expected '{}'",
                    doc.metamodel,
                    metamodel.name()
                ),
            });
        }

        let mut model = Model::new(metamodel);
        let mut by_key: AHashMap<&str, ObjRef> = AHashMap::new();
        let mut created = Vec::with_capacity(doc.objects.len());
        for object in &doc.objects {
            let obj = model.create_by_name(&object.class)?;
            if by_key.insert(object.id.as_str(), obj).is_some() {
                return Err(ModelError::Document {
                    message: format!("duplicate object id '{}'", object.id),
                });
            }
            model.set_key(obj, object.id.clone())?;
            created.push(obj);
        }

        for (object, &obj) in doc.objects.iter().zip(&created) {
            let class = model.class_of(obj)?.clone();
            for (name, json) in &object.features {
                let feature = class.feature_by_name(name).ok_or_else(|| {
                    ModelError::UnknownFeature {
                        class: class.name().to_string(),
                        feature: name.clone(),
                    }
                })?;
                let value = decode_value(feature, json, &by_key)?;
                if feature.is_containment() {
                    for child in value.elements().iter().filter_map(Value::as_object) {
                        if model.container(child)?.is_some() {
                            return Err(ModelError::Document {
                                message: format!(
                                    "object '{}' is contained more than once",
                                    model.key(child)?.unwrap_or_default()
                                ),
                            });
                        }
                    }
                }
                model.set(obj, feature.id(), value)?;
            }
        }
        Ok(model)
    }

    pub fn to_doc(&self) -> ModelDoc {
        let key_of = |obj: ObjRef| -> String {
            self.objects
                .get(obj.index as usize)
                .and_then(|o| o.key.clone())
                .unwrap_or_else(|| format!("#{}", obj.index))
        };

        let objects = self
            .objects
            .iter()
            .enumerate()
            .map(|(index, object)| {
                let obj = ObjRef {
                    model: self.id,
                    index: index as u32,
                };
                let mut features = serde_json::Map::new();
                if let Some(class) = self.metamodel.class(object.class) {
                    for (feature, value) in class.features().iter().zip(&object.slots) {
                        let empty = match value {
                            Value::Null => true,
                            Value::List(items) => items.is_empty(),
                            _ => false,
                        };
                        if !empty {
                            features.insert(feature.name().to_string(), encode_value(value, &key_of));
                        }
                    }
                }
                ObjectDoc {
                    id: key_of(obj),
                    class: self
                        .metamodel
                        .class(object.class)
                        .map(|c| c.name().to_string())
                        .unwrap_or_default(),
                    features,
                }
            })
            .collect();

        ModelDoc {
            metamodel: self.metamodel.name().to_string(),
            objects,
        }
    }
}

/// Serialisable form of a model. References are written as object ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDoc {
    pub metamodel: String,
    #[serde(default)]
    pub objects: Vec<ObjectDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDoc {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub features: serde_json::Map<String, serde_json::Value>,
}

fn decode_value(
    feature: &Feature,
    json: &serde_json::Value,
    by_key: &AHashMap<&str, ObjRef>,
) -> Result<Value, ModelError> {
    if feature.is_many() {
        return match json {
            serde_json::Value::Null => Ok(Value::List(Vec::new())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| decode_element(feature, item, by_key))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Err(document_error(feature, other)),
        };
    }
    decode_element(feature, json, by_key)
}

fn decode_element(
    feature: &Feature,
    json: &serde_json::Value,
    by_key: &AHashMap<&str, ObjRef>,
) -> Result<Value, ModelError> {
    use serde_json::Value as Json;

    if json.is_null() {
        return Ok(Value::Null);
    }
    let err = || document_error(feature, json);

    match feature.ty() {
        FeatureType::Reference(_) => {
            let key = json.as_str().ok_or_else(err)?;
            by_key
                .get(key)
                .copied()
                .map(Value::Object)
                .ok_or_else(|| ModelError::Document {
                    message: format!("unknown object id '{key}'"),
                })
        }
        FeatureType::Enum(enumeration) => Ok(Value::Enum {
            enumeration: enumeration.clone(),
            literal: json.as_str().ok_or_else(err)?.to_string(),
        }),
        FeatureType::Data(dt) => match (dt, json) {
            (DataType::Boolean, Json::Bool(b)) => Ok(Value::Bool(*b)),
            (DataType::Byte, _) => Ok(Value::Byte(json.as_i64().ok_or_else(err)? as i8)),
            (DataType::Short, _) => Ok(Value::Short(json.as_i64().ok_or_else(err)? as i16)),
            (DataType::Int, _) => Ok(Value::Int(json.as_i64().ok_or_else(err)? as i32)),
            (DataType::Long, _) => Ok(Value::Long(json.as_i64().ok_or_else(err)?)),
            (DataType::Float, _) => Ok(Value::Float(json.as_f64().ok_or_else(err)? as f32)),
            (DataType::Double, _) => Ok(Value::Double(json.as_f64().ok_or_else(err)?)),
            (DataType::Char, Json::String(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(err()),
                }
            }
            (DataType::String, Json::String(s)) => Ok(Value::String(s.clone())),
            (DataType::Any, Json::Bool(b)) => Ok(Value::Bool(*b)),
            (DataType::Any, Json::Number(n)) => Ok(match n.as_i64() {
                Some(i) => Value::Long(i),
                None => Value::Double(n.as_f64().ok_or_else(err)?),
            }),
            (DataType::Any, Json::String(s)) => Ok(Value::String(s.clone())),
            _ => Err(err()),
        },
    }
}

fn document_error(feature: &Feature, json: &serde_json::Value) -> ModelError {
    ModelError::Document {
        message: format!("invalid value {json} for feature '{}'", feature.name()),
    }
}

fn encode_value(value: &Value, key_of: &dyn Fn(ObjRef) -> String) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Byte(v) => Json::from(*v),
        Value::Short(v) => Json::from(*v),
        Value::Int(v) => Json::from(*v),
        Value::Long(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(f64::from(*v)).map_or(Json::Null, Json::Number),
        Value::Double(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::Char(c) => Json::String(c.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Enum { literal, .. } => Json::String(literal.clone()),
        Value::Object(obj) => Json::String(key_of(*obj)),
        Value::List(items) => Json::Array(items.iter().map(|v| encode_value(v, key_of)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassDecl, MetamodelDecl};

    fn metamodel() -> Arc<Metamodel> {
        Arc::new(
            Metamodel::new(
                MetamodelDecl::new("shop")
                    .with_enum("Size", ["S", "M", "L"])
                    .with_class(ClassDecl::new("Shop").containment("items", "Item", true))
                    .with_class(ClassDecl::new("Shelf").containment("top", "Item", false))
                    .with_class(
                        ClassDecl::new("Item")
                            .attribute("label", DataType::String)
                            .attribute("price", DataType::Double)
                            .enumeration("size", "Size")
                            .reference("related", "Item", true),
                    )
                    .with_class(ClassDecl::new("Gadget").with_supertype("Item")),
            )
            .expect("metamodel"),
        )
    }

    #[test]
    fn all_instances_includes_subclasses_in_insertion_order() {
        let mut model = Model::new(metamodel());
        let a = model.create_by_name("Item").unwrap();
        let g = model.create_by_name("Gadget").unwrap();
        let b = model.create_by_name("Item").unwrap();
        let item = model.metamodel().class_by_name("Item").unwrap().id();
        let gadget = model.metamodel().class_by_name("Gadget").unwrap().id();

        assert_eq!(model.all_instances(item).collect::<Vec<_>>(), vec![a, g, b]);
        assert_eq!(model.all_instances(gadget).collect::<Vec<_>>(), vec![g]);
    }

    #[test]
    fn containment_moves_detach_from_previous_container() {
        let mut model = Model::new(metamodel());
        let shop = model.create_by_name("Shop").unwrap();
        let shelf = model.create_by_name("Shelf").unwrap();
        let item = model.create_by_name("Item").unwrap();
        let other = model.create_by_name("Item").unwrap();

        model
            .set_by_name(shop, "items", Value::List(vec![item.into(), other.into()]))
            .unwrap();
        assert_eq!(model.container(item).unwrap().map(|(p, _)| p), Some(shop));

        model.set_by_name(shelf, "top", item.into()).unwrap();
        assert_eq!(model.container(item).unwrap().map(|(p, _)| p), Some(shelf));
        assert_eq!(
            model.get_by_name(shop, "items").unwrap(),
            &Value::List(vec![other.into()])
        );

        model.set_by_name(shelf, "top", Value::Null).unwrap();
        assert_eq!(model.container(item).unwrap(), None);
    }

    #[test]
    fn set_checks_types_and_multiplicity() {
        let mut model = Model::new(metamodel());
        let shop = model.create_by_name("Shop").unwrap();
        let item = model.create_by_name("Item").unwrap();

        assert!(model.set_by_name(item, "price", Value::Int(3)).is_err());
        assert!(model.set_by_name(item, "price", Value::Double(3.0)).is_ok());
        assert!(model.set_by_name(item, "related", item.into()).is_err());
        assert!(model
            .set_by_name(item, "related", Value::List(vec![shop.into()]))
            .is_err());
        assert!(model
            .set_by_name(
                item,
                "size",
                Value::Enum {
                    enumeration: "Size".into(),
                    literal: "XL".into()
                }
            )
            .is_err());
    }

    #[test]
    fn foreign_objects_are_rejected() {
        let mm = metamodel();
        let mut first = Model::new(mm.clone());
        let mut second = Model::new(mm);
        let item = first.create_by_name("Item").unwrap();
        let shop = second.create_by_name("Shop").unwrap();

        assert!(matches!(
            second.get_by_name(item, "label"),
            Err(ModelError::ForeignObject { .. })
        ));
        assert!(second
            .set_by_name(shop, "items", Value::List(vec![item.into()]))
            .is_err());
    }

    #[test]
    fn document_round_trip_preserves_structure() {
        let doc: ModelDoc = serde_json::from_value(serde_json::json!({
            "metamodel": "shop",
            "objects": [
                { "id": "shop", "class": "Shop", "features": { "items": ["pen", "ink"] } },
                { "id": "pen", "class": "Item", "features": {
                    "label": "Pen", "price": 1.5, "size": "S", "related": ["ink"] } },
                { "id": "ink", "class": "Gadget", "features": { "label": "Ink" } }
            ]
        }))
        .unwrap();

        let model = Model::from_doc(metamodel(), &doc).unwrap();
        assert_eq!(model.len(), 3);
        assert_eq!(model.roots().count(), 1);
        let again = model.to_doc();
        assert_eq!(again, doc);
    }

    #[test]
    fn document_rejects_double_containment() {
        let doc: ModelDoc = serde_json::from_value(serde_json::json!({
            "metamodel": "shop",
            "objects": [
                { "id": "a", "class": "Shop", "features": { "items": ["pen"] } },
                { "id": "b", "class": "Shop", "features": { "items": ["pen"] } },
                { "id": "pen", "class": "Item" }
            ]
        }))
        .unwrap();
        let err = Model::from_doc(metamodel(), &doc).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
