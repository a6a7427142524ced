//! Metamodels: classes, features, enums and datatypes.
//!
//! A [`Metamodel`] is built from its declarative, serialisable form
//! ([`MetamodelDecl`]). Building resolves supertypes and reference targets and
//! lays out the *effective* feature list of every class: inherited features
//! first, then the class's own. A [`FeatureId`] resolved on a supertype is
//! therefore valid on every subtype, so callers resolve a feature name once
//! and index object slots afterwards.

use crate::ModelError;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Upper bound value for unbounded (`*`) multiplicities.
pub const UNBOUNDED: i32 = -1;

/// Class handle, scoped to one metamodel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ClassId(u32);

impl ClassId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the effective feature list of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FeatureId(u32);

impl FeatureId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Primitive datatypes an attribute can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    /// No declared instance type; values pass through unchanged.
    Any,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Byte => "byte",
            DataType::Short => "short",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Char => "char",
            DataType::String => "string",
            DataType::Any => "any",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Short
                | DataType::Int
                | DataType::Long
                | DataType::Float
                | DataType::Double
        )
    }
}

// ============================================================================
// Declarative (serialisable) form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureTypeDecl {
    Data { datatype: DataType },
    Enum { enumeration: String },
    Reference { class: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDecl {
    pub name: String,
    #[serde(flatten)]
    pub ty: FeatureTypeDecl,
    #[serde(default)]
    pub lower: i32,
    #[serde(default = "default_upper")]
    pub upper: i32,
    #[serde(default)]
    pub containment: bool,
}

fn default_upper() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supertype: Option<String>,
    #[serde(default)]
    pub features: Vec<FeatureDecl>,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_abstract: false,
            supertype: None,
            features: Vec::new(),
        }
    }

    pub fn with_supertype(mut self, supertype: impl Into<String>) -> Self {
        self.supertype = Some(supertype.into());
        self
    }

    pub fn into_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn attribute(self, name: impl Into<String>, datatype: DataType) -> Self {
        self.feature(name, FeatureTypeDecl::Data { datatype }, false, false)
    }

    pub fn attribute_many(self, name: impl Into<String>, datatype: DataType) -> Self {
        self.feature(name, FeatureTypeDecl::Data { datatype }, true, false)
    }

    pub fn enumeration(self, name: impl Into<String>, enumeration: impl Into<String>) -> Self {
        let ty = FeatureTypeDecl::Enum {
            enumeration: enumeration.into(),
        };
        self.feature(name, ty, false, false)
    }

    pub fn reference(self, name: impl Into<String>, class: impl Into<String>, many: bool) -> Self {
        let ty = FeatureTypeDecl::Reference {
            class: class.into(),
        };
        self.feature(name, ty, many, false)
    }

    pub fn containment(self, name: impl Into<String>, class: impl Into<String>, many: bool) -> Self {
        let ty = FeatureTypeDecl::Reference {
            class: class.into(),
        };
        self.feature(name, ty, many, true)
    }

    fn feature(
        mut self,
        name: impl Into<String>,
        ty: FeatureTypeDecl,
        many: bool,
        containment: bool,
    ) -> Self {
        self.features.push(FeatureDecl {
            name: name.into(),
            ty,
            lower: 0,
            upper: if many { UNBOUNDED } else { 1 },
            containment,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub literals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetamodelDecl {
    pub name: String,
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    #[serde(default)]
    pub enums: Vec<EnumDecl>,
}

impl MetamodelDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
            enums: Vec::new(),
        }
    }

    pub fn with_class(mut self, class: ClassDecl) -> Self {
        self.classes.push(class);
        self
    }

    pub fn with_enum<I, S>(mut self, name: impl Into<String>, literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums.push(EnumDecl {
            name: name.into(),
            literals: literals.into_iter().map(Into::into).collect(),
        });
        self
    }
}

// ============================================================================
// Resolved form
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureType {
    Data(DataType),
    Enum(String),
    Reference(ClassId),
}

#[derive(Debug, Clone)]
pub struct Feature {
    id: FeatureId,
    name: String,
    ty: FeatureType,
    lower: i32,
    upper: i32,
    containment: bool,
    declared_by: ClassId,
}

impl Feature {
    pub fn id(&self) -> FeatureId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &FeatureType {
        &self.ty
    }

    pub fn lower(&self) -> i32 {
        self.lower
    }

    pub fn upper(&self) -> i32 {
        self.upper
    }

    /// Multi-valued: upper bound greater than one, or unbounded.
    pub fn is_many(&self) -> bool {
        self.upper == UNBOUNDED || self.upper > 1
    }

    pub fn is_containment(&self) -> bool {
        self.containment
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.ty, FeatureType::Reference(_))
    }

    /// The class that declares this feature (may be a supertype of the class
    /// it was looked up on).
    pub fn declared_by(&self) -> ClassId {
        self.declared_by
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    id: ClassId,
    name: String,
    is_abstract: bool,
    supertype: Option<ClassId>,
    features: Vec<Feature>,
    feature_index: AHashMap<String, FeatureId>,
}

impl Class {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn supertype(&self) -> Option<ClassId> {
        self.supertype
    }

    /// Effective features (inherited first).
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(id.index())
    }

    pub fn feature_by_name(&self, name: &str) -> Option<&Feature> {
        self.feature_index
            .get(name)
            .and_then(|id| self.features.get(id.index()))
    }

    pub fn feature_id(&self, name: &str) -> Result<FeatureId, ModelError> {
        self.feature_index
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownFeature {
                class: self.name.clone(),
                feature: name.to_string(),
            })
    }
}

/// A resolved metamodel (schema/package).
#[derive(Debug, Clone)]
pub struct Metamodel {
    decl: MetamodelDecl,
    classes: Vec<Class>,
    class_index: AHashMap<String, ClassId>,
    enums: AHashMap<String, Vec<String>>,
}

impl Metamodel {
    pub fn new(decl: MetamodelDecl) -> Result<Self, ModelError> {
        let mut class_index: AHashMap<String, ClassId> = AHashMap::new();
        for (i, class) in decl.classes.iter().enumerate() {
            if class_index
                .insert(class.name.clone(), ClassId(i as u32))
                .is_some()
            {
                return Err(ModelError::DuplicateClass {
                    metamodel: decl.name.clone(),
                    class: class.name.clone(),
                });
            }
        }

        let mut enums: AHashMap<String, Vec<String>> = AHashMap::new();
        for e in &decl.enums {
            enums.insert(e.name.clone(), e.literals.clone());
        }

        let lookup = |name: &str| -> Result<ClassId, ModelError> {
            class_index
                .get(name)
                .copied()
                .ok_or_else(|| ModelError::UnknownClass {
                    metamodel: decl.name.clone(),
                    class: name.to_string(),
                })
        };

        let mut supertypes: Vec<Option<ClassId>> = Vec::with_capacity(decl.classes.len());
        for class in &decl.classes {
            supertypes.push(match &class.supertype {
                Some(sup) => Some(lookup(sup)?),
                None => None,
            });
        }

        let mut layouts: Vec<Option<Vec<Feature>>> = vec![None; decl.classes.len()];
        let mut visiting = vec![false; decl.classes.len()];
        for i in 0..decl.classes.len() {
            layout_class(
                i,
                &decl,
                &supertypes,
                &enums,
                &lookup,
                &mut layouts,
                &mut visiting,
            )?;
        }

        let classes = decl
            .classes
            .iter()
            .zip(layouts)
            .enumerate()
            .map(|(i, (class, features))| {
                let features = features.unwrap_or_default();
                let feature_index = features
                    .iter()
                    .map(|f| (f.name.clone(), f.id))
                    .collect();
                Class {
                    id: ClassId(i as u32),
                    name: class.name.clone(),
                    is_abstract: class.is_abstract,
                    supertype: supertypes[i],
                    features,
                    feature_index,
                }
            })
            .collect();

        Ok(Self {
            decl,
            classes,
            class_index,
            enums,
        })
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn decl(&self) -> &MetamodelDecl {
        &self.decl
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.classes.get(id.index())
    }

    pub fn class_by_name(&self, name: &str) -> Result<&Class, ModelError> {
        self.class_index
            .get(name)
            .and_then(|id| self.classes.get(id.index()))
            .ok_or_else(|| ModelError::UnknownClass {
                metamodel: self.decl.name.clone(),
                class: name.to_string(),
            })
    }

    /// Reflexive subclass check along the single-supertype chain.
    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.class(id).and_then(Class::supertype);
        }
        false
    }

    pub fn enum_literals(&self, enumeration: &str) -> Option<&[String]> {
        self.enums.get(enumeration).map(Vec::as_slice)
    }

    pub fn has_literal(&self, enumeration: &str, literal: &str) -> bool {
        self.enum_literals(enumeration)
            .is_some_and(|literals| literals.iter().any(|l| l == literal))
    }
}

fn layout_class(
    i: usize,
    decl: &MetamodelDecl,
    supertypes: &[Option<ClassId>],
    enums: &AHashMap<String, Vec<String>>,
    lookup: &dyn Fn(&str) -> Result<ClassId, ModelError>,
    layouts: &mut Vec<Option<Vec<Feature>>>,
    visiting: &mut Vec<bool>,
) -> Result<(), ModelError> {
    if layouts[i].is_some() {
        return Ok(());
    }
    if visiting[i] {
        return Err(ModelError::SupertypeCycle {
            metamodel: decl.name.clone(),
            class: decl.classes[i].name.clone(),
        });
    }
    visiting[i] = true;

    let mut features = match supertypes[i] {
        Some(sup) => {
            layout_class(
                sup.index(),
                decl,
                supertypes,
                enums,
                lookup,
                layouts,
                visiting,
            )?;
            layouts[sup.index()].clone().unwrap_or_default()
        }
        None => Vec::new(),
    };

    let class = &decl.classes[i];
    for f in &class.features {
        if features.iter().any(|existing| existing.name == f.name) {
            return Err(ModelError::DuplicateFeature {
                class: class.name.clone(),
                feature: f.name.clone(),
            });
        }
        let ty = match &f.ty {
            FeatureTypeDecl::Data { datatype } => FeatureType::Data(*datatype),
            FeatureTypeDecl::Enum { enumeration } => {
                if !enums.contains_key(enumeration) {
                    return Err(ModelError::UnknownEnum {
                        metamodel: decl.name.clone(),
                        enumeration: enumeration.clone(),
                    });
                }
                FeatureType::Enum(enumeration.clone())
            }
            FeatureTypeDecl::Reference { class } => FeatureType::Reference(lookup(class)?),
        };
        features.push(Feature {
            id: FeatureId(features.len() as u32),
            name: f.name.clone(),
            ty,
            lower: f.lower,
            upper: f.upper,
            containment: f.containment,
            declared_by: ClassId(i as u32),
        });
    }

    visiting[i] = false;
    layouts[i] = Some(features);
    Ok(())
}

impl TryFrom<MetamodelDecl> for Metamodel {
    type Error = ModelError;

    fn try_from(decl: MetamodelDecl) -> Result<Self, Self::Error> {
        Metamodel::new(decl)
    }
}

impl From<Metamodel> for MetamodelDecl {
    fn from(metamodel: Metamodel) -> Self {
        metamodel.decl
    }
}

impl Serialize for Metamodel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.decl.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metamodel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let decl = MetamodelDecl::deserialize(deserializer)?;
        Metamodel::new(decl).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn food_metamodel() -> Metamodel {
        Metamodel::new(
            MetamodelDecl::new("restaurants")
                .with_enum("Cuisine", ["Italian", "Thai"])
                .with_class(
                    ClassDecl::new("Named")
                        .into_abstract()
                        .attribute("name", DataType::String),
                )
                .with_class(
                    ClassDecl::new("Restaurant")
                        .with_supertype("Named")
                        .enumeration("cuisine", "Cuisine")
                        .containment("menu", "Food", true),
                )
                .with_class(
                    ClassDecl::new("Food")
                        .with_supertype("Named")
                        .attribute("price", DataType::Double),
                ),
        )
        .expect("metamodel should build")
    }

    #[test]
    fn inherited_features_come_first() {
        let mm = food_metamodel();
        let restaurant = mm.class_by_name("Restaurant").unwrap();
        let names: Vec<&str> = restaurant.features().iter().map(Feature::name).collect();
        assert_eq!(names, vec!["name", "cuisine", "menu"]);

        let named = mm.class_by_name("Named").unwrap();
        assert_eq!(
            named.feature_id("name").unwrap(),
            restaurant.feature_id("name").unwrap()
        );
        assert_eq!(
            restaurant.feature_by_name("name").unwrap().declared_by(),
            named.id()
        );
    }

    #[test]
    fn subclass_check_is_reflexive_and_transitive() {
        let mm = food_metamodel();
        let named = mm.class_by_name("Named").unwrap().id();
        let food = mm.class_by_name("Food").unwrap().id();
        let restaurant = mm.class_by_name("Restaurant").unwrap().id();
        assert!(mm.is_subclass_of(food, food));
        assert!(mm.is_subclass_of(food, named));
        assert!(!mm.is_subclass_of(named, food));
        assert!(!mm.is_subclass_of(food, restaurant));
    }

    #[test]
    fn many_and_containment_flags_resolve() {
        let mm = food_metamodel();
        let menu = mm
            .class_by_name("Restaurant")
            .unwrap()
            .feature_by_name("menu")
            .unwrap();
        assert!(menu.is_many());
        assert!(menu.is_containment());
        assert!(menu.is_reference());
        assert!(mm.has_literal("Cuisine", "Thai"));
        assert!(!mm.has_literal("Cuisine", "French"));
    }

    #[test]
    fn supertype_cycles_are_rejected() {
        let err = Metamodel::new(
            MetamodelDecl::new("cyclic")
                .with_class(ClassDecl::new("A").with_supertype("B"))
                .with_class(ClassDecl::new("B").with_supertype("A")),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::SupertypeCycle { .. }));
    }

    #[test]
    fn unknown_reference_target_is_rejected() {
        let err = Metamodel::new(
            MetamodelDecl::new("broken")
                .with_class(ClassDecl::new("A").reference("b", "Missing", false)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn json_declarations_deserialize() {
        let mm: Metamodel = serde_json::from_value(serde_json::json!({
            "name": "shop",
            "enums": [{ "name": "Size", "literals": ["S", "M"] }],
            "classes": [
                { "name": "Item", "features": [
                    { "name": "label", "type": "data", "datatype": "String" },
                    { "name": "size", "type": "enum", "enumeration": "Size" },
                    { "name": "parts", "type": "reference", "class": "Item", "upper": -1, "containment": true }
                ]}
            ]
        }))
        .expect("json metamodel should deserialize");
        let item = mm.class_by_name("Item").unwrap();
        assert_eq!(item.features().len(), 3);
        assert!(item.feature_by_name("parts").unwrap().is_many());
        assert_eq!(
            item.feature_by_name("label").unwrap().ty(),
            &FeatureType::Data(DataType::String)
        );
    }
}
