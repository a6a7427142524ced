//! modeljoin-model: typed schemas and object graphs.
//!
//! - [`Metamodel`]: classes with single inheritance, features, enums and
//!   datatypes, resolved so that feature lookups become slot indices.
//! - [`Model`]: an arena of objects instantiating one metamodel, with a
//!   roaring-bitmap class index and containment tracking.
//! - [`Value`]: the dynamically typed feature value, with strict structural
//!   equality so it can serve as a grouping key.
//! - [`ModelSet`]: source models keyed by metamodel name.
//!
//! Models and metamodels round-trip through JSON ([`ModelDoc`],
//! [`MetamodelDecl`]).

pub mod cast;
pub mod metamodel;
pub mod model;
pub mod registry;
pub mod value;

use thiserror::Error;

pub use cast::{can_cast, cast};
pub use metamodel::{
    Class, ClassDecl, ClassId, DataType, EnumDecl, Feature, FeatureDecl, FeatureId, FeatureType,
    FeatureTypeDecl, Metamodel, MetamodelDecl, UNBOUNDED,
};
pub use model::{Model, ModelDoc, Object, ObjectDoc};
pub use registry::ModelSet;
pub use value::{ModelId, ObjRef, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unknown class '{class}' in metamodel '{metamodel}'")]
    UnknownClass { metamodel: String, class: String },
    #[error("class '{class}' has no feature '{feature}'")]
    UnknownFeature { class: String, feature: String },
    #[error("unknown enumeration '{enumeration}' in metamodel '{metamodel}'")]
    UnknownEnum {
        metamodel: String,
        enumeration: String,
    },
    #[error("enumeration '{enumeration}' has no literal '{literal}'")]
    UnknownLiteral { enumeration: String, literal: String },
    #[error("duplicate class '{class}' in metamodel '{metamodel}'")]
    DuplicateClass { metamodel: String, class: String },
    #[error("duplicate feature '{feature}' in class '{class}'")]
    DuplicateFeature { class: String, feature: String },
    #[error("supertype cycle through class '{class}' in metamodel '{metamodel}'")]
    SupertypeCycle { metamodel: String, class: String },
    #[error("cannot instantiate abstract class '{class}'")]
    AbstractClass { class: String },
    #[error("unknown object {object}")]
    UnknownObject { object: ObjRef },
    #[error("object {object} belongs to a different model")]
    ForeignObject { object: ObjRef },
    #[error("cannot cast {from} to {to}")]
    Cast { from: String, to: String },
    #[error("feature '{class}.{feature}': {message}")]
    InvalidValue {
        class: String,
        feature: String,
        message: String,
    },
    #[error("duplicate source model for metamodel '{metamodel}'")]
    DuplicateMetamodel { metamodel: String },
    #[error("invalid model document: {message}")]
    Document { message: String },
}
