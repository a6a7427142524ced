//! Source → target instance registry.
//!
//! Keyed by `(source instance, target class index)`, since one source class
//! can feed several target classes. Each key moves `none → one → many` and
//! never back; lookups succeed only in state `one`.

use ahash::AHashMap;
use modeljoin_model::ObjRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    None,
    One(ObjRef),
    Many,
}

impl Mapping {
    fn with(self, target: ObjRef) -> Mapping {
        match self {
            Mapping::None => Mapping::One(target),
            Mapping::One(_) | Mapping::Many => Mapping::Many,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    Missing,
    Ambiguous,
}

#[derive(Debug, Default)]
pub struct TargetMap {
    map: AHashMap<(ObjRef, usize), Mapping>,
}

impl TargetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: ObjRef, target_class: usize, target: ObjRef) {
        let entry = self
            .map
            .entry((source, target_class))
            .or_insert(Mapping::None);
        *entry = entry.with(target);
    }

    pub fn mapping(&self, source: ObjRef, target_class: usize) -> Mapping {
        self.map
            .get(&(source, target_class))
            .copied()
            .unwrap_or(Mapping::None)
    }

    pub fn get(&self, source: ObjRef, target_class: usize) -> Result<ObjRef, MappingError> {
        match self.mapping(source, target_class) {
            Mapping::One(target) => Ok(target),
            Mapping::None => Err(MappingError::Missing),
            Mapping::Many => Err(MappingError::Ambiguous),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
