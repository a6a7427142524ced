use super::RowStream;
use crate::error::TransformError;
use crate::tuple::RowTuple;
use modeljoin_model::{ClassId, Model, ModelSet, ObjRef};
use modeljoin_plan::FromClause;

/// All instances of one source class in the model bound to its metamodel.
#[derive(Debug, Clone, Copy)]
pub struct FromSource<'a> {
    model: &'a Model,
    class: ClassId,
}

impl<'a> FromSource<'a> {
    pub fn resolve(sources: &'a ModelSet, from: &FromClause) -> Result<Self, TransformError> {
        let Some(model) = sources.for_metamodel(&from.metamodel) else {
            return Err(TransformError::invalid_plan(format!(
                "no source model registered for metamodel '{}'",
                from.metamodel
            )));
        };
        let class = model.metamodel().class_by_name(&from.class)?.id();
        Ok(Self { model, class })
    }

    /// Instances in the model's native order, subclasses included.
    pub fn instances(self) -> impl Iterator<Item = ObjRef> + 'a {
        self.model.all_instances(self.class)
    }

    /// One single-slot row per instance.
    pub fn rows(self) -> RowStream<'a> {
        Box::new(self.instances().map(|obj| Ok(RowTuple::single(obj))))
    }
}
