//! Actions run on every entity a load hydrated, once all rows are read

use std::fmt::Debug;

use crate::error::LoaderResult;
use crate::hydration::EntityRef;

use super::context::PersistenceContext;

pub trait AfterLoadAction: Send + Sync + Debug {
    fn after_load(&self, context: &mut PersistenceContext, entity: &EntityRef) -> LoaderResult<()>;
}

/// Records the natural-id to identifier cross reference
#[derive(Debug, Default)]
pub struct NaturalIdResolution;

impl AfterLoadAction for NaturalIdResolution {
    fn after_load(&self, context: &mut PersistenceContext, entity: &EntityRef) -> LoaderResult<()> {
        let (entity_name, values, key) = {
            let instance = entity.read();
            let indexes = instance.persister.natural_id_indexes();
            if indexes.is_empty() {
                return Ok(());
            }
            let values = indexes
                .iter()
                .filter_map(|index| instance.properties.get(*index))
                .filter_map(|value| value.as_value().cloned())
                .collect::<Vec<_>>();
            if values.len() != indexes.len() {
                return Ok(());
            }
            (instance.key.entity_name.clone(), values, instance.key.clone())
        };
        context.register_natural_id(&entity_name, values, key);
        Ok(())
    }
}
