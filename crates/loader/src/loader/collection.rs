//! Initializing collections by owner key

use std::sync::Arc;

use crate::backends::DatabaseConnection;
use crate::error::{LoaderError, LoaderResult};
use crate::exec::{QueryParameters, TypedValue};
use crate::hydration::{CollectionKey, LoadOutcome};
use crate::metamodel::{CollectionPersister, Type};
use crate::plan::LoadQueryInfluencers;
use crate::session::{PersistenceContext, PlanRoot, SessionFactory};
use crate::sql::{QuerySpec, Restriction};

/// Loads the elements of one collection role for one or more owners
pub struct CollectionLoader<'a> {
    factory: &'a SessionFactory,
    persister: Arc<CollectionPersister>,
    key_type: Type,
}

impl<'a> CollectionLoader<'a> {
    pub fn new(factory: &'a SessionFactory, role: &str) -> LoaderResult<Self> {
        let persister = factory.metamodel().collection(role)?.clone();
        let key_type = factory
            .metamodel()
            .entity(&persister.owner_entity)?
            .identifier_type
            .clone();
        Ok(Self {
            factory,
            persister,
            key_type,
        })
    }

    /// Effective batch size of the role
    pub fn batch_size(&self) -> usize {
        self.persister
            .batch_size
            .max(self.factory.config().default_batch_fetch_size)
    }

    /// Initialize the collections with the given keys; keys without rows end
    /// up initialized and empty
    pub async fn load(
        &self,
        connection: &mut dyn DatabaseConnection,
        context: &mut PersistenceContext,
        influencers: &LoadQueryInfluencers,
        keys: &[CollectionKey],
    ) -> LoaderResult<LoadOutcome> {
        if keys.is_empty() {
            return Err(LoaderError::Query(format!(
                "no owner keys given to initialize '{}'",
                self.persister.role
            )));
        }
        if let Some(foreign) = keys.iter().find(|k| k.role != self.persister.role) {
            return Err(LoaderError::IllegalState(format!(
                "collection {} cannot be loaded by the loader of '{}'",
                foreign, self.persister.role
            )));
        }
        let details = self.factory.query_details(
            &PlanRoot::Collection(self.persister.role.clone()),
            influencers,
            &QuerySpec::new(Restriction::Keys(keys.len())),
        )?;
        let mut parameters = QueryParameters::new();
        for key in keys {
            parameters = parameters.with_positional(TypedValue::new(self.key_type.clone(), key.key.clone()));
        }
        crate::loader::bind_session_parameters(&mut parameters, influencers, self.factory.metamodel())?;
        self.factory
            .plan_loader()
            .execute_load(connection, context, &details, &parameters, keys)
            .await
    }
}
