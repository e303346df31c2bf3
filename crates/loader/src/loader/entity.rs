//! Loading entities by identifier

use std::sync::Arc;

use crate::backends::{DatabaseConnection, SqlValue};
use crate::dialect::LockOptions;
use crate::error::{LoaderError, LoaderResult};
use crate::exec::{QueryParameters, TypedValue};
use crate::hydration::LoadOutcome;
use crate::metamodel::EntityPersister;
use crate::plan::LoadQueryInfluencers;
use crate::session::{PersistenceContext, PlanRoot, SessionFactory};
use crate::sql::{QuerySpec, Restriction};

/// Loads instances of one entity by identifier, one or a batch at a time
pub struct EntityLoader<'a> {
    factory: &'a SessionFactory,
    persister: Arc<EntityPersister>,
    lock_options: LockOptions,
}

impl<'a> EntityLoader<'a> {
    pub fn new(factory: &'a SessionFactory, entity_name: &str) -> LoaderResult<Self> {
        let persister = factory.metamodel().entity(entity_name)?.clone();
        Ok(Self {
            factory,
            persister,
            lock_options: LockOptions::NONE,
        })
    }

    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    /// Load the instances with the given identifiers; identifiers without a
    /// row are simply absent from the outcome
    pub async fn load(
        &self,
        connection: &mut dyn DatabaseConnection,
        context: &mut PersistenceContext,
        influencers: &LoadQueryInfluencers,
        ids: &[SqlValue],
    ) -> LoaderResult<LoadOutcome> {
        if ids.is_empty() {
            return Err(LoaderError::Query(format!(
                "no identifiers given to load '{}'",
                self.persister.entity_name
            )));
        }
        let details = self.factory.query_details(
            &PlanRoot::Entity(self.persister.entity_name.clone()),
            influencers,
            &QuerySpec::new(Restriction::Ids(ids.len())),
        )?;
        let mut parameters = QueryParameters::new().with_lock_options(self.lock_options);
        for id in ids {
            parameters = parameters.with_positional(TypedValue::new(self.persister.identifier_type.clone(), id.clone()));
        }
        crate::loader::bind_session_parameters(&mut parameters, influencers, self.factory.metamodel())?;
        self.factory
            .plan_loader()
            .execute_load(connection, context, &details, &parameters, &[])
            .await
    }
}
