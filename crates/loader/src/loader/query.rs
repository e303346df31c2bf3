//! Loading entities with a caller supplied restriction

use crate::backends::DatabaseConnection;
use crate::error::LoaderResult;
use crate::exec::QueryParameters;
use crate::hydration::LoadOutcome;
use crate::plan::LoadQueryInfluencers;
use crate::session::{PersistenceContext, PlanRoot, SessionFactory};
use crate::sql::{QuerySpec, Restriction};

/// A translated query over one entity
///
/// `restriction` and `order_by` are SQL fragments in which `{alias}` stands
/// for the root table alias; parameters are written `?` or `:name`.
#[derive(Debug, Clone, Default)]
pub struct EntityQuery {
    pub entity_name: String,
    pub restriction: Option<String>,
    pub order_by: Option<String>,
    pub parameters: QueryParameters,
}

impl EntityQuery {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            ..Self::default()
        }
    }

    pub fn restrict(mut self, fragment: impl Into<String>) -> Self {
        self.restriction = Some(fragment.into());
        self
    }

    pub fn order_by(mut self, fragment: impl Into<String>) -> Self {
        self.order_by = Some(fragment.into());
        self
    }

    pub fn with_parameters(mut self, parameters: QueryParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

pub struct QueryLoader<'a> {
    factory: &'a SessionFactory,
}

impl<'a> QueryLoader<'a> {
    pub fn new(factory: &'a SessionFactory) -> Self {
        Self { factory }
    }

    pub async fn list(
        &self,
        connection: &mut dyn DatabaseConnection,
        context: &mut PersistenceContext,
        influencers: &LoadQueryInfluencers,
        query: &EntityQuery,
    ) -> LoaderResult<LoadOutcome> {
        let restriction = match &query.restriction {
            Some(fragment) => Restriction::Fragment(fragment.clone()),
            None => Restriction::None,
        };
        let mut spec = QuerySpec::new(restriction).with_temporal_as_of(query.parameters.temporal_as_of.is_some());
        if let Some(order_by) = &query.order_by {
            spec = spec.with_order_by(order_by.clone());
        }
        let details = self
            .factory
            .query_details(&PlanRoot::Entity(query.entity_name.clone()), influencers, &spec)?;
        let mut parameters = query.parameters.clone();
        crate::loader::bind_session_parameters(&mut parameters, influencers, self.factory.metamodel())?;
        self.factory
            .plan_loader()
            .execute_load(connection, context, &details, &parameters, &[])
            .await
    }
}
