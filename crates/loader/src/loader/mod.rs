//! Loaders
//!
//! [`PlanLoader::execute_load`] runs one statement of a load plan and
//! hydrates its rows. The entity, collection and query loaders decide which
//! plan to run and which values to bind.

pub mod collection;
pub mod entity;
pub mod query;

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::DatabaseConnection;
use crate::config::LoaderConfig;
use crate::dialect::{Dialect, AS_OF_PARAMETER};
use crate::error::{LoaderError, LoaderResult};
use crate::exec::{QueryParameters, RowSelection, StatementExecutor, StatementWrapper, TypedValue};
use crate::hydration::{CollectionKey, LoadOutcome, ResultSetProcessor};
use crate::metamodel::{BasicType, Metamodel};
use crate::plan::LoadQueryInfluencers;
use crate::session::{AfterLoadAction, PersistenceContext};
use crate::sql::LoadQueryDetails;

pub use collection::CollectionLoader;
pub use entity::EntityLoader;
pub use query::{EntityQuery, QueryLoader};

/// Copy the values of enabled filters, and the temporal instant, into the
/// filter parameters of `parameters`
pub fn bind_session_parameters(
    parameters: &mut QueryParameters,
    influencers: &LoadQueryInfluencers,
    metamodel: &Metamodel,
) -> LoaderResult<()> {
    for name in influencers.enabled_filter_names() {
        let enabled = influencers
            .enabled_filter(name)
            .ok_or_else(|| LoaderError::IllegalState(format!("filter '{}' vanished", name)))?;
        enabled.validate(metamodel)?;
        let definition = metamodel
            .filter(name)
            .ok_or_else(|| LoaderError::Query(format!("No filter named '{}' is defined", name)))?;
        for (parameter, value) in &enabled.parameters {
            if let Some(ty) = definition.parameters.get(parameter) {
                parameters.set_filter_parameter(
                    format!("{}.{}", name, parameter),
                    TypedValue::new(ty.clone(), value.clone()),
                );
            }
        }
    }
    if let Some(instant) = parameters.temporal_as_of {
        parameters.set_filter_parameter(AS_OF_PARAMETER, TypedValue::basic(BasicType::Timestamp, instant));
    }
    Ok(())
}

/// Executes load plans against one connection
pub struct PlanLoader<'a> {
    metamodel: &'a Metamodel,
    dialect: &'a dyn Dialect,
    config: &'a LoaderConfig,
    actions: &'a [Arc<dyn AfterLoadAction>],
}

impl<'a> PlanLoader<'a> {
    pub fn new(
        metamodel: &'a Metamodel,
        dialect: &'a dyn Dialect,
        config: &'a LoaderConfig,
        actions: &'a [Arc<dyn AfterLoadAction>],
    ) -> Self {
        Self {
            metamodel,
            dialect,
            config,
            actions,
        }
    }

    /// Run the statement, hydrate every row into `context` and return the
    /// distinct roots
    ///
    /// `collection_keys` names the collections a collection load was asked
    /// for; they are initialized even when no row mentions them.
    pub async fn execute_load(
        &self,
        connection: &mut dyn DatabaseConnection,
        context: &mut PersistenceContext,
        details: &LoadQueryDetails,
        parameters: &QueryParameters,
        collection_keys: &[CollectionKey],
    ) -> LoaderResult<LoadOutcome> {
        let selection = parameters.row_selection;
        let in_memory_pagination = details.plan().has_collection_fetches() && selection.defines_limits();
        let parameters = if in_memory_pagination {
            warn!("Row selection combined with a collection fetch; paginating in memory");
            let mut unlimited = parameters.clone();
            unlimited.row_selection = RowSelection {
                first_row: None,
                max_rows: None,
                ..selection
            };
            Cow::Owned(unlimited)
        } else {
            Cow::Borrowed(parameters)
        };

        let read_only = parameters.read_only.unwrap_or_else(|| context.is_default_read_only());
        let previous = context.set_default_read_only(read_only);
        let result = self
            .load_rows(connection, context, details, &parameters, collection_keys, read_only)
            .await;
        context.set_default_read_only(previous);
        let mut outcome = result?;

        for entity in &outcome.hydrated {
            for action in self.actions {
                action.after_load(context, entity)?;
            }
        }
        if in_memory_pagination {
            let first = selection.first_row_or_zero();
            let max = selection.max_rows.unwrap_or(usize::MAX);
            outcome.entities = outcome.entities.into_iter().skip(first).take(max).collect();
        }
        debug!(
            "Loaded {} roots, {} entities hydrated",
            outcome.entities.len(),
            outcome.hydrated.len()
        );
        Ok(outcome)
    }

    async fn load_rows(
        &self,
        connection: &mut dyn DatabaseConnection,
        context: &mut PersistenceContext,
        details: &LoadQueryDetails,
        parameters: &QueryParameters,
        collection_keys: &[CollectionKey],
        read_only: bool,
    ) -> LoaderResult<LoadOutcome> {
        let executor = StatementExecutor::new(self.dialect, self.config);
        let mut wrapper = executor
            .execute(connection, details.sql(), parameters, details.root_alias())
            .await?;
        let processed = self
            .process_rows(&mut wrapper, context, details, parameters, collection_keys, read_only)
            .await;
        let closed = wrapper.close().await;
        // a processing error wins over a close failure
        let outcome = processed?;
        closed?;
        Ok(outcome)
    }

    async fn process_rows(
        &self,
        wrapper: &mut StatementWrapper,
        context: &mut PersistenceContext,
        details: &LoadQueryDetails,
        parameters: &QueryParameters,
        collection_keys: &[CollectionKey],
        read_only: bool,
    ) -> LoaderResult<LoadOutcome> {
        let mut processor = ResultSetProcessor::new(self.metamodel, details, context, read_only);
        let read = Self::read_rows(&mut processor, wrapper, collection_keys, parameters.row_selection.max_rows).await;
        match read {
            Ok(()) => Ok(processor.finish()),
            Err(err) => {
                // no partially hydrated instance may stay managed
                processor.abandon();
                Err(err)
            }
        }
    }

    async fn read_rows(
        processor: &mut ResultSetProcessor<'_>,
        wrapper: &mut StatementWrapper,
        collection_keys: &[CollectionKey],
        max_rows: Option<usize>,
    ) -> LoaderResult<()> {
        processor.begin_collection_load(collection_keys)?;
        while max_rows.map_or(true, |max| processor.rows() < max) {
            if !wrapper.result_set().next().await? {
                break;
            }
            processor.process_row(wrapper.result_set())?;
        }
        Ok(())
    }
}
