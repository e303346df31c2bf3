//! Sessions
//!
//! A [`Session`] is one unit of work: a connection, a persistence context
//! and the filters and fetch overrides in force. Loads that leave eager
//! associations unresolved are completed before the session call returns,
//! as a loop over the owed work rather than by recursion.

pub mod actions;
pub mod context;
pub mod factory;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::backends::{DatabaseConnection, SqlValue};
use crate::dialect::LockOptions;
use crate::error::{LoaderError, LoaderResult};
use crate::exec::TypedValue;
use crate::hydration::{CollectionKey, CollectionRef, EntityKey, EntityRef, LoadOutcome, PropertyValue};
use crate::loader::{CollectionLoader, EntityLoader, EntityQuery, QueryLoader};
use crate::plan::{EnabledFilter, FetchStrategy, LoadQueryInfluencers};

pub use actions::{AfterLoadAction, NaturalIdResolution};
pub use context::{BatchFetchQueue, PersistenceContext};
pub use factory::{PlanRoot, SessionFactory, SessionFactoryBuilder};

pub struct Session {
    factory: Arc<SessionFactory>,
    connection: Box<dyn DatabaseConnection>,
    context: PersistenceContext,
    influencers: LoadQueryInfluencers,
}

impl Session {
    pub fn new(factory: Arc<SessionFactory>, connection: Box<dyn DatabaseConnection>) -> Self {
        Self {
            factory,
            connection,
            context: PersistenceContext::new(),
            influencers: LoadQueryInfluencers::new(),
        }
    }

    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PersistenceContext {
        &mut self.context
    }

    pub fn influencers(&self) -> &LoadQueryInfluencers {
        &self.influencers
    }

    pub fn enable_filter(&mut self, name: impl Into<String>) -> &mut EnabledFilter {
        self.influencers.enable_filter(name)
    }

    pub fn disable_filter(&mut self, name: &str) {
        self.influencers.disable_filter(name);
    }

    pub fn set_fetch_override(&mut self, path: impl Into<String>, strategy: FetchStrategy) {
        self.influencers.set_fetch_override(path, strategy);
    }

    pub fn set_default_read_only(&mut self, read_only: bool) {
        self.context.set_default_read_only(read_only);
    }

    pub fn generate_identifier(&self, entity_name: &str) -> LoaderResult<Uuid> {
        self.factory.generate_identifier(entity_name)
    }

    /// The instance with the given identifier, from the context when known
    pub async fn get(&mut self, entity_name: &str, id: impl Into<SqlValue>) -> LoaderResult<Option<EntityRef>> {
        let key = EntityKey::new(entity_name, id);
        if let Some(entity) = self.context.entity(&key) {
            return Ok(Some(entity));
        }
        if self.context.is_missing(&key) {
            return Ok(None);
        }
        let persister = self.factory.metamodel().entity(entity_name)?;
        let batch_size = persister.batch_size.max(self.factory.config().default_batch_fetch_size);
        let ids: Vec<SqlValue> = self
            .context
            .batch_queue()
            .entity_batch(&key, batch_size)
            .into_iter()
            .filter(|k| *k == key || (!self.context.contains_entity(k) && !self.context.is_missing(k)))
            .map(|k| k.id)
            .collect();
        self.load_entities(entity_name, &ids, LockOptions::NONE).await?;
        Ok(self.found_or_missing(key))
    }

    /// Read the instance from the database under a lock, even when it is
    /// already managed
    pub async fn get_with_lock(
        &mut self,
        entity_name: &str,
        id: impl Into<SqlValue>,
        lock_options: LockOptions,
    ) -> LoaderResult<Option<EntityRef>> {
        let key = EntityKey::new(entity_name, id);
        self.load_entities(entity_name, &[key.id.clone()], lock_options).await?;
        Ok(self.found_or_missing(key))
    }

    /// Instances for several identifiers, in the order asked; identifiers
    /// without a row are skipped
    pub async fn get_many(&mut self, entity_name: &str, ids: Vec<SqlValue>) -> LoaderResult<Vec<EntityRef>> {
        let keys: Vec<EntityKey> = ids.into_iter().map(|id| EntityKey::new(entity_name, id)).collect();
        let unknown: Vec<SqlValue> = keys
            .iter()
            .filter(|k| !self.context.contains_entity(k) && !self.context.is_missing(k))
            .map(|k| k.id.clone())
            .collect();
        if !unknown.is_empty() {
            let persister = self.factory.metamodel().entity(entity_name)?;
            let batch_size = persister.batch_size.max(self.factory.config().default_batch_fetch_size);
            for chunk in unknown.chunks(batch_size) {
                self.load_entities(entity_name, chunk, LockOptions::NONE).await?;
            }
        }
        Ok(keys.into_iter().filter_map(|key| self.found_or_missing(key)).collect())
    }

    /// Root entities matching a translated query
    pub async fn query(&mut self, query: EntityQuery) -> LoaderResult<Vec<EntityRef>> {
        let factory = self.factory.clone();
        let outcome = QueryLoader::new(&factory)
            .list(self.connection.as_mut(), &mut self.context, &self.influencers, &query)
            .await?;
        let roots = outcome.entities.clone();
        self.complete_load(outcome).await?;
        Ok(roots)
    }

    /// The instance with the given natural id, from the cross reference when
    /// it is already managed
    pub async fn get_by_natural_id(
        &mut self,
        entity_name: &str,
        values: Vec<SqlValue>,
    ) -> LoaderResult<Option<EntityRef>> {
        if let Some(entity) = self.context.find_by_natural_id(entity_name, &values) {
            return Ok(Some(entity));
        }
        let persister = self.factory.metamodel().entity(entity_name)?.clone();
        if persister.natural_id.len() != values.len() {
            return Err(LoaderError::Query(format!(
                "'{}' has a natural id of {} properties, {} values given",
                entity_name,
                persister.natural_id.len(),
                values.len()
            )));
        }
        let mut conditions = Vec::new();
        let mut parameters = BTreeMap::new();
        for (position, (name, value)) in persister.natural_id.iter().zip(values).enumerate() {
            let property = persister.property(name).ok_or_else(|| {
                LoaderError::Mapping(format!("Natural id property '{}.{}' does not exist", entity_name, name))
            })?;
            let [column] = property.columns.as_slice() else {
                return Err(LoaderError::Mapping(format!(
                    "Natural id property '{}.{}' must map exactly one column",
                    entity_name, name
                )));
            };
            let parameter = format!("natural_id_{}", position);
            conditions.push(format!("{{alias}}.{} = :{}", column, parameter));
            parameters.insert(parameter, TypedValue::new(property.ty.clone(), value));
        }
        let mut query = EntityQuery::new(entity_name).restrict(conditions.join(" and "));
        query.parameters.named = parameters;
        Ok(self.query(query).await?.into_iter().next())
    }

    /// Load the elements of a collection, together with queued collections
    /// of the same role when the role is batch fetched
    pub async fn initialize_collection(&mut self, collection: &CollectionRef) -> LoaderResult<()> {
        let key = {
            let collection = collection.read();
            if collection.is_initialized() {
                return Ok(());
            }
            collection.key.clone()
        };
        let outcome = self.load_collections(&key).await?;
        self.complete_load(outcome).await
    }

    /// The instance behind a proxy, loading it when needed
    pub async fn resolve_proxy(&mut self, key: &EntityKey) -> LoaderResult<Option<EntityRef>> {
        self.get(&key.entity_name, key.id.clone()).await
    }

    /// The entity referenced by a to-one property, resolving a proxy
    pub async fn association(&mut self, entity: &EntityRef, property: &str) -> LoaderResult<Option<EntityRef>> {
        let value = entity.read().get(property).cloned();
        match value {
            Some(PropertyValue::Entity(target)) => Ok(Some(target)),
            Some(PropertyValue::Proxy(key)) => self.resolve_proxy(&key).await,
            _ => Ok(None),
        }
    }

    /// The elements of a collection property, initializing it when needed
    pub async fn collection(&mut self, entity: &EntityRef, property: &str) -> LoaderResult<Option<CollectionRef>> {
        let collection = entity.read().collection(property);
        if let Some(collection) = &collection {
            self.initialize_collection(collection).await?;
        }
        Ok(collection)
    }

    fn found_or_missing(&mut self, key: EntityKey) -> Option<EntityRef> {
        match self.context.entity(&key) {
            Some(entity) => Some(entity),
            None => {
                self.context.mark_missing(key);
                None
            }
        }
    }

    async fn load_entities(&mut self, entity_name: &str, ids: &[SqlValue], lock_options: LockOptions) -> LoaderResult<()> {
        let factory = self.factory.clone();
        let outcome = EntityLoader::new(&factory, entity_name)?
            .with_lock_options(lock_options)
            .load(self.connection.as_mut(), &mut self.context, &self.influencers, ids)
            .await?;
        self.complete_load(outcome).await
    }

    async fn load_collections(&mut self, key: &CollectionKey) -> LoaderResult<LoadOutcome> {
        let factory = self.factory.clone();
        let loader = CollectionLoader::new(&factory, &key.role)?;
        let keys = self.context.batch_queue().collection_batch(key, loader.batch_size());
        let keys: Vec<CollectionKey> = keys
            .into_iter()
            .filter(|k| {
                k == key
                    || self
                        .context
                        .collection(k)
                        .map_or(false, |c| !c.read().is_initialized())
            })
            .collect();
        loader
            .load(self.connection.as_mut(), &mut self.context, &self.influencers, &keys)
            .await
    }

    /// Load what hydration left owing until nothing is left
    async fn complete_load(&mut self, outcome: LoadOutcome) -> LoaderResult<()> {
        let mut work = outcome.post_load;
        let mut attempted: HashSet<EntityKey> = HashSet::new();
        while !work.is_empty() {
            let current = std::mem::take(&mut work);

            let mut by_entity: Vec<(String, Vec<EntityKey>)> = Vec::new();
            for key in current.entities {
                if self.context.contains_entity(&key) || self.context.is_missing(&key) || !attempted.insert(key.clone()) {
                    continue;
                }
                match by_entity.iter_mut().find(|(name, _)| *name == key.entity_name) {
                    Some((_, keys)) => keys.push(key),
                    None => by_entity.push((key.entity_name.clone(), vec![key])),
                }
            }
            for (entity_name, keys) in by_entity {
                debug!("Loading {} eager '{}' associations", keys.len(), entity_name);
                let persister = self.factory.metamodel().entity(&entity_name)?;
                let batch_size = persister.batch_size.max(self.factory.config().default_batch_fetch_size);
                for chunk in keys.chunks(batch_size) {
                    let ids: Vec<SqlValue> = chunk.iter().map(|k| k.id.clone()).collect();
                    let factory = self.factory.clone();
                    let outcome = EntityLoader::new(&factory, &entity_name)?
                        .load(self.connection.as_mut(), &mut self.context, &self.influencers, &ids)
                        .await?;
                    work.merge(outcome.post_load);
                    for key in chunk {
                        if !self.context.contains_entity(key) {
                            self.context.mark_missing(key.clone());
                        }
                    }
                }
            }

            for key in current.collections {
                let pending = self
                    .context
                    .collection(&key)
                    .map_or(true, |c| !c.read().is_initialized());
                if pending {
                    debug!("Initializing eager collection {}", key);
                    let outcome = self.load_collections(&key).await?;
                    work.merge(outcome.post_load);
                }
            }
        }
        Ok(())
    }
}
