//! Row processing
//!
//! [`ResultSetProcessor`] reads the rows of one executed load plan. Each row
//! resolves its root through the persistence context; instances already
//! known are reused without re-reading their state, but the row still
//! contributes to joined collections. Collections filled by this result set
//! are initialized only once every row has been read.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::backends::{ResultSetWrapper, SqlValue};
use crate::error::{LoaderError, LoaderResult};
use crate::metamodel::{CollectionNature, ComponentType, Metamodel, Property, Type};
use crate::plan::{CollectionId, Fetch, FetchStyle, Return, SourceId, SourceKind};
use crate::session::PersistenceContext;
use crate::sql::LoadQueryDetails;

use super::instance::{
    CollectionEntry, CollectionKey, CollectionRef, EntityInstance, EntityKey, EntityRef, PropertyValue,
};

/// Loads the session still owes once the rows are processed
#[derive(Debug, Default, Clone)]
pub struct PostLoadWork {
    /// Eager associations that were not joined
    pub entities: Vec<EntityKey>,
    /// Eager collections that were not joined
    pub collections: Vec<CollectionKey>,
}

impl PostLoadWork {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.collections.is_empty()
    }

    pub fn merge(&mut self, other: PostLoadWork) {
        for key in other.entities {
            if !self.entities.contains(&key) {
                self.entities.push(key);
            }
        }
        for key in other.collections {
            if !self.collections.contains(&key) {
                self.collections.push(key);
            }
        }
    }
}

/// What one result set produced
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Distinct root entities, in row order
    pub entities: Vec<EntityRef>,
    /// Root collections of a collection load
    pub collections: Vec<CollectionRef>,
    /// Every entity this result set hydrated, roots included
    pub hydrated: Vec<EntityRef>,
    pub post_load: PostLoadWork,
}

pub struct ResultSetProcessor<'a> {
    metamodel: &'a Metamodel,
    details: &'a LoadQueryDetails,
    context: &'a mut PersistenceContext,
    read_only: bool,
    loading: HashMap<CollectionKey, CollectionRef>,
    loading_order: Vec<CollectionKey>,
    root_keys: HashSet<EntityKey>,
    // what this result set put into the context, undone by `abandon`
    added_entities: Vec<EntityKey>,
    added_collections: Vec<CollectionKey>,
    outcome: LoadOutcome,
    rows: usize,
}

fn column_slices<'s>(properties: &[Property], aliases: &'s [String]) -> LoaderResult<Vec<&'s [String]>> {
    let mut slices = Vec::with_capacity(properties.len());
    let mut offset = 0;
    for property in properties {
        let span = property.ty.column_span();
        let slice = aliases.get(offset..offset + span).ok_or_else(|| {
            LoaderError::Mapping(format!(
                "property '{}' spans past the {} columns supplied",
                property.name,
                aliases.len()
            ))
        })?;
        slices.push(slice);
        offset += span;
    }
    Ok(slices)
}

impl<'a> ResultSetProcessor<'a> {
    pub fn new(
        metamodel: &'a Metamodel,
        details: &'a LoadQueryDetails,
        context: &'a mut PersistenceContext,
        read_only: bool,
    ) -> Self {
        Self {
            metamodel,
            details,
            context,
            read_only,
            loading: HashMap::new(),
            loading_order: Vec::new(),
            root_keys: HashSet::new(),
            added_entities: Vec::new(),
            added_collections: Vec::new(),
            outcome: LoadOutcome::default(),
            rows: 0,
        }
    }

    /// Register the collections a collection load was asked for, so keys
    /// without rows still end up initialized and empty
    pub fn begin_collection_load(&mut self, keys: &[CollectionKey]) -> LoaderResult<()> {
        let details = self.details;
        let plan = details.plan();
        for root in plan.returns() {
            if let Return::Collection(id) = root {
                let persister = plan.collection(*id).persister.clone();
                for key in keys.iter().filter(|k| k.role == persister.role) {
                    let collection =
                        self.managed_collection(key.clone(), persister.nature, persister.element_entity().is_some());
                    if !collection.read().is_initialized() {
                        self.start_loading(key.clone(), collection.clone());
                    }
                    self.outcome.collections.push(collection);
                }
            }
        }
        Ok(())
    }

    pub fn process_row(&mut self, result_set: &ResultSetWrapper) -> LoaderResult<()> {
        self.rows += 1;
        trace!("Processing result set row {}", self.rows);
        let details = self.details;
        for root in details.plan().returns() {
            match root {
                Return::Entity(source) => {
                    if let Some(entity) = self.resolve_entity(*source, result_set)? {
                        let key = entity.read().key.clone();
                        if self.root_keys.insert(key) {
                            self.outcome.entities.push(entity);
                        }
                    }
                }
                Return::Collection(id) => {
                    let reference = details.plan().collection(*id);
                    let aliases = details.aliases().collection_aliases(&reference.query_space_uid)?;
                    let owner = self.metamodel.entity(&reference.persister.owner_entity)?;
                    let key = owner.identifier_type.extract(result_set, &aliases.key)?;
                    if key.is_null() {
                        continue;
                    }
                    let key = CollectionKey::new(reference.persister.role.clone(), key);
                    self.read_collection_row(*id, &key, result_set)?;
                }
            }
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Initialize every collection this result set loaded
    pub fn finish(mut self) -> LoadOutcome {
        for key in &self.loading_order {
            if let Some(collection) = self.loading.get(key) {
                collection.write().mark_initialized();
            }
        }
        for entity in &self.outcome.hydrated {
            entity.write().initialized = true;
        }
        trace!(
            "Read {} rows: {} entities hydrated, {} collections initialized",
            self.rows,
            self.outcome.hydrated.len(),
            self.loading_order.len()
        );
        std::mem::take(&mut self.outcome)
    }

    /// Undo a load that failed part way: instances and collections this
    /// result set registered are evicted, and collections it was filling
    /// lose the entries read so far
    pub fn abandon(mut self) {
        let added: HashSet<&CollectionKey> = self.added_collections.iter().collect();
        for key in &self.loading_order {
            if let Some(collection) = self.loading.get(key) {
                collection.write().discard_entries();
            }
            // still managed and uninitialized, so batchable again
            if !added.contains(key) {
                self.context.batch_queue_mut().add_collection(key.clone());
            }
        }
        for key in &self.added_collections {
            self.context.evict_collection(key);
        }
        for key in &self.added_entities {
            self.context.evict_entity(key);
        }
        debug!(
            "Abandoned load after {} rows: evicted {} entities and {} collections",
            self.rows,
            self.added_entities.len(),
            self.added_collections.len()
        );
    }

    fn managed_collection(&mut self, key: CollectionKey, nature: CollectionNature, entity_elements: bool) -> CollectionRef {
        if let Some(collection) = self.context.collection(&key) {
            return collection;
        }
        self.added_collections.push(key.clone());
        self.context.get_or_create_collection(key, nature, entity_elements)
    }

    fn start_loading(&mut self, key: CollectionKey, collection: CollectionRef) {
        if !self.loading.contains_key(&key) {
            self.context.batch_queue_mut().remove_collection(&key);
            self.loading_order.push(key.clone());
            self.loading.insert(key, collection);
        }
    }

    fn find_fetch(&self, source: SourceId, attribute_index: usize) -> Option<&'a Fetch> {
        let details: &'a LoadQueryDetails = self.details;
        let plan = details.plan();
        plan.source(source)
            .fetches
            .iter()
            .map(|id| plan.fetch(*id))
            .find(|fetch| fetch.common().attribute_index == attribute_index)
    }

    fn resolve_entity(&mut self, source_id: SourceId, result_set: &ResultSetWrapper) -> LoaderResult<Option<EntityRef>> {
        let details = self.details;
        let source = details.plan().source(source_id);
        let persister = source.entity_persister().cloned().ok_or_else(|| {
            LoaderError::IllegalState(format!("'{}' is not an entity reference", source.property_path))
        })?;
        let aliases = details.aliases().entity_aliases(&source.query_space_uid)?;
        let id = persister.identifier_type.extract(result_set, &aliases.identifier)?;
        if id.is_null() {
            return Ok(None);
        }
        let key = EntityKey::new(persister.entity_name.clone(), id);

        if let Some(existing) = self.context.entity(&key) {
            trace!("Reusing managed instance {}", key);
            self.resolve_joined_entities(source_id, result_set)?;
            self.read_joined_collections(source_id, &key, result_set)?;
            return Ok(Some(existing));
        }

        let mut instance = EntityInstance::placeholder(key.clone(), persister.clone());
        instance.read_only = self.read_only;
        // registered before hydration so cycles resolve to this instance
        let entity = self.context.add_entity(instance);
        self.added_entities.push(key.clone());
        let slices: Vec<&[String]> = aliases.properties.iter().map(Vec::as_slice).collect();
        let properties = self.hydrate_properties(source_id, &persister.properties, &slices, Some(&key), result_set)?;
        entity.write().properties = properties;
        self.outcome.hydrated.push(entity.clone());
        self.read_joined_collections(source_id, &key, result_set)?;
        Ok(Some(entity))
    }

    fn hydrate_properties(
        &mut self,
        source_id: SourceId,
        properties: &[Property],
        aliases: &[&[String]],
        owner: Option<&EntityKey>,
        result_set: &ResultSetWrapper,
    ) -> LoaderResult<Vec<PropertyValue>> {
        let mut values = Vec::with_capacity(properties.len());
        for (index, property) in properties.iter().enumerate() {
            let columns = aliases.get(index).copied().unwrap_or(&[]);
            values.push(self.hydrate_property(source_id, index, property, columns, owner, result_set)?);
        }
        Ok(values)
    }

    fn hydrate_property(
        &mut self,
        source_id: SourceId,
        index: usize,
        property: &Property,
        aliases: &[String],
        owner: Option<&EntityKey>,
        result_set: &ResultSetWrapper,
    ) -> LoaderResult<PropertyValue> {
        match &property.ty {
            Type::Basic(_) => Ok(PropertyValue::Value(property.ty.extract(result_set, aliases)?)),
            Type::Component(component) => match self.find_fetch(source_id, index) {
                Some(Fetch::Composite { source, .. }) => {
                    self.hydrate_composite(*source, component, aliases, owner, result_set)
                }
                _ => Ok(PropertyValue::Value(property.ty.extract(result_set, aliases)?)),
            },
            Type::ManyToOne(association) => {
                if let Some(Fetch::Entity { source, .. }) = self.find_fetch(source_id, index) {
                    return Ok(match self.resolve_entity(*source, result_set)? {
                        Some(entity) => PropertyValue::Entity(entity),
                        None => PropertyValue::Value(SqlValue::Null),
                    });
                }
                let foreign_key = property.ty.extract(result_set, aliases)?;
                if foreign_key.is_null() {
                    return Ok(PropertyValue::Value(SqlValue::Null));
                }
                let key = EntityKey::new(association.entity_name.clone(), foreign_key);
                if let Some(existing) = self.context.entity(&key) {
                    return Ok(PropertyValue::Entity(existing));
                }
                let strategy = self
                    .details
                    .plan()
                    .source(source_id)
                    .deferred_strategy(index)
                    .unwrap_or(property.fetch);
                if strategy.is_eager() {
                    if !self.outcome.post_load.entities.contains(&key) {
                        self.outcome.post_load.entities.push(key.clone());
                    }
                } else if strategy.style == FetchStyle::Batch {
                    self.context.batch_queue_mut().add_entity(key.clone());
                }
                Ok(PropertyValue::Proxy(key))
            }
            Type::Collection(role) => {
                let owner = owner.ok_or_else(|| {
                    LoaderError::IllegalState(format!("collection '{}' read without an owning entity", role))
                })?;
                let persister = self.metamodel.collection(role)?.clone();
                let key = CollectionKey::new(role.clone(), owner.id.clone());
                let collection =
                    self.managed_collection(key.clone(), persister.nature, persister.element_entity().is_some());
                let initialized = collection.read().is_initialized();
                let joined = matches!(self.find_fetch(source_id, index), Some(Fetch::Collection { .. }));
                if !initialized {
                    if joined {
                        self.start_loading(key, collection.clone());
                    } else {
                        let strategy = self
                            .details
                            .plan()
                            .source(source_id)
                            .deferred_strategy(index)
                            .unwrap_or(property.fetch);
                        if strategy.is_eager() {
                            if !self.outcome.post_load.collections.contains(&key) {
                                self.outcome.post_load.collections.push(key);
                            }
                        } else if strategy.style == FetchStyle::Batch {
                            self.context.batch_queue_mut().add_collection(key);
                        }
                    }
                }
                Ok(PropertyValue::Collection(collection))
            }
        }
    }

    /// An all-null embeddable reads as null
    fn hydrate_composite(
        &mut self,
        source_id: SourceId,
        component: &ComponentType,
        aliases: &[String],
        owner: Option<&EntityKey>,
        result_set: &ResultSetWrapper,
    ) -> LoaderResult<PropertyValue> {
        let slices = column_slices(&component.properties, aliases)?;
        let values = self.hydrate_properties(source_id, &component.properties, &slices, owner, result_set)?;
        if values.iter().all(PropertyValue::is_null) {
            Ok(PropertyValue::Value(SqlValue::Null))
        } else {
            Ok(PropertyValue::Component(values))
        }
    }

    /// Joined entities below an instance that is not hydrated again
    fn resolve_joined_entities(&mut self, source_id: SourceId, result_set: &ResultSetWrapper) -> LoaderResult<()> {
        let details = self.details;
        let plan = details.plan();
        for fetch_id in &plan.source(source_id).fetches {
            match plan.fetch(*fetch_id) {
                Fetch::Entity { source, .. } => {
                    self.resolve_entity(*source, result_set)?;
                }
                Fetch::Composite { source, .. } => self.resolve_joined_entities(*source, result_set)?,
                Fetch::Collection { .. } => {}
            }
        }
        Ok(())
    }

    fn read_joined_collections(
        &mut self,
        source_id: SourceId,
        owner: &EntityKey,
        result_set: &ResultSetWrapper,
    ) -> LoaderResult<()> {
        let details = self.details;
        let plan = details.plan();
        for fetch_id in &plan.source(source_id).fetches {
            match plan.fetch(*fetch_id) {
                Fetch::Collection { collection, .. } => {
                    let role = &plan.collection(*collection).persister.role;
                    let key = CollectionKey::new(role.clone(), owner.id.clone());
                    self.read_collection_row(*collection, &key, result_set)?;
                }
                Fetch::Composite { source, .. } => self.read_joined_collections(*source, owner, result_set)?,
                Fetch::Entity { .. } => {}
            }
        }
        Ok(())
    }

    fn read_collection_row(
        &mut self,
        collection_id: CollectionId,
        key: &CollectionKey,
        result_set: &ResultSetWrapper,
    ) -> LoaderResult<()> {
        let collection = match self.loading.get(key) {
            Some(collection) => collection.clone(),
            None => return Ok(()),
        };
        let details = self.details;
        let reference = details.plan().collection(collection_id);
        let aliases = details.aliases().collection_aliases(&reference.query_space_uid)?;
        // outer join without a matching collection row
        let mut key_is_null = true;
        for alias in &aliases.key {
            if !result_set.get(alias)?.is_null() {
                key_is_null = false;
            }
        }
        if key_is_null {
            return Ok(());
        }

        let persister = &reference.persister;
        let element = match self.read_graph(reference.element_graph, &persister.element_type, &aliases.element, result_set)? {
            Some(element) => element,
            None => return Ok(()),
        };
        let index = match &persister.index_type {
            Some(index_type) => self.read_graph(reference.index_graph, index_type, &aliases.index, result_set)?,
            None => None,
        };
        trace!("Collection {} gains an element", key);
        collection.write().read_entry(CollectionEntry { index, element });
        Ok(())
    }

    /// Element or index value of the current row; `None` when absent
    fn read_graph(
        &mut self,
        graph: Option<SourceId>,
        ty: &Type,
        aliases: &[String],
        result_set: &ResultSetWrapper,
    ) -> LoaderResult<Option<PropertyValue>> {
        let details = self.details;
        let value = match graph {
            Some(source) => match &details.plan().source(source).kind {
                SourceKind::Entity(_) => self.resolve_entity(source, result_set)?.map(PropertyValue::Entity),
                SourceKind::Composite { component, .. } => {
                    let component = component.clone();
                    Some(self.hydrate_composite(source, &component, aliases, None, result_set)?)
                }
            },
            None => Some(PropertyValue::Value(ty.extract(result_set, aliases)?)),
        };
        Ok(value.filter(|v| !v.is_null()))
    }
}
