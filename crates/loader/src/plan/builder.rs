//! Load plan building
//!
//! Walks the metamodel from a root entity or collection and records every
//! association that will be join fetched. Associations that end up not
//! joined are recorded on their owner as deferred, with the strategy the
//! session must apply after the rows have been processed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::{LoaderError, LoaderResult};
use crate::metamodel::{CollectionPersister, ComponentType, EntityPersister, Metamodel, Property, Type};

use super::fetch::{
    CollectionId, CollectionReference, CompositeRole, DeferredAssociation, Fetch, FetchCommon,
    FetchId, FetchSource, Return, SourceId, SourceKind,
};
use super::load_plan::{Disposition, LoadPlan};
use super::property_path::{ELEMENT_SEGMENT, INDEX_SEGMENT};
use super::query_space::{JoinKind, QuerySpaceKind, QuerySpaceUid};
use super::{FetchStrategy, LoadQueryInfluencers, PropertyPath};

/// Table plus columns identifying one association edge, used to detect cycles
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AssociationKey {
    table: String,
    columns: Vec<String>,
}

impl AssociationKey {
    fn new(table: &str, columns: &[String]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.to_vec(),
        }
    }
}

/// Where the walker currently stands
#[derive(Clone)]
struct WalkContext {
    source: SourceId,
    /// Table physically holding the source's columns
    table: String,
    /// Entity owning the source, for collection keys
    owner: Option<SourceId>,
    role: Option<CompositeRole>,
    depth: usize,
}

pub struct LoadPlanBuilder<'a> {
    metamodel: &'a Metamodel,
    influencers: &'a LoadQueryInfluencers,
    max_fetch_depth: usize,
    plan: LoadPlan,
    visited: HashSet<AssociationKey>,
    has_collection_join: bool,
}

impl<'a> LoadPlanBuilder<'a> {
    pub fn new(
        metamodel: &'a Metamodel,
        influencers: &'a LoadQueryInfluencers,
        max_fetch_depth: usize,
    ) -> Self {
        Self {
            metamodel,
            influencers,
            max_fetch_depth,
            plan: LoadPlan::new(Disposition::EntityLoader),
            visited: HashSet::new(),
            has_collection_join: false,
        }
    }

    /// Plan for loading instances of `entity_name` with their join fetches
    pub fn build_root_entity_plan(mut self, entity_name: &str) -> LoaderResult<LoadPlan> {
        let persister = self.metamodel.entity(entity_name)?.clone();
        let uid = self
            .plan
            .query_spaces
            .add_root(QuerySpaceKind::Entity(persister.clone()));
        let source = self.push_source(FetchSource {
            kind: SourceKind::Entity(persister.clone()),
            query_space_uid: uid,
            property_path: PropertyPath::root(entity_name),
            fetches: Vec::new(),
            deferred: Vec::new(),
            entity_owner: None,
        });
        self.plan.returns.push(Return::Entity(source));
        self.walk_entity(source, &persister, 0)?;
        self.finish()
    }

    /// Plan for initializing collections of `role` by owner key
    pub fn build_root_collection_plan(mut self, role: &str) -> LoaderResult<LoadPlan> {
        self.plan.disposition = Disposition::CollectionInitializer;
        let persister = self.metamodel.collection(role)?.clone();
        let uid = self
            .plan
            .query_spaces
            .add_root(QuerySpaceKind::Collection(persister.clone()));
        self.visited
            .insert(AssociationKey::new(&persister.table_name, &persister.key_columns));
        // the root collection is the one collection this statement may fan out on
        self.has_collection_join = true;
        let collection = self.push_collection(CollectionReference {
            persister: persister.clone(),
            query_space_uid: uid,
            property_path: PropertyPath::root(role),
            element_graph: None,
            index_graph: None,
        });
        self.plan.returns.push(Return::Collection(collection));
        self.build_collection_graphs(collection, 0)?;
        self.finish()
    }

    fn finish(self) -> LoaderResult<LoadPlan> {
        debug!(
            "Built load plan with {} query spaces:\n{}",
            self.plan.query_spaces.len(),
            self.plan.describe()
        );
        Ok(self.plan)
    }

    fn push_source(&mut self, source: FetchSource) -> SourceId {
        self.plan.sources.push(source);
        SourceId(self.plan.sources.len() - 1)
    }

    fn push_collection(&mut self, collection: CollectionReference) -> CollectionId {
        self.plan.collections.push(collection);
        CollectionId(self.plan.collections.len() - 1)
    }

    fn push_fetch(&mut self, fetch: Fetch) -> FetchId {
        let owner = fetch.owner();
        self.plan.fetches.push(fetch);
        let id = FetchId(self.plan.fetches.len() - 1);
        self.plan.sources[owner.0].fetches.push(id);
        id
    }

    fn defer(&mut self, source: SourceId, attribute_index: usize, strategy: FetchStrategy) {
        self.plan.sources[source.0].deferred.push(DeferredAssociation {
            attribute_index,
            strategy,
        });
    }

    fn source_uid(&self, source: SourceId) -> QuerySpaceUid {
        self.plan.sources[source.0].query_space_uid.clone()
    }

    fn source_path(&self, source: SourceId) -> PropertyPath {
        self.plan.sources[source.0].property_path.clone()
    }

    fn walk_entity(
        &mut self,
        source: SourceId,
        persister: &Arc<EntityPersister>,
        depth: usize,
    ) -> LoaderResult<()> {
        let context = WalkContext {
            source,
            table: persister.table_name.clone(),
            owner: Some(source),
            role: None,
            depth,
        };
        for (index, property) in persister.properties.iter().enumerate() {
            self.walk_property(&context, index, property)?;
        }
        Ok(())
    }

    fn walk_composite(&mut self, context: &WalkContext, component: &ComponentType) -> LoaderResult<()> {
        for (index, property) in component.properties.iter().enumerate() {
            self.walk_property(context, index, property)?;
        }
        Ok(())
    }

    fn walk_property(&mut self, context: &WalkContext, index: usize, property: &Property) -> LoaderResult<()> {
        let path = self.source_path(context.source).append(&property.name);
        match &property.ty {
            Type::Basic(_) => Ok(()),
            Type::Component(component) => {
                self.composite_fetch(context, index, property, component.clone(), path)
            }
            Type::ManyToOne(association) => {
                let strategy = self.adjusted_strategy(
                    property,
                    &path,
                    context.depth,
                    AssociationKey::new(&context.table, &property.columns),
                    false,
                );
                if !strategy.is_join() {
                    self.defer(context.source, index, strategy);
                    return Ok(());
                }
                let target = self.metamodel.entity(&association.entity_name)?.clone();
                self.visited
                    .insert(AssociationKey::new(&context.table, &property.columns));
                let uid = self.plan.query_spaces.add_join(
                    &self.source_uid(context.source),
                    JoinKind::Entity,
                    QuerySpaceKind::Entity(target.clone()),
                    property.columns.clone(),
                    target.identifier_columns.clone(),
                    !property.nullable,
                )?;
                let child = self.push_source(FetchSource {
                    kind: SourceKind::Entity(target.clone()),
                    query_space_uid: uid,
                    property_path: path.clone(),
                    fetches: Vec::new(),
                    deferred: Vec::new(),
                    entity_owner: None,
                });
                self.push_fetch(Fetch::Entity {
                    common: FetchCommon {
                        owner: context.source,
                        attribute_index: index,
                        property_path: path,
                        strategy,
                        nullable: property.nullable,
                    },
                    source: child,
                });
                self.walk_entity(child, &target, context.depth + 1)
            }
            Type::Collection(role) => {
                if let Some(composite_role) = context.role {
                    if !composite_role.allows_collection_fetches() {
                        return Err(LoaderError::walking(
                            path.full_path(),
                            format!(
                                "a collection {} cannot contain the collection '{}'",
                                match composite_role {
                                    CompositeRole::CollectionIndex => "index",
                                    _ => "element",
                                },
                                role
                            ),
                        ));
                    }
                }
                let persister = self.metamodel.collection(role)?.clone();
                let key = AssociationKey::new(&persister.table_name, &persister.key_columns);
                let strategy = self.adjusted_strategy(property, &path, context.depth, key.clone(), true);
                if !strategy.is_join() {
                    self.defer(context.source, index, strategy);
                    return Ok(());
                }
                let owner = context.owner.ok_or_else(|| {
                    LoaderError::IllegalState(format!("collection '{}' has no owning entity", path))
                })?;
                let owner_columns = self.plan.sources[owner.0]
                    .entity_persister()
                    .map(|p| p.identifier_columns.clone())
                    .ok_or_else(|| {
                        LoaderError::IllegalState(format!("owner of '{}' is not an entity", path))
                    })?;
                self.visited.insert(key);
                self.has_collection_join = true;
                let uid = self.plan.query_spaces.add_join(
                    &self.source_uid(context.source),
                    JoinKind::Collection,
                    QuerySpaceKind::Collection(persister.clone()),
                    owner_columns,
                    persister.key_columns.clone(),
                    false,
                )?;
                let collection = self.push_collection(CollectionReference {
                    persister,
                    query_space_uid: uid,
                    property_path: path.clone(),
                    element_graph: None,
                    index_graph: None,
                });
                self.push_fetch(Fetch::Collection {
                    common: FetchCommon {
                        owner: context.source,
                        attribute_index: index,
                        property_path: path,
                        strategy,
                        nullable: true,
                    },
                    collection,
                });
                self.build_collection_graphs(collection, context.depth + 1)
            }
        }
    }

    fn composite_fetch(
        &mut self,
        context: &WalkContext,
        index: usize,
        property: &Property,
        component: Arc<ComponentType>,
        path: PropertyPath,
    ) -> LoaderResult<()> {
        let role = context.role.unwrap_or(CompositeRole::Attribute);
        let uid = self.plan.query_spaces.add_join(
            &self.source_uid(context.source),
            JoinKind::Composite,
            QuerySpaceKind::Composite(component.clone()),
            Vec::new(),
            Vec::new(),
            false,
        )?;
        let child = self.push_source(FetchSource {
            kind: SourceKind::Composite {
                component: component.clone(),
                role,
            },
            query_space_uid: uid,
            property_path: path.clone(),
            fetches: Vec::new(),
            deferred: Vec::new(),
            entity_owner: context.owner,
        });
        self.push_fetch(Fetch::Composite {
            common: FetchCommon {
                owner: context.source,
                attribute_index: index,
                property_path: path,
                strategy: FetchStrategy::JOIN,
                nullable: property.nullable,
            },
            source: child,
        });
        let nested = WalkContext {
            source: child,
            ..context.clone()
        };
        self.walk_composite(&nested, &component)
    }

    /// Apply overrides, then rule the join out where it cannot be honoured
    fn adjusted_strategy(
        &self,
        property: &Property,
        path: &PropertyPath,
        depth: usize,
        key: AssociationKey,
        collection: bool,
    ) -> FetchStrategy {
        let strategy = self.influencers.fetch_override(path).unwrap_or(property.fetch);
        if !strategy.is_join() {
            return strategy;
        }
        let too_deep = depth + 1 > self.max_fetch_depth;
        let second_collection = collection && self.has_collection_join;
        let cycle = self.visited.contains(&key);
        if too_deep || second_collection || cycle {
            debug!(
                "Fetch of '{}' downgraded to select (depth: {}, collection already joined: {}, cycle: {})",
                path, too_deep, second_collection, cycle
            );
            return strategy.without_join();
        }
        strategy
    }

    fn build_collection_graphs(&mut self, collection: CollectionId, depth: usize) -> LoaderResult<()> {
        let reference = self.plan.collections[collection.0].clone();
        let persister = reference.persister.clone();
        if let Some(index_type) = persister.index_type.clone() {
            if index_type.is_association() || index_type.is_component() {
                let graph = self.build_graph(
                    &reference,
                    JoinKind::CollectionIndex,
                    &index_type,
                    &persister.index_columns,
                    reference.property_path.append(INDEX_SEGMENT),
                    depth,
                )?;
                self.plan.collections[collection.0].index_graph = Some(graph);
            }
        }
        let element_type = persister.element_type.clone();
        if element_type.is_association() || element_type.is_component() {
            let graph = self.build_graph(
                &reference,
                JoinKind::CollectionElement,
                &element_type,
                &persister.element_columns,
                reference.property_path.append(ELEMENT_SEGMENT),
                depth,
            )?;
            self.plan.collections[collection.0].element_graph = Some(graph);
        }
        Ok(())
    }

    /// Join the element or index of a collection and walk what it reaches
    ///
    /// Only entity and composite types have a graph; asking for one on a
    /// basic type is a programming error.
    fn build_graph(
        &mut self,
        reference: &CollectionReference,
        kind: JoinKind,
        ty: &Type,
        columns: &[String],
        path: PropertyPath,
        depth: usize,
    ) -> LoaderResult<SourceId> {
        let persister: &Arc<CollectionPersister> = &reference.persister;
        match ty {
            Type::ManyToOne(association) => {
                let target = self.metamodel.entity(&association.entity_name)?.clone();
                self.visited
                    .insert(AssociationKey::new(&persister.table_name, columns));
                let uid = self.plan.query_spaces.add_join(
                    &reference.query_space_uid,
                    kind,
                    QuerySpaceKind::Entity(target.clone()),
                    columns.to_vec(),
                    target.identifier_columns.clone(),
                    true,
                )?;
                let source = self.push_source(FetchSource {
                    kind: SourceKind::Entity(target.clone()),
                    query_space_uid: uid,
                    property_path: path,
                    fetches: Vec::new(),
                    deferred: Vec::new(),
                    entity_owner: None,
                });
                self.walk_entity(source, &target, depth)?;
                Ok(source)
            }
            Type::Component(component) => {
                let role = if kind == JoinKind::CollectionIndex {
                    CompositeRole::CollectionIndex
                } else {
                    CompositeRole::CollectionElement
                };
                let uid = self.plan.query_spaces.add_join(
                    &reference.query_space_uid,
                    JoinKind::Composite,
                    QuerySpaceKind::Composite(component.clone()),
                    Vec::new(),
                    Vec::new(),
                    false,
                )?;
                let source = self.push_source(FetchSource {
                    kind: SourceKind::Composite {
                        component: component.clone(),
                        role,
                    },
                    query_space_uid: uid,
                    property_path: path,
                    fetches: Vec::new(),
                    deferred: Vec::new(),
                    entity_owner: None,
                });
                let context = WalkContext {
                    source,
                    table: persister.table_name.clone(),
                    owner: None,
                    role: Some(role),
                    depth,
                };
                self.walk_composite(&context, component)?;
                Ok(source)
            }
            other => Err(LoaderError::IllegalState(format!(
                "collection '{}' {} of type {:?} cannot be joined",
                persister.role,
                if kind == JoinKind::CollectionIndex { "index" } else { "element" },
                other
            ))),
        }
    }
}
