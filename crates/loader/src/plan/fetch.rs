//! Fetch graph nodes
//!
//! The graph is stored in arenas owned by the [`LoadPlan`](super::LoadPlan);
//! nodes refer to each other by index, so owners and children can point at
//! one another without shared ownership.

use std::sync::Arc;

use crate::metamodel::{CollectionPersister, ComponentType, EntityPersister};

use super::query_space::QuerySpaceUid;
use super::{FetchStrategy, PropertyPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId(pub usize);

/// What a composite source stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeRole {
    /// An embedded attribute of an entity or of another composite
    Attribute,
    /// The element of a collection of embeddables
    CollectionElement,
    /// The key of a map keyed by an embeddable
    CollectionIndex,
}

impl CompositeRole {
    /// Element and index composites cannot own collections
    pub fn allows_collection_fetches(&self) -> bool {
        matches!(self, CompositeRole::Attribute)
    }
}

#[derive(Debug, Clone)]
pub enum SourceKind {
    Entity(Arc<EntityPersister>),
    Composite {
        component: Arc<ComponentType>,
        role: CompositeRole,
    },
}

/// An association the plan does not join, with its effective strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredAssociation {
    pub attribute_index: usize,
    pub strategy: FetchStrategy,
}

/// A node that owns fetches: an entity reference or a composite
#[derive(Debug, Clone)]
pub struct FetchSource {
    pub kind: SourceKind,
    pub query_space_uid: QuerySpaceUid,
    pub property_path: PropertyPath,
    pub fetches: Vec<FetchId>,
    pub deferred: Vec<DeferredAssociation>,
    /// Nearest entity source owning this one; `None` for entities and for
    /// element/index composites
    pub entity_owner: Option<SourceId>,
}

impl FetchSource {
    pub fn entity_persister(&self) -> Option<&Arc<EntityPersister>> {
        match &self.kind {
            SourceKind::Entity(persister) => Some(persister),
            SourceKind::Composite { .. } => None,
        }
    }

    pub fn component(&self) -> Option<&Arc<ComponentType>> {
        match &self.kind {
            SourceKind::Composite { component, .. } => Some(component),
            SourceKind::Entity(_) => None,
        }
    }

    pub fn deferred_strategy(&self, attribute_index: usize) -> Option<FetchStrategy> {
        self.deferred
            .iter()
            .find(|d| d.attribute_index == attribute_index)
            .map(|d| d.strategy)
    }
}

/// State shared by every fetch
#[derive(Debug, Clone)]
pub struct FetchCommon {
    pub owner: SourceId,
    /// Index of the attribute within the owner's properties
    pub attribute_index: usize,
    pub property_path: PropertyPath,
    pub strategy: FetchStrategy,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub enum Fetch {
    Entity { common: FetchCommon, source: SourceId },
    Composite { common: FetchCommon, source: SourceId },
    Collection { common: FetchCommon, collection: CollectionId },
}

impl Fetch {
    pub fn common(&self) -> &FetchCommon {
        match self {
            Fetch::Entity { common, .. }
            | Fetch::Composite { common, .. }
            | Fetch::Collection { common, .. } => common,
        }
    }

    pub fn owner(&self) -> SourceId {
        self.common().owner
    }

    pub fn property_path(&self) -> &PropertyPath {
        &self.common().property_path
    }
}

/// A collection reached by the plan, as a return or as a join fetch
#[derive(Debug, Clone)]
pub struct CollectionReference {
    pub persister: Arc<CollectionPersister>,
    pub query_space_uid: QuerySpaceUid,
    pub property_path: PropertyPath,
    pub element_graph: Option<SourceId>,
    pub index_graph: Option<SourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Return {
    Entity(SourceId),
    Collection(CollectionId),
}
