//! Query spaces
//!
//! A query space is one table reference of the statement being built: the
//! root entity or collection table, or a joined one. Joins link a left-hand
//! space to the space they introduce. Composite spaces stand for embedded
//! values and never produce SQL of their own; they resolve to the alias of
//! the space that physically holds their columns.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LoaderError, LoaderResult};
use crate::metamodel::{CollectionPersister, ComponentType, EntityPersister};

pub type QuerySpaceUid = String;

#[derive(Debug, Clone)]
pub enum QuerySpaceKind {
    Entity(Arc<EntityPersister>),
    Collection(Arc<CollectionPersister>),
    Composite(Arc<ComponentType>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// To-one association from an entity or composite
    Entity,
    /// Collection table joined on the owner's identifier
    Collection,
    /// Embedded value, shares the left-hand table
    Composite,
    /// Entity elements of a collection
    CollectionElement,
    /// Entity keys of a map
    CollectionIndex,
}

#[derive(Debug, Clone)]
pub struct QuerySpace {
    pub uid: QuerySpaceUid,
    pub kind: QuerySpaceKind,
    joins: Vec<usize>,
}

impl QuerySpace {
    pub fn entity_persister(&self) -> Option<&Arc<EntityPersister>> {
        match &self.kind {
            QuerySpaceKind::Entity(persister) => Some(persister),
            _ => None,
        }
    }

    pub fn collection_persister(&self) -> Option<&Arc<CollectionPersister>> {
        match &self.kind {
            QuerySpaceKind::Collection(persister) => Some(persister),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub lhs: QuerySpaceUid,
    pub rhs: QuerySpaceUid,
    /// Join columns on the left-hand table
    pub lhs_columns: Vec<String>,
    /// Matching columns on the right-hand table
    pub rhs_columns: Vec<String>,
    /// Inner join when true, left outer join otherwise
    pub required: bool,
}

/// Registry of the query spaces of one load plan
#[derive(Debug, Clone, Default)]
pub struct QuerySpaces {
    spaces: Vec<QuerySpace>,
    by_uid: HashMap<QuerySpaceUid, usize>,
    joins: Vec<Join>,
    roots: Vec<QuerySpaceUid>,
    implicit_uid_counter: usize,
}

impl QuerySpaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// A uid distinct from every uid issued before
    pub fn generate_implicit_uid(&mut self) -> QuerySpaceUid {
        let uid = format!("<gen:{}>", self.implicit_uid_counter);
        self.implicit_uid_counter += 1;
        uid
    }

    fn register(&mut self, kind: QuerySpaceKind) -> QuerySpaceUid {
        let uid = self.generate_implicit_uid();
        self.by_uid.insert(uid.clone(), self.spaces.len());
        self.spaces.push(QuerySpace {
            uid: uid.clone(),
            kind,
            joins: Vec::new(),
        });
        uid
    }

    pub fn add_root(&mut self, kind: QuerySpaceKind) -> QuerySpaceUid {
        let uid = self.register(kind);
        self.roots.push(uid.clone());
        uid
    }

    /// Register a space joined from `lhs` and return its uid
    pub fn add_join(
        &mut self,
        lhs: &str,
        kind: JoinKind,
        rhs_kind: QuerySpaceKind,
        lhs_columns: Vec<String>,
        rhs_columns: Vec<String>,
        required: bool,
    ) -> LoaderResult<QuerySpaceUid> {
        let lhs_index = *self
            .by_uid
            .get(lhs)
            .ok_or_else(|| LoaderError::IllegalState(format!("unknown query space '{}'", lhs)))?;
        let rhs = self.register(rhs_kind);
        self.joins.push(Join {
            kind,
            lhs: lhs.to_string(),
            rhs: rhs.clone(),
            lhs_columns,
            rhs_columns,
            required,
        });
        let join_index = self.joins.len() - 1;
        self.spaces[lhs_index].joins.push(join_index);
        Ok(rhs)
    }

    pub fn space(&self, uid: &str) -> LoaderResult<&QuerySpace> {
        self.by_uid
            .get(uid)
            .map(|index| &self.spaces[*index])
            .ok_or_else(|| LoaderError::IllegalState(format!("unknown query space '{}'", uid)))
    }

    /// Joins leaving the given space, in registration order
    pub fn joins_of(&self, uid: &str) -> LoaderResult<impl Iterator<Item = &Join>> {
        let space = self.space(uid)?;
        Ok(space.joins.iter().map(move |index| &self.joins[*index]))
    }

    pub fn roots(&self) -> &[QuerySpaceUid] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
