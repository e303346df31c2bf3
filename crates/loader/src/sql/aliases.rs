//! Table and column aliases of one statement
//!
//! Aliases are assigned walking the query spaces depth first in
//! registration order, so the same plan shape always yields the same SQL.
//! Composite spaces and the element entity of a one-to-many collection
//! share the alias of the table that holds their columns.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LoaderError, LoaderResult};
use crate::metamodel::{CollectionPersister, EntityPersister};
use crate::plan::{JoinKind, LoadPlan, QuerySpaceKind, QuerySpaceUid, QuerySpaces};

/// Longest prefix of a table or column name kept in an alias
const ALIAS_STEM_LENGTH: usize = 10;

static NON_ALIAS_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]").expect("valid regex"));

fn alias_stem(name: &str) -> String {
    let unqualified = name.rsplit('.').next().unwrap_or(name);
    let cleaned = NON_ALIAS_CHARS.replace_all(&unqualified.to_lowercase(), "").into_owned();
    let mut stem: String = cleaned.chars().take(ALIAS_STEM_LENGTH).collect();
    if !stem.starts_with(|c: char| c.is_ascii_alphabetic()) {
        stem.insert(0, 't');
    }
    stem
}

/// `column` truncated, its position in the reference, then the suffix
fn column_alias(column: &str, position: usize, suffix: &str) -> String {
    format!("{}{}_{}", alias_stem(column), position, suffix)
}

/// Column aliases of one entity reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAliases {
    pub table_alias: String,
    pub suffix: String,
    pub identifier: Vec<String>,
    /// One entry per property, one alias per column; empty for collections
    pub properties: Vec<Vec<String>>,
}

impl EntityAliases {
    fn new(persister: &EntityPersister, table_alias: String, suffix: String) -> Self {
        let mut position = 0;
        let mut next = |column: &String| {
            let alias = column_alias(column, position, &suffix);
            position += 1;
            alias
        };
        let identifier = persister.identifier_columns.iter().map(&mut next).collect();
        let properties = persister
            .properties
            .iter()
            .map(|p| p.columns.iter().map(&mut next).collect())
            .collect();
        Self {
            table_alias,
            suffix,
            identifier,
            properties,
        }
    }

    /// `alias.column as label` items for the select clause
    pub fn select_items(&self, persister: &EntityPersister) -> Vec<String> {
        let id_columns = persister.identifier_columns.iter().zip(&self.identifier);
        let state_columns = persister
            .properties
            .iter()
            .zip(&self.properties)
            .flat_map(|(p, aliases)| p.columns.iter().zip(aliases));
        id_columns
            .chain(state_columns)
            .map(|(column, label)| format!("{}.{} as {}", self.table_alias, column, label))
            .collect()
    }
}

/// Column aliases of one collection reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionAliases {
    pub table_alias: String,
    pub suffix: String,
    pub key: Vec<String>,
    pub index: Vec<String>,
    pub element: Vec<String>,
}

impl CollectionAliases {
    fn new(persister: &CollectionPersister, table_alias: String, suffix: String) -> Self {
        let mut position = 0;
        let mut aliases = |columns: &[String]| -> Vec<String> {
            columns
                .iter()
                .map(|c| {
                    let alias = column_alias(c, position, &suffix);
                    position += 1;
                    alias
                })
                .collect()
        };
        let key = aliases(&persister.key_columns);
        let index = aliases(&persister.index_columns);
        let element = aliases(&persister.element_columns);
        Self {
            table_alias,
            suffix,
            key,
            index,
            element,
        }
    }

    pub fn select_items(&self, persister: &CollectionPersister) -> Vec<String> {
        let columns = persister
            .key_columns
            .iter()
            .zip(&self.key)
            .chain(persister.index_columns.iter().zip(&self.index))
            .chain(persister.element_columns.iter().zip(&self.element));
        columns
            .map(|(column, label)| format!("{}.{} as {}", self.table_alias, column, label))
            .collect()
    }
}

/// Aliases of every query space of a plan
#[derive(Debug, Clone, Default)]
pub struct AliasResolutionContext {
    table_aliases: HashMap<QuerySpaceUid, String>,
    entities: HashMap<QuerySpaceUid, EntityAliases>,
    collections: HashMap<QuerySpaceUid, CollectionAliases>,
    /// Spaces in the order their aliases were assigned
    order: Vec<QuerySpaceUid>,
    table_counter: usize,
    entity_counter: usize,
    collection_counter: usize,
}

impl AliasResolutionContext {
    pub fn build(plan: &LoadPlan) -> LoaderResult<Self> {
        let mut context = Self::default();
        let spaces = plan.query_spaces();
        for root in spaces.roots() {
            context.register(spaces, root, None)?;
        }
        Ok(context)
    }

    fn register(&mut self, spaces: &QuerySpaces, uid: &str, shared_alias: Option<String>) -> LoaderResult<()> {
        let space = spaces.space(uid)?;
        let table_alias = match (&space.kind, shared_alias) {
            (_, Some(alias)) => alias,
            (QuerySpaceKind::Entity(persister), None) => self.next_table_alias(&persister.table_name),
            (QuerySpaceKind::Collection(persister), None) => self.next_table_alias(&persister.table_name),
            (QuerySpaceKind::Composite(_), None) => {
                return Err(LoaderError::IllegalState(format!(
                    "composite query space '{}' has no owning table",
                    uid
                )))
            }
        };
        match &space.kind {
            QuerySpaceKind::Entity(persister) => {
                let suffix = format!("{}_", self.entity_counter);
                self.entity_counter += 1;
                self.entities.insert(
                    uid.to_string(),
                    EntityAliases::new(persister, table_alias.clone(), suffix),
                );
            }
            QuerySpaceKind::Collection(persister) => {
                let suffix = format!("{}__", self.collection_counter);
                self.collection_counter += 1;
                self.collections.insert(
                    uid.to_string(),
                    CollectionAliases::new(persister, table_alias.clone(), suffix),
                );
            }
            QuerySpaceKind::Composite(_) => {}
        }
        self.table_aliases.insert(uid.to_string(), table_alias.clone());
        self.order.push(uid.to_string());

        let one_to_many = space
            .collection_persister()
            .map_or(false, |persister| persister.one_to_many);
        for join in spaces.joins_of(uid)? {
            let shared = match join.kind {
                JoinKind::Composite => Some(table_alias.clone()),
                JoinKind::CollectionElement if one_to_many => Some(table_alias.clone()),
                _ => None,
            };
            self.register(spaces, &join.rhs, shared)?;
        }
        Ok(())
    }

    fn next_table_alias(&mut self, table: &str) -> String {
        let alias = format!("{}{}_", alias_stem(table), self.table_counter);
        self.table_counter += 1;
        alias
    }

    pub fn table_alias(&self, uid: &str) -> LoaderResult<&str> {
        self.table_aliases
            .get(uid)
            .map(String::as_str)
            .ok_or_else(|| LoaderError::IllegalState(format!("no alias for query space '{}'", uid)))
    }

    pub fn entity_aliases(&self, uid: &str) -> LoaderResult<&EntityAliases> {
        self.entities
            .get(uid)
            .ok_or_else(|| LoaderError::IllegalState(format!("query space '{}' is not an entity", uid)))
    }

    pub fn collection_aliases(&self, uid: &str) -> LoaderResult<&CollectionAliases> {
        self.collections.get(uid).ok_or_else(|| {
            LoaderError::IllegalState(format!("query space '{}' is not a collection", uid))
        })
    }

    /// Spaces in alias order, which is also select and from order
    pub fn spaces_in_order(&self) -> &[QuerySpaceUid] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::{BasicType, Metamodel, Property, Type};
    use crate::plan::{FetchStrategy, LoadPlanBuilder, LoadQueryInfluencers};

    #[test]
    fn test_alias_stems() {
        assert_eq!(alias_stem("public.Boy_Table"), "boy_table");
        assert_eq!(alias_stem("\"order\""), "order");
        assert_eq!(alias_stem("2fa_codes"), "t2fa_codes");
        assert_eq!(alias_stem("extraordinarily_long_name"), "extraordin");
        assert_eq!(column_alias("id", 0, "0_"), "id0_0_");
    }

    #[test]
    fn test_aliases_are_deterministic_and_shared() {
        let mut model = Metamodel::new();
        model
            .add_entity(
                EntityPersister::new("Boy", "boy")
                    .with_property(Property::basic("name", "name", BasicType::String))
                    .with_property(Property::collection("toys", "Boy.toys", FetchStrategy::JOIN)),
            )
            .add_entity(
                EntityPersister::new("Toy", "toy")
                    .with_property(Property::basic("name", "name", BasicType::String)),
            )
            .add_collection(CollectionPersister::one_to_many(
                "Boy",
                "toys",
                "Toy",
                "toy",
                vec!["boy_id".to_string()],
                vec!["id".to_string()],
                Type::Basic(BasicType::Long),
            ));
        let influencers = LoadQueryInfluencers::new();
        let plan = LoadPlanBuilder::new(&model, &influencers, 3)
            .build_root_entity_plan("Boy")
            .unwrap();

        let first = AliasResolutionContext::build(&plan).unwrap();
        let second = AliasResolutionContext::build(&plan).unwrap();
        let order = first.spaces_in_order().to_vec();
        assert_eq!(order, second.spaces_in_order());

        let root = first.entity_aliases(&order[0]).unwrap();
        assert_eq!(root.table_alias, "boy0_");
        assert_eq!(root.identifier, vec!["id0_0_"]);
        assert_eq!(root.properties[0], vec!["name1_0_"]);
        assert!(root.properties[1].is_empty());

        let toys = first.collection_aliases(&order[1]).unwrap();
        assert_eq!(toys.table_alias, "toy1_");
        assert_eq!(toys.key, vec!["boy_id0_0__"]);
        assert_eq!(toys.element, vec!["id1_0__"]);

        // one-to-many elements live on the collection table
        let toy = first.entity_aliases(&order[2]).unwrap();
        assert_eq!(toy.table_alias, "toy1_");
        assert_eq!(toy.suffix, "1_");
        assert_eq!(
            toy.select_items(model.entity("Toy").unwrap()),
            vec!["toy1_.id as id0_1_", "toy1_.name as name1_1_"]
        );
    }
}
