//! Managed instances
//!
//! Hydrated entities and collections are shared behind `Arc<RwLock<_>>` so
//! the persistence context, owners holding them as property values and the
//! caller all see the same object.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backends::SqlValue;
use crate::metamodel::{CollectionNature, EntityPersister};

pub type EntityRef = Arc<RwLock<EntityInstance>>;
pub type CollectionRef = Arc<RwLock<PersistentCollection>>;

/// Identity of an entity within a persistence context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_name: String,
    pub id: SqlValue,
}

impl EntityKey {
    pub fn new(entity_name: impl Into<String>, id: impl Into<SqlValue>) -> Self {
        Self {
            entity_name: entity_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_name, self.id)
    }
}

/// Identity of a collection: its role and the key of its owner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub role: String,
    pub key: SqlValue,
}

impl CollectionKey {
    pub fn new(role: impl Into<String>, key: impl Into<SqlValue>) -> Self {
        Self {
            role: role.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.key)
    }
}

/// Value of one attribute of a hydrated entity or embeddable
#[derive(Clone)]
pub enum PropertyValue {
    Value(SqlValue),
    Component(Vec<PropertyValue>),
    Entity(EntityRef),
    /// An association not loaded yet, resolvable through the session
    Proxy(EntityKey),
    Collection(CollectionRef),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Value(value) if value.is_null())
    }

    pub fn as_value(&self) -> Option<&SqlValue> {
        match self {
            PropertyValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            PropertyValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionRef> {
        match self {
            PropertyValue::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Key of the referenced entity, loaded or not
    pub fn entity_key(&self) -> Option<EntityKey> {
        match self {
            PropertyValue::Entity(entity) => Some(entity.read().key.clone()),
            PropertyValue::Proxy(key) => Some(key.clone()),
            _ => None,
        }
    }

    /// Equality used to keep set semantics: entities compare by identity
    pub fn same_as(&self, other: &PropertyValue) -> bool {
        match (self, other) {
            (PropertyValue::Value(a), PropertyValue::Value(b)) => a == b,
            (PropertyValue::Component(a), PropertyValue::Component(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (PropertyValue::Entity(a), PropertyValue::Entity(b)) => {
                Arc::ptr_eq(a, b) || a.read().key == b.read().key
            }
            (PropertyValue::Collection(a), PropertyValue::Collection(b)) => Arc::ptr_eq(a, b),
            (left, right) => match (left.entity_key(), right.entity_key()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

// entities are printed by key so cyclic graphs stay printable
impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Value(value) => write!(f, "{:?}", value),
            PropertyValue::Component(values) => f.debug_list().entries(values).finish(),
            PropertyValue::Entity(entity) => match entity.try_read() {
                Some(instance) => write!(f, "Entity({})", instance.key),
                None => write!(f, "Entity(<locked>)"),
            },
            PropertyValue::Proxy(key) => write!(f, "Proxy({})", key),
            PropertyValue::Collection(collection) => match collection.try_read() {
                Some(collection) => write!(f, "Collection({})", collection.key),
                None => write!(f, "Collection(<locked>)"),
            },
        }
    }
}

/// A managed entity
pub struct EntityInstance {
    pub key: EntityKey,
    pub persister: Arc<EntityPersister>,
    /// One value per property of the persister, in mapping order
    pub properties: Vec<PropertyValue>,
    pub read_only: bool,
    /// False while the row that introduced it is still being hydrated
    pub initialized: bool,
}

impl EntityInstance {
    pub(crate) fn placeholder(key: EntityKey, persister: Arc<EntityPersister>) -> Self {
        let properties = vec![PropertyValue::Value(SqlValue::Null); persister.properties.len()];
        Self {
            key,
            persister,
            properties,
            read_only: false,
            initialized: false,
        }
    }

    pub fn id(&self) -> &SqlValue {
        &self.key.id
    }

    pub fn entity_name(&self) -> &str {
        &self.key.entity_name
    }

    pub fn get(&self, property: &str) -> Option<&PropertyValue> {
        self.persister
            .property_index(property)
            .and_then(|index| self.properties.get(index))
    }

    /// Basic value of a property, if it holds one
    pub fn value(&self, property: &str) -> Option<&SqlValue> {
        self.get(property).and_then(PropertyValue::as_value)
    }

    pub fn collection(&self, property: &str) -> Option<CollectionRef> {
        self.get(property).and_then(PropertyValue::as_collection).cloned()
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct(&self.key.entity_name);
        debug.field("id", &self.key.id);
        for (property, value) in self.persister.properties.iter().zip(&self.properties) {
            debug.field(&property.name, value);
        }
        debug.finish()
    }
}

#[derive(Debug, Clone)]
pub struct CollectionEntry {
    /// List position or map key; `None` for bags and sets
    pub index: Option<PropertyValue>,
    pub element: PropertyValue,
}

/// Hashable identity of a property value, agreeing with
/// [`PropertyValue::same_as`]; collections have none
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    Value(SqlValue),
    Entity(EntityKey),
    Component(Vec<ValueKey>),
}

impl ValueKey {
    fn of(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Value(value) => Some(ValueKey::Value(value.clone())),
            PropertyValue::Entity(_) | PropertyValue::Proxy(_) => value.entity_key().map(ValueKey::Entity),
            PropertyValue::Component(values) => values
                .iter()
                .map(ValueKey::of)
                .collect::<Option<Vec<_>>>()
                .map(ValueKey::Component),
            PropertyValue::Collection(_) => None,
        }
    }
}

/// A managed collection, filled while rows are read and initialized once
/// the whole result set has been consumed
#[derive(Debug)]
pub struct PersistentCollection {
    pub key: CollectionKey,
    pub nature: CollectionNature,
    /// Elements are entities with their own identity
    pub entity_elements: bool,
    entries: Vec<CollectionEntry>,
    // element identities of sets and entity bags
    elements: HashSet<ValueKey>,
    // entry position per index of lists and maps
    positions: HashMap<ValueKey, usize>,
    initialized: bool,
}

impl PersistentCollection {
    pub fn new(key: CollectionKey, nature: CollectionNature, entity_elements: bool) -> Self {
        Self {
            key,
            nature,
            entity_elements,
            entries: Vec::new(),
            elements: HashSet::new(),
            positions: HashMap::new(),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn mark_initialized(&mut self) {
        if matches!(self.nature, CollectionNature::List) {
            self.entries.sort_by_key(|entry| {
                entry
                    .index
                    .as_ref()
                    .and_then(PropertyValue::as_value)
                    .and_then(SqlValue::as_i64)
                    .unwrap_or(i64::MAX)
            });
            self.positions = self
                .entries
                .iter()
                .enumerate()
                .filter_map(|(position, entry)| {
                    entry.index.as_ref().and_then(ValueKey::of).map(|index| (index, position))
                })
                .collect();
        }
        self.initialized = true;
    }

    /// Drop everything read so far and go back to uninitialized
    pub(crate) fn discard_entries(&mut self) {
        self.entries.clear();
        self.elements.clear();
        self.positions.clear();
        self.initialized = false;
    }

    fn deduplicates_elements(&self) -> bool {
        match self.nature {
            CollectionNature::Set => true,
            // entity bags can only repeat through fan-out; value bags keep duplicates
            CollectionNature::Bag => self.entity_elements,
            CollectionNature::List | CollectionNature::Map => false,
        }
    }

    /// Add one row's entry; fan-out rows repeating an entry are absorbed
    pub(crate) fn read_entry(&mut self, entry: CollectionEntry) {
        if matches!(self.nature, CollectionNature::List | CollectionNature::Map) {
            let index = match entry.index.as_ref() {
                Some(index) => index,
                None => {
                    self.entries.push(entry);
                    return;
                }
            };
            match ValueKey::of(index) {
                Some(index) => match self.positions.get(&index) {
                    Some(&position) => self.entries[position] = entry,
                    None => {
                        self.positions.insert(index, self.entries.len());
                        self.entries.push(entry);
                    }
                },
                None => {
                    let existing = self.entries.iter_mut().find(|e| match &e.index {
                        Some(other) => other.same_as(index),
                        None => false,
                    });
                    match existing {
                        Some(existing) => *existing = entry,
                        None => self.entries.push(entry),
                    }
                }
            }
            return;
        }

        if !self.deduplicates_elements() {
            self.entries.push(entry);
            return;
        }
        match ValueKey::of(&entry.element) {
            Some(element) => {
                if self.elements.insert(element) {
                    self.entries.push(entry);
                }
            }
            None => {
                if !self.contains(&entry.element) {
                    self.entries.push(entry);
                }
            }
        }
    }

    pub fn contains(&self, element: &PropertyValue) -> bool {
        if self.deduplicates_elements() {
            if let Some(key) = ValueKey::of(element) {
                return self.elements.contains(&key);
            }
        }
        self.entries.iter().any(|e| e.element.same_as(element))
    }

    pub fn entries(&self) -> &[CollectionEntry] {
        &self.entries
    }

    pub fn elements(&self) -> impl Iterator<Item = &PropertyValue> {
        self.entries.iter().map(|e| &e.element)
    }

    /// Loaded entity elements
    pub fn entities(&self) -> Vec<EntityRef> {
        self.elements().filter_map(PropertyValue::as_entity).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: Option<i64>, element: &str) -> CollectionEntry {
        CollectionEntry {
            index: index.map(|i| PropertyValue::Value(SqlValue::Int64(i))),
            element: PropertyValue::Value(SqlValue::from(element)),
        }
    }

    #[test]
    fn test_set_absorbs_repeated_elements() {
        let mut set = PersistentCollection::new(CollectionKey::new("Boy.nicknames", 1i64), CollectionNature::Set, false);
        set.read_entry(entry(None, "kid"));
        set.read_entry(entry(None, "kid"));
        set.read_entry(entry(None, "champ"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_value_bag_keeps_duplicates() {
        let mut bag = PersistentCollection::new(CollectionKey::new("Boy.scores", 1i64), CollectionNature::Bag, false);
        bag.read_entry(entry(None, "10"));
        bag.read_entry(entry(None, "10"));
        assert_eq!(bag.len(), 2);
    }

    #[test]
    fn test_list_is_ordered_by_index_on_initialization() {
        let mut list = PersistentCollection::new(CollectionKey::new("Boy.steps", 1i64), CollectionNature::List, false);
        list.read_entry(entry(Some(1), "b"));
        list.read_entry(entry(Some(0), "a"));
        list.read_entry(entry(Some(1), "b"));
        assert!(!list.is_initialized());
        list.mark_initialized();
        let elements: Vec<String> = list
            .elements()
            .filter_map(|e| e.as_value().and_then(SqlValue::as_str).map(str::to_string))
            .collect();
        assert_eq!(elements, vec!["a", "b"]);
    }

    #[test]
    fn test_entity_bag_absorbs_fan_out_rows() {
        let persister = Arc::new(EntityPersister::new("Toy", "toy"));
        let mut bag = PersistentCollection::new(CollectionKey::new("Boy.toys", 1i64), CollectionNature::Bag, true);
        let toys: Vec<EntityRef> = (0..500i64)
            .map(|id| Arc::new(RwLock::new(EntityInstance::placeholder(EntityKey::new("Toy", id), persister.clone()))))
            .collect();
        for _ in 0..3 {
            for toy in &toys {
                bag.read_entry(CollectionEntry {
                    index: None,
                    element: PropertyValue::Entity(toy.clone()),
                });
            }
        }
        assert_eq!(bag.len(), 500);
        assert!(bag.contains(&PropertyValue::Proxy(EntityKey::new("Toy", 42i32))));
        assert!(!bag.contains(&PropertyValue::Proxy(EntityKey::new("Toy", 500i64))));
    }

    #[test]
    fn test_list_replaces_entry_after_initialization() {
        let mut list = PersistentCollection::new(CollectionKey::new("Boy.steps", 1i64), CollectionNature::List, false);
        list.read_entry(entry(Some(2), "c"));
        list.read_entry(entry(Some(0), "a"));
        list.mark_initialized();
        list.read_entry(entry(Some(2), "z"));
        assert_eq!(list.len(), 2);
        assert_eq!(list.entries()[1].element.as_value(), Some(&SqlValue::from("z")));
    }

    #[test]
    fn test_discarded_collection_starts_over() {
        let mut set = PersistentCollection::new(CollectionKey::new("Boy.nicknames", 1i64), CollectionNature::Set, false);
        set.read_entry(entry(None, "kid"));
        set.mark_initialized();
        set.discard_entries();
        assert!(!set.is_initialized());
        assert!(set.is_empty());
        set.read_entry(entry(None, "kid"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_entities_compare_by_key() {
        let persister = Arc::new(EntityPersister::new("Toy", "toy"));
        let a = Arc::new(RwLock::new(EntityInstance::placeholder(EntityKey::new("Toy", 1i64), persister.clone())));
        let b = Arc::new(RwLock::new(EntityInstance::placeholder(EntityKey::new("Toy", 1i32), persister)));
        assert!(PropertyValue::Entity(a.clone()).same_as(&PropertyValue::Entity(b)));
        assert!(PropertyValue::Entity(a).same_as(&PropertyValue::Proxy(EntityKey::new("Toy", 1i64))));
    }
}
