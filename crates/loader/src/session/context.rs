//! Persistence context
//!
//! The identity map of one unit of work. An entity key resolves to at most
//! one instance for the lifetime of the context: the first instance
//! registered wins, and later rows for the same key reuse it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backends::SqlValue;
use crate::hydration::{CollectionKey, CollectionRef, EntityInstance, EntityKey, EntityRef, PersistentCollection};
use crate::metamodel::CollectionNature;

/// Natural-id values of an entity, in mapping order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NaturalIdKey {
    entity_name: String,
    values: Vec<SqlValue>,
}

/// Keys waiting to be initialized, grouped so one select can load several
#[derive(Debug, Default)]
pub struct BatchFetchQueue {
    collections: HashMap<String, Vec<CollectionKey>>,
    entities: HashMap<String, Vec<EntityKey>>,
}

impl BatchFetchQueue {
    pub fn add_collection(&mut self, key: CollectionKey) {
        let keys = self.collections.entry(key.role.clone()).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    pub fn remove_collection(&mut self, key: &CollectionKey) {
        if let Some(keys) = self.collections.get_mut(&key.role) {
            keys.retain(|k| k != key);
        }
    }

    pub fn add_entity(&mut self, key: EntityKey) {
        let keys = self.entities.entry(key.entity_name.clone()).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    pub fn remove_entity(&mut self, key: &EntityKey) {
        if let Some(keys) = self.entities.get_mut(&key.entity_name) {
            keys.retain(|k| k != key);
        }
    }

    /// `key` followed by queued keys of the same role, at most `size` in all
    pub fn collection_batch(&self, key: &CollectionKey, size: usize) -> Vec<CollectionKey> {
        batch(self.collections.get(&key.role), key, size)
    }

    pub fn entity_batch(&self, key: &EntityKey, size: usize) -> Vec<EntityKey> {
        batch(self.entities.get(&key.entity_name), key, size)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.values().all(Vec::is_empty) && self.entities.values().all(Vec::is_empty)
    }
}

fn batch<K: Clone + PartialEq>(queued: Option<&Vec<K>>, key: &K, size: usize) -> Vec<K> {
    let mut keys = vec![key.clone()];
    if let Some(queued) = queued {
        keys.extend(
            queued
                .iter()
                .filter(|k| *k != key)
                .take(size.saturating_sub(1))
                .cloned(),
        );
    }
    keys
}

#[derive(Debug, Default)]
pub struct PersistenceContext {
    entities: HashMap<EntityKey, EntityRef>,
    collections: HashMap<CollectionKey, CollectionRef>,
    natural_ids: HashMap<NaturalIdKey, EntityKey>,
    /// Keys a load found no row for
    missing: HashSet<EntityKey>,
    batch_queue: BatchFetchQueue,
    default_read_only: bool,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entities.get(key).cloned()
    }

    pub fn contains_entity(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Register a new instance; an instance already registered for the key
    /// is kept and returned instead
    pub fn add_entity(&mut self, instance: EntityInstance) -> EntityRef {
        let key = instance.key.clone();
        self.missing.remove(&key);
        self.batch_queue.remove_entity(&key);
        self.entities
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(instance)))
            .clone()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Forget a managed instance; a later load reads it again
    pub fn evict_entity(&mut self, key: &EntityKey) -> Option<EntityRef> {
        self.batch_queue.remove_entity(key);
        self.natural_ids.retain(|_, managed| managed != key);
        self.entities.remove(key)
    }

    pub fn mark_missing(&mut self, key: EntityKey) {
        self.batch_queue.remove_entity(&key);
        self.missing.insert(key);
    }

    pub fn is_missing(&self, key: &EntityKey) -> bool {
        self.missing.contains(key)
    }

    pub fn collection(&self, key: &CollectionKey) -> Option<CollectionRef> {
        self.collections.get(key).cloned()
    }

    /// The managed collection for `key`, created uninitialized if absent
    pub fn get_or_create_collection(
        &mut self,
        key: CollectionKey,
        nature: CollectionNature,
        entity_elements: bool,
    ) -> CollectionRef {
        self.collections
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(PersistentCollection::new(key, nature, entity_elements))))
            .clone()
    }

    pub fn evict_collection(&mut self, key: &CollectionKey) -> Option<CollectionRef> {
        self.batch_queue.remove_collection(key);
        self.collections.remove(key)
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    pub fn register_natural_id(&mut self, entity_name: &str, values: Vec<SqlValue>, key: EntityKey) {
        self.natural_ids.insert(
            NaturalIdKey {
                entity_name: entity_name.to_string(),
                values,
            },
            key,
        );
    }

    pub fn find_by_natural_id(&self, entity_name: &str, values: &[SqlValue]) -> Option<EntityRef> {
        let key = NaturalIdKey {
            entity_name: entity_name.to_string(),
            values: values.to_vec(),
        };
        self.natural_ids.get(&key).and_then(|key| self.entity(key))
    }

    pub fn batch_queue(&self) -> &BatchFetchQueue {
        &self.batch_queue
    }

    pub fn batch_queue_mut(&mut self) -> &mut BatchFetchQueue {
        &mut self.batch_queue
    }

    pub fn is_default_read_only(&self) -> bool {
        self.default_read_only
    }

    /// Returns the previous default
    pub fn set_default_read_only(&mut self, read_only: bool) -> bool {
        std::mem::replace(&mut self.default_read_only, read_only)
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.collections.clear();
        self.natural_ids.clear();
        self.missing.clear();
        self.batch_queue = BatchFetchQueue::default();
    }
}
