//! Result set to object graph hydration

pub mod instance;
pub mod processor;

pub use instance::{
    CollectionEntry, CollectionKey, CollectionRef, EntityInstance, EntityKey, EntityRef, PersistentCollection,
    PropertyValue,
};
pub use processor::{LoadOutcome, PostLoadWork, ResultSetProcessor};
