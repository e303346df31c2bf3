//! # elif-loader: load plans and object graph hydration
//!
//! Turns an entity or collection mapping into a load plan, renders one
//! statement per plan, executes it against a dialect with limits, locks and
//! filters applied, and hydrates the rows into a managed object graph in
//! which each identity appears once per session.
//!
//! Also provides the UUID identifier generators (random, time based version
//! one, and the ordered version six and seven variants) that mapped
//! entities use for new instances.

pub mod backends;
pub mod config;
pub mod dialect;
pub mod error;
pub mod exec;
pub mod hydration;
pub mod id;
pub mod loader;
pub mod metamodel;
pub mod plan;
pub mod session;
pub mod sql;

pub use backends::{DatabaseConnection, MemoryDatabase, ResultTable, SqlValue};
pub use config::LoaderConfig;
pub use dialect::{Dialect, LockMode, LockOptions};
pub use error::{LoaderError, LoaderResult};
pub use exec::{QueryParameters, RowSelection, TypedValue};
pub use hydration::{CollectionKey, CollectionRef, EntityKey, EntityRef, PropertyValue};
pub use id::{IdGeneration, UuidValueGenerator};
pub use loader::EntityQuery;
pub use metamodel::{CollectionPersister, EntityPersister, Metamodel};
pub use plan::{FetchStrategy, LoadQueryInfluencers};
pub use session::{Session, SessionFactory, SessionFactoryBuilder};
