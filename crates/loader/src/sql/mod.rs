//! SQL generation for load plans

pub mod aliases;
pub mod query_details;

pub use aliases::{AliasResolutionContext, CollectionAliases, EntityAliases};
pub use query_details::{LoadQueryDetails, QuerySpec, Restriction};
