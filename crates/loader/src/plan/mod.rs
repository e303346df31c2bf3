//! Load plans
//!
//! A load plan describes what one statement fetches: the root returns and
//! the tree of joined associations hanging off them. Plans are built from
//! the metamodel by [`LoadPlanBuilder`] and never change afterwards.

pub mod builder;
pub mod fetch;
pub mod influencers;
pub mod load_plan;
pub mod property_path;
pub mod query_space;
pub mod strategy;

pub use builder::LoadPlanBuilder;
pub use fetch::{
    CollectionId, CollectionReference, CompositeRole, DeferredAssociation, Fetch, FetchCommon,
    FetchId, FetchSource, Return, SourceId, SourceKind,
};
pub use influencers::{EnabledFilter, LoadQueryInfluencers};
pub use load_plan::{Disposition, LoadPlan};
pub use property_path::{PropertyPath, ELEMENT_SEGMENT, INDEX_SEGMENT};
pub use query_space::{Join, JoinKind, QuerySpace, QuerySpaceKind, QuerySpaceUid, QuerySpaces};
pub use strategy::{FetchStrategy, FetchStyle, FetchTiming};
