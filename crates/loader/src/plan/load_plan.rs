use std::fmt::Write as _;

use super::fetch::{
    CollectionId, CollectionReference, Fetch, FetchId, FetchSource, Return, SourceId, SourceKind,
};
use super::query_space::QuerySpaces;

/// What a plan loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Root entities, possibly with joined associations
    EntityLoader,
    /// The elements of one collection role
    CollectionInitializer,
}

/// Immutable description of one query shape
///
/// Built once per shape and shared; execution never mutates it.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub(crate) disposition: Disposition,
    pub(crate) returns: Vec<Return>,
    pub(crate) sources: Vec<FetchSource>,
    pub(crate) fetches: Vec<Fetch>,
    pub(crate) collections: Vec<CollectionReference>,
    pub(crate) query_spaces: QuerySpaces,
}

impl LoadPlan {
    pub(crate) fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            returns: Vec::new(),
            sources: Vec::new(),
            fetches: Vec::new(),
            collections: Vec::new(),
            query_spaces: QuerySpaces::new(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    pub fn returns(&self) -> &[Return] {
        &self.returns
    }

    pub fn source(&self, id: SourceId) -> &FetchSource {
        &self.sources[id.0]
    }

    pub fn fetch(&self, id: FetchId) -> &Fetch {
        &self.fetches[id.0]
    }

    pub fn collection(&self, id: CollectionId) -> &CollectionReference {
        &self.collections[id.0]
    }

    pub fn fetches(&self) -> &[Fetch] {
        &self.fetches
    }

    pub fn collections(&self) -> &[CollectionReference] {
        &self.collections
    }

    pub fn query_spaces(&self) -> &QuerySpaces {
        &self.query_spaces
    }

    /// Whether any collection is join fetched
    pub fn has_collection_fetches(&self) -> bool {
        self.fetches
            .iter()
            .any(|f| matches!(f, Fetch::Collection { .. }))
    }

    /// Render the fetch graph as an indented tree, for debug logging
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for ret in &self.returns {
            match ret {
                Return::Entity(source) => {
                    let _ = writeln!(out, "EntityReturn({})", self.source(*source).property_path);
                    self.describe_source(*source, 1, &mut out);
                }
                Return::Collection(collection) => {
                    let reference = self.collection(*collection);
                    let _ = writeln!(out, "CollectionReturn({})", reference.persister.role);
                    self.describe_collection(*collection, 1, &mut out);
                }
            }
        }
        out
    }

    fn describe_source(&self, id: SourceId, depth: usize, out: &mut String) {
        for fetch_id in &self.source(id).fetches {
            let fetch = self.fetch(*fetch_id);
            let indent = "  ".repeat(depth);
            match fetch {
                Fetch::Entity { common, source } => {
                    let _ = writeln!(out, "{}EntityFetch({})", indent, common.property_path);
                    self.describe_source(*source, depth + 1, out);
                }
                Fetch::Composite { common, source } => {
                    let _ = writeln!(out, "{}CompositeFetch({})", indent, common.property_path);
                    self.describe_source(*source, depth + 1, out);
                }
                Fetch::Collection { common, collection } => {
                    let _ = writeln!(out, "{}CollectionFetch({})", indent, common.property_path);
                    self.describe_collection(*collection, depth + 1, out);
                }
            }
        }
    }

    fn describe_collection(&self, id: CollectionId, depth: usize, out: &mut String) {
        let reference = self.collection(id);
        let indent = "  ".repeat(depth);
        for (label, graph) in [("index", reference.index_graph), ("element", reference.element_graph)] {
            if let Some(source) = graph {
                let kind = match self.source(source).kind {
                    SourceKind::Entity(_) => "Entity",
                    SourceKind::Composite { .. } => "Composite",
                };
                let _ = writeln!(
                    out,
                    "{}{}{}Graph({})",
                    indent,
                    kind,
                    if label == "index" { "Index" } else { "Element" },
                    self.source(source).property_path
                );
                self.describe_source(source, depth + 1, out);
            }
        }
    }
}
