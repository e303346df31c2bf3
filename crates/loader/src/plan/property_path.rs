use std::fmt;

/// Path segment used for a collection's element graph
pub const ELEMENT_SEGMENT: &str = "<elements>";
/// Path segment used for a collection's index graph
pub const INDEX_SEGMENT: &str = "<index>";

/// Dotted path from a root return to a fetched attribute
///
/// Paths are immutable; `append` produces a child path. They are used as
/// keys for fetch overrides and in error messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath {
    full_path: String,
    property_start: usize,
}

impl PropertyPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            full_path: name.into(),
            property_start: 0,
        }
    }

    pub fn append(&self, property: &str) -> Self {
        if self.full_path.is_empty() {
            return Self::root(property);
        }
        Self {
            full_path: format!("{}.{}", self.full_path, property),
            property_start: self.full_path.len() + 1,
        }
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Last segment of the path
    pub fn property(&self) -> &str {
        &self.full_path[self.property_start..]
    }

    pub fn parent(&self) -> Option<PropertyPath> {
        if self.property_start == 0 {
            return None;
        }
        let parent = &self.full_path[..self.property_start - 1];
        Some(Self {
            full_path: parent.to_string(),
            property_start: parent.rfind('.').map(|i| i + 1).unwrap_or(0),
        })
    }

    pub fn is_root(&self) -> bool {
        self.property_start == 0
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path)
    }
}
