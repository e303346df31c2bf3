//! Session-level settings that change the shape of generated SQL

use std::collections::{BTreeMap, HashMap};

use crate::backends::SqlValue;
use crate::error::{LoaderError, LoaderResult};
use crate::metamodel::Metamodel;

use super::{FetchStrategy, PropertyPath};

/// A filter enabled on a session, with its parameter values
#[derive(Debug, Clone, PartialEq)]
pub struct EnabledFilter {
    pub name: String,
    pub parameters: BTreeMap<String, SqlValue>,
}

impl EnabledFilter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> &mut Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Bind a list of values; each becomes its own marker in the SQL
    pub fn set_parameter_list<V: Into<SqlValue>>(
        &mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> &mut Self {
        let values = values.into_iter().map(Into::into).collect();
        self.parameters.insert(name.into(), SqlValue::Array(values));
        self
    }

    /// Check the filter against its definition: every declared parameter set
    pub fn validate(&self, metamodel: &Metamodel) -> LoaderResult<()> {
        let definition = metamodel.filter(&self.name).ok_or_else(|| {
            LoaderError::Query(format!("No filter named '{}' is defined", self.name))
        })?;
        for parameter in definition.parameters.keys() {
            if !self.parameters.contains_key(parameter) {
                return Err(LoaderError::Query(format!(
                    "Filter '{}' parameter '{}' was not set",
                    self.name, parameter
                )));
            }
        }
        for parameter in self.parameters.keys() {
            if !definition.parameters.contains_key(parameter) {
                return Err(LoaderError::Query(format!(
                    "Filter '{}' has no parameter '{}'",
                    self.name, parameter
                )));
            }
        }
        Ok(())
    }
}

/// Enabled filters and per-path fetch overrides of a session
#[derive(Debug, Clone, Default)]
pub struct LoadQueryInfluencers {
    enabled_filters: BTreeMap<String, EnabledFilter>,
    fetch_overrides: HashMap<String, FetchStrategy>,
}

impl LoadQueryInfluencers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_filter(&mut self, name: impl Into<String>) -> &mut EnabledFilter {
        let name = name.into();
        self.enabled_filters
            .entry(name.clone())
            .or_insert_with(|| EnabledFilter::new(name))
    }

    pub fn disable_filter(&mut self, name: &str) {
        self.enabled_filters.remove(name);
    }

    pub fn enabled_filter(&self, name: &str) -> Option<&EnabledFilter> {
        self.enabled_filters.get(name)
    }

    pub fn enabled_filter_names(&self) -> impl Iterator<Item = &str> + Clone {
        self.enabled_filters.keys().map(String::as_str)
    }

    pub fn has_enabled_filters(&self) -> bool {
        !self.enabled_filters.is_empty()
    }

    /// Override the mapped strategy of the association at `path`
    pub fn set_fetch_override(&mut self, path: impl Into<String>, strategy: FetchStrategy) {
        self.fetch_overrides.insert(path.into(), strategy);
    }

    pub fn fetch_override(&self, path: &PropertyPath) -> Option<FetchStrategy> {
        self.fetch_overrides.get(path.full_path()).copied()
    }

    /// Stable description of everything that affects SQL shape; parameter
    /// values are deliberately left out
    pub fn shape_key(&self) -> String {
        let mut overrides: Vec<String> = self
            .fetch_overrides
            .iter()
            .map(|(path, strategy)| format!("{}={}", path, strategy))
            .collect();
        overrides.sort();
        let filters: Vec<&str> = self.enabled_filter_names().collect();
        format!("filters:{};fetch:{}", filters.join(","), overrides.join(","))
    }
}
