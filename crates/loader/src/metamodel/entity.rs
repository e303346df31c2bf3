//! Entity persisters
//!
//! An [`EntityPersister`] is the resolved mapping of one entity: its table,
//! identifier, properties and the optional features (filters, natural id,
//! temporal versioning) the SQL builder and the hydrator consult.

use super::types::{Property, Type};
use crate::id::IdGeneration;

/// A named filter condition attached to an entity or collection
///
/// The condition is a SQL fragment in which `{alias}` stands for the table
/// alias and parameters are written `:filter_name.param_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub name: String,
    pub condition: String,
}

impl FilterCondition {
    pub fn new(name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: condition.into(),
        }
    }

    pub fn render(&self, alias: &str) -> String {
        self.condition.replace("{alias}", alias)
    }
}

/// Render the conditions of every enabled filter, joined with `and`
pub(crate) fn render_filters<'a, I>(filters: &[FilterCondition], alias: &str, enabled: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str> + Clone,
{
    let fragments: Vec<String> = filters
        .iter()
        .filter(|f| enabled.clone().into_iter().any(|name| name == f.name))
        .map(|f| f.render(alias))
        .collect();
    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join(" and "))
    }
}

/// System-versioned (temporal) mapping of an entity table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalMapping {
    pub row_start_column: String,
    pub row_end_column: String,
    /// Columns whose changes do not produce a new row version
    pub excluded_columns: Vec<String>,
}

impl TemporalMapping {
    pub fn new(row_start_column: impl Into<String>, row_end_column: impl Into<String>) -> Self {
        Self {
            row_start_column: row_start_column.into(),
            row_end_column: row_end_column.into(),
            excluded_columns: Vec::new(),
        }
    }

    pub fn excluding(mut self, column: impl Into<String>) -> Self {
        self.excluded_columns.push(column.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EntityPersister {
    pub entity_name: String,
    pub table_name: String,
    pub identifier_name: String,
    pub identifier_columns: Vec<String>,
    pub identifier_type: Type,
    pub properties: Vec<Property>,
    /// Names of the natural-id properties, in declaration order
    pub natural_id: Vec<String>,
    pub filters: Vec<FilterCondition>,
    pub temporal: Option<TemporalMapping>,
    /// Number of ids loaded together when this entity is batch fetched
    pub batch_size: usize,
    pub id_generation: Option<IdGeneration>,
}

impl EntityPersister {
    pub fn new(entity_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            table_name: table_name.into(),
            identifier_name: "id".to_string(),
            identifier_columns: vec!["id".to_string()],
            identifier_type: Type::Basic(super::BasicType::Long),
            properties: Vec::new(),
            natural_id: Vec::new(),
            filters: Vec::new(),
            temporal: None,
            batch_size: 1,
            id_generation: None,
        }
    }

    pub fn with_identifier(
        mut self,
        name: impl Into<String>,
        columns: Vec<String>,
        ty: Type,
    ) -> Self {
        self.identifier_name = name.into();
        self.identifier_columns = columns;
        self.identifier_type = ty;
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_natural_id(mut self, properties: &[&str]) -> Self {
        self.natural_id = properties.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, condition: impl Into<String>) -> Self {
        self.filters.push(FilterCondition::new(name, condition));
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalMapping) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_id_generation(mut self, generation: IdGeneration) -> Self {
        self.id_generation = Some(generation);
        self
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Indexes of the natural-id properties; unknown names are skipped
    pub fn natural_id_indexes(&self) -> Vec<usize> {
        self.natural_id
            .iter()
            .filter_map(|name| self.property_index(name))
            .collect()
    }

    /// Every column of the entity table that holds state, in property order
    pub fn state_columns(&self) -> Vec<&str> {
        self.properties
            .iter()
            .flat_map(|p| p.columns.iter().map(String::as_str))
            .collect()
    }

    pub fn has_collections(&self) -> bool {
        self.properties
            .iter()
            .any(|p| matches!(p.ty, Type::Collection(_)))
    }
}
