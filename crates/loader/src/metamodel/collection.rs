//! Collection persisters

use serde::{Deserialize, Serialize};

use super::entity::FilterCondition;
use super::types::Type;

/// Semantics of a collection's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionNature {
    /// Unordered, duplicates allowed
    Bag,
    /// Unordered, no duplicates
    Set,
    /// Ordered by an integer index column
    List,
    /// Keyed by an index column
    Map,
}

impl CollectionNature {
    pub fn is_indexed(&self) -> bool {
        matches!(self, CollectionNature::List | CollectionNature::Map)
    }
}

#[derive(Debug, Clone)]
pub struct CollectionPersister {
    /// `Owner.property`
    pub role: String,
    pub owner_entity: String,
    pub nature: CollectionNature,
    /// Table holding the collection rows; the element table for one-to-many
    pub table_name: String,
    /// Foreign key columns referencing the owner's identifier
    pub key_columns: Vec<String>,
    /// Columns holding the element (or its foreign key) on `table_name`
    pub element_columns: Vec<String>,
    pub element_type: Type,
    pub index_columns: Vec<String>,
    pub index_type: Option<Type>,
    /// Elements are entities whose own table holds the foreign key
    pub one_to_many: bool,
    /// Ordering on the collection table, `{alias}` standing for its alias
    pub order_by: Option<String>,
    /// Ordering on the element entity table of a many-to-many
    pub many_to_many_order_by: Option<String>,
    pub filters: Vec<FilterCondition>,
    pub batch_size: usize,
}

impl CollectionPersister {
    /// A one-to-many collection stored as a foreign key on the element table
    pub fn one_to_many(
        owner_entity: impl Into<String>,
        property: &str,
        element_entity: impl Into<String>,
        element_table: impl Into<String>,
        key_columns: Vec<String>,
        element_identifier_columns: Vec<String>,
        element_identifier: Type,
    ) -> Self {
        let owner_entity = owner_entity.into();
        Self {
            role: format!("{}.{}", owner_entity, property),
            owner_entity,
            nature: CollectionNature::Set,
            table_name: element_table.into(),
            key_columns,
            element_columns: element_identifier_columns,
            element_type: Type::ManyToOne(std::sync::Arc::new(super::types::EntityAssociation {
                entity_name: element_entity.into(),
                identifier: element_identifier,
            })),
            index_columns: Vec::new(),
            index_type: None,
            one_to_many: true,
            order_by: None,
            many_to_many_order_by: None,
            filters: Vec::new(),
            batch_size: 1,
        }
    }

    /// A collection stored in its own table: values, components or
    /// many-to-many links depending on `element_type`
    pub fn with_table(
        owner_entity: impl Into<String>,
        property: &str,
        table_name: impl Into<String>,
        key_columns: Vec<String>,
        element_columns: Vec<String>,
        element_type: Type,
    ) -> Self {
        let owner_entity = owner_entity.into();
        Self {
            role: format!("{}.{}", owner_entity, property),
            owner_entity,
            nature: CollectionNature::Bag,
            table_name: table_name.into(),
            key_columns,
            element_columns,
            element_type,
            index_columns: Vec::new(),
            index_type: None,
            one_to_many: false,
            order_by: None,
            many_to_many_order_by: None,
            filters: Vec::new(),
            batch_size: 1,
        }
    }

    pub fn with_nature(mut self, nature: CollectionNature) -> Self {
        self.nature = nature;
        self
    }

    pub fn with_index(mut self, columns: Vec<String>, ty: Type) -> Self {
        self.index_columns = columns;
        self.index_type = Some(ty);
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_many_to_many_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.many_to_many_order_by = Some(order_by.into());
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, condition: impl Into<String>) -> Self {
        self.filters.push(FilterCondition::new(name, condition));
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn is_many_to_many(&self) -> bool {
        !self.one_to_many && matches!(self.element_type, Type::ManyToOne(_))
    }

    pub fn element_entity(&self) -> Option<&str> {
        self.element_type.associated_entity()
    }

    pub fn has_index(&self) -> bool {
        self.index_type.is_some()
    }
}
