//! Resolved mapping metadata
//!
//! The loader consumes an already-resolved metamodel: entity and collection
//! persisters plus filter definitions. [`Metamodel::validate`] checks the
//! cross references once, so plan building can rely on them.

pub mod collection;
pub mod entity;
pub mod types;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{LoaderError, LoaderResult};

pub use collection::{CollectionNature, CollectionPersister};
pub use entity::{EntityPersister, FilterCondition, TemporalMapping};
pub use types::{BasicType, ComponentType, EntityAssociation, Property, Type};

/// A filter and the types of its parameters
#[derive(Debug, Clone)]
pub struct FilterDefinition {
    pub name: String,
    pub parameters: BTreeMap<String, Type>,
}

impl FilterDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.parameters.insert(name.into(), ty);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: HashMap<String, Arc<EntityPersister>>,
    collections: HashMap<String, Arc<CollectionPersister>>,
    filters: HashMap<String, FilterDefinition>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, persister: EntityPersister) -> &mut Self {
        self.entities
            .insert(persister.entity_name.clone(), Arc::new(persister));
        self
    }

    pub fn add_collection(&mut self, persister: CollectionPersister) -> &mut Self {
        self.collections
            .insert(persister.role.clone(), Arc::new(persister));
        self
    }

    pub fn add_filter(&mut self, definition: FilterDefinition) -> &mut Self {
        self.filters.insert(definition.name.clone(), definition);
        self
    }

    pub fn entity(&self, name: &str) -> LoaderResult<&Arc<EntityPersister>> {
        self.entities
            .get(name)
            .ok_or_else(|| LoaderError::UnknownEntity(name.to_string()))
    }

    pub fn collection(&self, role: &str) -> LoaderResult<&Arc<CollectionPersister>> {
        self.collections
            .get(role)
            .ok_or_else(|| LoaderError::UnknownCollection(role.to_string()))
    }

    pub fn filter(&self, name: &str) -> Option<&FilterDefinition> {
        self.filters.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityPersister>> {
        self.entities.values()
    }

    pub fn collections(&self) -> impl Iterator<Item = &Arc<CollectionPersister>> {
        self.collections.values()
    }

    /// Check every cross reference between persisters
    pub fn validate(&self) -> LoaderResult<()> {
        for persister in self.entities.values() {
            self.validate_entity(persister)?;
        }
        for persister in self.collections.values() {
            self.validate_collection(persister)?;
        }
        Ok(())
    }

    fn validate_entity(&self, persister: &EntityPersister) -> LoaderResult<()> {
        let name = &persister.entity_name;
        if persister.identifier_columns.len() != persister.identifier_type.column_span() {
            return Err(LoaderError::Mapping(format!(
                "Identifier of '{}' maps {} columns but its type spans {}",
                name,
                persister.identifier_columns.len(),
                persister.identifier_type.column_span()
            )));
        }
        for property in &persister.properties {
            self.validate_property(name, property)?;
        }
        for natural_id in &persister.natural_id {
            if persister.property_index(natural_id).is_none() {
                return Err(LoaderError::Mapping(format!(
                    "Natural id property '{}.{}' does not exist",
                    name, natural_id
                )));
            }
        }
        for filter in &persister.filters {
            self.validate_filter_reference(name, filter)?;
        }
        Ok(())
    }

    fn validate_property(&self, owner: &str, property: &Property) -> LoaderResult<()> {
        let path = format!("{}.{}", owner, property.name);
        match &property.ty {
            Type::Collection(role) => {
                let collection = self.collection(role).map_err(|_| {
                    LoaderError::Mapping(format!("Property '{}' refers to unknown collection '{}'", path, role))
                })?;
                if &collection.owner_entity != owner && !owner.contains('.') {
                    return Err(LoaderError::Mapping(format!(
                        "Collection '{}' is owned by '{}', not '{}'",
                        role, collection.owner_entity, owner
                    )));
                }
                return Ok(());
            }
            Type::ManyToOne(association) => {
                let target = self.entity(&association.entity_name).map_err(|_| {
                    LoaderError::Mapping(format!(
                        "Property '{}' targets unknown entity '{}'",
                        path, association.entity_name
                    ))
                })?;
                if target.identifier_type.column_span() != association.identifier.column_span() {
                    return Err(LoaderError::Mapping(format!(
                        "Property '{}' does not match the identifier of '{}'",
                        path, association.entity_name
                    )));
                }
            }
            Type::Component(component) => {
                for nested in &component.properties {
                    self.validate_property(&path, nested)?;
                }
            }
            Type::Basic(_) => {}
        }
        if property.columns.len() != property.ty.column_span() {
            return Err(LoaderError::Mapping(format!(
                "Property '{}' maps {} columns but its type spans {}",
                path,
                property.columns.len(),
                property.ty.column_span()
            )));
        }
        Ok(())
    }

    fn validate_collection(&self, persister: &CollectionPersister) -> LoaderResult<()> {
        let role = &persister.role;
        let owner = self.entity(&persister.owner_entity).map_err(|_| {
            LoaderError::Mapping(format!(
                "Collection '{}' has unknown owner '{}'",
                role, persister.owner_entity
            ))
        })?;
        if persister.key_columns.len() != owner.identifier_type.column_span() {
            return Err(LoaderError::Mapping(format!(
                "Key of collection '{}' does not match the identifier of '{}'",
                role, owner.entity_name
            )));
        }
        if persister.element_columns.len() != persister.element_type.column_span() {
            return Err(LoaderError::Mapping(format!(
                "Elements of collection '{}' map {} columns but their type spans {}",
                role,
                persister.element_columns.len(),
                persister.element_type.column_span()
            )));
        }
        match (&persister.element_type, persister.one_to_many) {
            (Type::ManyToOne(association), _) => {
                self.entity(&association.entity_name).map_err(|_| {
                    LoaderError::Mapping(format!(
                        "Collection '{}' has unknown element entity '{}'",
                        role, association.entity_name
                    ))
                })?;
            }
            (_, true) => {
                return Err(LoaderError::Mapping(format!(
                    "One-to-many collection '{}' must have entity elements",
                    role
                )))
            }
            (Type::Collection(_), _) => {
                return Err(LoaderError::Mapping(format!(
                    "Collection '{}' cannot contain collections",
                    role
                )))
            }
            _ => {}
        }
        match &persister.index_type {
            Some(index) if index.column_span() != persister.index_columns.len() => {
                return Err(LoaderError::Mapping(format!(
                    "Index of collection '{}' maps {} columns but its type spans {}",
                    role,
                    persister.index_columns.len(),
                    index.column_span()
                )))
            }
            None if persister.nature.is_indexed() => {
                return Err(LoaderError::Mapping(format!(
                    "Collection '{}' is {:?} but declares no index",
                    role, persister.nature
                )))
            }
            _ => {}
        }
        for filter in &persister.filters {
            self.validate_filter_reference(role, filter)?;
        }
        Ok(())
    }

    fn validate_filter_reference(&self, owner: &str, filter: &FilterCondition) -> LoaderResult<()> {
        if !self.filters.contains_key(&filter.name) {
            return Err(LoaderError::Mapping(format!(
                "'{}' declares a condition for undefined filter '{}'",
                owner, filter.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::FetchStrategy;

    fn toy_model() -> Metamodel {
        let mut model = Metamodel::new();
        model
            .add_entity(
                EntityPersister::new("Boy", "boy")
                    .with_property(Property::basic("name", "name", BasicType::String))
                    .with_property(Property::collection("toys", "Boy.toys", FetchStrategy::JOIN)),
            )
            .add_entity(
                EntityPersister::new("Toy", "toy")
                    .with_property(Property::basic("name", "name", BasicType::String)),
            )
            .add_collection(CollectionPersister::one_to_many(
                "Boy",
                "toys",
                "Toy",
                "toy",
                vec!["boy_id".to_string()],
                vec!["id".to_string()],
                Type::Basic(BasicType::Long),
            ));
        model
    }

    #[test]
    fn test_valid_model() {
        let model = toy_model();
        assert!(model.validate().is_ok());
        assert!(model.entity("Boy").is_ok());
        assert!(matches!(model.entity("Girl"), Err(LoaderError::UnknownEntity(_))));
        assert!(matches!(
            model.collection("Boy.cars"),
            Err(LoaderError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_unknown_association_target() {
        let mut model = toy_model();
        model.add_entity(EntityPersister::new("Car", "car").with_property(Property::many_to_one(
            "driver",
            vec!["driver_id".to_string()],
            "Driver",
            Type::Basic(BasicType::Long),
            FetchStrategy::JOIN,
        )));
        let err = model.validate().unwrap_err();
        assert!(err.to_string().contains("Car.driver"));
    }

    #[test]
    fn test_undefined_filter() {
        let mut model = toy_model();
        model.add_entity(
            EntityPersister::new("Car", "car").with_filter("active", "{alias}.active = :active.flag"),
        );
        assert!(model.validate().is_err());
        model.add_filter(FilterDefinition::new("active").with_parameter("flag", Type::Basic(BasicType::Boolean)));
        assert!(model.validate().is_ok());
    }
}
