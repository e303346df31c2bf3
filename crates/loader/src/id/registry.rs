//! Per-entity identifier generator selection
//!
//! Generators are instantiated once at session-factory build time. Built-in
//! strategies are shared so that a monotonic strategy keeps a single state
//! per process; custom generators come from named factories whose failures
//! surface as configuration errors at setup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{UuidStrategy, UuidValueGenerator, VersionOneConfig};
use crate::error::{LoaderError, LoaderResult};

/// Factory for a custom generator
pub type GeneratorFactory =
    Arc<dyn Fn() -> Result<Arc<dyn UuidValueGenerator>, String> + Send + Sync>;

/// How an entity's identifier is generated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdGeneration {
    Strategy(UuidStrategy),
    /// A custom generator registered under this name
    Custom(String),
}

pub struct IdentifierGeneratorRegistry {
    default_strategy: UuidStrategy,
    version_one: VersionOneConfig,
    factories: HashMap<String, GeneratorFactory>,
    built_in: HashMap<UuidStrategy, Arc<dyn UuidValueGenerator>>,
    by_entity: HashMap<String, Arc<dyn UuidValueGenerator>>,
}

impl IdentifierGeneratorRegistry {
    pub fn new(default_strategy: UuidStrategy, version_one: VersionOneConfig) -> Self {
        Self {
            default_strategy,
            version_one,
            factories: HashMap::new(),
            built_in: HashMap::new(),
            by_entity: HashMap::new(),
        }
    }

    pub fn register_factory(&mut self, name: impl Into<String>, factory: GeneratorFactory) {
        self.factories.insert(name.into(), factory);
    }

    fn built_in(&mut self, strategy: UuidStrategy) -> Arc<dyn UuidValueGenerator> {
        let version_one = self.version_one;
        self.built_in
            .entry(strategy)
            .or_insert_with(|| strategy.build(version_one))
            .clone()
    }

    /// Instantiate the generator an entity uses
    pub fn configure_entity(
        &mut self,
        entity_name: &str,
        generation: Option<&IdGeneration>,
    ) -> LoaderResult<()> {
        let generator = match generation {
            None => self.built_in(self.default_strategy),
            Some(IdGeneration::Strategy(strategy)) => self.built_in(*strategy),
            Some(IdGeneration::Custom(name)) => {
                let factory = self.factories.get(name).ok_or_else(|| {
                    LoaderError::Configuration(format!(
                        "Entity '{}' uses unknown identifier generator '{}'",
                        entity_name, name
                    ))
                })?;
                factory().map_err(|message| {
                    LoaderError::Configuration(format!(
                        "Could not instantiate identifier generator '{}' for entity '{}': {}",
                        name, entity_name, message
                    ))
                })?
            }
        };
        self.by_entity.insert(entity_name.to_string(), generator);
        Ok(())
    }

    /// Generator for an entity, falling back to the default strategy
    pub fn generator_for(&self, entity_name: &str) -> Option<Arc<dyn UuidValueGenerator>> {
        self.by_entity
            .get(entity_name)
            .cloned()
            .or_else(|| self.built_in.get(&self.default_strategy).cloned())
    }

    pub fn default_strategy(&self) -> UuidStrategy {
        self.default_strategy
    }
}

impl fmt::Debug for IdentifierGeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierGeneratorRegistry")
            .field("default_strategy", &self.default_strategy)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("entities", &self.by_entity.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RandomUuidGenerator;
    use std::net::Ipv4Addr;

    fn registry() -> IdentifierGeneratorRegistry {
        IdentifierGeneratorRegistry::new(
            UuidStrategy::Version7,
            VersionOneConfig::new(Ipv4Addr::LOCALHOST, 0),
        )
    }

    #[test]
    fn test_built_in_instances_are_shared() {
        let mut registry = registry();
        registry.configure_entity("Boy", None).unwrap();
        registry
            .configure_entity("Toy", Some(&IdGeneration::Strategy(UuidStrategy::Version7)))
            .unwrap();
        let boy = registry.generator_for("Boy").unwrap();
        let toy = registry.generator_for("Toy").unwrap();
        assert!(Arc::ptr_eq(&boy, &toy));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = registry();
        registry.register_factory(
            "plain",
            Arc::new(|| Ok(Arc::new(RandomUuidGenerator::new()) as Arc<dyn UuidValueGenerator>)),
        );
        registry
            .configure_entity("Boy", Some(&IdGeneration::Custom("plain".to_string())))
            .unwrap();
        let uuid = registry.generator_for("Boy").unwrap().generate_uuid();
        assert_eq!(uuid.get_version_num(), 4);
    }

    #[test]
    fn test_failing_custom_factory_is_configuration_error() {
        let mut registry = registry();
        registry.register_factory("broken", Arc::new(|| Err("no entropy source".to_string())));
        let err = registry
            .configure_entity("Boy", Some(&IdGeneration::Custom("broken".to_string())))
            .unwrap_err();
        assert!(matches!(err, LoaderError::Configuration(ref m) if m.contains("no entropy source")));

        let err = registry
            .configure_entity("Boy", Some(&IdGeneration::Custom("missing".to_string())))
            .unwrap_err();
        assert!(matches!(err, LoaderError::Configuration(_)));
    }
}
