//! Session factory
//!
//! Validates the metamodel once, instantiates identifier generators and
//! caches statement templates per query shape. Templates are keyed by
//! everything that changes the SQL text and never by parameter values.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backends::DatabaseConnection;
use crate::config::LoaderConfig;
use crate::dialect::Dialect;
use crate::error::{LoaderError, LoaderResult};
use crate::id::{GeneratorFactory, IdentifierGeneratorRegistry, UuidValueGenerator, VersionOneConfig};
use crate::loader::PlanLoader;
use crate::metamodel::Metamodel;
use crate::plan::{LoadPlanBuilder, LoadQueryInfluencers};
use crate::sql::{LoadQueryDetails, QuerySpec};

use super::actions::{AfterLoadAction, NaturalIdResolution};
use super::Session;

/// Root of a load plan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanRoot {
    Entity(String),
    /// Collection role
    Collection(String),
}

pub struct SessionFactoryBuilder {
    metamodel: Metamodel,
    config: LoaderConfig,
    generator_factories: Vec<(String, GeneratorFactory)>,
    actions: Vec<Arc<dyn AfterLoadAction>>,
}

impl SessionFactoryBuilder {
    pub fn new(metamodel: Metamodel) -> Self {
        Self {
            metamodel,
            config: LoaderConfig::default(),
            generator_factories: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Make a custom identifier generator available under `name`
    pub fn register_generator(mut self, name: impl Into<String>, factory: GeneratorFactory) -> Self {
        self.generator_factories.push((name.into(), factory));
        self
    }

    pub fn with_after_load_action(mut self, action: Arc<dyn AfterLoadAction>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn build(self) -> LoaderResult<Arc<SessionFactory>> {
        self.config.validate()?;
        self.metamodel.validate()?;
        let dialect = self.config.dialect.dialect();
        for persister in self.metamodel.entities() {
            dialect.temporal_support().validate(persister)?;
        }

        let mut generators = IdentifierGeneratorRegistry::new(
            self.config.uuid_strategy,
            VersionOneConfig::for_current_process(self.config.node_address),
        );
        for (name, factory) in self.generator_factories {
            generators.register_factory(name, factory);
        }
        for persister in self.metamodel.entities() {
            generators.configure_entity(&persister.entity_name, persister.id_generation.as_ref())?;
        }

        let mut actions: Vec<Arc<dyn AfterLoadAction>> = vec![Arc::new(NaturalIdResolution)];
        actions.extend(self.actions);

        info!(
            "Session factory built: {} entities, {} collections, dialect {}",
            self.metamodel.entities().count(),
            self.metamodel.collections().count(),
            self.config.dialect
        );
        Ok(Arc::new(SessionFactory {
            metamodel: self.metamodel,
            config: self.config,
            dialect,
            generators,
            actions,
            query_details: DashMap::new(),
        }))
    }
}

pub struct SessionFactory {
    metamodel: Metamodel,
    config: LoaderConfig,
    dialect: Arc<dyn Dialect>,
    generators: IdentifierGeneratorRegistry,
    actions: Vec<Arc<dyn AfterLoadAction>>,
    query_details: DashMap<String, Arc<LoadQueryDetails>>,
}

impl SessionFactory {
    pub fn builder(metamodel: Metamodel) -> SessionFactoryBuilder {
        SessionFactoryBuilder::new(metamodel)
    }

    pub fn metamodel(&self) -> &Metamodel {
        &self.metamodel
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn open_session(self: &Arc<Self>, connection: Box<dyn DatabaseConnection>) -> Session {
        Session::new(self.clone(), connection)
    }

    pub fn plan_loader(&self) -> PlanLoader<'_> {
        PlanLoader::new(&self.metamodel, self.dialect.as_ref(), &self.config, &self.actions)
    }

    /// Statement template for a query shape, built on first use
    pub fn query_details(
        &self,
        root: &PlanRoot,
        influencers: &LoadQueryInfluencers,
        spec: &QuerySpec,
    ) -> LoaderResult<Arc<LoadQueryDetails>> {
        let shape = format!(
            "{:?}|{:?}|{:?}|{}|{}",
            root,
            spec.restriction,
            spec.order_by,
            spec.temporal_as_of,
            influencers.shape_key()
        );
        if let Some(details) = self.query_details.get(&shape) {
            return Ok(details.value().clone());
        }

        let builder = LoadPlanBuilder::new(&self.metamodel, influencers, self.config.max_fetch_depth);
        let plan = match root {
            PlanRoot::Entity(name) => builder.build_root_entity_plan(name)?,
            PlanRoot::Collection(role) => builder.build_root_collection_plan(role)?,
        };
        let details = Arc::new(LoadQueryDetails::build(
            Arc::new(plan),
            self.dialect.as_ref(),
            influencers,
            spec,
        )?);
        debug!("Cached statement for shape {}: {}", shape, details.sql());
        Ok(self.query_details.entry(shape).or_insert(details).value().clone())
    }

    /// Number of cached statement templates
    pub fn cached_shapes(&self) -> usize {
        self.query_details.len()
    }

    pub fn identifier_generator(&self, entity_name: &str) -> LoaderResult<Arc<dyn UuidValueGenerator>> {
        self.metamodel.entity(entity_name)?;
        self.generators.generator_for(entity_name).ok_or_else(|| {
            LoaderError::Configuration(format!("No identifier generator for entity '{}'", entity_name))
        })
    }

    /// A fresh identifier for a new instance of `entity_name`
    pub fn generate_identifier(&self, entity_name: &str) -> LoaderResult<Uuid> {
        Ok(self.identifier_generator(entity_name)?.generate_uuid())
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("dialect", &self.config.dialect)
            .field("generators", &self.generators)
            .field("cached_shapes", &self.query_details.len())
            .finish()
    }
}
