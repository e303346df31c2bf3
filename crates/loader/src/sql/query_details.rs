//! SQL statement templates for load plans
//!
//! [`LoadQueryDetails`] renders one statement template per plan: select
//! items for every reference, the from clause with its joins, the where
//! clause and the ordering. Pagination, locks and comments are applied
//! later, at execution, by the dialect.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::{LoaderError, LoaderResult};
use crate::exec::named_parameter_locations;
use crate::metamodel::entity::render_filters;
use crate::metamodel::{CollectionPersister, EntityPersister};
use crate::plan::{Join, JoinKind, LoadPlan, LoadQueryInfluencers, QuerySpaceKind};

use super::aliases::AliasResolutionContext;

/// Restriction applied to the root of the statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Restriction {
    /// Root entities by identifier, `count` of them
    Ids(usize),
    /// Root collections by owner key, `count` of them
    Keys(usize),
    /// Caller supplied fragment; `{alias}` stands for the root alias
    Fragment(String),
    None,
}

/// Everything that shapes the statement of a plan besides the plan itself
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub restriction: Option<Restriction>,
    /// Caller ordering; `{alias}` stands for the root alias
    pub order_by: Option<String>,
    /// Read temporal entities as of an instant bound at execution
    pub temporal_as_of: bool,
}

impl QuerySpec {
    pub fn new(restriction: Restriction) -> Self {
        Self {
            restriction: Some(restriction),
            ..Self::default()
        }
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_temporal_as_of(mut self, as_of: bool) -> Self {
        self.temporal_as_of = as_of;
        self
    }
}

/// A plan together with its aliases and statement template
#[derive(Debug, Clone)]
pub struct LoadQueryDetails {
    plan: Arc<LoadPlan>,
    aliases: AliasResolutionContext,
    sql: String,
    root_alias: String,
    named_parameter_locations: BTreeMap<String, Vec<usize>>,
}

impl LoadQueryDetails {
    pub fn build(
        plan: Arc<LoadPlan>,
        dialect: &dyn Dialect,
        influencers: &LoadQueryInfluencers,
        spec: &QuerySpec,
    ) -> LoaderResult<Self> {
        let aliases = AliasResolutionContext::build(&plan)?;
        let renderer = SqlRenderer {
            plan: &plan,
            aliases: &aliases,
            dialect,
            influencers,
            spec,
        };
        let (sql, root_alias) = renderer.render()?;
        let named_parameter_locations = named_parameter_locations(&sql)?;
        Ok(Self {
            plan,
            aliases,
            sql,
            root_alias,
            named_parameter_locations,
        })
    }

    pub fn plan(&self) -> &Arc<LoadPlan> {
        &self.plan
    }

    pub fn aliases(&self) -> &AliasResolutionContext {
        &self.aliases
    }

    /// Statement template, still carrying filter and named markers
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn root_alias(&self) -> &str {
        &self.root_alias
    }

    /// Ordinal of every occurrence of each named parameter
    pub fn named_parameter_locations(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.named_parameter_locations
    }
}

/// Equality on the given columns, `?` for each
fn column_equalities(alias: &str, columns: &[String]) -> String {
    let parts: Vec<String> = columns.iter().map(|c| format!("{}.{}=?", alias, c)).collect();
    if parts.len() == 1 {
        parts.into_iter().collect()
    } else {
        format!("({})", parts.join(" and "))
    }
}

/// Restriction on `count` values of the given columns
fn key_restriction(alias: &str, columns: &[String], count: usize) -> LoaderResult<String> {
    if count == 0 {
        return Err(LoaderError::Query("cannot restrict on an empty list of keys".to_string()));
    }
    if count == 1 {
        return Ok(column_equalities(alias, columns));
    }
    if let [column] = columns {
        let markers = vec!["?"; count].join(", ");
        return Ok(format!("{}.{} in ({})", alias, column, markers));
    }
    let single = column_equalities(alias, columns);
    Ok(format!("({})", vec![single; count].join(" or ")))
}

struct SqlRenderer<'a> {
    plan: &'a LoadPlan,
    aliases: &'a AliasResolutionContext,
    dialect: &'a dyn Dialect,
    influencers: &'a LoadQueryInfluencers,
    spec: &'a QuerySpec,
}

impl<'a> SqlRenderer<'a> {
    fn render(&self) -> LoaderResult<(String, String)> {
        let root_uid = self
            .plan
            .query_spaces()
            .roots()
            .first()
            .ok_or_else(|| LoaderError::IllegalState("load plan has no root".to_string()))?;
        let root_alias = self.aliases.table_alias(root_uid)?.to_string();

        let select = self.select_items()?;
        let mut sql = format!("select {} from ", select.join(", "));
        let mut conditions = Vec::new();

        let root = self.plan.query_spaces().space(root_uid)?;
        match &root.kind {
            QuerySpaceKind::Entity(persister) => {
                let (reference, temporal) = self.entity_table_reference(persister, &root_alias);
                sql.push_str(&reference);
                if let Some(filters) = render_filters(
                    &persister.filters,
                    &root_alias,
                    self.influencers.enabled_filter_names(),
                ) {
                    conditions.push(filters);
                }
                conditions.extend(temporal);
            }
            QuerySpaceKind::Collection(persister) => {
                sql.push_str(&format!("{} {}", persister.table_name, root_alias));
                if let Some(filters) = render_filters(
                    &persister.filters,
                    &root_alias,
                    self.influencers.enabled_filter_names(),
                ) {
                    conditions.push(filters);
                }
            }
            QuerySpaceKind::Composite(_) => {
                return Err(LoaderError::IllegalState("a composite cannot be a root".to_string()))
            }
        }
        self.render_joins(root_uid, false, &mut sql)?;

        if let Some(restriction) = self.restriction(&root.kind, &root_alias)? {
            conditions.push(restriction);
        }
        if !conditions.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&conditions.join(" and "));
        }
        let ordering = self.order_by(&root_alias)?;
        if !ordering.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&ordering.join(", "));
        }
        Ok((sql, root_alias))
    }

    fn select_items(&self) -> LoaderResult<Vec<String>> {
        let spaces = self.plan.query_spaces();
        let mut items = Vec::new();
        for uid in self.aliases.spaces_in_order() {
            match &spaces.space(uid)?.kind {
                QuerySpaceKind::Entity(persister) => {
                    items.extend(self.aliases.entity_aliases(uid)?.select_items(persister));
                }
                QuerySpaceKind::Collection(persister) => {
                    items.extend(self.aliases.collection_aliases(uid)?.select_items(persister));
                }
                QuerySpaceKind::Composite(_) => {}
            }
        }
        Ok(items)
    }

    /// Table reference plus the temporal restriction, if the entity is versioned
    fn entity_table_reference(&self, persister: &EntityPersister, alias: &str) -> (String, Option<String>) {
        match &persister.temporal {
            Some(mapping) => {
                let fragments = self.dialect.temporal_support().render(
                    &persister.table_name,
                    alias,
                    mapping,
                    self.spec.temporal_as_of,
                );
                (fragments.table_reference, fragments.restriction)
            }
            None => (format!("{} {}", persister.table_name, alias), None),
        }
    }

    /// Joins leaving `uid`, depth first; `outer` once any join on the path
    /// is a left outer join
    fn render_joins(&self, uid: &str, outer: bool, sql: &mut String) -> LoaderResult<()> {
        let spaces = self.plan.query_spaces();
        let lhs = spaces.space(uid)?;
        for join in spaces.joins_of(uid)? {
            let rendered = match join.kind {
                JoinKind::Composite => false,
                JoinKind::CollectionElement
                    if lhs.collection_persister().map_or(false, |p| p.one_to_many) =>
                {
                    false
                }
                _ => true,
            };
            let mut child_outer = outer;
            if rendered {
                let inner = join.required && !outer;
                child_outer = !inner;
                sql.push_str(&self.render_join(join, inner)?);
            }
            self.render_joins(&join.rhs, child_outer, sql)?;
        }
        Ok(())
    }

    fn render_join(&self, join: &Join, inner: bool) -> LoaderResult<String> {
        let spaces = self.plan.query_spaces();
        let lhs_alias = self.aliases.table_alias(&join.lhs)?;
        let rhs_alias = self.aliases.table_alias(&join.rhs)?;
        let rhs = spaces.space(&join.rhs)?;

        let mut conditions: Vec<String> = join
            .lhs_columns
            .iter()
            .zip(&join.rhs_columns)
            .map(|(l, r)| format!("{}.{}={}.{}", lhs_alias, l, rhs_alias, r))
            .collect();
        let (reference, filters, temporal) = match &rhs.kind {
            QuerySpaceKind::Entity(persister) => {
                let (reference, temporal) = self.entity_table_reference(persister, rhs_alias);
                let filters = render_filters(
                    &persister.filters,
                    rhs_alias,
                    self.influencers.enabled_filter_names(),
                );
                (reference, filters, temporal)
            }
            QuerySpaceKind::Collection(persister) => {
                let filters = render_filters(
                    &persister.filters,
                    rhs_alias,
                    self.influencers.enabled_filter_names(),
                );
                (format!("{} {}", persister.table_name, rhs_alias), filters, None)
            }
            QuerySpaceKind::Composite(_) => {
                return Err(LoaderError::IllegalState(format!(
                    "composite query space '{}' cannot be joined",
                    join.rhs
                )))
            }
        };
        conditions.extend(filters);
        conditions.extend(temporal);
        Ok(format!(
            " {} {} on {}",
            if inner { "inner join" } else { "left outer join" },
            reference,
            conditions.join(" and ")
        ))
    }

    fn restriction(&self, root: &QuerySpaceKind, alias: &str) -> LoaderResult<Option<String>> {
        let restriction = match &self.spec.restriction {
            Some(restriction) => restriction,
            None => return Ok(None),
        };
        let rendered = match (restriction, root) {
            (Restriction::Ids(count), QuerySpaceKind::Entity(persister)) => {
                key_restriction(alias, &persister.identifier_columns, *count)?
            }
            (Restriction::Keys(count), QuerySpaceKind::Collection(persister)) => {
                key_restriction(alias, &persister.key_columns, *count)?
            }
            (Restriction::Fragment(fragment), _) => fragment.replace("{alias}", alias),
            (Restriction::None, _) => return Ok(None),
            (other, _) => {
                return Err(LoaderError::Query(format!(
                    "restriction {:?} does not apply to this root",
                    other
                )))
            }
        };
        Ok(Some(rendered))
    }

    /// Caller ordering, then collection ordering, then many-to-many ordering
    fn order_by(&self, root_alias: &str) -> LoaderResult<Vec<String>> {
        let mut ordering = Vec::new();
        if let Some(order_by) = &self.spec.order_by {
            ordering.push(order_by.replace("{alias}", root_alias));
        }
        let mut many_to_many = Vec::new();
        for reference in self.plan.collections() {
            let persister: &Arc<CollectionPersister> = &reference.persister;
            let alias = self.aliases.table_alias(&reference.query_space_uid)?;
            if let Some(order_by) = &persister.order_by {
                ordering.push(order_by.replace("{alias}", alias));
            }
            if let (Some(order_by), Some(element)) = (&persister.many_to_many_order_by, reference.element_graph) {
                let element_uid = &self.plan.source(element).query_space_uid;
                let element_alias = self.aliases.table_alias(element_uid)?;
                many_to_many.push(order_by.replace("{alias}", element_alias));
            }
        }
        ordering.extend(many_to_many);
        Ok(ordering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::metamodel::{BasicType, CollectionNature, FilterDefinition, Metamodel, Property, TemporalMapping, Type};
    use crate::plan::{FetchStrategy, LoadPlanBuilder};

    fn model() -> Metamodel {
        let mut model = Metamodel::new();
        model
            .add_filter(FilterDefinition::new("active").with_parameter("flag", Type::Basic(BasicType::Boolean)))
            .add_entity(
                EntityPersister::new("Boy", "boy")
                    .with_property(Property::basic("name", "name", BasicType::String))
                    .with_property(Property::collection("toys", "Boy.toys", FetchStrategy::JOIN))
                    .with_property(
                        Property::many_to_one(
                            "school",
                            vec!["school_id".to_string()],
                            "School",
                            Type::Basic(BasicType::Long),
                            FetchStrategy::JOIN,
                        )
                        .required(),
                    )
                    .with_filter("active", "{alias}.active = :active.flag"),
            )
            .add_entity(
                EntityPersister::new("Toy", "toy")
                    .with_property(Property::basic("name", "name", BasicType::String)),
            )
            .add_entity(
                EntityPersister::new("School", "school")
                    .with_property(Property::basic("name", "name", BasicType::String))
                    .with_temporal(TemporalMapping::new("valid_from", "valid_to")),
            )
            .add_collection(
                CollectionPersister::one_to_many(
                    "Boy",
                    "toys",
                    "Toy",
                    "toy",
                    vec!["boy_id".to_string()],
                    vec!["id".to_string()],
                    Type::Basic(BasicType::Long),
                )
                .with_order_by("{alias}.name"),
            )
            .add_collection(
                CollectionPersister::with_table(
                    "Boy",
                    "friends",
                    "boy_friend",
                    vec!["boy_id".to_string()],
                    vec!["friend_id".to_string()],
                    Type::ManyToOne(Arc::new(crate::metamodel::EntityAssociation {
                        entity_name: "Boy".to_string(),
                        identifier: Type::Basic(BasicType::Long),
                    })),
                )
                .with_nature(CollectionNature::Bag)
                .with_order_by("{alias}.since")
                .with_many_to_many_order_by("{alias}.name"),
            );
        model
    }

    fn details(root: &str, spec: QuerySpec, influencers: &LoadQueryInfluencers, kind: DialectKind) -> LoadQueryDetails {
        let model = model();
        let builder = LoadPlanBuilder::new(&model, influencers, 3);
        let plan = if root.contains('.') {
            builder.build_root_collection_plan(root)
        } else {
            builder.build_root_entity_plan(root)
        }
        .unwrap();
        let dialect = kind.dialect();
        LoadQueryDetails::build(Arc::new(plan), dialect.as_ref(), influencers, &spec).unwrap()
    }

    #[test]
    fn test_entity_statement() {
        let influencers = LoadQueryInfluencers::new();
        let details = details(
            "Boy",
            QuerySpec::new(Restriction::Ids(1)),
            &influencers,
            DialectKind::PostgreSQL,
        );
        assert_eq!(
            details.sql(),
            "select boy0_.id as id0_0_, boy0_.name as name1_0_, boy0_.school_id as school_id2_0_, \
             toy1_.boy_id as boy_id0_0__, toy1_.id as id1_0__, \
             toy1_.id as id0_1_, toy1_.name as name1_1_, \
             school2_.id as id0_2_, school2_.name as name1_2_ \
             from boy boy0_ \
             left outer join toy toy1_ on boy0_.id=toy1_.boy_id \
             inner join school school2_ on boy0_.school_id=school2_.id and school2_.valid_to is null \
             where boy0_.id=? order by toy1_.name"
        );
        assert_eq!(details.root_alias(), "boy0_");
    }

    #[test]
    fn test_filters_precede_restriction() {
        let mut influencers = LoadQueryInfluencers::new();
        influencers.enable_filter("active").set_parameter("flag", true);
        let details = details(
            "Boy",
            QuerySpec::new(Restriction::Fragment("{alias}.name = :name".to_string()))
                .with_order_by("{alias}.name desc")
                .with_temporal_as_of(true),
            &influencers,
            DialectKind::SQLServer,
        );
        assert!(details
            .sql()
            .contains("inner join school for system_time as of :__temporal.as_of school2_ on boy0_.school_id=school2_.id"));
        assert!(details
            .sql()
            .ends_with("where boy0_.active = :active.flag and boy0_.name = :name order by boy0_.name desc, toy1_.name"));
        assert_eq!(details.named_parameter_locations()["name"], vec![0]);
    }

    #[test]
    fn test_collection_statement_orders_many_to_many_last() {
        let influencers = LoadQueryInfluencers::new();
        let details = details(
            "Boy.friends",
            QuerySpec::new(Restriction::Keys(2)),
            &influencers,
            DialectKind::PostgreSQL,
        );
        let sql = details.sql();
        assert!(sql.starts_with("select boy_friend0_.boy_id as boy_id0_0__, boy_friend0_.friend_id as friend_id1_0__, boy1_.id as id0_0_"));
        assert!(sql.contains("from boy_friend boy_friend0_ inner join boy boy1_ on boy_friend0_.friend_id=boy1_.id"));
        assert!(sql.contains("where boy_friend0_.boy_id in (?, ?)"));
        assert!(sql.ends_with("order by boy_friend0_.since, boy1_.name"));
    }

    #[test]
    fn test_composite_key_restrictions() {
        let columns = vec!["a".to_string(), "b".to_string()];
        assert_eq!(key_restriction("x", &columns, 1).unwrap(), "(x.a=? and x.b=?)");
        assert_eq!(
            key_restriction("x", &columns, 2).unwrap(),
            "((x.a=? and x.b=?) or (x.a=? and x.b=?))"
        );
        assert!(key_restriction("x", &columns, 0).is_err());
    }
}
