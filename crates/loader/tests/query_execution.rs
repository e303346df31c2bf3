mod common;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use elif_loader::backends::{MemoryDatabase, ResultTable};
use elif_loader::dialect::DialectKind;
use elif_loader::exec::{QueryParameters, RowSelection, TypedValue};
use elif_loader::hydration::EntityRef;
use elif_loader::metamodel::{BasicType, EntityPersister, Metamodel, Property, TemporalMapping};
use elif_loader::{source_row, EntityQuery, LoaderConfig, Session, SessionFactory, SqlValue};

fn ids(entities: &[EntityRef]) -> Vec<i64> {
    entities.iter().filter_map(|e| e.read().id().as_i64()).collect()
}

fn third_and_fourth() -> QueryParameters {
    QueryParameters::new().with_row_selection(RowSelection::new().with_first_row(2).with_max_rows(2))
}

#[tokio::test]
async fn test_native_offset_is_bound_after_the_query_values() {
    let database = common::database();
    let mut session = common::factory(DialectKind::PostgreSQL).open_session(Box::new(database.connect()));

    let toys = session
        .query(
            EntityQuery::new("Toy")
                .order_by("{alias}.id")
                .with_parameters(third_and_fourth()),
        )
        .await
        .unwrap();
    assert_eq!(ids(&toys), vec![12, 13]);

    let statement = &database.executed()[0];
    assert!(statement.sql.ends_with("order by toy0_.id limit ? offset ?"));
    assert_eq!(statement.bound_values(), vec![SqlValue::Int64(2), SqlValue::Int64(2)]);
}

#[tokio::test]
async fn test_offset_is_emulated_without_native_support() {
    let database = common::database();
    let mut session = common::factory(DialectKind::Informix).open_session(Box::new(database.connect()));

    let toys = session
        .query(
            EntityQuery::new("Toy")
                .order_by("{alias}.id")
                .with_parameters(third_and_fourth()),
        )
        .await
        .unwrap();
    assert_eq!(ids(&toys), vec![12, 13]);

    let statement = &database.executed()[0];
    assert!(statement.sql.starts_with("select first 4 "));
    assert!(statement.scroll_mode.is_some());
    assert!(statement.binds.is_empty());
}

#[tokio::test]
async fn test_collection_fetch_paginates_in_memory() {
    let database = common::database();
    let mut session = common::session(&database);

    let parameters =
        QueryParameters::new().with_row_selection(RowSelection::new().with_first_row(1).with_max_rows(1));
    let boys = session
        .query(EntityQuery::new("Boy").with_parameters(parameters))
        .await
        .unwrap();
    assert_eq!(ids(&boys), vec![2]);

    let statement = &database.executed()[0];
    assert!(!statement.sql.contains("limit"));
    assert!(statement.binds.is_empty());
}

#[tokio::test]
async fn test_named_parameter_binds_every_occurrence() {
    let database = common::database();
    let mut session = common::session(&database);

    let query = EntityQuery::new("Toy")
        .restrict("{alias}.name = :name or {alias}.name = upper(:name)")
        .with_parameters(QueryParameters::new().with_named("name", TypedValue::basic(BasicType::String, "kite")));
    session.query(query).await.unwrap();

    let statement = &database.executed()[0];
    assert!(statement.sql.ends_with("where toy0_.name = ? or toy0_.name = upper(?)"));
    assert_eq!(
        statement.bound_values(),
        vec![SqlValue::from("kite"), SqlValue::from("kite")]
    );
}

#[tokio::test]
async fn test_statement_shape_is_cached_across_values() {
    let database = common::database();
    let factory = common::factory(DialectKind::PostgreSQL);
    let mut session = factory.open_session(Box::new(database.connect()));

    for name in ["kite", "drum"] {
        let query = EntityQuery::new("Toy")
            .restrict("{alias}.name = :name")
            .with_parameters(QueryParameters::new().with_named("name", TypedValue::basic(BasicType::String, name)));
        session.query(query).await.unwrap();
    }
    assert_eq!(factory.cached_shapes(), 1);
    let prepared = database.prepared_sql();
    assert_eq!(prepared.len(), 2);
    assert_eq!(prepared[0], prepared[1]);
}

#[tokio::test]
async fn test_enabled_filter_restricts_and_binds_first() {
    let database = common::database();
    let factory = common::factory(DialectKind::PostgreSQL);
    let mut session = factory.open_session(Box::new(database.connect()));
    session.enable_filter("active").set_parameter("flag", true);

    let toys = session
        .query(EntityQuery::new("Toy").order_by("{alias}.id"))
        .await
        .unwrap();
    assert_eq!(ids(&toys), vec![10, 12, 13]);

    let statement = &database.executed()[0];
    assert!(statement.sql.contains("where toy0_.active = ?"));
    assert_eq!(statement.bound_values(), vec![SqlValue::Bool(true)]);

    session.disable_filter("active");
    session
        .query(EntityQuery::new("Toy").order_by("{alias}.id"))
        .await
        .unwrap();
    assert_eq!(factory.cached_shapes(), 2);
}

#[tokio::test]
async fn test_unset_filter_parameter_is_rejected() {
    let database = common::database();
    let mut session = common::session(&database);
    session.enable_filter("active");

    assert!(session.query(EntityQuery::new("Toy")).await.is_err());
    assert!(database.executed().is_empty());
}

#[tokio::test]
async fn test_batch_collection_initialization() {
    let database = common::database();
    let mut session = common::session(&database);

    let owners = session
        .query(EntityQuery::new("Owner").order_by("{alias}.id"))
        .await
        .unwrap();
    assert_eq!(owners.len(), 2);
    let pets = owners[0].read().collection("pets").unwrap();
    assert!(!pets.read().is_initialized());

    let pets = session.collection(&owners[0], "pets").await.unwrap().unwrap();
    assert_eq!(pets.read().len(), 2);

    let statements = database.executed();
    assert_eq!(statements.len(), 2);
    assert!(statements[1].sql.contains("pet0_.owner_id in (?, ?)"));
    assert_eq!(statements[1].bound_values(), vec![SqlValue::Int64(1), SqlValue::Int64(2)]);

    // the second owner's pets came with the same batch
    let other = session.collection(&owners[1], "pets").await.unwrap().unwrap();
    assert!(other.read().is_initialized());
    assert_eq!(other.read().len(), 1);
    assert_eq!(database.executed().len(), 2);

    // each pet points back at the managed owner
    let pet = pets.read().entities()[0].clone();
    let owner = session.association(&pet, "owner").await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&owner, &owners[0]));
    assert_eq!(database.executed().len(), 2);
}

fn rate_session(dialect: DialectKind, database: &MemoryDatabase) -> Session {
    let mut model = Metamodel::new();
    model.add_entity(
        EntityPersister::new("Rate", "rate")
            .with_property(Property::basic("name", "name", BasicType::String))
            .with_temporal(TemporalMapping::new("valid_from", "valid_to")),
    );
    SessionFactory::builder(model)
        .with_config(LoaderConfig::for_dialect(dialect))
        .build()
        .unwrap()
        .open_session(Box::new(database.connect()))
}

fn rates() -> MemoryDatabase {
    common::init_logging();
    MemoryDatabase::new(|statement| {
        ResultTable::project(&statement.sql, &[source_row! { "rate.id" => 1i64, "rate.name" => "base" }])
    })
}

fn new_year() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn as_of_new_year() -> EntityQuery {
    EntityQuery::new("Rate").with_parameters(QueryParameters::new().with_temporal_as_of(new_year()))
}

#[tokio::test]
async fn test_as_of_instant_is_bound_into_validity_range() {
    let database = rates();
    let mut session = rate_session(DialectKind::PostgreSQL, &database);

    let found = session.query(as_of_new_year()).await.unwrap();
    assert_eq!(ids(&found), vec![1]);

    let statement = &database.executed()[0];
    assert!(statement
        .sql
        .ends_with("where rate0_.valid_from <= ? and (rate0_.valid_to is null or rate0_.valid_to > ?)"));
    assert_eq!(
        statement.bound_values(),
        vec![SqlValue::DateTime(new_year()), SqlValue::DateTime(new_year())]
    );
}

#[tokio::test]
async fn test_as_of_instant_is_bound_into_system_time_clause() {
    let database = rates();
    let mut session = rate_session(DialectKind::MariaDB, &database);

    let found = session.query(as_of_new_year()).await.unwrap();
    assert_eq!(ids(&found), vec![1]);

    let statement = &database.executed()[0];
    assert!(statement.sql.contains(" from rate for system_time as of ? rate0_"));
    assert_eq!(statement.bound_values(), vec![SqlValue::DateTime(new_year())]);
}

#[tokio::test]
async fn test_current_rows_need_no_instant() {
    let database = rates();
    let mut session = rate_session(DialectKind::PostgreSQL, &database);

    session.query(EntityQuery::new("Rate")).await.unwrap();
    let statement = &database.executed()[0];
    assert!(statement.sql.ends_with("where rate0_.valid_to is null"));
    assert!(statement.binds.is_empty());
}
