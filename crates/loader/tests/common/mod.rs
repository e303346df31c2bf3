//! Shared fixture: a small toy-box mapping answered by the in-memory backend
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Once};

use elif_loader::backends::{ExecutedStatement, MemoryDatabase, ResultTable};
use elif_loader::dialect::DialectKind;
use elif_loader::metamodel::{
    BasicType, CollectionPersister, EntityPersister, FilterDefinition, Metamodel, Property, Type,
};
use elif_loader::plan::FetchStrategy;
use elif_loader::{source_row, LoaderConfig, LoaderResult, Session, SessionFactory, SqlValue};
use tracing_subscriber::EnvFilter;

type SourceRow = HashMap<String, SqlValue>;

pub fn toy_box_model() -> Metamodel {
    let mut model = Metamodel::new();
    model
        .add_filter(FilterDefinition::new("active").with_parameter("flag", Type::Basic(BasicType::Boolean)))
        .add_entity(
            EntityPersister::new("Boy", "boy")
                .with_property(Property::basic("name", "name", BasicType::String))
                .with_property(Property::collection("toys", "Boy.toys", FetchStrategy::JOIN)),
        )
        .add_entity(
            EntityPersister::new("Toy", "toy")
                .with_property(Property::basic("name", "name", BasicType::String))
                .with_filter("active", "{alias}.active = :active.flag"),
        )
        .add_entity(
            EntityPersister::new("Owner", "owner")
                .with_property(Property::basic("name", "name", BasicType::String))
                .with_property(Property::collection("pets", "Owner.pets", FetchStrategy::BATCH))
                .with_natural_id(&["name"]),
        )
        .add_entity(
            EntityPersister::new("Pet", "pet")
                .with_property(Property::basic("name", "name", BasicType::String))
                .with_property(Property::many_to_one(
                    "owner",
                    vec!["owner_id".to_string()],
                    "Owner",
                    Type::Basic(BasicType::Long),
                    FetchStrategy::EAGER_SELECT,
                )),
        )
        .add_collection(CollectionPersister::one_to_many(
            "Boy",
            "toys",
            "Toy",
            "toy",
            vec!["boy_id".to_string()],
            vec!["id".to_string()],
            Type::Basic(BasicType::Long),
        ))
        .add_collection(
            CollectionPersister::one_to_many(
                "Owner",
                "pets",
                "Pet",
                "pet",
                vec!["owner_id".to_string()],
                vec!["id".to_string()],
                Type::Basic(BasicType::Long),
            )
            .with_batch_size(3),
        );
    model
}

fn boys() -> Vec<SourceRow> {
    vec![
        source_row! { "boy.id" => 1i64, "boy.name" => "ann" },
        source_row! { "boy.id" => 2i64, "boy.name" => "bob" },
    ]
}

fn toys() -> Vec<SourceRow> {
    vec![
        source_row! { "toy.id" => 10i64, "toy.boy_id" => 1i64, "toy.name" => "kite", "toy.active" => true },
        source_row! { "toy.id" => 11i64, "toy.boy_id" => 1i64, "toy.name" => "ball", "toy.active" => false },
        source_row! { "toy.id" => 12i64, "toy.boy_id" => 1i64, "toy.name" => "yoyo", "toy.active" => true },
        source_row! { "toy.id" => 13i64, "toy.boy_id" => 2i64, "toy.name" => "drum", "toy.active" => true },
        source_row! { "toy.id" => 14i64, "toy.name" => "lost marble", "toy.active" => false },
    ]
}

fn owners() -> Vec<SourceRow> {
    vec![
        source_row! { "owner.id" => 1i64, "owner.name" => "ann" },
        source_row! { "owner.id" => 2i64, "owner.name" => "bob" },
    ]
}

fn pets() -> Vec<SourceRow> {
    vec![
        source_row! { "pet.id" => 20i64, "pet.owner_id" => 1i64, "pet.name" => "rex" },
        source_row! { "pet.id" => 21i64, "pet.owner_id" => 1i64, "pet.name" => "tom" },
        source_row! { "pet.id" => 22i64, "pet.owner_id" => 2i64, "pet.name" => "kit" },
    ]
}

/// Rows whose `column` holds one of `values`; every row when `values` is empty
fn keyed(rows: Vec<SourceRow>, column: &str, values: &[SqlValue]) -> Vec<SourceRow> {
    if values.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| row.get(column).map_or(false, |v| values.contains(v)))
        .collect()
}

/// Emulate `limit ? offset ?` from the two trailing binds
fn paginate(sql: &str, binds: &mut Vec<SqlValue>, rows: Vec<SourceRow>) -> Vec<SourceRow> {
    if sql.ends_with("limit ? offset ?") {
        let offset = binds.pop().and_then(|v| v.as_i64()).unwrap_or(0) as usize;
        let limit = binds.pop().and_then(|v| v.as_i64()).unwrap_or(0) as usize;
        return rows.into_iter().skip(offset).take(limit).collect();
    }
    if sql.ends_with("limit ?") {
        let limit = binds.pop().and_then(|v| v.as_i64()).unwrap_or(0) as usize;
        return rows.into_iter().take(limit).collect();
    }
    rows
}

fn answer(statement: &ExecutedStatement) -> LoaderResult<ResultTable> {
    let sql = statement.sql.as_str();
    let mut binds = statement.bound_values();
    let rows = if sql.contains(" from boy ") {
        let mut rows = Vec::new();
        for boy in keyed(boys(), "boy.id", &binds) {
            let owned = keyed(toys(), "toy.boy_id", &[boy["boy.id"].clone()]);
            if owned.is_empty() {
                rows.push(boy.clone());
            }
            for toy in owned {
                let mut row = boy.clone();
                row.extend(toy);
                rows.push(row);
            }
        }
        rows
    } else if sql.contains(" from toy ") {
        let rows = paginate(sql, &mut binds, toys());
        if sql.contains(".active = ?") {
            keyed(rows, "toy.active", &binds[..1])
        } else {
            rows
        }
    } else if sql.contains(" from owner ") {
        if sql.contains(".name = ?") {
            keyed(owners(), "owner.name", &binds)
        } else {
            keyed(owners(), "owner.id", &binds)
        }
    } else if sql.contains(" from pet ") {
        if sql.contains(".owner_id in") || sql.contains(".owner_id=?") {
            keyed(pets(), "pet.owner_id", &binds)
        } else {
            keyed(pets(), "pet.id", &binds)
        }
    } else {
        Vec::new()
    };
    ResultTable::project(sql, &rows)
}

static LOGGING: Once = Once::new();

/// Route loader logs to the test output; `RUST_LOG=elif_loader=debug` shows
/// the generated SQL
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn database() -> MemoryDatabase {
    init_logging();
    MemoryDatabase::new(answer)
}

pub fn factory(dialect: DialectKind) -> Arc<SessionFactory> {
    SessionFactory::builder(toy_box_model())
        .with_config(LoaderConfig::for_dialect(dialect))
        .build()
        .unwrap()
}

pub fn session(database: &MemoryDatabase) -> Session {
    factory(DialectKind::PostgreSQL).open_session(Box::new(database.connect()))
}
