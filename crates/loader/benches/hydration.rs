use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use elif_loader::backends::{MemoryDatabase, ResultTable};
use elif_loader::metamodel::{BasicType, CollectionPersister, EntityPersister, Metamodel, Property, Type};
use elif_loader::plan::FetchStrategy;
use elif_loader::{source_row, EntityQuery, SessionFactory};
use tokio::runtime::Runtime;

fn model() -> Metamodel {
    let mut model = Metamodel::new();
    model
        .add_entity(
            EntityPersister::new("Boy", "boy")
                .with_property(Property::basic("name", "name", BasicType::String))
                .with_property(Property::collection("toys", "Boy.toys", FetchStrategy::JOIN)),
        )
        .add_entity(EntityPersister::new("Toy", "toy").with_property(Property::basic("name", "name", BasicType::String)))
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

/// `boys` owners with `toys` elements each, one row per element
fn fan_out(boys: i64, toys: i64) -> MemoryDatabase {
    let rows: Vec<_> = (0..boys)
        .flat_map(|boy| {
            (0..toys).map(move |toy| {
                source_row! {
                    "boy.id" => boy,
                    "boy.name" => format!("boy {}", boy),
                    "toy.id" => boy * toys + toy,
                    "toy.boy_id" => boy,
                    "toy.name" => format!("toy {}", toy),
                }
            })
        })
        .collect();
    MemoryDatabase::new(move |statement| ResultTable::project(&statement.sql, &rows))
}

fn bench_fan_out_load(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let factory = SessionFactory::builder(model()).build().unwrap();
    let mut group = c.benchmark_group("fan_out_load");

    for &(boys, toys) in &[(10i64, 10i64), (100, 10), (10, 100)] {
        let database = fan_out(boys, toys);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", boys, toys)),
            &database,
            |b, database| {
                b.to_async(&rt).iter(|| async {
                    let mut session = factory.open_session(Box::new(database.connect()));
                    let roots = session.query(EntityQuery::new("Boy")).await.unwrap();
                    black_box(roots.len())
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_fan_out_load);
criterion_main!(benches);
