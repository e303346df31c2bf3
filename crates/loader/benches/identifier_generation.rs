use criterion::{black_box, criterion_group, criterion_main, Criterion};
use elif_loader::id::{
    CustomVersionOneGenerator, RandomUuidGenerator, UuidValueGenerator, Version6Generator, Version7Generator,
    VersionOneConfig,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;

fn generators() -> Vec<(&'static str, Arc<dyn UuidValueGenerator>)> {
    vec![
        ("random", Arc::new(RandomUuidGenerator::new())),
        (
            "version_one",
            Arc::new(CustomVersionOneGenerator::new(VersionOneConfig::for_current_process(
                Ipv4Addr::new(10, 0, 0, 7),
            ))),
        ),
        ("version_six", Arc::new(Version6Generator::new())),
        ("version_seven", Arc::new(Version7Generator::new())),
    ]
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_uuid");
    for (name, generator) in generators() {
        group.bench_function(name, |b| b.iter(|| black_box(generator.generate_uuid())));
    }
    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_uuid_4_threads");
    for (name, generator) in generators() {
        group.bench_function(name, |b| {
            b.iter(|| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        let generator = generator.clone();
                        thread::spawn(move || {
                            for _ in 0..250 {
                                black_box(generator.generate_uuid());
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
