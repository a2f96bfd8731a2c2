use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use world_core::{EngineConfig, WorldEngine};
use world_domain::builtin_setup;

fn engine_for(scale: f64) -> WorldEngine {
    let mut config = (*EngineConfig::builtin()).clone();
    config.scale_factor = scale;
    WorldEngine::new(builtin_setup(Arc::new(config))).expect("builtin world should validate")
}

fn bench_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("epoch");

    for scale in [0.5f64, 1.0, 2.0] {
        group.bench_with_input(BenchmarkId::new("scale", scale), &scale, |b, &scale| {
            b.iter_batched(
                || engine_for(scale),
                |mut engine| {
                    engine.step();
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    group.sample_size(10);
    group.bench_function("builtin", |b| {
        b.iter_batched(
            || engine_for(1.0),
            |mut engine| engine.run(),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(growth_benches, bench_epoch, bench_full_run);
criterion_main!(growth_benches);
