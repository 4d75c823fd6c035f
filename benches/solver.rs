use criterion::*;
use cut_solver_2d::*;
use rand::prelude::*;

fn random_knapsack_instance(seed: u64, item_types: usize) -> Instance {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = InstanceBuilder::new();
    builder
        .set_objective(Objective::Knapsack)
        .set_first_stage_orientation(FirstStageOrientation::Vertical);
    builder.add_bin_type(6000, 3210, None, 2, 0);
    for _ in 0..item_types {
        builder.add_item_type(
            rng.gen_range(200..2500),
            rng.gen_range(200..2500),
            None,
            rng.gen_range(1..4),
            rng.gen_bool(0.2),
            None,
        );
    }
    builder.build()
}

fn bench_staged_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("staged knapsack");
    for &item_types in &[4usize, 8] {
        let instance = random_knapsack_instance(1, item_types);
        group.bench_with_input(
            BenchmarkId::from_parameter(item_types),
            &instance,
            |b, instance| {
                b.iter(|| {
                    let mut optimizer = Optimizer::new(instance);
                    optimizer.set_sequential().set_maximum_queue_size(64);
                    optimizer.solve(|_| {})
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_staged_search);
criterion_main!(benches);
