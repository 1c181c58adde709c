use aggjoin::{plan_join, run, ExecutionOptions, JoinPlan, Relation, Strategy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn bench_rows() -> usize {
    std::env::var("AGGJOIN_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (1_000..=2_000_000).contains(&v))
        .unwrap_or(100_000)
}

/// Fact table joined to two dimensions, plus a third relation hanging off one of them so the
/// plan has a binary-search step. Dimension keys repeat heavily in the fact table.
fn build_star_schema(rows: usize) -> JoinPlan {
    let stores = 200usize;
    let products = 1_000usize;
    let regions = 12usize;
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let sales: Vec<Vec<f64>> = (0..rows)
        .map(|_| {
            vec![
                rng.gen_range(0..stores) as f64,
                rng.gen_range(0..products) as f64,
                rng.gen_range(1..10) as f64,
                rng.gen_range(0.5..500.0),
            ]
        })
        .collect();
    let store_rows: Vec<Vec<f64>> = (0..stores)
        .map(|s| vec![s as f64, (s % regions) as f64, rng.gen_range(50.0..2_000.0)])
        .collect();
    let product_rows: Vec<Vec<f64>> = (0..products)
        .map(|p| vec![p as f64, rng.gen_range(0.1..25.0)])
        .collect();
    let region_rows: Vec<Vec<f64>> = (0..regions)
        .map(|r| vec![r as f64, rng.gen_range(0.0..1.0)])
        .collect();

    plan_join(
        vec![
            Relation::new("Sales", vec!["store", "product", "units", "price"], sales).unwrap(),
            Relation::new("Stores", vec!["store", "region", "area"], store_rows).unwrap(),
            Relation::new("Products", vec!["product", "weight"], product_rows).unwrap(),
            Relation::new("Regions", vec!["region", "tax"], region_rows).unwrap(),
        ],
        None,
    )
    .unwrap()
}

fn bench_strategies(c: &mut Criterion) {
    let rows = bench_rows();
    let plan = build_star_schema(rows);
    let options = ExecutionOptions::default();

    let mut group = c.benchmark_group("aggjoin_star_schema");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for strategy in Strategy::ALL {
        group.bench_with_input(BenchmarkId::new(strategy.name(), rows), &plan, |b, plan| {
            b.iter_batched(
                || plan.clone(),
                |plan| black_box(run(plan, strategy, &options)),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
