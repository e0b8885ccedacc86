use std::hint::black_box;

use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use fair_alloc::allocators::contiguous_clusters;
use fair_alloc::allocators::generator_a;
use fair_alloc::allocators::generator_b_hrp;
use fair_alloc::allocators::generator_c_dro_closed;
use fair_alloc::allocators::generator_d_cvar_erc;
use fair_alloc::allocators::ConstraintsBag;
use ndarray::Array1;
use ndarray::Array2;

const N: usize = 20;
const T: usize = 120;

/// Deterministic three-factor problem: returns, covariance and scenarios.
fn problem() -> (Array1<f64>, Array2<f64>, Array2<f64>) {
  let loadings = Array2::from_shape_fn((N, 3), |(i, k)| ((i * 7 + k * 3) as f64).sin() * 0.15);
  let idio = Array1::from_shape_fn(N, |i| 0.01 + 0.002 * (i % 5) as f64);
  let sigma = loadings.dot(&loadings.t()) + Array2::from_diag(&idio);
  let mu = Array1::from_shape_fn(N, |i| 0.02 + 0.04 * ((i as f64) * 0.37).cos().abs());

  let factors = Array2::from_shape_fn((T, 3), |(t, k)| ((t * (k + 2)) as f64 * 0.61).sin() * 0.03);
  let noise = Array2::from_shape_fn((T, N), |(t, i)| ((t * 13 + i * 29) as f64).cos() * 0.01);
  let scenarios = factors.dot(&loadings.t()) + noise;
  (mu, sigma, scenarios)
}

fn bench_generators(c: &mut Criterion) {
  let (mu, sigma, scenarios) = problem();
  let bag = ConstraintsBag {
    dro_rho: 0.05,
    gross_leverage_cap: Some(1.75),
    turnover_cap: Some(0.40),
    w_prev: Some(Array1::from_elem(N, 1.0 / N as f64)),
    scenario_returns: Some(scenarios.clone()),
    cvar_cap: Some(0.10),
    edar_scenarios: Some(scenarios),
    edar_cap: Some(0.20),
    edar_alpha: 0.8,
    clusters: contiguous_clusters(N, 3),
    ..Default::default()
  };

  let mut group = c.benchmark_group("generators_20_assets");
  group.sample_size(20);

  group.bench_function("A", |b| b.iter(|| black_box(generator_a(&mu, &sigma, &bag))));
  group.bench_function("B", |b| b.iter(|| black_box(generator_b_hrp(&sigma))));
  group.bench_function("C", |b| {
    b.iter(|| black_box(generator_c_dro_closed(&mu, &sigma, 1.0, 0.05)))
  });
  group.bench_function("D", |b| b.iter(|| black_box(generator_d_cvar_erc(&mu, &sigma, &bag))));

  group.finish();
}

criterion_group!(benches, bench_generators);
criterion_main!(benches);
