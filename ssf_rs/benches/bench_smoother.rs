use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use ssf_rs::composite::CompositeBuilder;
use ssf_rs::kalman::FilterOptions;
use ssf_rs::smoother::{fast_smooth, smooth};
use ssf_rs::structural::{LocalLinearTrend, Seasonal};

fn bench_smoothers(c: &mut Criterion) {
    let model = CompositeBuilder::new()
        .add("trend", LocalLinearTrend::new(0.1, 0.01, 0.0).unwrap())
        .add("seasonal", Seasonal::new(12, 0.05).unwrap())
        .measurement_noise(0.5)
        .build()
        .unwrap();
    let y: Vec<f64> = (0..240)
        .map(|t| 0.05 * t as f64 + (t as f64 * std::f64::consts::PI / 6.0).cos() + 0.1 * ((t * 31) % 7) as f64)
        .collect();
    let opts = FilterOptions::default();

    c.bench_function("bsm_smooth_full", |b| {
        b.iter(|| smooth(&model, black_box(&y), &opts).unwrap())
    });
    c.bench_function("bsm_smooth_fast", |b| {
        b.iter(|| fast_smooth(&model, black_box(&y), &opts).unwrap())
    });
}

criterion_group!(benches, bench_smoothers);
criterion_main!(benches);
