//! Criterion benchmarks for Jacobian augmentation and FGSM
//!
//! Run with: cargo bench -p mirage-attack
//! HTML reports: target/criterion/report/index.html

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mirage_attack::{fgsm, jacobian_augmentation};
use mirage_core::{AugmentConfig, FgsmConfig};
use mirage_nn::substitute_mlp;
use ndarray::Array2;

const MNIST_DIM: usize = 784;

fn make_set(rows: usize) -> (Array2<f32>, Vec<usize>) {
    let inputs = Array2::from_shape_fn((rows, MNIST_DIM), |(i, j)| ((i * 31 + j) % 97) as f32 / 97.0);
    let labels = (0..rows).map(|i| i % 10).collect();
    (inputs, labels)
}

fn bench_augmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Augment/Jacobian");
    group.sample_size(10);
    let substitute = substitute_mlp(MNIST_DIM, 10, 0).unwrap();

    for rows in [100, 400] {
        let (inputs, labels) = make_set(rows);
        group.throughput(Throughput::Elements(rows as u64));
        for parallel in [false, true] {
            let config = AugmentConfig {
                parallel,
                ..Default::default()
            };
            let name = if parallel { "parallel" } else { "serial" };
            group.bench_with_input(BenchmarkId::new(name, rows), &rows, |b, _| {
                b.iter(|| {
                    jacobian_augmentation(&substitute, black_box(&inputs), &labels, &config)
                })
            });
        }
    }
    group.finish();
}

fn bench_fgsm(c: &mut Criterion) {
    let mut group = c.benchmark_group("Attack/FGSM");
    let substitute = substitute_mlp(MNIST_DIM, 10, 0).unwrap();

    for rows in [128, 1024] {
        let (inputs, _) = make_set(rows);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("craft", rows), &inputs, |b, inputs| {
            b.iter(|| fgsm(&substitute, black_box(inputs), &FgsmConfig::default()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_augmentation, bench_fgsm);
criterion_main!(benches);
