use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phow::descriptor::{image_from_fn, DenseSift, DenseSiftConfig};
use phow::kernel::{HomogeneousKernelMap, KernelMapConfig};
use phow::pyramid::{PyramidConfig, SpatialPyramid};
use phow::vocabulary::{VocabularyConfig, VocabularyTrainer};

fn textured(size: u32) -> phow::descriptor::FloatImage {
    image_from_fn(size, size, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        0.5 + 0.25 * (fx * 0.7).sin() + 0.25 * (fy * 0.3 + fx * 0.1).cos()
    })
}

fn bench_dense_sift(c: &mut Criterion) {
    let sift = DenseSift::new(DenseSiftConfig::default()).unwrap();
    let mut group = c.benchmark_group("dense_sift");
    for size in [64u32, 128, 256] {
        let image = textured(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
            b.iter(|| sift.extract_bytes(black_box(image), 0.005))
        });
    }
    group.finish();
}

fn bench_assignment(c: &mut Criterion) {
    let sift = DenseSift::new(DenseSiftConfig::default()).unwrap();
    let image = textured(128);
    let descriptors = sift.extract_bytes(&image, 0.005);
    let pool = descriptors.iter().map(|d| d.vector.clone()).collect();

    let config = VocabularyConfig {
        k: 300,
        max_iterations: 5,
        ..VocabularyConfig::default()
    };
    let vocabulary = VocabularyTrainer::new(config).unwrap().train(pool).unwrap();
    let pyramid = SpatialPyramid::new(PyramidConfig::default()).unwrap();

    c.bench_function("pyramid_aggregate_128", |b| {
        b.iter(|| {
            pyramid
                .aggregate(black_box(&descriptors), 128.0, 128.0, &vocabulary)
                .unwrap()
        })
    });
}

fn bench_kernel_map(c: &mut Criterion) {
    let map = HomogeneousKernelMap::new(KernelMapConfig::default()).unwrap();
    let histogram: Vec<f64> = (0..1500).map(|i| ((i % 17) as f64) / 1500.0).collect();

    c.bench_function("kernel_map_1500", |b| {
        b.iter(|| map.apply(black_box(&histogram)))
    });
}

criterion_group!(benches, bench_dense_sift, bench_assignment, bench_kernel_map);
criterion_main!(benches);
