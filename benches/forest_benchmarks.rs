use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sylva_ml::binning::BinnedFrame;
use sylva_ml::data::Matrix;
use sylva_ml::forest::{ForestParams, RandomForestClassifier};
use sylva_ml::histogram::build_node_histogram;
use sylva_ml::stats::GiniKernel;

fn synthetic(rows: usize, cols: usize, bins: u16) -> (Vec<u16>, Vec<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let codes: Vec<u16> = (0..rows * cols).map(|_| rng.gen_range(0..bins)).collect();
    let y: Vec<f64> = (0..rows)
        .map(|r| {
            if codes[r] + codes[rows + r] >= bins {
                1.0
            } else {
                0.0
            }
        })
        .collect();
    (codes, y)
}

pub fn forest_benchmarks(c: &mut Criterion) {
    let rows = 100_000;
    let cols = 5;
    let (codes, y) = synthetic(rows, cols, 64);
    let data = Matrix::new(&codes, rows, cols);
    let frame = BinnedFrame::from_codes(data).unwrap();
    let kernel = GiniKernel { class_count: 2 };
    let order: Vec<usize> = (0..rows).collect();
    let features: Vec<usize> = (0..cols).collect();

    c.bench_function("Build Node Histogram", |b| {
        b.iter(|| {
            build_node_histogram(
                black_box(&kernel),
                black_box(&frame),
                black_box(&y),
                black_box(&order),
                black_box(&features),
            )
        })
    });

    c.bench_function("Train Forest", |b| {
        b.iter(|| {
            let params = ForestParams {
                tree_count: 10,
                max_tree_depth: 8,
                ..Default::default()
            };
            let mut model = RandomForestClassifier::new(params, 2);
            model.fit(black_box(&frame), black_box(&y)).unwrap();
            model
        })
    });

    let params = ForestParams {
        tree_count: 50,
        max_tree_depth: 8,
        ..Default::default()
    };
    let mut model = RandomForestClassifier::new(params, 2);
    model.fit(&frame, &y).unwrap();
    c.bench_function("Predict Forest", |b| {
        b.iter(|| model.predict(black_box(&frame)))
    });
}

criterion_group!(benches, forest_benchmarks);
criterion_main!(benches);
