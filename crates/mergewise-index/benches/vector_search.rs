use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mergewise_index::vector::VectorIndex;
use std::hint::black_box;

#[allow(clippy::cast_precision_loss)]
fn generate_vector(dim: usize, seed: usize) -> Vec<f32> {
    (0..dim)
        .map(|i| ((i as f32 + seed as f32) * 0.1).sin())
        .collect()
}

fn build_index(count: usize, dim: usize) -> VectorIndex {
    let mut index = VectorIndex::new();
    for i in 0..count {
        index
            .upsert(&format!("doc-{i:06}"), generate_vector(dim, i))
            .unwrap();
    }
    index
}

fn flat_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_search");

    for count in [100, 1_000, 5_000] {
        let index = build_index(count, 384);
        let query = generate_vector(384, count / 2);
        group.bench_with_input(BenchmarkId::new("chunks", count), &count, |b, _| {
            b.iter(|| index.search(black_box(&query), black_box(12)).unwrap());
        });
    }

    group.finish();
}

fn search_by_dimension(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_by_dimension");

    for dim in [384, 1536] {
        let index = build_index(1_000, dim);
        let query = generate_vector(dim, 7);
        group.bench_with_input(BenchmarkId::new("dim", dim), &dim, |b, _| {
            b.iter(|| index.search(black_box(&query), black_box(12)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, flat_search, search_by_dimension);
criterion_main!(benches);
