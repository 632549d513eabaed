//! B+ tree insert/find micro-benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docdb_core::BPlusTree;
use rand::Rng;
use serde_json::json;

/// Generates `count` random integer keys in `0..range`.
fn random_keys(count: usize, range: i64) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..range)).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let keys = random_keys(count, count as i64 * 4);
            b.iter(|| {
                let mut tree = BPlusTree::new(4);
                for (i, key) in keys.iter().enumerate() {
                    tree.insert(black_box(json!(key)), format!("doc{i}"));
                }
                black_box(&tree);
            });
        });
    }
    group.finish();
}

fn bench_find_populated(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_find");

    for count in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let keys = random_keys(count, count as i64 * 4);
            let mut tree = BPlusTree::new(4);
            for (i, key) in keys.iter().enumerate() {
                tree.insert(json!(key), format!("doc{i}"));
            }
            let mut rng = rand::thread_rng();

            b.iter(|| {
                let key = keys[rng.gen_range(0..keys.len())];
                black_box(tree.find(&json!(key)));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_find_populated);
criterion_main!(benches);
