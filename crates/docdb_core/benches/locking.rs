//! Lock acquisition micro-benchmarks: uncontended grants and the
//! wait-for-graph cycle check on a contended key.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docdb_core::{IsolationLevel, LockKey, LockManager, LockMode, TransactionId};
use rand::Rng;
use std::time::Duration;

fn random_doc_ids(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen::<u32>().to_string()).collect()
}

/// Acquiring and releasing locks on distinct documents, no contention.
fn bench_uncontended_acquire(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_uncontended");

    for count in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let ids = random_doc_ids(count);
            b.iter(|| {
                let lm = LockManager::new(Duration::from_secs(5));
                let txn = TransactionId::new();
                for id in &ids {
                    let key = LockKey::new("bench", "docs", id.clone());
                    black_box(lm.acquire(key.clone(), LockMode::Write, txn, IsolationLevel::ReadCommitted).unwrap());
                    lm.release(&key, txn);
                }
            });
        });
    }
    group.finish();
}

/// A second transaction queuing behind the first on the same key, the path
/// that runs the wait-for-graph cycle check on every call.
fn bench_contended_queue(c: &mut Criterion) {
    c.bench_function("lock_contended_queue", |b| {
        b.iter(|| {
            let lm = LockManager::new(Duration::from_secs(5));
            let key = LockKey::new("bench", "docs", "hot");
            let holder = TransactionId::new();
            lm.acquire(key.clone(), LockMode::Write, holder, IsolationLevel::ReadCommitted)
                .unwrap();

            let waiter = TransactionId::new();
            black_box(lm.acquire(key.clone(), LockMode::Write, waiter, IsolationLevel::ReadCommitted)).ok();

            lm.release(&key, holder);
        });
    });
}

criterion_group!(benches, bench_uncontended_acquire, bench_contended_queue);
criterion_main!(benches);
