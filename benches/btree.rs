//! B+tree benchmarks for StrataDB
//!
//! Measures the index operations that dominate lookup-heavy workloads:
//! sequential and random insertion, point reads, and range scans through
//! the buffer pool.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::tempdir;

use stratadb::{EngineOptions, Rid, StorageEngine};

fn bench_engine() -> (tempfile::TempDir, StorageEngine) {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::open(
        dir.path().join("bench.db"),
        EngineOptions {
            buffer_pool_size: 256,
            ..Default::default()
        },
    )
    .unwrap();
    (dir, engine)
}

fn shuffled(count: i64) -> Vec<i64> {
    let mut keys: Vec<i64> = (0..count).collect();
    // Deterministic scramble; no RNG needed for a stable benchmark.
    for i in (1..keys.len()).rev() {
        let j = (i * 2_654_435_761) % (i + 1);
        keys.swap(i, j);
    }
    keys
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for count in [100i64, 1_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), count, |b, &count| {
            b.iter_with_setup(bench_engine, |(dir, engine)| {
                let tree = engine.create_index::<i64>("bench", 64).unwrap();
                let txn = engine.begin();
                for key in 0..count {
                    tree.insert(key, Rid::new(0, key as i32), &txn).unwrap();
                }
                black_box((dir, engine))
            });
        });

        group.bench_with_input(BenchmarkId::new("random", count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let (dir, engine) = bench_engine();
                    (dir, engine, shuffled(count))
                },
                |(dir, engine, keys)| {
                    let tree = engine.create_index::<i64>("bench", 64).unwrap();
                    let txn = engine.begin();
                    for key in keys {
                        tree.insert(key, Rid::new(0, key as i32), &txn).unwrap();
                    }
                    black_box((dir, engine))
                },
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_get");

    for count in [1_000i64, 10_000].iter() {
        let (dir, engine) = bench_engine();
        let tree = engine.create_index::<i64>("bench", 64).unwrap();
        let txn = engine.begin();
        for key in 0..*count {
            tree.insert(key, Rid::new(0, key as i32), &txn).unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("point", count), count, |b, &count| {
            let mut probe = 0i64;
            b.iter(|| {
                probe = (probe + 7_919) % count;
                black_box(tree.get_value(&probe).unwrap())
            });
        });

        drop(txn);
        drop(tree);
        drop(engine);
        drop(dir);
    }

    group.finish();
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_scan");

    let count = 10_000i64;
    let (_dir, engine) = bench_engine();
    let tree = engine.create_index::<i64>("bench", 64).unwrap();
    let txn = engine.begin();
    for key in 0..count {
        tree.insert(key, Rid::new(0, key as i32), &txn).unwrap();
    }

    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("full", |b| {
        b.iter(|| {
            let visited = tree.iter().unwrap().count();
            black_box(visited)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_get, bench_scan);
criterion_main!(benches);
