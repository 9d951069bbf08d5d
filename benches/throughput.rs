use std::sync::Arc;
use std::thread;

use conchash::ConcurrentHashMap;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn populated(n: i64) -> ConcurrentHashMap<i64, i64> {
    let map = ConcurrentHashMap::new();
    for k in 0..n {
        map.put(k, k);
    }
    map
}

fn bench_single_threaded_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("single-threaded put");
    for &n in &[1_000usize, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let map = ConcurrentHashMap::new();
                for k in 0..n as i64 {
                    map.put(black_box(k), black_box(k));
                }
                map
            })
        });
    }
    group.finish();
}

fn bench_single_threaded_get(c: &mut Criterion) {
    let map = populated(100_000);
    let mut group = c.benchmark_group("single-threaded get");
    group.bench_function("hit", |b| {
        b.iter(|| black_box(map.get(black_box(&50_000))))
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(map.get(black_box(&-1))))
    });
    group.finish();
}

fn bench_contended_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended put (disjoint keys per thread)");
    for &threads in &[2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let map: Arc<ConcurrentHashMap<i64, i64>> = Arc::new(ConcurrentHashMap::new());
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let map = Arc::clone(&map);
                        thread::spawn(move || {
                            let base = (t as i64) * 10_000;
                            for k in base..base + 10_000 {
                                map.put(k, k);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
                map
            })
        });
    }
    group.finish();
}

fn bench_contended_get_during_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended get under a concurrent writer");
    group.bench_function("8 readers, 1 writer", |b| {
        b.iter(|| {
            let map: Arc<ConcurrentHashMap<i64, i64>> = Arc::new(populated(50_000));
            let writer_map = Arc::clone(&map);
            let writer = thread::spawn(move || {
                for k in 50_000..60_000 {
                    writer_map.put(k, k);
                }
            });
            let readers: Vec<_> = (0..8)
                .map(|_| {
                    let map = Arc::clone(&map);
                    thread::spawn(move || {
                        for k in 0..50_000i64 {
                            black_box(map.get(&k));
                        }
                    })
                })
                .collect();
            writer.join().unwrap();
            for r in readers {
                r.join().unwrap();
            }
        })
    });
    group.finish();
}

fn bench_parallel_reduce(c: &mut Criterion) {
    let map = populated(200_000);
    c.bench_function("parallel reduce_values_to_i64", |b| {
        b.iter(|| black_box(map.reduce_values_to_i64(None, 0, |v| **v, |a, b| a + b)))
    });
}

criterion_group!(
    benches,
    bench_single_threaded_put,
    bench_single_threaded_get,
    bench_contended_put,
    bench_contended_get_during_writes,
    bench_parallel_reduce,
);
criterion_main!(benches);
