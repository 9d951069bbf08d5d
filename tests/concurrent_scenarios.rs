//! Multi-threaded scenarios from the map's concurrency contract: two
//! threads racing distinct keys, a background reader during a forced
//! resize, 100 threads racing the same `compute_if_absent` key, and a
//! parallel reduce.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conchash::ConcurrentHashMap;

#[test]
fn concurrent_inserts_on_distinct_keys() {
    let map: Arc<ConcurrentHashMap<String, i32, _>> = Arc::new(ConcurrentHashMap::new());

    let m1 = Arc::clone(&map);
    let a = thread::spawn(move || {
        m1.put("hello".to_string(), 1);
    });
    let m2 = Arc::clone(&map);
    let b = thread::spawn(move || {
        m2.put("world".to_string(), 2);
    });
    a.join().unwrap();
    b.join().unwrap();

    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&"hello".to_string()).map(|v| *v), Some(1));
    assert_eq!(map.get(&"world".to_string()).map(|v| *v), Some(2));
    assert_eq!(map.get(&"absent".to_string()), None);
}

#[test]
fn eight_threads_replace_squares_under_contention() {
    let map: Arc<ConcurrentHashMap<i32, i32, _>> = Arc::new(ConcurrentHashMap::new());
    for k in 0..1024 {
        map.put(k, k * k);
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut rng_state: u64 = (&map as *const _ as u64) | 1;
            for _ in 0..10_000 {
                rng_state ^= rng_state << 13;
                rng_state ^= rng_state >> 7;
                rng_state ^= rng_state << 17;
                let k = (rng_state % 1024) as i32;
                // A one-directional toggle (square -> square + 1) rather
                // than "bump whatever's there": idempotent under however
                // many threads race the same key, so the final value is
                // always one of exactly two possibilities.
                map.replace_if(k, &(k * k), k * k + 1);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(map.len(), 1024);
    for k in 0..1024 {
        let v = map.get(&k).map(|v| *v).expect("key must still be present");
        assert!(v == k * k || v == k * k + 1, "key {k} has unexpected value {v}");
    }
}

#[test]
fn resize_grows_table_while_reads_stay_consistent() {
    // Surfaces the resize engine's trace/debug breadcrumbs (base.rs's
    // `trace!("lazily initializing...")`/`debug!("resizing table...")`)
    // under `RUST_LOG=debug cargo test resize_grows -- --nocapture`.
    let _ = env_logger::builder().is_test(true).try_init();

    let map: Arc<ConcurrentHashMap<i32, i32, _>> = Arc::new(ConcurrentHashMap::with_capacity(16));

    let inserted = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let reader_map = Arc::clone(&map);
    let reader_inserted = Arc::clone(&inserted);
    let reader_stop = Arc::clone(&stop);
    let reader = thread::spawn(move || {
        let mut spurious_misses = 0usize;
        while !reader_stop.load(Ordering::Acquire) {
            let known = reader_inserted.load(Ordering::Acquire);
            for k in 0..known as i32 {
                if reader_map.get(&k).is_none() {
                    spurious_misses += 1;
                }
            }
        }
        spurious_misses
    });

    for k in 0..10_000 {
        map.put(k, k);
        inserted.store((k + 1) as usize, Ordering::Release);
    }
    stop.store(true, Ordering::Release);
    let spurious_misses = reader.join().unwrap();

    assert_eq!(spurious_misses, 0, "a key inserted before a get must never read as absent");
    assert_eq!(map.len(), 10_000);
}

#[test]
fn compute_if_absent_runs_callback_exactly_once_under_contention() {
    let map: Arc<ConcurrentHashMap<&'static str, usize, _>> = Arc::new(ConcurrentHashMap::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let map = Arc::clone(&map);
        let calls = Arc::clone(&calls);
        handles.push(thread::spawn(move || {
            map.compute_if_absent("k", |_| {
                thread::sleep(Duration::from_millis(10));
                calls.fetch_add(1, Ordering::SeqCst)
            })
            .unwrap()
        }));
    }
    let results: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "the factory must run exactly once");
    let first = Arc::clone(&results[0]);
    for r in &results {
        assert!(Arc::ptr_eq(r, &first), "every caller must observe the same installed value");
    }
    assert_eq!(map.len(), 1);
}

#[test]
fn parallel_reduce_matches_sequential_sum() {
    let map: ConcurrentHashMap<i32, i64, _> = ConcurrentHashMap::new();
    let mut expected: i64 = 0;
    for k in 0..10_000 {
        let v = (k as i64) * 3 - 7;
        map.put(k, v);
        expected += v;
    }

    let sum = map.reduce_values_to_i64(None, 0, |v| **v, |a, b| a + b);
    assert_eq!(sum, expected);

    // A concurrent put during the reduce must not panic or double-count
    // beyond whatever value it happened to race with.
    let map = Arc::new(map);
    let writer_map = Arc::clone(&map);
    let writer = thread::spawn(move || {
        for k in 10_000..10_100 {
            writer_map.put(k, k as i64);
        }
    });
    let _ = map.reduce_values_to_i64(None, 0, |v| **v, |a, b| a + b);
    writer.join().unwrap();
    assert_eq!(map.len(), 10_100);
}
