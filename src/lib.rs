//! A concurrent hash table with non-blocking lookups, per-bin locking,
//! cooperative incremental resizing, and red-black tree bins for
//! degenerate hash distributions — the design Doug Lea's
//! `java.util.concurrent.ConcurrentHashMap` popularized, reworked here
//! in the idioms `crossbeam_epoch`, `parking_lot_core`, and `rayon` give
//! Rust: epoch-based reclamation instead of a GC, RAII lock guards
//! instead of `synchronized` blocks, fork-join splitting instead of
//! `ForkJoinPool`.
//!
//! See [`concurrent_hash_map::ConcurrentHashMap`] for the map itself and
//! [`concurrent_hash_map::Builder`] for construction options beyond
//! [`ConcurrentHashMap::new`](concurrent_hash_map::ConcurrentHashMap::new).

pub mod concurrent_hash_map;
pub mod error;

pub use concurrent_hash_map::{Builder, ConcurrentHashMap, Iter, Keys, Values};
pub use error::{MapError, MapResult};
