//! Construction options (spec.md §6). `ConcurrentHashMap::new` covers
//! the common case; `Builder` exposes the full option table for
//! callers that want to size or hash the map deliberately.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

use crate::concurrent_hash_map::base::ConcurrentHashMap;
use crate::concurrent_hash_map::table::{table_size_for, DEFAULT_CONCURRENCY_LEVEL, DEFAULT_LOAD_FACTOR};

/// Builds a `ConcurrentHashMap` with non-default sizing or hasher
/// options. Mirrors the source's constructor overloads
/// (`initialCapacity`, `loadFactor`, `concurrencyLevel`).
pub struct Builder<S = RandomState> {
    initial_capacity: usize,
    load_factor: f32,
    concurrency_level: usize,
    hasher: S,
}

impl Default for Builder<RandomState> {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            load_factor: DEFAULT_LOAD_FACTOR,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            hasher: RandomState::new(),
        }
    }
}

impl Builder<RandomState> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: BuildHasher> Builder<S> {
    /// Sizing hint: the table is allocated large enough for roughly
    /// `initial_capacity` entries at the default load factor.
    pub fn initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Floating density in `(0, 1]`; only used to derive the initial
    /// capacity. The runtime resize threshold policy stays 0.75
    /// regardless (spec.md §6).
    pub fn load_factor(mut self, load_factor: f32) -> Self {
        assert!(load_factor > 0.0 && load_factor <= 1.0, "load_factor must be in (0, 1]");
        self.load_factor = load_factor;
        self
    }

    /// A lower-bound hint for initial capacity, kept for API parity
    /// with the source; modern striping no longer needs it to size
    /// lock arrays, since the bin lock lives on each bin itself.
    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        self.concurrency_level = concurrency_level.max(1);
        self
    }

    pub fn hasher<S2: BuildHasher>(self, hasher: S2) -> Builder<S2> {
        Builder {
            initial_capacity: self.initial_capacity,
            load_factor: self.load_factor,
            concurrency_level: self.concurrency_level,
            hasher,
        }
    }

    pub fn build<K, V>(self) -> ConcurrentHashMap<K, V, S> {
        let size = self.initial_capacity.max(self.concurrency_level);
        let initial_size = if size == 0 {
            0
        } else {
            let threshold = (size as f32 / self.load_factor).ceil() as usize + 1;
            table_size_for(threshold)
        };
        ConcurrentHashMap::with_initial_size_and_hasher(initial_size, self.hasher)
    }
}
