//! Traversal cursor (Component G): a weakly-consistent, splittable
//! walk over every live bin, transparently chasing forwarding markers
//! exactly the way a concurrent `get` does.
//!
//! The bin-index bookkeeping (`index`/`base_index`/`base_limit`/
//! `base_size` plus the paired-bin-probe stack) is a direct port of
//! the source's `Traverser` inner class — the one part of this crate
//! that stays closest to a transliteration, because the algorithm
//! itself, not just its shape, is what a correct splittable traversal
//! needs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::Guard;

use crate::concurrent_hash_map::table::{Bin, BinEntry, Table};

pub(crate) struct VisitedEntry<K, V> {
    pub(crate) hash: u32,
    pub(crate) key: Arc<K>,
    pub(crate) value: Arc<V>,
}

struct StackFrame<K, V> {
    tab: Table<K, V>,
    length: usize,
    index: usize,
}

/// A single-bin linear cursor: either a list-bin `Node` chain or a
/// tree-bin's wait-free `first` chain look identical from here, since
/// both are built from the same `Node<K, V>` type.
enum ChainCursor<K, V> {
    None,
    Some(*const crate::concurrent_hash_map::node::Node<K, V>),
}

/// Walks every bin of `[base_index, base_limit)` in `tab`'s coordinate
/// space, following forwarding markers into newer tables and probing
/// the paired bin a resize splits an old bin into.
pub(crate) struct Traverser<K, V> {
    tab: Table<K, V>,
    stack: Vec<StackFrame<K, V>>,
    index: usize,
    base_index: usize,
    base_limit: usize,
    base_size: usize,
    chain: ChainCursor<K, V>,
    guard: Guard,
    started: bool,
}

// SAFETY: the raw pointer in `ChainCursor` only ever points at a `Node`
// reachable from `tab`, which this traverser keeps alive (directly or
// via its epoch guard); a `Traverser` owns that pointer exclusively; no
// two threads ever dereference the same `Traverser`'s pointer at once.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for Traverser<K, V> {}

impl<K, V> Traverser<K, V> {
    pub(crate) fn new(tab: Table<K, V>) -> Self {
        let n = tab.len();
        Self {
            tab,
            stack: Vec::new(),
            index: 0,
            base_index: 0,
            base_limit: n,
            base_size: n,
            chain: ChainCursor::None,
            guard: crossbeam_epoch::pin(),
            started: false,
        }
    }

    /// Splits the unvisited range in half, returning the cursor for
    /// the upper half. Fails once this cursor has started yielding
    /// entries — a split after traversal has begun can no longer
    /// divide the work cleanly.
    pub(crate) fn split(&mut self) -> Option<Self>
    where
        K: 'static,
        V: 'static,
    {
        if self.started {
            return None;
        }
        let lo = self.base_index;
        let hi = self.base_limit;
        let mid = lo + ((hi - lo) >> 1);
        if mid <= lo {
            return None;
        }
        self.base_limit = mid;
        self.index = self.base_index;
        Some(Self {
            tab: Table::clone(&self.tab),
            stack: Vec::new(),
            index: mid,
            base_index: mid,
            base_limit: hi,
            base_size: self.base_size,
            chain: ChainCursor::None,
            guard: crossbeam_epoch::pin(),
            started: false,
        })
    }

    /// Number of not-yet-visited bins in this cursor's assigned
    /// `[base_index, base_limit)` range, used by `bulk.rs` to decide
    /// whether a further `split()` is worth its cost.
    pub(crate) fn remaining_bins(&self) -> usize {
        self.base_limit.saturating_sub(self.base_index)
    }

    fn push_state(&mut self, tab: Table<K, V>, index: usize, length: usize) {
        self.stack.push(StackFrame { tab, length, index });
    }

    fn recover_state(&mut self, mut n: usize) {
        while let Some(top) = self.stack.last() {
            let len = top.length;
            self.index += len;
            if self.index < n {
                break;
            }
            let frame = self.stack.pop().unwrap();
            n = frame.length;
            self.index = frame.index;
            self.tab = frame.tab;
        }
        if self.stack.is_empty() {
            self.index += self.base_size;
            if self.index >= n {
                self.base_index += 1;
                self.index = self.base_index;
            }
        }
    }

    /// Advances to and returns the next live entry, or `None` once the
    /// assigned range is exhausted.
    pub(crate) fn advance(&mut self) -> Option<VisitedEntry<K, V>> {
        self.started = true;
        loop {
            if let ChainCursor::Some(ptr) = self.chain {
                let node = unsafe { &*ptr };
                let next = node.next.load(Ordering::Acquire, &self.guard);
                self.chain = if next.is_null() {
                    ChainCursor::None
                } else {
                    ChainCursor::Some(next.as_raw())
                };
                if let Some(value) = node.value(&self.guard) {
                    return Some(VisitedEntry {
                        hash: node.hash,
                        key: Arc::clone(&node.key),
                        value,
                    });
                }
                continue;
            }

            let n = self.tab.len();
            if self.base_index >= self.base_limit || n == 0 || self.index >= n {
                return None;
            }
            let bin: &Bin<K, V> = &self.tab[self.index];
            let shared = bin.head.load(Ordering::Acquire, &self.guard);
            if shared.is_null() {
                self.recover_state(n);
                continue;
            }
            match unsafe { shared.deref() } {
                BinEntry::Node(head) => {
                    let first = head.load(Ordering::Acquire, &self.guard);
                    self.chain = if first.is_null() {
                        ChainCursor::None
                    } else {
                        ChainCursor::Some(first.as_raw())
                    };
                }
                BinEntry::Tree(tree) => {
                    let first = tree.first.load(Ordering::Acquire, &self.guard);
                    self.chain = if first.is_null() {
                        ChainCursor::None
                    } else {
                        ChainCursor::Some(first.as_raw())
                    };
                }
                BinEntry::Moved(moved) => {
                    let next_table = Table::clone(&moved.next_table);
                    self.push_state(Table::clone(&self.tab), self.index, n);
                    self.tab = next_table;
                    continue;
                }
            }
            if matches!(self.chain, ChainCursor::None) {
                self.recover_state(n);
            }
        }
    }
}
