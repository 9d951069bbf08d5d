//! List bin entries (Component C) and the hash spread function.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::Atomic;

/// Usable bits of a spread hash: the top two bits are reserved by the
/// source for lock/forwarding state. This port keeps those bits
/// meaningful only as documentation — forwarding/tree-root/lock state
/// live on dedicated fields (`BinEntry`, `BinLock`) rather than
/// stolen from `hash` — but the mask still bounds the value a spread
/// hash can take, same as the source's.
pub(crate) const HASH_BITS: u32 = 0x3FFF_FFFF;

/// Spreads (XORs) the high bits of a 64-bit hash down into a 30-bit
/// value. Folds every input bit into the result and clears the top two
/// bits so hash storage never collides with state encoding.
pub(crate) fn spread(hash: u64) -> u32 {
    let h = hash ^ (hash >> 32);
    (h as u32) & HASH_BITS
}

/// A single entry in a list bin. Reader-visible fields (`value`,
/// `next`) are atomics so that `get` can walk a bin lock-free while
/// writers insert, update, or unlink under the bin lock: a reader may
/// safely observe `hash`/`next` and then read `value`, treating a
/// value it can no longer load through the defer-retired chain — or
/// one it never sees published — as simply absent.
///
/// The key is stored behind an `Arc` rather than by value: the resize
/// engine rebuilds low/high runs as fresh `Node`s that reference the
/// same key and value (the resize transfer reuses an unchanged tail
/// run and only clones the prefix), and a tree bin keeps a second,
/// independent copy of an entry on its wait-free `first` fallback
/// chain. Neither would be
/// possible without requiring `K: Clone` unless the key itself is
/// already reference-counted.
pub(crate) struct Node<K, V> {
    pub(crate) hash: u32,
    pub(crate) key: Arc<K>,
    pub(crate) value: Atomic<Arc<V>>,
    pub(crate) next: Atomic<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(hash: u32, key: Arc<K>, value: Arc<V>) -> Self {
        Self {
            hash,
            key,
            value: Atomic::new(value),
            next: Atomic::null(),
        }
    }

    /// Load the current value, treating a null slot as "mid-deletion,
    /// not present".
    pub(crate) fn value(&self, guard: &crossbeam_epoch::Guard) -> Option<Arc<V>> {
        let shared = self.value.load(Ordering::Acquire, guard);
        if shared.is_null() {
            None
        } else {
            Some(Arc::clone(unsafe { shared.deref() }))
        }
    }
}
