//! The table itself (Component E): a flat array of bin heads, plus the
//! sizing constants and helpers shared by the base map and the resize
//! engine.

use std::sync::Arc;

use crossbeam_epoch::Atomic;

use crate::concurrent_hash_map::bin_lock::BinLock;
use crate::concurrent_hash_map::forwarding::Moved;
use crate::concurrent_hash_map::node::Node;
use crate::concurrent_hash_map::tree::TreeBin;

/// The largest possible table capacity. Must stay `1 << 30`: the spread
/// hash is masked to 30 bits (`node::HASH_BITS`), so a larger table
/// could not be indexed without losing bits of the hash.
pub(crate) const MAXIMUM_CAPACITY: usize = 1 << 30;
pub(crate) const DEFAULT_CAPACITY: usize = 16;
pub(crate) const DEFAULT_LOAD_FACTOR: f32 = 0.75;
pub(crate) const DEFAULT_CONCURRENCY_LEVEL: usize = 1;

/// Bin count threshold for converting a list bin into a tree bin.
pub(crate) const TREEIFY_THRESHOLD: usize = 8;
/// Bin count threshold for converting a split tree bin back into a
/// list during a resize.
pub(crate) const UNTREEIFY_THRESHOLD: usize = 6;
/// Smallest table capacity at which bins may be treeified; below this,
/// a resize is preferred (see DESIGN.md).
pub(crate) const MIN_TREEIFY_CAPACITY: usize = 64;

/// A single slot of the table: a lock guarding writers to the bin, and
/// an atomic pointer to the bin's current content.
pub(crate) struct Bin<K, V> {
    pub(crate) lock: BinLock,
    pub(crate) head: Atomic<BinEntry<K, V>>,
}

impl<K, V> Bin<K, V> {
    fn new() -> Self {
        Self {
            lock: BinLock::new(),
            head: Atomic::null(),
        }
    }
}

// Reached only once every reader/writer with a reference to this bin is
// gone (the bin lives inside the table's `Vec`, which is itself behind
// an `Arc`), so an unprotected epoch guard is sound here. The real work
// is in `BinEntry`'s own `Drop` impl, shared with the epoch-deferred
// reclamation path a resize or a tree conversion takes when it retires
// an old bin head.
impl<K, V> Drop for Bin<K, V> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let shared = self.head.load(std::sync::atomic::Ordering::Relaxed, guard);
        if !shared.is_null() {
            drop(unsafe { shared.into_owned() });
        }
    }
}

/// The content of an occupied bin. Every bin head is either absent
/// (`Atomic::null()`), a list-bin chain (`Node`), a tree bin, or a
/// forwarding marker.
///
/// `Node` holds a pointer to the chain's first node rather than
/// embedding it: every node after the first is reached through
/// ordinary `Node::next` links, so replacing the first node (the
/// common case on delete) only ever allocates a new thin wrapper, not
/// a copy of the node it now points to.
pub(crate) enum BinEntry<K, V> {
    Node(Atomic<Node<K, V>>),
    Tree(TreeBin<K, V>),
    Moved(Moved<K, V>),
}

impl<K, V> BinEntry<K, V> {
    pub(crate) fn node_head(head: crossbeam_epoch::Shared<'_, Node<K, V>>) -> Self {
        BinEntry::Node(Atomic::from(head))
    }
}

impl<K, V> BinEntry<K, V> {
    pub(crate) fn is_moved(&self) -> bool {
        matches!(self, BinEntry::Moved(_))
    }
}

/// Frees a list bin's node chain (and each node's published value) when
/// the `BinEntry` wrapping it is reclaimed, whether that happens
/// synchronously (the whole table is being dropped) or later, via
/// `Guard::defer_destroy` once a resize, a tree conversion, or a plain
/// removal retires this bin head. `Tree` and `Moved` carry their own
/// `Drop` impls (a tree's nodes, an `Arc` refcount) and need no help.
impl<K, V> Drop for BinEntry<K, V> {
    fn drop(&mut self) {
        if let BinEntry::Node(head) = self {
            let guard = unsafe { crossbeam_epoch::unprotected() };
            let mut cur = head.load(std::sync::atomic::Ordering::Relaxed, guard);
            while !cur.is_null() {
                let node = unsafe { cur.into_owned() };
                let next = node.next.load(std::sync::atomic::Ordering::Relaxed, guard);
                let val = node.value.load(std::sync::atomic::Ordering::Relaxed, guard);
                if !val.is_null() {
                    drop(unsafe { val.into_owned() });
                }
                cur = next;
            }
        }
    }
}

/// The bin array. Reference-counted so a resize can hand out the same
/// table to concurrent helpers and so old tables survive until every
/// in-flight reader's epoch guard has expired.
pub(crate) type Table<K, V> = Arc<Vec<Bin<K, V>>>;

pub(crate) fn new_table<K, V>(n: usize) -> Table<K, V> {
    let mut v = Vec::with_capacity(n);
    v.resize_with(n, Bin::new);
    Arc::new(v)
}

/// Returns a power-of-two table size for the given desired capacity
/// (Hacker's Delight sec. 3.2, as in the source).
pub(crate) fn table_size_for(c: usize) -> usize {
    if c <= 1 {
        return 1;
    }
    let mut n = c - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    #[cfg(target_pointer_width = "64")]
    {
        n |= n >> 32;
    }
    if n >= MAXIMUM_CAPACITY {
        MAXIMUM_CAPACITY
    } else {
        n + 1
    }
}
