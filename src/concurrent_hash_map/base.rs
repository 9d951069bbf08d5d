//! The map's internal engine (Components E/F and the shared half of
//! H): the table itself, lazy initialization, the unified update path
//! every public mutator funnels through, and the cooperative resize
//! engine.
//!
//! `size_ctl` carries the table's lifecycle state as a single
//! `AtomicIsize`: `-1` while a table is being initialized or resized,
//! a positive value otherwise giving the next resize threshold. The
//! resize engine here is strictly single-owner — one thread claims the
//! `-1` sentinel and sweeps every bin itself, rather than coordinating
//! a pool of helper threads via a resize-stamp bit-packing scheme — and
//! lock/forwarding state lives on dedicated types (`BinLock`,
//! `BinEntry`) rather than stolen hash bits (see `table.rs`); both
//! choices are recorded in DESIGN.md.

use std::hash::{BuildHasher, Hash};
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use log::{debug, trace, warn};

use crate::concurrent_hash_map::counter::StripedCounter;
use crate::concurrent_hash_map::forwarding::Moved;
use crate::concurrent_hash_map::node::Node;
use crate::concurrent_hash_map::table::{
    new_table, table_size_for, Bin, BinEntry, Table, DEFAULT_CAPACITY, MAXIMUM_CAPACITY,
    MIN_TREEIFY_CAPACITY, TREEIFY_THRESHOLD, UNTREEIFY_THRESHOLD,
};
use crate::concurrent_hash_map::tree::{TreeBin, TreeUpdate};

/// What an update operation's decision function wants done with the
/// bin slot it was offered: the current value if the key is present,
/// `None` if absent. Shared by every list-bin and tree-bin writer so
/// put/replace/remove/compute/merge all funnel through one path.
pub(crate) enum Action<V> {
    /// Publish this value (a fresh key, or overwriting an existing one).
    Insert(Arc<V>),
    /// Make no change; the caller wanted a read-only decision (absent
    /// key for `replace`, value mismatch for `replace_if`, key already
    /// present for `put_if_absent`/`compute_if_absent`, ...).
    Leave,
    /// Unlink the entry (the key was present and the caller wants it
    /// gone). A no-op if the key was already absent.
    Remove,
}

/// What actually happened, reported back up to the public API so it
/// can compute its own return value and the counter delta.
pub(crate) enum Outcome<V> {
    Inserted(Arc<V>),
    Replaced(Arc<V>, Arc<V>),
    Removed(Arc<V>),
    Unchanged(Option<Arc<V>>),
}

/// The map's shared state. `S` is the `BuildHasher`; everything else is
/// generic over the key/value types the caller chooses. Defaults to
/// `RandomState`, the same default `std::collections::HashMap` uses, so
/// `ConcurrentHashMap<K, V>` works without spelling the hasher out.
pub struct ConcurrentHashMap<K, V, S = std::collections::hash_map::RandomState> {
    pub(crate) hash_builder: S,
    table: Atomic<Table<K, V>>,
    size_ctl: AtomicIsize,
    counter: StripedCounter,
    pub(crate) poisoned: AtomicBool,
}

impl<K, V, S> ConcurrentHashMap<K, V, S> {
    /// `initial_size` is a pre-rounded table size (already a power of
    /// two via `table_size_for`), or `0` to defer sizing to first
    /// insertion with the default capacity.
    pub(crate) fn with_initial_size_and_hasher(initial_size: usize, hasher: S) -> Self {
        Self {
            hash_builder: hasher,
            table: Atomic::null(),
            size_ctl: AtomicIsize::new(initial_size as isize),
            counter: StripedCounter::new(),
            poisoned: AtomicBool::new(false),
        }
    }
}

impl<K, V, S> ConcurrentHashMap<K, V, S>
where
    K: Hash + Eq + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    /// Current logical sum of the striped counter, clamped to `>= 0`:
    /// transient negative sums during concurrent add/dec sequences are
    /// internal, not public.
    pub(crate) fn approx_count(&self) -> isize {
        self.counter.sum().max(0)
    }

    pub(crate) fn current_table(&self, guard: &Guard) -> Option<Table<K, V>> {
        let shared = self.table.load(Ordering::Acquire, guard);
        if shared.is_null() {
            None
        } else {
            Some(Table::clone(unsafe { shared.deref() }))
        }
    }

    fn publish_table(&self, new_table: Table<K, V>, guard: &Guard) {
        let old = self.table.swap(Owned::new(new_table), Ordering::AcqRel, guard);
        if !old.is_null() {
            unsafe {
                guard.defer_destroy(old);
            }
        }
    }

    /// Lazily allocates the table on first use: `size_ctl == -1` claims
    /// the right to initialize; anyone else observing `-1` here yields
    /// and retries.
    fn init_table(&self, guard: &Guard) -> Table<K, V> {
        loop {
            if let Some(t) = self.current_table(guard) {
                return t;
            }
            let sc = self.size_ctl.load(Ordering::Acquire);
            if sc < 0 {
                std::thread::yield_now();
                continue;
            }
            if self
                .size_ctl
                .compare_exchange(sc, -1, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            if let Some(t) = self.current_table(guard) {
                // Lost the race to another initializer between our
                // null-check above and the CAS; restore size_ctl and
                // hand back the table they built.
                self.size_ctl.store(sc, Ordering::Release);
                return t;
            }
            let n = if sc > 0 { sc as usize } else { DEFAULT_CAPACITY };
            trace!("lazily initializing table with {n} bins");
            let fresh = new_table::<K, V>(n);
            self.publish_table(Table::clone(&fresh), guard);
            self.size_ctl.store((n - (n >> 2)) as isize, Ordering::Release);
            return fresh;
        }
    }

    /// Adds `delta` to the striped counter and, unless `check < 0`,
    /// considers starting a resize once the sum reaches the current
    /// threshold. `check <= 1` skips the resize check entirely (the
    /// caller already knows the bin stayed short); values
    /// `>= TREEIFY_THRESHOLD` are passed through unchanged for logging
    /// context only.
    fn add_count(&self, delta: isize, check: isize, guard: &Guard) {
        self.counter.add(delta);
        self.counter.note_contention();
        if check < 0 || check <= 1 {
            return;
        }
        let mut table = match self.current_table(guard) {
            Some(t) => t,
            None => return,
        };
        loop {
            let sc = self.size_ctl.load(Ordering::Acquire);
            let n = table.len();
            if n >= MAXIMUM_CAPACITY || self.approx_count() < sc {
                return;
            }
            if sc < 0 {
                // Someone else already owns the resize; defer rather than help.
                return;
            }
            if self
                .size_ctl
                .compare_exchange(sc, -1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                trace!("resize triggered at count {} >= threshold {sc}", self.approx_count());
                self.transfer(&table, guard);
                return;
            }
            table = match self.current_table(guard) {
                Some(t) => t,
                None => return,
            };
        }
    }

    /// Explicit resize trigger used when a bin crossed the treeify
    /// threshold but the table itself is still below
    /// `MIN_TREEIFY_CAPACITY` — resolved in DESIGN.md as "prefer resize
    /// over tree conversion" for small tables.
    fn try_resize(&self, guard: &Guard) {
        let table = match self.current_table(guard) {
            Some(t) => t,
            None => return,
        };
        loop {
            let sc = self.size_ctl.load(Ordering::Acquire);
            if sc < 0 || table.len() >= MAXIMUM_CAPACITY {
                return;
            }
            if self
                .size_ctl
                .compare_exchange(sc, -1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.transfer(&table, guard);
                return;
            }
        }
    }

    /// Doubles the table, moving every bin across. The caller already
    /// holds `size_ctl == -1`; this function restores it to the next
    /// threshold before returning.
    fn transfer(&self, old_table: &Table<K, V>, guard: &Guard) {
        let old_len = old_table.len();
        let new_len = old_len << 1;
        if new_len == 0 || new_len > MAXIMUM_CAPACITY {
            warn!("table at maximum capacity ({old_len} bins); further growth is a no-op");
            self.size_ctl.store(isize::MAX, Ordering::Release);
            return;
        }
        debug!("resizing table from {old_len} to {new_len} bins");
        let new_table = new_table::<K, V>(new_len);
        // A panic partway through the sweep would otherwise leave
        // `size_ctl` pinned at `-1` forever, silently disabling every
        // future resize; catch it, flag the map poisoned, and resume the
        // unwind, mirroring the source's own catch_unwind/resume_unwind
        // guard around its CAS-protected critical sections.
        let swept = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            for i in (0..old_len).rev() {
                self.transfer_bin(old_table, &new_table, i, guard);
            }
        }));
        if let Err(e) = swept {
            self.poisoned.store(true, Ordering::Release);
            warn!("resize sweep panicked partway through transferring bins; map poisoned");
            panic::resume_unwind(e);
        }
        self.publish_table(Table::clone(&new_table), guard);
        let threshold = new_len - (new_len >> 2);
        self.size_ctl.store(threshold as isize, Ordering::Release);
    }

    fn transfer_bin(&self, old_table: &Table<K, V>, new_table: &Table<K, V>, idx: usize, guard: &Guard) {
        let old_len = old_table.len();
        let bin: &Bin<K, V> = &old_table[idx];
        loop {
            let head = bin.head.load(Ordering::Acquire, guard);
            if head.is_null() {
                let moved = Owned::new(BinEntry::Moved(Moved::new(Table::clone(new_table))));
                match bin
                    .head
                    .compare_exchange(head, moved, Ordering::AcqRel, Ordering::Relaxed, guard)
                {
                    Ok(_) => return,
                    Err(_) => continue,
                }
            }
            // The bin lock excludes concurrent writers; this crate runs
            // at most one resizer at a time, so there is nobody else to
            // race for the *transfer* itself, but ordinary put/remove
            // calls on this bin must still be kept out while we split it.
            let _lock = bin.lock.lock();
            let head_again = bin.head.load(Ordering::Acquire, guard);
            if head_again.as_raw() != head.as_raw() {
                continue;
            }
            match unsafe { head_again.deref() } {
                BinEntry::Moved(_) => return,
                BinEntry::Tree(tree) => self.split_tree_bin(tree, guard, new_table, idx, old_len),
                BinEntry::Node(head_ptr) => self.split_list_bin(head_ptr, guard, new_table, idx, old_len),
            }
            let moved = Owned::new(BinEntry::Moved(Moved::new(Table::clone(new_table))));
            let old_head = bin.head.swap(moved, Ordering::AcqRel, guard);
            unsafe {
                guard.defer_destroy(old_head);
            }
            return;
        }
    }

    fn split_list_bin(
        &self,
        head_ptr: &Atomic<Node<K, V>>,
        guard: &Guard,
        new_table: &Table<K, V>,
        idx: usize,
        old_len: usize,
    ) {
        let mut low = Vec::new();
        let mut high = Vec::new();
        let mut cur = head_ptr.load(Ordering::Acquire, guard);
        while !cur.is_null() {
            let node = unsafe { cur.deref() };
            if let Some(v) = node.value(guard) {
                if (node.hash as usize) & old_len == 0 {
                    low.push((node.hash, Arc::clone(&node.key), v));
                } else {
                    high.push((node.hash, Arc::clone(&node.key), v));
                }
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        install_list(new_table, idx, low, guard);
        install_list(new_table, idx + old_len, high, guard);
    }

    fn split_tree_bin(
        &self,
        tree: &TreeBin<K, V>,
        guard: &Guard,
        new_table: &Table<K, V>,
        idx: usize,
        old_len: usize,
    ) {
        let mut low = Vec::new();
        let mut high = Vec::new();
        for (hash, key, value) in tree.entries(guard) {
            if (hash as usize) & old_len == 0 {
                low.push((hash, key, value));
            } else {
                high.push((hash, key, value));
            }
        }
        install_split(new_table, idx, low, guard);
        install_split(new_table, idx + old_len, high, guard);
    }

    /// Replaces a list bin's head with a freshly built tree bin once it
    /// crosses `TREEIFY_THRESHOLD`. Called while the caller still holds
    /// `bin`'s lock.
    fn treeify_bin(&self, bin: &Bin<K, V>, guard: &Guard) {
        let head = bin.head.load(Ordering::Acquire, guard);
        if head.is_null() {
            return;
        }
        if let BinEntry::Node(head_ptr) = unsafe { head.deref() } {
            let mut entries = Vec::new();
            let mut cur = head_ptr.load(Ordering::Acquire, guard);
            while !cur.is_null() {
                let node = unsafe { cur.deref() };
                if let Some(v) = node.value(guard) {
                    entries.push((node.hash, Arc::clone(&node.key), v));
                }
                cur = node.next.load(Ordering::Acquire, guard);
            }
            debug!("treeifying bin with {} entries", entries.len());
            let tree = TreeBin::from_list(guard, entries);
            let new_head = Owned::new(BinEntry::Tree(tree));
            let old = bin.head.swap(new_head, Ordering::AcqRel, guard);
            unsafe {
                guard.defer_destroy(old);
            }
        }
    }

    /// The lookup path: wait-free except for chasing a forwarding
    /// marker, which happens at most once per resize generation
    /// crossed.
    pub(crate) fn get_hashed(&self, hash: u32, key: &K) -> Option<Arc<V>> {
        let guard = &crossbeam_epoch::pin();
        let mut table = self.current_table(guard)?;
        loop {
            let n = table.len();
            if n == 0 {
                return None;
            }
            let bin = &table[(n - 1) & hash as usize];
            let head = bin.head.load(Ordering::Acquire, guard);
            if head.is_null() {
                return None;
            }
            match unsafe { head.deref() } {
                BinEntry::Moved(moved) => {
                    table = Table::clone(&moved.next_table);
                    continue;
                }
                BinEntry::Tree(tree) => return tree.get(guard, hash, key),
                BinEntry::Node(head_ptr) => {
                    let mut cur = head_ptr.load(Ordering::Acquire, guard);
                    while !cur.is_null() {
                        let node = unsafe { cur.deref() };
                        if node.hash == hash && node.key.as_ref() == key {
                            return node.value(guard);
                        }
                        cur = node.next.load(Ordering::Acquire, guard);
                    }
                    return None;
                }
            }
        }
    }

    /// The unified update path backing every mutator: `f` is asked what
    /// to do with the slot and the function decides insert/leave/
    /// remove. `lock_empty_bin` forces a locked "placeholder" on an
    /// empty bin for `compute`-family operations, so a user callback
    /// runs exactly once; pure value-only mutators (`put`, `remove`,
    /// ...) pass `false` and take the cheaper lock-free CAS instead.
    pub(crate) fn update_hashed<F>(&self, hash: u32, key: Arc<K>, lock_empty_bin: bool, mut f: F) -> Outcome<V>
    where
        F: FnMut(Option<&Arc<V>>) -> Action<V>,
    {
        let guard = &crossbeam_epoch::pin();
        let mut table = match self.current_table(guard) {
            Some(t) => t,
            None => self.init_table(guard),
        };
        loop {
            let n = table.len();
            let idx = (n - 1) & hash as usize;
            let bin: &Bin<K, V> = &table[idx];
            let head = bin.head.load(Ordering::Acquire, guard);

            if head.is_null() {
                if lock_empty_bin {
                    let _lock = bin.lock.lock();
                    if !bin.head.load(Ordering::Acquire, guard).is_null() {
                        drop(_lock);
                        continue;
                    }
                    match f(None) {
                        Action::Insert(v) => {
                            let node_shared =
                                Owned::new(Node::new(hash, Arc::clone(&key), Arc::clone(&v))).into_shared(guard);
                            bin.head.store(Owned::new(BinEntry::node_head(node_shared)), Ordering::Release);
                            drop(_lock);
                            self.add_count(1, 0, guard);
                            return Outcome::Inserted(v);
                        }
                        Action::Leave | Action::Remove => return Outcome::Unchanged(None),
                    }
                }
                match f(None) {
                    Action::Insert(v) => {
                        let node_shared =
                            Owned::new(Node::new(hash, Arc::clone(&key), Arc::clone(&v))).into_shared(guard);
                        let entry = Owned::new(BinEntry::node_head(node_shared));
                        match bin
                            .head
                            .compare_exchange(head, entry, Ordering::AcqRel, Ordering::Relaxed, guard)
                        {
                            Ok(_) => {
                                self.add_count(1, 0, guard);
                                return Outcome::Inserted(v);
                            }
                            Err(_) => continue,
                        }
                    }
                    Action::Leave | Action::Remove => return Outcome::Unchanged(None),
                }
            }

            let _lock = bin.lock.lock();
            let head_again = bin.head.load(Ordering::Acquire, guard);
            if head_again.as_raw() != head.as_raw() {
                drop(_lock);
                continue;
            }

            match unsafe { head_again.deref() } {
                BinEntry::Moved(moved) => {
                    let next = Table::clone(&moved.next_table);
                    drop(_lock);
                    table = next;
                    continue;
                }
                BinEntry::Tree(tree) => {
                    let result = tree.update(guard, hash, Arc::clone(&key), |old| match f(old) {
                        Action::Insert(v) => Some(v),
                        Action::Remove => None,
                        Action::Leave => old.map(Arc::clone),
                    });
                    drop(_lock);
                    return match result {
                        TreeUpdate::Inserted(v) => {
                            self.add_count(1, 0, guard);
                            Outcome::Inserted(v)
                        }
                        TreeUpdate::Replaced(old, new) => {
                            if Arc::ptr_eq(&old, &new) {
                                Outcome::Unchanged(Some(old))
                            } else {
                                Outcome::Replaced(old, new)
                            }
                        }
                        TreeUpdate::Removed(old) => {
                            self.add_count(-1, 0, guard);
                            Outcome::Removed(old)
                        }
                        TreeUpdate::Noop => Outcome::Unchanged(None),
                    };
                }
                BinEntry::Node(head_ptr) => {
                    let (outcome, bin_count, inserted) = Self::update_list(head_ptr, guard, hash, &key, &mut f);
                    let needs_resize = if inserted && bin_count >= TREEIFY_THRESHOLD {
                        if table.len() < MIN_TREEIFY_CAPACITY {
                            true
                        } else {
                            self.treeify_bin(bin, guard);
                            false
                        }
                    } else {
                        false
                    };
                    drop(_lock);
                    match &outcome {
                        Outcome::Inserted(_) => self.add_count(1, bin_count as isize, guard),
                        Outcome::Removed(_) => self.add_count(-1, 0, guard),
                        _ => {}
                    }
                    if needs_resize {
                        self.try_resize(guard);
                    }
                    return outcome;
                }
            }
        }
    }

    /// Walks a single list bin under the bin lock, applying `f`'s
    /// decision at the matching key (or at the tail, for a miss).
    /// Returns the outcome, the bin's node count after the operation,
    /// and whether a fresh node was appended (the treeify trigger).
    fn update_list<F>(
        head_ptr: &Atomic<Node<K, V>>,
        guard: &Guard,
        hash: u32,
        key: &Arc<K>,
        f: &mut F,
    ) -> (Outcome<V>, usize, bool)
    where
        F: FnMut(Option<&Arc<V>>) -> Action<V>,
    {
        let mut bin_count = 0usize;
        let mut prev: Option<Shared<'_, Node<K, V>>> = None;
        let mut cur = head_ptr.load(Ordering::Acquire, guard);
        loop {
            if cur.is_null() {
                return match f(None) {
                    Action::Insert(v) => {
                        let new_node = Owned::new(Node::new(hash, Arc::clone(key), Arc::clone(&v))).into_shared(guard);
                        match prev {
                            Some(p) => unsafe { p.deref().next.store(new_node, Ordering::Release) },
                            None => head_ptr.store(new_node, Ordering::Release),
                        }
                        (Outcome::Inserted(v), bin_count + 1, true)
                    }
                    Action::Leave | Action::Remove => (Outcome::Unchanged(None), bin_count, false),
                };
            }
            let node = unsafe { cur.deref() };
            bin_count += 1;
            if node.hash == hash && node.key.as_ref() == key.as_ref() {
                let old_val = node.value(guard);
                return match f(old_val.as_ref()) {
                    Action::Insert(v) => {
                        let old_shared = node.value.swap(Owned::new(Arc::clone(&v)), Ordering::AcqRel, guard);
                        if !old_shared.is_null() {
                            unsafe {
                                guard.defer_destroy(old_shared);
                            }
                        }
                        let outcome = match old_val {
                            Some(ov) => Outcome::Replaced(ov, v),
                            None => Outcome::Inserted(v),
                        };
                        (outcome, bin_count, false)
                    }
                    Action::Remove => {
                        let old_shared = node.value.swap(Owned::null(), Ordering::AcqRel, guard);
                        if !old_shared.is_null() {
                            unsafe {
                                guard.defer_destroy(old_shared);
                            }
                        }
                        let next = node.next.load(Ordering::Acquire, guard);
                        match prev {
                            Some(p) => unsafe { p.deref().next.store(next, Ordering::Release) },
                            None => head_ptr.store(next, Ordering::Release),
                        }
                        unsafe {
                            guard.defer_destroy(cur);
                        }
                        let outcome = match old_val {
                            Some(ov) => Outcome::Removed(ov),
                            None => Outcome::Unchanged(None),
                        };
                        (outcome, bin_count.saturating_sub(1), false)
                    }
                    Action::Leave => (Outcome::Unchanged(old_val), bin_count, false),
                };
            }
            prev = Some(cur);
            cur = node.next.load(Ordering::Acquire, guard);
        }
    }

    /// Removes every entry, bin by bin. Not an atomic snapshot: a
    /// concurrent reader may observe the map mid-clear.
    pub(crate) fn clear_all(&self) {
        let guard = &crossbeam_epoch::pin();
        let mut table = match self.current_table(guard) {
            Some(t) => t,
            None => return,
        };
        let mut idx = 0usize;
        loop {
            if idx >= table.len() {
                return;
            }
            let bin = &table[idx];
            let head = bin.head.load(Ordering::Acquire, guard);
            if head.is_null() {
                idx += 1;
                continue;
            }
            if let BinEntry::Moved(moved) = unsafe { head.deref() } {
                table = Table::clone(&moved.next_table);
                idx = 0;
                continue;
            }
            let _lock = bin.lock.lock();
            let head_again = bin.head.load(Ordering::Acquire, guard);
            if head_again.as_raw() != head.as_raw() {
                drop(_lock);
                continue;
            }
            let removed = live_count(unsafe { head_again.deref() }, guard);
            bin.head.store(Shared::null(), Ordering::Release);
            unsafe {
                guard.defer_destroy(head_again);
            }
            drop(_lock);
            if removed > 0 {
                self.add_count(-(removed as isize), -1, guard);
            }
            idx += 1;
        }
    }

    /// Builds a traverser over the table as it currently stands. Used
    /// by iterators and as the seed for bulk operations.
    pub(crate) fn traverser(&self) -> crate::concurrent_hash_map::cursor::Traverser<K, V> {
        let guard = &crossbeam_epoch::pin();
        let table = match self.current_table(guard) {
            Some(t) => t,
            None => new_table::<K, V>(0),
        };
        crate::concurrent_hash_map::cursor::Traverser::new(table)
    }
}

fn live_count<K, V>(entry: &BinEntry<K, V>, guard: &Guard) -> usize {
    match entry {
        BinEntry::Tree(tree) => tree.len(),
        BinEntry::Node(head_ptr) => {
            let mut n = 0;
            let mut cur = head_ptr.load(Ordering::Acquire, guard);
            while !cur.is_null() {
                let node = unsafe { cur.deref() };
                if node.value(guard).is_some() {
                    n += 1;
                }
                cur = node.next.load(Ordering::Acquire, guard);
            }
            n
        }
        BinEntry::Moved(_) => 0,
    }
}

/// Installs a freshly built list-bin chain at `new_table[idx]`,
/// preserving the entries' relative order. A no-op if `entries` is
/// empty (the new table's bin starts out `null` already).
fn install_list<K, V>(new_table: &Table<K, V>, idx: usize, entries: Vec<(u32, Arc<K>, Arc<V>)>, guard: &Guard) {
    if entries.is_empty() {
        return;
    }
    let mut next_shared = Shared::null();
    for (hash, key, value) in entries.into_iter().rev() {
        let node_shared = Owned::new(Node::new(hash, key, value)).into_shared(guard);
        unsafe {
            node_shared.deref().next.store(next_shared, Ordering::Relaxed);
        }
        next_shared = node_shared;
    }
    new_table[idx]
        .head
        .store(Owned::new(BinEntry::node_head(next_shared)), Ordering::Release);
}

/// Installs a resize-split half as either a list or a tree bin:
/// reconverts to a list if the split result falls below the untreeify
/// threshold, otherwise keeps it a tree.
fn install_split<K: Ord, V>(new_table: &Table<K, V>, idx: usize, entries: Vec<(u32, Arc<K>, Arc<V>)>, guard: &Guard) {
    if entries.is_empty() {
        return;
    }
    if entries.len() < UNTREEIFY_THRESHOLD {
        install_list(new_table, idx, entries, guard);
    } else {
        let tree = TreeBin::from_list(guard, entries);
        new_table[idx].head.store(Owned::new(BinEntry::Tree(tree)), Ordering::Release);
    }
}

/// Rounds a capacity hint up to a usable initial table size using the
/// `initialCapacity * 1.5 + 1` rule.
pub(crate) fn initial_table_size(hint: usize) -> usize {
    if hint == 0 {
        0
    } else {
        table_size_for(hint + (hint >> 1) + 1)
    }
}
