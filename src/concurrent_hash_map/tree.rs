//! Tree bins (Component D, spec.md §4.4/§4.5): degenerate-bin
//! mitigation via a red-black tree, guarded by the specialized
//! read/write lock in `tree_lock`.
//!
//! A tree bin is reached exactly like a list bin — through the table's
//! `Atomic<BinEntry>` — so ordinary map operations already hold the
//! outer bin lock (spec.md §4.3 "Tree root marker: delegate to the
//! tree-bin path") before touching it; tree *writes* are therefore
//! already serialized with each other. The tree-bin's own rwlock exists
//! only to coordinate with *lookups*, which never take the bin lock.
//!
//! The ordering tuple in spec.md §4.5 is `(spread hash, key class
//! identity, key total order)`. In this port every key in a given map
//! has the same concrete type, so the "key class identity" tier never
//! discriminates and collapses out of the comparison; the map requires
//! `K: Ord` so the remaining two tiers (hash, then `Ord::cmp`) are
//! always available rather than falling back to the source's
//! dual-subtree tie search (DESIGN.md records this as the resolution
//! of an Open Question).
//!
//! The rebalancing tree (`root`, reachable only from within a read or
//! write guard, which are mutually exclusive with each other) is a
//! plain intrusive structure addressed with raw pointers, exactly the
//! shape a single-writer tree takes in safe systems Rust. The
//! wait-free fallback chain (`first`) is a second, independently
//! linked list of ordinary lock-free `Node`s — the same type list bins
//! use — so a reader that loses the race for the tree-bin's read lock
//! can still walk it without any synchronization at all.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::{Guard, Owned};

use crate::concurrent_hash_map::node::Node;
use crate::concurrent_hash_map::tree_lock::TreeRwLock;

fn key_order<K: Ord>(ah: u32, ak: &K, bh: u32, bk: &K) -> CmpOrdering {
    ah.cmp(&bh).then_with(|| ak.cmp(bk))
}

struct TreeNode<K, V> {
    hash: u32,
    key: Arc<K>,
    value: Arc<V>,
    parent: *mut TreeNode<K, V>,
    left: *mut TreeNode<K, V>,
    right: *mut TreeNode<K, V>,
    red: bool,
}

impl<K, V> TreeNode<K, V> {
    fn new(hash: u32, key: Arc<K>, value: Arc<V>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            hash,
            key,
            value,
            parent: std::ptr::null_mut(),
            left: std::ptr::null_mut(),
            right: std::ptr::null_mut(),
            red: true,
        }))
    }
}

/// The outcome of a tree-bin mutation, mirroring the list-bin paths in
/// `base.rs` closely enough that both can feed the same counter/resize
/// bookkeeping.
pub(crate) enum TreeUpdate<V> {
    Inserted(Arc<V>),
    Replaced(Arc<V>, Arc<V>),
    Removed(Arc<V>),
    Noop,
}

pub(crate) struct TreeBin<K, V> {
    pub(crate) lock: TreeRwLock,
    root: std::cell::UnsafeCell<*mut TreeNode<K, V>>,
    pub(crate) first: crossbeam_epoch::Atomic<Node<K, V>>,
    first_tail: std::cell::UnsafeCell<*mut Node<K, V>>,
    count: std::sync::atomic::AtomicUsize,
}

// SAFETY: every access to `root`/`first_tail` happens under either the
// exclusive write guard or the shared read guard of `lock`, which
// together behave like an ordinary `RwLock`'s access discipline.
unsafe impl<K: Send, V: Send> Send for TreeBin<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for TreeBin<K, V> {}

impl<K: Ord, V> TreeBin<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            lock: TreeRwLock::new(),
            root: std::cell::UnsafeCell::new(std::ptr::null_mut()),
            first: crossbeam_epoch::Atomic::null(),
            first_tail: std::cell::UnsafeCell::new(std::ptr::null_mut()),
            count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Builds a tree bin from an existing list-bin chain's entries,
    /// preserving their encounter order on `first` (spec.md §4.4: "the
    /// original next-pointer chain is preserved"). Called while the
    /// caller already holds the bin lock for the list bin being
    /// converted.
    pub(crate) fn from_list(guard: &Guard, entries: Vec<(u32, Arc<K>, Arc<V>)>) -> Self {
        let bin = Self::new();
        let count = entries.len();
        for (hash, key, value) in entries {
            unsafe {
                bin.tree_insert(hash, Arc::clone(&key), Arc::clone(&value));
            }
            bin.append_first(guard, hash, key, value);
        }
        bin.count.store(count, Ordering::Relaxed);
        bin
    }

    /// Snapshots every `(hash, key, value)` triple currently on the
    /// wait-free fallback chain, in chain order. Used by the resize
    /// engine to split a tree bin into low/high runs (spec.md §4.6).
    pub(crate) fn entries(&self, guard: &Guard) -> Vec<(u32, Arc<K>, Arc<V>)> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.first.load(Ordering::Acquire, guard);
        while !cur.is_null() {
            let n = unsafe { cur.deref() };
            if let Some(v) = n.value(guard) {
                out.push((n.hash, Arc::clone(&n.key), v));
            }
            cur = n.next.load(Ordering::Acquire, guard);
        }
        out
    }

    fn append_first(&self, guard: &Guard, hash: u32, key: Arc<K>, value: Arc<V>) {
        let owned = Owned::new(Node::new(hash, key, value));
        let shared = owned.into_shared(guard);
        let raw = shared.as_raw() as *mut Node<K, V>;
        unsafe {
            let tail = *self.first_tail.get();
            if tail.is_null() {
                self.first.store(shared, Ordering::Release);
            } else {
                (*tail).next.store(shared, Ordering::Release);
            }
            *self.first_tail.get() = raw;
        }
    }

    fn unlink_first(&self, guard: &Guard, hash: u32, key: &K)
    where
        K: Eq,
    {
        unsafe {
            let mut prev: *mut Node<K, V> = std::ptr::null_mut();
            let mut cur_shared = self.first.load(Ordering::Acquire, guard);
            while !cur_shared.is_null() {
                let cur = cur_shared.deref();
                let next_shared = cur.next.load(Ordering::Acquire, guard);
                if cur.hash == hash && &*cur.key == key {
                    if prev.is_null() {
                        self.first.store(next_shared, Ordering::Release);
                    } else {
                        (*prev).next.store(next_shared, Ordering::Release);
                    }
                    if (*self.first_tail.get()) == cur_shared.as_raw() as *mut Node<K, V> {
                        *self.first_tail.get() = prev;
                    }
                    guard.defer_destroy(cur_shared);
                    return;
                }
                prev = cur_shared.as_raw() as *mut Node<K, V>;
                cur_shared = next_shared;
            }
        }
    }

    /// Shared-lock lookup with wait-free fallback (spec.md §4.5).
    pub(crate) fn get(&self, guard: &Guard, hash: u32, key: &K) -> Option<Arc<V>>
    where
        K: Eq,
    {
        if let Some(_read) = self.lock.try_read() {
            unsafe { self.find_raw(hash, key).map(|n| Arc::clone(&(*n).value)) }
        } else {
            self.get_from_first(guard, hash, key)
        }
    }

    fn get_from_first(&self, guard: &Guard, hash: u32, key: &K) -> Option<Arc<V>>
    where
        K: Eq,
    {
        let mut cur = self.first.load(Ordering::Acquire, guard);
        while !cur.is_null() {
            let n = unsafe { cur.deref() };
            if n.hash == hash && n.key.as_ref() == key {
                return n.value(guard);
            }
            cur = n.next.load(Ordering::Acquire, guard);
        }
        None
    }

    unsafe fn find_raw(&self, hash: u32, key: &K) -> Option<*mut TreeNode<K, V>> {
        let mut cur = *self.root.get();
        while !cur.is_null() {
            match key_order(hash, key, (*cur).hash, &(*cur).key) {
                CmpOrdering::Less => cur = (*cur).left,
                CmpOrdering::Greater => cur = (*cur).right,
                CmpOrdering::Equal => return Some(cur),
            }
        }
        None
    }

    /// General update primitive backing put/replace/remove/compute/merge
    /// on a tree bin: `f` receives the current value (if any) and
    /// returns the new one (`None` removes, `Some` of the same `Arc`
    /// leaves the entry unchanged without requiring `V: Clone`).
    pub(crate) fn update<F>(&self, guard: &Guard, hash: u32, key: Arc<K>, f: F) -> TreeUpdate<V>
    where
        K: Eq,
        F: FnOnce(Option<&Arc<V>>) -> Option<Arc<V>>,
    {
        let _write = self.lock.write();
        unsafe {
            match self.find_raw(hash, &key) {
                Some(existing) => {
                    let old = Arc::clone(&(*existing).value);
                    match f(Some(&old)) {
                        Some(new_value) => {
                            (*existing).value = Arc::clone(&new_value);
                            drop(_write);
                            self.update_first_value(guard, hash, &key, Arc::clone(&new_value));
                            TreeUpdate::Replaced(old, new_value)
                        }
                        None => {
                            self.tree_remove(existing);
                            self.count.fetch_sub(1, Ordering::AcqRel);
                            drop(_write);
                            self.unlink_first(guard, hash, &key);
                            TreeUpdate::Removed(old)
                        }
                    }
                }
                None => match f(None) {
                    Some(new_value) => {
                        self.tree_insert(hash, Arc::clone(&key), Arc::clone(&new_value));
                        self.count.fetch_add(1, Ordering::AcqRel);
                        drop(_write);
                        self.append_first(guard, hash, key, Arc::clone(&new_value));
                        TreeUpdate::Inserted(new_value)
                    }
                    None => TreeUpdate::Noop,
                },
            }
        }
    }

    fn update_first_value(&self, guard: &Guard, hash: u32, key: &K, value: Arc<V>)
    where
        K: Eq,
    {
        let mut cur = self.first.load(Ordering::Acquire, guard);
        while !cur.is_null() {
            let n = unsafe { cur.deref() };
            if n.hash == hash && n.key.as_ref() == key {
                let old_shared = n.value.swap(Owned::new(value), Ordering::AcqRel, guard);
                if !old_shared.is_null() {
                    unsafe {
                        guard.defer_destroy(old_shared);
                    }
                }
                return;
            }
            cur = n.next.load(Ordering::Acquire, guard);
        }
    }

    // ---- red-black tree mechanics (executed only while holding the
    // write lock, so plain raw-pointer mutation is sound) ----

    unsafe fn tree_insert(&self, hash: u32, key: Arc<K>, value: Arc<V>) {
        let root_ptr = self.root.get();
        let mut parent: *mut TreeNode<K, V> = std::ptr::null_mut();
        let mut cur = *root_ptr;
        let mut went_left = false;
        while !cur.is_null() {
            parent = cur;
            match key_order(hash, &key, (*cur).hash, &(*cur).key) {
                CmpOrdering::Less => {
                    went_left = true;
                    cur = (*cur).left;
                }
                _ => {
                    went_left = false;
                    cur = (*cur).right;
                }
            }
        }
        let node = TreeNode::new(hash, key, value);
        (*node).parent = parent;
        if parent.is_null() {
            *root_ptr = node;
        } else if went_left {
            (*parent).left = node;
        } else {
            (*parent).right = node;
        }
        self.fixup_insert(node);
    }

    unsafe fn rotate_left(&self, x: *mut TreeNode<K, V>) {
        let root_ptr = self.root.get();
        let y = (*x).right;
        (*x).right = (*y).left;
        if !(*y).left.is_null() {
            (*(*y).left).parent = x;
        }
        (*y).parent = (*x).parent;
        if (*x).parent.is_null() {
            *root_ptr = y;
        } else if x == (*(*x).parent).left {
            (*(*x).parent).left = y;
        } else {
            (*(*x).parent).right = y;
        }
        (*y).left = x;
        (*x).parent = y;
    }

    unsafe fn rotate_right(&self, x: *mut TreeNode<K, V>) {
        let root_ptr = self.root.get();
        let y = (*x).left;
        (*x).left = (*y).right;
        if !(*y).right.is_null() {
            (*(*y).right).parent = x;
        }
        (*y).parent = (*x).parent;
        if (*x).parent.is_null() {
            *root_ptr = y;
        } else if x == (*(*x).parent).right {
            (*(*x).parent).right = y;
        } else {
            (*(*x).parent).left = y;
        }
        (*y).right = x;
        (*x).parent = y;
    }

    unsafe fn fixup_insert(&self, mut z: *mut TreeNode<K, V>) {
        while !(*z).parent.is_null() && (*(*z).parent).red {
            let parent = (*z).parent;
            let grandparent = (*parent).parent;
            if grandparent.is_null() {
                break;
            }
            if parent == (*grandparent).left {
                let uncle = (*grandparent).right;
                if !uncle.is_null() && (*uncle).red {
                    (*parent).red = false;
                    (*uncle).red = false;
                    (*grandparent).red = true;
                    z = grandparent;
                } else {
                    if z == (*parent).right {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = (*z).parent;
                    let grandparent = (*parent).parent;
                    (*parent).red = false;
                    (*grandparent).red = true;
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = (*grandparent).left;
                if !uncle.is_null() && (*uncle).red {
                    (*parent).red = false;
                    (*uncle).red = false;
                    (*grandparent).red = true;
                    z = grandparent;
                } else {
                    if z == (*parent).left {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = (*z).parent;
                    let grandparent = (*parent).parent;
                    (*parent).red = false;
                    (*grandparent).red = true;
                    self.rotate_left(grandparent);
                }
            }
        }
        (*(*self.root.get())).red = false;
    }

    fn is_red(n: *mut TreeNode<K, V>) -> bool {
        !n.is_null() && unsafe { (*n).red }
    }

    unsafe fn transplant(&self, u: *mut TreeNode<K, V>, v: *mut TreeNode<K, V>) {
        let root_ptr = self.root.get();
        let parent = (*u).parent;
        if parent.is_null() {
            *root_ptr = v;
        } else if u == (*parent).left {
            (*parent).left = v;
        } else {
            (*parent).right = v;
        }
        if !v.is_null() {
            (*v).parent = parent;
        }
    }

    unsafe fn minimum(mut n: *mut TreeNode<K, V>) -> *mut TreeNode<K, V> {
        while !(*n).left.is_null() {
            n = (*n).left;
        }
        n
    }

    /// Removes and frees `z` from the tree, rebalancing to restore the
    /// red-black invariants (CLRS RB-DELETE, adapted to raw pointers).
    unsafe fn tree_remove(&self, z: *mut TreeNode<K, V>) {
        let root_ptr = self.root.get();
        let mut y = z;
        let mut y_original_red = (*y).red;
        let x: *mut TreeNode<K, V>;
        let x_parent: *mut TreeNode<K, V>;

        if (*z).left.is_null() {
            x = (*z).right;
            x_parent = (*z).parent;
            self.transplant(z, (*z).right);
        } else if (*z).right.is_null() {
            x = (*z).left;
            x_parent = (*z).parent;
            self.transplant(z, (*z).left);
        } else {
            y = Self::minimum((*z).right);
            y_original_red = (*y).red;
            x = (*y).right;
            if (*y).parent == z {
                x_parent = y;
                if !x.is_null() {
                    (*x).parent = y;
                }
            } else {
                x_parent = (*y).parent;
                self.transplant(y, (*y).right);
                (*y).right = (*z).right;
                (*(*y).right).parent = y;
            }
            self.transplant(z, y);
            (*y).left = (*z).left;
            (*(*y).left).parent = y;
            (*y).red = (*z).red;
        }

        if !y_original_red {
            self.fixup_delete(x, x_parent);
        }

        drop(Box::from_raw(z));
        if !(*root_ptr).is_null() {
            (*(*root_ptr)).red = false;
        }
    }

    /// `x` may be null (a deleted black leaf's replacement); `x_parent`
    /// carries its logical parent in that case since a null pointer
    /// cannot otherwise be walked back up.
    unsafe fn fixup_delete(&self, mut x: *mut TreeNode<K, V>, mut x_parent: *mut TreeNode<K, V>) {
        let root_ptr = self.root.get();
        while x != *root_ptr && !Self::is_red(x) {
            if x_parent.is_null() {
                break;
            }
            if x == (*x_parent).left {
                let mut w = (*x_parent).right;
                if Self::is_red(w) {
                    (*w).red = false;
                    (*x_parent).red = true;
                    self.rotate_left(x_parent);
                    w = (*x_parent).right;
                }
                if !Self::is_red((*w).left) && !Self::is_red((*w).right) {
                    (*w).red = true;
                    x = x_parent;
                    x_parent = (*x).parent;
                } else {
                    if !Self::is_red((*w).right) {
                        if !(*w).left.is_null() {
                            (*(*w).left).red = false;
                        }
                        (*w).red = true;
                        self.rotate_right(w);
                        w = (*x_parent).right;
                    }
                    (*w).red = (*x_parent).red;
                    (*x_parent).red = false;
                    if !(*w).right.is_null() {
                        (*(*w).right).red = false;
                    }
                    self.rotate_left(x_parent);
                    x = *root_ptr;
                    x_parent = std::ptr::null_mut();
                }
            } else {
                let mut w = (*x_parent).left;
                if Self::is_red(w) {
                    (*w).red = false;
                    (*x_parent).red = true;
                    self.rotate_right(x_parent);
                    w = (*x_parent).left;
                }
                if !Self::is_red((*w).left) && !Self::is_red((*w).right) {
                    (*w).red = true;
                    x = x_parent;
                    x_parent = (*x).parent;
                } else {
                    if !Self::is_red((*w).left) {
                        if !(*w).right.is_null() {
                            (*(*w).right).red = false;
                        }
                        (*w).red = true;
                        self.rotate_left(w);
                        w = (*x_parent).left;
                    }
                    (*w).red = (*x_parent).red;
                    (*x_parent).red = false;
                    if !(*w).left.is_null() {
                        (*(*w).left).red = false;
                    }
                    self.rotate_right(x_parent);
                    x = *root_ptr;
                    x_parent = std::ptr::null_mut();
                }
            }
        }
        if !x.is_null() {
            (*x).red = false;
        }
    }

    /// Quiescent-point validation used by tests (spec.md testable
    /// property 8): every red node has two black children, and every
    /// root-to-leaf path carries the same black-height.
    #[cfg(test)]
    fn validate_red_black(&self) -> bool {
        unsafe fn black_height<K, V>(n: *mut TreeNode<K, V>) -> Option<usize> {
            if n.is_null() {
                return Some(1);
            }
            unsafe {
                if (*n).red {
                    if TreeBin::<K, V>::is_red((*n).left) || TreeBin::<K, V>::is_red((*n).right) {
                        return None;
                    }
                }
                let l = black_height((*n).left)?;
                let r = black_height((*n).right)?;
                if l != r {
                    return None;
                }
                Some(l + if (*n).red { 0 } else { 1 })
            }
        }
        unsafe { black_height(*self.root.get()).is_some() }
    }
}

impl<K, V> Drop for TreeBin<K, V> {
    fn drop(&mut self) {
        unsafe fn free<K, V>(n: *mut TreeNode<K, V>) {
            if n.is_null() {
                return;
            }
            unsafe {
                free((*n).left);
                free((*n).right);
                drop(Box::from_raw(n));
            }
        }
        unsafe {
            free(*self.root.get());
            let guard = crossbeam_epoch::pin();
            let mut cur = self.first.load(Ordering::Acquire, &guard);
            self.first.store(crossbeam_epoch::Shared::null(), Ordering::Release);
            while !cur.is_null() {
                let next = cur.deref().next.load(Ordering::Acquire, &guard);
                guard.defer_destroy(cur);
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_remove_roundtrip() {
        let guard = crossbeam_epoch::pin();
        let bin: TreeBin<i32, i32> = TreeBin::new();
        for i in 0..200 {
            let res = bin.update(&guard, i as u32, Arc::new(i), |_| Some(Arc::new(i * i)));
            assert!(matches!(res, TreeUpdate::Inserted(_)));
        }
        assert!(bin.validate_red_black());
        for i in 0..200 {
            assert_eq!(bin.get(&guard, i as u32, &i), Some(Arc::new(i * i)));
        }
        for i in (0..200).step_by(2) {
            let res = bin.update(&guard, i as u32, Arc::new(i), |_| None);
            assert!(matches!(res, TreeUpdate::Removed(_)));
        }
        assert!(bin.validate_red_black());
        for i in 0..200 {
            let expected = if i % 2 == 0 { None } else { Some(Arc::new(i * i)) };
            assert_eq!(bin.get(&guard, i as u32, &i), expected);
        }
    }

    /// Every key shares one colliding hash (42) but the keys themselves
    /// are totally ordered, so the bin degenerates into a single tree
    /// rather than a single 100 000-node list. Every key must still be
    /// found by value, and the tree must stay red-black-valid
    /// throughout.
    #[test]
    fn colliding_hash_forces_tree_and_stays_balanced() {
        const N: i32 = 100_000;
        const COLLIDING_HASH: u32 = 42;

        let guard = crossbeam_epoch::pin();
        let bin: TreeBin<i32, i32> = TreeBin::new();
        for i in 0..N {
            let res = bin.update(&guard, COLLIDING_HASH, Arc::new(i), |_| Some(Arc::new(i)));
            assert!(matches!(res, TreeUpdate::Inserted(_)));
        }
        assert_eq!(bin.len(), N as usize);
        assert!(bin.validate_red_black());
        for i in 0..N {
            assert_eq!(bin.get(&guard, COLLIDING_HASH, &i), Some(Arc::new(i)));
        }
        assert_eq!(bin.get(&guard, COLLIDING_HASH, &(N + 1)), None);
    }
}
