//! Public surface (Component H, spec.md §6): the ergonomic API on top
//! of `base::ConcurrentHashMap`'s engine. Every method here computes a
//! spread hash, wraps the key/value in the `Arc`s the table stores, and
//! dispatches into `base::update_hashed`/`get_hashed` with the `Action`
//! that expresses its contract (spec.md §4.3).

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crate::concurrent_hash_map::base::{initial_table_size, Action, ConcurrentHashMap, Outcome};
use crate::concurrent_hash_map::bulk;
use crate::concurrent_hash_map::cursor::Traverser;
use crate::concurrent_hash_map::node::spread;
use crate::error::{MapError, MapResult};

std::thread_local! {
    /// Best-effort reentrancy guard for `compute`/`compute_if_absent`/
    /// `compute_if_present`/`merge`: spec.md §4.3 forbids a callback
    /// from calling back into the map for the same key on the same
    /// thread while that key's bin lock is held. Detected by tracking
    /// `(map identity, key hash)` pairs currently being computed on this
    /// thread; a collision fails loudly rather than deadlocking
    /// silently on the bin lock.
    static IN_FLIGHT: std::cell::RefCell<Vec<(usize, u64)>> = const { std::cell::RefCell::new(Vec::new()) };
}

struct ReentryGuard {
    map_id: usize,
    key_hash: u64,
}

impl ReentryGuard {
    fn enter(map_id: usize, key_hash: u64) -> MapResult<Self> {
        let collided = IN_FLIGHT.with(|cell| {
            let mut v = cell.borrow_mut();
            if v.iter().any(|&(m, k)| m == map_id && k == key_hash) {
                true
            } else {
                v.push((map_id, key_hash));
                false
            }
        });
        if collided {
            return Err(MapError::Reentrant);
        }
        Ok(Self { map_id, key_hash })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_FLIGHT.with(|cell| {
            let mut v = cell.borrow_mut();
            if let Some(pos) = v.iter().rposition(|&(m, k)| m == self.map_id && k == self.key_hash) {
                v.remove(pos);
            }
        });
    }
}

impl<K, V> ConcurrentHashMap<K, V, RandomState>
where
    K: Hash + Eq + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// A map with the default initial capacity (16), load factor
    /// (0.75), and concurrency level (1) — spec.md §6.
    pub fn new() -> Self {
        Self::with_initial_size_and_hasher(0, RandomState::new())
    }

    /// A map pre-sized to hold roughly `capacity` entries without an
    /// immediate resize.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_initial_size_and_hasher(initial_table_size(capacity), RandomState::new())
    }

    /// Entry point for the full option table (load factor, concurrency
    /// level hint, alternate hasher) — see
    /// [`Builder`](crate::concurrent_hash_map::config::Builder).
    pub fn builder() -> crate::concurrent_hash_map::config::Builder<RandomState> {
        crate::concurrent_hash_map::config::Builder::new()
    }
}

impl<K, V> Default for ConcurrentHashMap<K, V, RandomState>
where
    K: Hash + Eq + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> ConcurrentHashMap<K, V, S>
where
    K: Hash + Eq + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    fn spread_hash(&self, key: &K) -> u32 {
        spread(self.hash_builder.hash_one(key))
    }

    fn map_id(&self) -> usize {
        self as *const Self as usize
    }

    fn check_poisoned(&self) -> MapResult<()> {
        if self.poisoned.load(std::sync::atomic::Ordering::Acquire) {
            return Err(MapError::Poisoned("map poisoned by a prior internal invariant violation"));
        }
        Ok(())
    }

    /// Returns the value for `key`, or `None` if absent. Lock-free and
    /// wait-free except for chasing a resize forward at most once.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.get_hashed(self.spread_hash(key), key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// O(n): walks every live entry looking for a matching value.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let mut traverser = self.traverser();
        while let Some(entry) = traverser.advance() {
            if entry.value.as_ref() == value {
                return true;
            }
        }
        false
    }

    /// Inserts `value` for `key`, overwriting and returning any
    /// previous value.
    pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        let hash = self.spread_hash(&key);
        let value = Arc::new(value);
        let outcome = self.update_hashed(hash, Arc::new(key), false, |_old| Action::Insert(Arc::clone(&value)));
        match outcome {
            Outcome::Inserted(_) => None,
            Outcome::Replaced(old, _) => Some(old),
            Outcome::Removed(_) | Outcome::Unchanged(_) => unreachable!("put's action never leaves or removes"),
        }
    }

    /// `std`-collection-familiar alias for [`put`](Self::put).
    pub fn insert(&self, key: K, value: V) -> Option<Arc<V>> {
        self.put(key, value)
    }

    /// Inserts every pair from `iter`, overwriting existing keys.
    pub fn put_all<I: IntoIterator<Item = (K, V)>>(&self, iter: I) {
        for (k, v) in iter {
            self.put(k, v);
        }
    }

    /// Inserts `value` only if `key` is absent; returns the existing
    /// value otherwise. A lock-free scan checks for a hit before the
    /// locked path runs (spec.md §4.3).
    pub fn put_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
        if let Some(existing) = self.get(&key) {
            return Some(existing);
        }
        let hash = self.spread_hash(&key);
        let value = Arc::new(value);
        let outcome = self.update_hashed(hash, Arc::new(key), false, |old| match old {
            Some(_) => Action::Leave,
            None => Action::Insert(Arc::clone(&value)),
        });
        match outcome {
            Outcome::Inserted(_) => None,
            Outcome::Unchanged(old) => old,
            Outcome::Replaced(..) | Outcome::Removed(..) => unreachable!("put_if_absent never replaces or removes"),
        }
    }

    /// Updates `key`'s value only if it is already present.
    pub fn replace(&self, key: K, value: V) -> Option<Arc<V>> {
        let hash = self.spread_hash(&key);
        let value = Arc::new(value);
        let outcome = self.update_hashed(hash, Arc::new(key), false, |old| match old {
            Some(_) => Action::Insert(Arc::clone(&value)),
            None => Action::Leave,
        });
        match outcome {
            Outcome::Replaced(old, _) => Some(old),
            Outcome::Unchanged(_) => None,
            Outcome::Inserted(..) | Outcome::Removed(..) => unreachable!("replace never inserts or removes"),
        }
    }

    /// Updates `key`'s value only if it is present and currently equals
    /// `expected`.
    pub fn replace_if(&self, key: K, expected: &V, new_value: V) -> bool
    where
        V: PartialEq,
    {
        let hash = self.spread_hash(&key);
        let new_value = Arc::new(new_value);
        let outcome = self.update_hashed(hash, Arc::new(key), false, |old| match old {
            Some(cur) if cur.as_ref() == expected => Action::Insert(Arc::clone(&new_value)),
            _ => Action::Leave,
        });
        matches!(outcome, Outcome::Replaced(..))
    }

    /// Removes `key` unconditionally, returning its previous value.
    ///
    /// Takes `key` by value rather than by reference: a miss never
    /// stores it, but a lookup-only path still needs an `Arc<K>` to
    /// pass through the same `update_hashed` entry point `put` uses,
    /// and requiring `K: Clone` crate-wide just to support remove-by-
    /// reference isn't worth it.
    pub fn remove(&self, key: K) -> Option<Arc<V>> {
        let hash = self.spread_hash(&key);
        let outcome = self.update_hashed(hash, Arc::new(key), false, |old| match old {
            Some(_) => Action::Remove,
            None => Action::Leave,
        });
        match outcome {
            Outcome::Removed(old) => Some(old),
            Outcome::Unchanged(_) => None,
            Outcome::Inserted(..) | Outcome::Replaced(..) => unreachable!("remove never inserts or replaces"),
        }
    }

    /// Removes `key` only if its current value equals `expected`.
    pub fn remove_if(&self, key: K, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let hash = self.spread_hash(&key);
        let outcome = self.update_hashed(hash, Arc::new(key), false, |old| match old {
            Some(cur) if cur.as_ref() == expected => Action::Remove,
            _ => Action::Leave,
        });
        matches!(outcome, Outcome::Removed(_))
    }

    /// Invokes `f` exactly once with the current value for `key` (or
    /// `None` if absent); its return value becomes the new mapping, or
    /// removes the entry on `None`. Locks the bin — even an empty one —
    /// for the duration of the call (spec.md §4.3).
    ///
    /// # Errors
    /// Returns [`MapError::Reentrant`] if `f` (directly or indirectly)
    /// calls back into this map for the same key on the same thread.
    pub fn compute<F>(&self, key: K, f: F) -> MapResult<Option<Arc<V>>>
    where
        F: FnOnce(&K, Option<&Arc<V>>) -> Option<V>,
    {
        self.check_poisoned()?;
        let key_hash = self.hash_builder.hash_one(&key);
        let _reentry = ReentryGuard::enter(self.map_id(), key_hash)?;
        let hash = spread(key_hash);
        let key = Arc::new(key);
        let mut f = Some(f);
        let key_for_fn = Arc::clone(&key);
        let outcome = self.update_hashed(hash, key, true, move |old| {
            let f = f.take().expect("compute callback invoked more than once");
            match f(&key_for_fn, old) {
                Some(v) => Action::Insert(Arc::new(v)),
                None => Action::Remove,
            }
        });
        Ok(match outcome {
            Outcome::Inserted(v) | Outcome::Replaced(_, v) => Some(v),
            Outcome::Removed(_) | Outcome::Unchanged(_) => None,
        })
    }

    /// Invokes `f` only if `key` is absent, publishing its result
    /// (unless `f` returns `None`, which leaves the map unchanged and
    /// does not increment the counter). Executes `f` at most once even
    /// under concurrent contention for the same key (spec.md scenario
    /// S5).
    pub fn compute_if_absent<F>(&self, key: K, f: F) -> MapResult<Arc<V>>
    where
        F: FnOnce(&K) -> V,
    {
        self.check_poisoned()?;
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let key_hash = self.hash_builder.hash_one(&key);
        let _reentry = ReentryGuard::enter(self.map_id(), key_hash)?;
        let hash = spread(key_hash);
        let key = Arc::new(key);
        let mut f = Some(f);
        let key_for_fn = Arc::clone(&key);
        let outcome = self.update_hashed(hash, key, true, move |old| match old {
            Some(existing) => {
                f.take();
                Action::Insert(Arc::clone(existing))
            }
            None => {
                let f = f.take().expect("compute_if_absent callback invoked more than once");
                Action::Insert(Arc::new(f(&key_for_fn)))
            }
        });
        Ok(match outcome {
            Outcome::Inserted(v) => v,
            Outcome::Unchanged(Some(v)) => v,
            _ => unreachable!("compute_if_absent always installs or finds a value"),
        })
    }

    /// Invokes `f` only if `key` is present; `None` removes the entry.
    pub fn compute_if_present<F>(&self, key: K, f: F) -> MapResult<Option<Arc<V>>>
    where
        F: FnOnce(&K, &Arc<V>) -> Option<V>,
    {
        self.check_poisoned()?;
        let key_hash = self.hash_builder.hash_one(&key);
        let _reentry = ReentryGuard::enter(self.map_id(), key_hash)?;
        let hash = spread(key_hash);
        let key = Arc::new(key);
        let mut f = Some(f);
        let key_for_fn = Arc::clone(&key);
        let outcome = self.update_hashed(hash, key, true, move |old| match old {
            None => Action::Leave,
            Some(existing) => {
                let f = f.take().expect("compute_if_present callback invoked more than once");
                match f(&key_for_fn, existing) {
                    Some(v) => Action::Insert(Arc::new(v)),
                    None => Action::Remove,
                }
            }
        });
        Ok(match outcome {
            Outcome::Inserted(v) | Outcome::Replaced(_, v) => Some(v),
            Outcome::Removed(_) | Outcome::Unchanged(_) => None,
        })
    }

    /// If `key` is absent, installs `value`; otherwise replaces it with
    /// `f(old, value)`, or removes it if `f` returns `None`.
    pub fn merge<F>(&self, key: K, value: V, f: F) -> MapResult<Option<Arc<V>>>
    where
        F: FnOnce(&Arc<V>, V) -> Option<V>,
    {
        self.check_poisoned()?;
        let key_hash = self.hash_builder.hash_one(&key);
        let _reentry = ReentryGuard::enter(self.map_id(), key_hash)?;
        let hash = spread(key_hash);
        let mut value = Some(value);
        let mut f = Some(f);
        let outcome = self.update_hashed(hash, Arc::new(key), true, move |old| match old {
            None => Action::Insert(Arc::new(value.take().expect("merge value consumed twice"))),
            Some(existing) => {
                let f = f.take().expect("merge callback invoked more than once");
                let v = value.take().expect("merge value consumed twice");
                match f(existing, v) {
                    Some(merged) => Action::Insert(Arc::new(merged)),
                    None => Action::Remove,
                }
            }
        });
        Ok(match outcome {
            Outcome::Inserted(v) | Outcome::Replaced(_, v) => Some(v),
            Outcome::Removed(_) | Outcome::Unchanged(_) => None,
        })
    }

    /// Removes every entry. Not an atomic snapshot: concurrent readers
    /// may observe a partially-cleared map (spec.md Non-goals).
    pub fn clear(&self) {
        self.clear_all();
    }

    /// A recent, not necessarily instantaneous, entry count (spec.md
    /// §4.7). Aliases `mapping_count` truncated to `usize`.
    pub fn len(&self) -> usize {
        self.mapping_count().min(usize::MAX as u64) as usize
    }

    /// `std`-collection-familiar alias for [`len`](Self::len).
    pub fn size(&self) -> usize {
        self.len()
    }

    /// Same value as `len`, but widened to 64 bits and saturating
    /// rather than truncating on overflow (spec.md §6).
    pub fn mapping_count(&self) -> u64 {
        u64::try_from(self.approx_count()).unwrap_or(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.approx_count() <= 0
    }

    pub fn iter(&self) -> Iter<K, V> {
        Iter { traverser: self.traverser() }
    }

    pub fn keys(&self) -> Keys<K, V> {
        Keys { traverser: self.traverser() }
    }

    pub fn values(&self) -> Values<K, V> {
        Values { traverser: self.traverser() }
    }

    /// Sequentially (or, with `pool`, in parallel) visits every live
    /// entry. See [`bulk`](crate::concurrent_hash_map::bulk) for the
    /// splittable-traversal mechanics (spec.md §4.9).
    pub fn for_each(&self, pool: Option<&rayon::ThreadPool>, action: impl Fn(&Arc<K>, &Arc<V>) + Sync) {
        bulk::for_each_entry(self.traverser(), pool, &action);
    }

    pub fn for_each_key(&self, pool: Option<&rayon::ThreadPool>, action: impl Fn(&Arc<K>) + Sync) {
        bulk::for_each_key(self.traverser(), pool, &action);
    }

    pub fn for_each_value(&self, pool: Option<&rayon::ThreadPool>, action: impl Fn(&Arc<V>) + Sync) {
        bulk::for_each_value(self.traverser(), pool, &action);
    }

    /// Applies `f` to every entry until one returns `Some`, then
    /// returns that result. Ordering across entries is unspecified;
    /// once any task finds a result, others stop as soon as they next
    /// check (best-effort, spec.md §4.9).
    pub fn search<R: Send>(
        &self,
        pool: Option<&rayon::ThreadPool>,
        f: impl Fn(&Arc<K>, &Arc<V>) -> Option<R> + Sync,
    ) -> Option<R> {
        bulk::search_entries(self.traverser(), pool, &f)
    }

    pub fn search_keys<R: Send>(&self, pool: Option<&rayon::ThreadPool>, f: impl Fn(&Arc<K>) -> Option<R> + Sync) -> Option<R> {
        bulk::search_keys(self.traverser(), pool, &f)
    }

    pub fn search_values<R: Send>(
        &self,
        pool: Option<&rayon::ThreadPool>,
        f: impl Fn(&Arc<V>) -> Option<R> + Sync,
    ) -> Option<R> {
        bulk::search_values(self.traverser(), pool, &f)
    }

    /// Reference reduce: `transform` maps each entry to an `Option<R>`
    /// (skipping `None`s), folded pairwise by `combine`. `combine` must
    /// be associative and commutative, since leaf order and pairing are
    /// unspecified.
    pub fn reduce<R: Send>(
        &self,
        pool: Option<&rayon::ThreadPool>,
        transform: impl Fn(&Arc<K>, &Arc<V>) -> Option<R> + Sync,
        combine: impl Fn(R, R) -> R + Sync,
    ) -> Option<R> {
        bulk::reduce_entries(self.traverser(), pool, &transform, &combine)
    }

    pub fn reduce_keys<R: Send>(
        &self,
        pool: Option<&rayon::ThreadPool>,
        transform: impl Fn(&Arc<K>) -> Option<R> + Sync,
        combine: impl Fn(R, R) -> R + Sync,
    ) -> Option<R> {
        bulk::reduce_keys(self.traverser(), pool, &transform, &combine)
    }

    pub fn reduce_values<R: Send>(
        &self,
        pool: Option<&rayon::ThreadPool>,
        transform: impl Fn(&Arc<V>) -> Option<R> + Sync,
        combine: impl Fn(R, R) -> R + Sync,
    ) -> Option<R> {
        bulk::reduce_values(self.traverser(), pool, &transform, &combine)
    }

    /// Primitive `i64` reduce with an explicit identity (no null-skip;
    /// spec.md §4.9's "long" arity).
    pub fn reduce_values_to_i64(
        &self,
        pool: Option<&rayon::ThreadPool>,
        identity: i64,
        transform: impl Fn(&Arc<V>) -> i64 + Sync,
        combine: impl Fn(i64, i64) -> i64 + Sync,
    ) -> i64 {
        bulk::reduce_values_to_i64(self.traverser(), pool, identity, &transform, &combine)
    }

    /// Primitive `f64` reduce with an explicit identity ("double" arity).
    pub fn reduce_values_to_f64(
        &self,
        pool: Option<&rayon::ThreadPool>,
        identity: f64,
        transform: impl Fn(&Arc<V>) -> f64 + Sync,
        combine: impl Fn(f64, f64) -> f64 + Sync,
    ) -> f64 {
        bulk::reduce_values_to_f64(self.traverser(), pool, identity, &transform, &combine)
    }

    /// Primitive `i32` reduce with an explicit identity ("int" arity).
    pub fn reduce_values_to_i32(
        &self,
        pool: Option<&rayon::ThreadPool>,
        identity: i32,
        transform: impl Fn(&Arc<V>) -> i32 + Sync,
        combine: impl Fn(i32, i32) -> i32 + Sync,
    ) -> i32 {
        bulk::reduce_values_to_i32(self.traverser(), pool, identity, &transform, &combine)
    }
}

pub struct Iter<K, V> {
    traverser: Traverser<K, V>,
}

impl<K, V> Iterator for Iter<K, V> {
    type Item = (Arc<K>, Arc<V>);
    fn next(&mut self) -> Option<Self::Item> {
        self.traverser.advance().map(|e| (e.key, e.value))
    }
}

pub struct Keys<K, V> {
    traverser: Traverser<K, V>,
}

impl<K, V> Iterator for Keys<K, V> {
    type Item = Arc<K>;
    fn next(&mut self) -> Option<Self::Item> {
        self.traverser.advance().map(|e| e.key)
    }
}

pub struct Values<K, V> {
    traverser: Traverser<K, V>,
}

impl<K, V> Iterator for Values<K, V> {
    type Item = Arc<V>;
    fn next(&mut self) -> Option<Self::Item> {
        self.traverser.advance().map(|e| e.value)
    }
}

impl<K, V, S> fmt::Debug for ConcurrentHashMap<K, V, S>
where
    K: Hash + Eq + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentHashMap").field("len", &self.len()).finish_non_exhaustive()
    }
}

/// `std`-collection-familiar alias for [`put_all`](ConcurrentHashMap::put_all).
impl<K, V, S> Extend<(K, V)> for ConcurrentHashMap<K, V, S>
where
    K: Hash + Eq + Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.put_all(iter);
    }
}
