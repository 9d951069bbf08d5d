//! Parallel bulk operations (Component G's consumer): `for_each`/
//! `search`/`reduce` over keys, values, and entries, built on
//! [`Traverser::split`](crate::concurrent_hash_map::cursor::Traverser::split)
//! fork-join recursion through `rayon::join` rather than a hand-rolled
//! thread pool.
//!
//! A cursor stops splitting once its assigned bin range is smaller than
//! `parallelism * LEAF_FACTOR` bins — below that, fork-join overhead
//! outweighs the benefit, so the remainder is walked on one thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::concurrent_hash_map::cursor::{Traverser, VisitedEntry};

const LEAF_FACTOR: usize = 8;

fn leaf_threshold() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) * LEAF_FACTOR
}

fn should_split<K, V>(parallel: bool, traverser: &Traverser<K, V>) -> bool {
    parallel && traverser.remaining_bins() > leaf_threshold()
}

fn for_each_recurse<K, V, A>(mut traverser: Traverser<K, V>, parallel: bool, visit: &A)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: Fn(&VisitedEntry<K, V>) + Sync,
{
    if should_split(parallel, &traverser) {
        if let Some(right) = traverser.split() {
            rayon::join(
                || for_each_recurse(traverser, parallel, visit),
                || for_each_recurse(right, parallel, visit),
            );
            return;
        }
    }
    while let Some(entry) = traverser.advance() {
        visit(&entry);
    }
}

fn run_for_each<K, V, A>(traverser: Traverser<K, V>, pool: Option<&rayon::ThreadPool>, visit: A)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: Fn(&VisitedEntry<K, V>) + Sync,
{
    match pool {
        Some(pool) => pool.install(|| for_each_recurse(traverser, true, &visit)),
        None => for_each_recurse(traverser, false, &visit),
    }
}

pub(crate) fn for_each_entry<K, V>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    action: &(impl Fn(&Arc<K>, &Arc<V>) + Sync),
) where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_for_each(traverser, pool, |entry| action(&entry.key, &entry.value));
}

pub(crate) fn for_each_key<K, V>(traverser: Traverser<K, V>, pool: Option<&rayon::ThreadPool>, action: &(impl Fn(&Arc<K>) + Sync))
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_for_each(traverser, pool, |entry| action(&entry.key));
}

pub(crate) fn for_each_value<K, V>(traverser: Traverser<K, V>, pool: Option<&rayon::ThreadPool>, action: &(impl Fn(&Arc<V>) + Sync))
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_for_each(traverser, pool, |entry| action(&entry.value));
}

/// Best-effort early exit: once any branch finds a result it flips
/// `found`, and siblings stop as soon as they next check it — a branch
/// already mid-way through its own leaf loop still finishes its
/// current entry first.
fn search_recurse<K, V, R, A>(mut traverser: Traverser<K, V>, parallel: bool, found: &AtomicBool, f: &A) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: Send,
    A: Fn(&VisitedEntry<K, V>) -> Option<R> + Sync,
{
    if should_split(parallel, &traverser) {
        if let Some(right) = traverser.split() {
            let (left, right) = rayon::join(
                || search_recurse(traverser, parallel, found, f),
                || search_recurse(right, parallel, found, f),
            );
            return left.or(right);
        }
    }
    while !found.load(Ordering::Relaxed) {
        let entry = match traverser.advance() {
            Some(entry) => entry,
            None => break,
        };
        if let Some(result) = f(&entry) {
            found.store(true, Ordering::Relaxed);
            return Some(result);
        }
    }
    None
}

fn run_search<K, V, R, A>(traverser: Traverser<K, V>, pool: Option<&rayon::ThreadPool>, f: A) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: Send,
    A: Fn(&VisitedEntry<K, V>) -> Option<R> + Sync,
{
    let found = AtomicBool::new(false);
    match pool {
        Some(pool) => pool.install(|| search_recurse(traverser, true, &found, &f)),
        None => search_recurse(traverser, false, &found, &f),
    }
}

pub(crate) fn search_entries<K, V, R: Send>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    f: &(impl Fn(&Arc<K>, &Arc<V>) -> Option<R> + Sync),
) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_search(traverser, pool, |entry| f(&entry.key, &entry.value))
}

pub(crate) fn search_keys<K, V, R: Send>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    f: &(impl Fn(&Arc<K>) -> Option<R> + Sync),
) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_search(traverser, pool, |entry| f(&entry.key))
}

pub(crate) fn search_values<K, V, R: Send>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    f: &(impl Fn(&Arc<V>) -> Option<R> + Sync),
) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_search(traverser, pool, |entry| f(&entry.value))
}

/// Reference reduce: entries whose `transform` returns `None` are
/// skipped entirely, so an all-`None` traversal yields `None` rather
/// than some identity value — there isn't a generic one to pick.
/// `combine` must be associative and commutative: the pairing order
/// fork-join produces is otherwise unspecified.
fn reduce_recurse<K, V, R, T, C>(mut traverser: Traverser<K, V>, parallel: bool, transform: &T, combine: &C) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: Send,
    T: Fn(&VisitedEntry<K, V>) -> Option<R> + Sync,
    C: Fn(R, R) -> R + Sync,
{
    if should_split(parallel, &traverser) {
        if let Some(right) = traverser.split() {
            let (left, right) = rayon::join(
                || reduce_recurse(traverser, parallel, transform, combine),
                || reduce_recurse(right, parallel, transform, combine),
            );
            return match (left, right) {
                (Some(a), Some(b)) => Some(combine(a, b)),
                (Some(a), None) | (None, Some(a)) => Some(a),
                (None, None) => None,
            };
        }
    }
    let mut acc: Option<R> = None;
    while let Some(entry) = traverser.advance() {
        if let Some(value) = transform(&entry) {
            acc = Some(match acc {
                Some(prev) => combine(prev, value),
                None => value,
            });
        }
    }
    acc
}

fn run_reduce<K, V, R, T, C>(traverser: Traverser<K, V>, pool: Option<&rayon::ThreadPool>, transform: T, combine: C) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: Send,
    T: Fn(&VisitedEntry<K, V>) -> Option<R> + Sync,
    C: Fn(R, R) -> R + Sync,
{
    match pool {
        Some(pool) => pool.install(|| reduce_recurse(traverser, true, &transform, &combine)),
        None => reduce_recurse(traverser, false, &transform, &combine),
    }
}

pub(crate) fn reduce_entries<K, V, R: Send>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    transform: &(impl Fn(&Arc<K>, &Arc<V>) -> Option<R> + Sync),
    combine: &(impl Fn(R, R) -> R + Sync),
) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_reduce(traverser, pool, |entry| transform(&entry.key, &entry.value), combine)
}

pub(crate) fn reduce_keys<K, V, R: Send>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    transform: &(impl Fn(&Arc<K>) -> Option<R> + Sync),
    combine: &(impl Fn(R, R) -> R + Sync),
) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_reduce(traverser, pool, |entry| transform(&entry.key), combine)
}

pub(crate) fn reduce_values<K, V, R: Send>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    transform: &(impl Fn(&Arc<V>) -> Option<R> + Sync),
    combine: &(impl Fn(R, R) -> R + Sync),
) -> Option<R>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_reduce(traverser, pool, |entry| transform(&entry.value), combine)
}

/// Primitive reduce variants (int/long/double arities): unlike the
/// reference form, every entry contributes via `identity`, so there is
/// no `Option` to thread through.
fn reduce_primitive_recurse<K, V, N, T, C>(mut traverser: Traverser<K, V>, parallel: bool, identity: N, transform: &T, combine: &C) -> N
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    N: Copy + Send,
    T: Fn(&VisitedEntry<K, V>) -> N + Sync,
    C: Fn(N, N) -> N + Sync,
{
    if should_split(parallel, &traverser) {
        if let Some(right) = traverser.split() {
            let (left, right) = rayon::join(
                || reduce_primitive_recurse(traverser, parallel, identity, transform, combine),
                || reduce_primitive_recurse(right, parallel, identity, transform, combine),
            );
            return combine(left, right);
        }
    }
    let mut acc = identity;
    while let Some(entry) = traverser.advance() {
        acc = combine(acc, transform(&entry));
    }
    acc
}

fn run_reduce_primitive<K, V, N, T, C>(traverser: Traverser<K, V>, pool: Option<&rayon::ThreadPool>, identity: N, transform: T, combine: C) -> N
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    N: Copy + Send,
    T: Fn(&VisitedEntry<K, V>) -> N + Sync,
    C: Fn(N, N) -> N + Sync,
{
    match pool {
        Some(pool) => pool.install(|| reduce_primitive_recurse(traverser, true, identity, &transform, &combine)),
        None => reduce_primitive_recurse(traverser, false, identity, &transform, &combine),
    }
}

pub(crate) fn reduce_values_to_i64<K, V>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    identity: i64,
    transform: &(impl Fn(&Arc<V>) -> i64 + Sync),
    combine: &(impl Fn(i64, i64) -> i64 + Sync),
) -> i64
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_reduce_primitive(traverser, pool, identity, |entry| transform(&entry.value), combine)
}

pub(crate) fn reduce_values_to_f64<K, V>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    identity: f64,
    transform: &(impl Fn(&Arc<V>) -> f64 + Sync),
    combine: &(impl Fn(f64, f64) -> f64 + Sync),
) -> f64
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_reduce_primitive(traverser, pool, identity, |entry| transform(&entry.value), combine)
}

pub(crate) fn reduce_values_to_i32<K, V>(
    traverser: Traverser<K, V>,
    pool: Option<&rayon::ThreadPool>,
    identity: i32,
    transform: &(impl Fn(&Arc<V>) -> i32 + Sync),
    combine: &(impl Fn(i32, i32) -> i32 + Sync),
) -> i32
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    run_reduce_primitive(traverser, pool, identity, |entry| transform(&entry.value), combine)
}
