//! Per-bin lock (Component B): a single-word lock with a bounded spin
//! budget and a park/unpark fallback, used to serialize writers to one
//! bin while lookups on other bins proceed unimpeded.
//!
//! The source overlays this lock on spare bits of the bin head's hash
//! word; this keeps the two-state-plus-waiter state machine but gives
//! it its own word, parking on the lock's own address via
//! `parking_lot_core` rather than an object monitor.

use std::sync::atomic::{AtomicU8, Ordering};

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;
const LOCKED_WAITING: u8 = 3;

/// Bounded spin budget before a contender parks. The source spins
/// "roughly one cache-line worth of attempts on multi-CPU, zero on
/// single CPU" — most bins hold 0-1 entries, so contention is rare and
/// the spin almost always wins.
fn spin_budget() -> u32 {
    if std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        > 1
    {
        64
    } else {
        0
    }
}

/// A bin-head lock. `lock()` returns a guard that releases on drop,
/// waking a parked waiter if one announced itself.
pub(crate) struct BinLock {
    state: AtomicU8,
}

impl BinLock {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNLOCKED),
        }
    }

    pub(crate) fn lock(&self) -> BinLockGuard<'_> {
        let mut spins = spin_budget();
        loop {
            if self
                .state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return BinLockGuard { lock: self };
            }
            if spins > 0 {
                spins -= 1;
                std::hint::spin_loop();
                continue;
            }
            self.park_until_unlocked();
        }
    }

    /// Announce a waiter (CAS LOCKED -> LOCKED_WAITING) and park until
    /// the owner releases. Returns once the lock looks free again; the
    /// caller retries the acquiring CAS from the top of `lock()`.
    fn park_until_unlocked(&self) {
        loop {
            let cur = self.state.load(Ordering::Relaxed);
            if cur == UNLOCKED {
                return;
            }
            if cur == LOCKED
                && self
                    .state
                    .compare_exchange(LOCKED, LOCKED_WAITING, Ordering::AcqRel, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }
            let key = self as *const Self as usize;
            unsafe {
                parking_lot_core::park(
                    key,
                    || self.state.load(Ordering::Relaxed) == LOCKED_WAITING,
                    || {},
                    |_, _| {},
                    parking_lot_core::DEFAULT_PARK_TOKEN,
                    None,
                );
            }
            return;
        }
    }
}

impl Default for BinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a held bin lock. An owner that releases from
/// `LOCKED_WAITING` must wake every thread parked on the lock's
/// address — exactly one may have announced itself, but waking all of
/// them is simpler and still correct (spurious wakeups just re-loop).
pub(crate) struct BinLockGuard<'a> {
    lock: &'a BinLock,
}

impl Drop for BinLockGuard<'_> {
    fn drop(&mut self) {
        if self.lock.state.swap(UNLOCKED, Ordering::Release) == LOCKED_WAITING {
            let key = self.lock as *const BinLock as usize;
            unsafe {
                parking_lot_core::unpark_all(key, parking_lot_core::DEFAULT_UNPARK_TOKEN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn excludes_concurrent_owners() {
        let lock = Arc::new(BinLock::new());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let _guard = lock.lock();
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8000);
    }
}
