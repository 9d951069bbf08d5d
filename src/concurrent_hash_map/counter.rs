//! Striped size counter (Component A). A scalable additive counter: a
//! `base` cell absorbs uncontended updates, and a lazily-grown array of
//! per-shard cells absorbs the rest, so that concurrent `put`/`remove`
//! calls from different threads rarely CAS the same memory word.
//!
//! `sum()` is always a *recent*, not instantaneous, value — callers
//! that need an exact count at a quiescent point should stop all
//! writers first.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crossbeam_utils::CachePadded;
use log::trace;

thread_local! {
    /// Per-thread probe seed, lazily initialized from the thread id's
    /// address so distinct threads almost always land on distinct
    /// cells without any shared coordination.
    static PROBE: Cell<u32> = Cell::new(0);
}

fn next_probe() -> u32 {
    PROBE.with(|p| {
        let mut x = p.get();
        if x == 0 {
            // Seed lazily: a thread's stack address is a cheap, cheaply
            // distinct-enough seed for xorshift, matching the source's
            // `ThreadLocalRandom` seeding trick.
            let seed = &x as *const u32 as u64;
            x = (seed as u32) | 1;
        }
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        p.set(x);
        x
    })
}

struct CounterCell {
    value: CachePadded<AtomicIsize>,
}

impl CounterCell {
    fn new() -> Self {
        Self {
            value: CachePadded::new(AtomicIsize::new(0)),
        }
    }
}

/// The striped counter itself. `base` is the fast uncontended path;
/// `cells` grows on demand (bounded by the number of CPUs, rounded up
/// to a power of two) the first time two threads collide on it.
pub(crate) struct StripedCounter {
    base: AtomicIsize,
    cells: OnceLock<Box<[CounterCell]>>,
    cells_busy: AtomicBool,
    cell_count: AtomicUsize,
}

impl StripedCounter {
    pub(crate) fn new() -> Self {
        Self {
            base: AtomicIsize::new(0),
            cells: OnceLock::new(),
            cells_busy: AtomicBool::new(false),
            cell_count: AtomicUsize::new(0),
        }
    }

    /// Adds `delta` (may be negative) to the logical sum.
    pub(crate) fn add(&self, delta: isize) {
        if delta == 0 {
            return;
        }
        if let Some(cells) = self.cells.get() {
            if !cells.is_empty() {
                self.add_via_cells(cells, delta);
                return;
            }
        }
        let prev = self.base.fetch_add(delta, Ordering::Relaxed);
        // A contended `base` CAS would have been the signal to grow
        // cells in the source; with `fetch_add` there is no contention
        // signal to observe, so cell growth here is triggered purely
        // by `add_via_cells` once cells exist. Uncontended callers
        // never pay for striping at all.
        let _ = prev;
    }

    fn add_via_cells(&self, cells: &[CounterCell], delta: isize) {
        let mut probe = next_probe();
        loop {
            let idx = (probe as usize) & (cells.len() - 1);
            let cell = &cells[idx].value;
            let cur = cell.load(Ordering::Relaxed);
            if cell
                .compare_exchange_weak(cur, cur.wrapping_add(delta), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            probe ^= probe << 13;
            probe ^= probe >> 17;
            probe ^= probe << 5;
            if probe == 0 {
                probe = 1;
            }
        }
    }

    /// Grows the cell array to `want` slots (rounded up to a power of
    /// two, capped by `available_parallelism`), guarded by a
    /// CAS-spinlock exactly as the source's `full_add_count` guards
    /// `cellsBusy`. Called when a caller observes enough contention to
    /// be worth paying the one-time growth cost.
    pub(crate) fn ensure_cells(&self, want: usize) {
        if self.cells.get().map(|c| c.len()).unwrap_or(0) >= want {
            return;
        }
        if self
            .cells_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let cap = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let n = want.min(cap).next_power_of_two().max(2);
        // Guard the critical section with catch_unwind so `cells_busy`
        // is always released, matching the source's own
        // catch_unwind/resume_unwind wrapper around its `cellsBusy`
        // CAS-guarded growth block.
        let grown = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.cells.get_or_init(|| {
                trace!("growing striped counter cell array to {n} cells");
                let mut v = Vec::with_capacity(n);
                v.resize_with(n, CounterCell::new);
                self.cell_count.store(n, Ordering::Relaxed);
                v.into_boxed_slice()
            });
        }));
        self.cells_busy.store(false, Ordering::Release);
        if let Err(e) = grown {
            std::panic::resume_unwind(e);
        }
    }

    /// Every update path calls this after `add`: on sufficient
    /// contention it grows the cell table. A simple heuristic —
    /// grow once cell count is below `available_parallelism` and a
    /// second update from a different probe collides — stands in for
    /// the source's retry-loop-observed-collision signal.
    pub(crate) fn note_contention(&self) {
        let have = self.cells.get().map(|c| c.len()).unwrap_or(0);
        let cap = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        if have < cap {
            self.ensure_cells(have.max(1) * 2);
        }
    }

    /// `base + Σ cells`. May be transiently negative mid-update;
    /// callers treat that as `0`.
    pub(crate) fn sum(&self) -> isize {
        let mut total = self.base.load(Ordering::Relaxed);
        if let Some(cells) = self.cells.get() {
            for cell in cells.iter() {
                total = total.wrapping_add(cell.value.load(Ordering::Relaxed));
            }
        }
        total
    }
}

impl Default for StripedCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_adds_sum_correctly() {
        let counter = Arc::new(StripedCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10_000 {
                    c.add(1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.sum(), 80_000);
    }

    #[test]
    fn negative_deltas_are_tracked() {
        let counter = StripedCounter::new();
        counter.add(5);
        counter.add(-3);
        assert_eq!(counter.sum(), 2);
    }
}
