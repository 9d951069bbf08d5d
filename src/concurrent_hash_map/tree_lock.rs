//! The tree bin's specialized read/write lock (part of Component D,
//! spec.md §4.5). The distinctive property: a reader that cannot
//! acquire the read lock does not wait — it falls back to walking the
//! tree bin's linear `first` chain instead. Writers do wait, since the
//! source's writer path is already serialized by the outer bin lock and
//! only needs to drain in-flight readers.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

const WRITER: isize = 1;

pub(crate) struct TreeRwLock {
    /// 0 = free. Positive = a writer holds the lock (always exactly 1
    /// under this crate's usage, since tree writers are additionally
    /// serialized by the bin lock). Negative = `-state` readers hold it.
    state: AtomicIsize,
    /// Set by a writer about to park, cleared by the reader whose
    /// release drains the last shared hold.
    writer_waiting: AtomicBool,
}

impl TreeRwLock {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicIsize::new(0),
            writer_waiting: AtomicBool::new(false),
        }
    }

    /// Non-blocking shared acquire. Returns `None` if a writer is
    /// present; the caller must not wait on it.
    pub(crate) fn try_read(&self) -> Option<TreeReadGuard<'_>> {
        loop {
            let s = self.state.load(Ordering::Acquire);
            if s > 0 {
                return None;
            }
            if self
                .state
                .compare_exchange_weak(s, s - 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(TreeReadGuard { lock: self });
            }
        }
    }

    /// Exclusive acquire. Spins briefly, then parks until the last
    /// reader's release wakes it.
    pub(crate) fn write(&self) -> TreeWriteGuard<'_> {
        let mut spins = 64u32;
        loop {
            if self
                .state
                .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return TreeWriteGuard { lock: self };
            }
            if spins > 0 {
                spins -= 1;
                std::hint::spin_loop();
                continue;
            }
            self.writer_waiting.store(true, Ordering::Release);
            let key = self as *const Self as usize;
            unsafe {
                parking_lot_core::park(
                    key,
                    || self.state.load(Ordering::Relaxed) < 0 && self.writer_waiting.load(Ordering::Relaxed),
                    || {},
                    |_, _| {},
                    parking_lot_core::DEFAULT_PARK_TOKEN,
                    None,
                );
            }
        }
    }
}

impl Default for TreeRwLock {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct TreeReadGuard<'a> {
    lock: &'a TreeRwLock,
}

impl Drop for TreeReadGuard<'_> {
    fn drop(&mut self) {
        let prev = self.lock.state.fetch_add(1, Ordering::Release);
        if prev == -1 && self.lock.writer_waiting.swap(false, Ordering::AcqRel) {
            let key = self.lock as *const TreeRwLock as usize;
            unsafe {
                parking_lot_core::unpark_all(key, parking_lot_core::DEFAULT_UNPARK_TOKEN);
            }
        }
    }
}

pub(crate) struct TreeWriteGuard<'a> {
    lock: &'a TreeRwLock,
}

impl Drop for TreeWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_share_writer_excludes() {
        let lock = TreeRwLock::new();
        let r1 = lock.try_read().unwrap();
        let r2 = lock.try_read().unwrap();
        drop(r1);
        drop(r2);
        let w = lock.write();
        assert!(lock.try_read().is_none());
        drop(w);
        assert!(lock.try_read().is_some());
    }
}
