// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Read-mostly lock with distributed reader tracking.
//!
//! Guards the per-head hook lists: every dispatch takes shared mode, every
//! add/remove takes exclusive mode. Readers on the fast path touch a
//! cache-padded slot counter picked per thread instead of one shared
//! counter, so concurrent dispatch threads do not bounce a single cache
//! line between cores.
//!
//! # Protocol
//!
//! - Shared: increment the thread's slot counter, then check the writer
//!   flag. If a writer is pending, back out and wait it out. A thread that
//!   already holds shared mode re-enters without the back-out check, so a
//!   filter may re-dispatch on its own head mid-walk.
//! - Exclusive: claim the writer flag, then wait until every slot counter
//!   drains to zero. Readers arriving after the flag back out, so the
//!   writer is not starved.
//!
//! Shared acquisition threads a caller-allocated [`ReadTracker`] through the
//! matching release; the tracker records the reader's slot, so reader
//! identity needs no allocation of its own.

use std::cell::{RefCell, UnsafeCell};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam::utils::{Backoff, CachePadded};

/// Number of reader slots (power of two). Threads map onto slots round-robin,
/// so this bounds fast-path spread, not the number of concurrent readers.
const READER_SLOTS: usize = 32;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Reader slot for this thread, assigned on first use.
    static READER_SLOT: usize = NEXT_SLOT.fetch_add(1, Ordering::Relaxed) & (READER_SLOTS - 1);

    /// Locks this thread currently holds in shared mode: (lock id, depth).
    static HELD_SHARED: RefCell<Vec<(u64, u32)>> = const { RefCell::new(Vec::new()) };
}

/// Caller-allocated token for one shared acquisition.
///
/// Records which reader slot the acquisition landed on so the release
/// decrements the same counter. Reusable across acquisitions; tied to the
/// acquiring thread.
#[derive(Debug)]
pub struct ReadTracker {
    slot: usize,
    // Keeps trackers (and the guards borrowing them) on their thread.
    _thread_bound: PhantomData<*mut ()>,
}

impl ReadTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: 0,
            _thread_bound: PhantomData,
        }
    }
}

impl Default for ReadTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-mostly lock.
///
/// Many shared holders (dispatch) or one exclusive holder (add/remove),
/// never both. The exclusive side observes quiescence of every reader slot
/// before it is granted.
pub struct RmLock<T> {
    id: u64,
    writer: AtomicBool,
    readers: [CachePadded<AtomicUsize>; READER_SLOTS],
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is mediated by the reader/writer protocol:
// shared guards only hand out `&T` and the exclusive guard is unique, with
// the writer draining all reader slots before touching the data.
unsafe impl<T: Send> Send for RmLock<T> {}
unsafe impl<T: Send + Sync> Sync for RmLock<T> {}

impl<T> RmLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            writer: AtomicBool::new(false),
            readers: std::array::from_fn(|_| CachePadded::new(AtomicUsize::new(0))),
            data: UnsafeCell::new(data),
        }
    }

    fn held_depth(&self) -> u32 {
        HELD_SHARED.with(|held| {
            held.borrow()
                .iter()
                .find(|&&(id, _)| id == self.id)
                .map_or(0, |&(_, depth)| depth)
        })
    }

    fn note_acquire(&self) {
        HELD_SHARED.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(entry) = held.iter_mut().find(|(id, _)| *id == self.id) {
                entry.1 += 1;
            } else {
                held.push((self.id, 1));
            }
        });
    }

    fn note_release(&self) {
        HELD_SHARED.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().position(|&(id, _)| id == self.id) {
                held[pos].1 -= 1;
                if held[pos].1 == 0 {
                    held.swap_remove(pos);
                }
            }
        });
    }

    /// Acquire shared mode.
    ///
    /// Wait-free when no writer is pending: one increment on the thread's
    /// slot counter plus one flag load. Recursion-safe.
    #[inline]
    pub fn read<'a>(&'a self, tracker: &'a mut ReadTracker) -> RmReadGuard<'a, T> {
        let slot = READER_SLOT.with(|s| *s);
        tracker.slot = slot;

        let nested = self.held_depth() > 0;
        let backoff = Backoff::new();
        loop {
            self.readers[slot].fetch_add(1, Ordering::SeqCst);
            if nested || !self.writer.load(Ordering::SeqCst) {
                break;
            }
            // Writer pending: back out so it can drain, then wait it out.
            self.readers[slot].fetch_sub(1, Ordering::Relaxed);
            while self.writer.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
        self.note_acquire();

        RmReadGuard {
            lock: self,
            tracker,
        }
    }

    /// Acquire shared mode without waiting.
    ///
    /// Returns `None` when a writer holds or is draining the lock.
    #[inline]
    pub fn try_read<'a>(&'a self, tracker: &'a mut ReadTracker) -> Option<RmReadGuard<'a, T>> {
        let slot = READER_SLOT.with(|s| *s);
        tracker.slot = slot;

        let nested = self.held_depth() > 0;
        self.readers[slot].fetch_add(1, Ordering::SeqCst);
        if !nested && self.writer.load(Ordering::SeqCst) {
            self.readers[slot].fetch_sub(1, Ordering::Relaxed);
            return None;
        }
        self.note_acquire();

        Some(RmReadGuard {
            lock: self,
            tracker,
        })
    }

    /// Acquire exclusive mode, observing quiescence of all shared holders.
    pub fn write(&self) -> RmWriteGuard<'_, T> {
        let backoff = Backoff::new();
        while self
            .writer
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }

        // Prior readers drain; later ones back out on seeing the flag.
        for slot in self.readers.iter() {
            let drain = Backoff::new();
            while slot.load(Ordering::SeqCst) != 0 {
                drain.snooze();
            }
        }

        RmWriteGuard { lock: self }
    }
}

/// RAII shared guard. Releasing decrements the slot recorded in the tracker.
pub struct RmReadGuard<'a, T> {
    lock: &'a RmLock<T>,
    tracker: &'a mut ReadTracker,
}

impl<T> Deref for RmReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: shared mode is held; writers are excluded until every
        // reader slot drains, which includes this guard's increment.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RmReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.readers[self.tracker.slot].fetch_sub(1, Ordering::Release);
        self.lock.note_release();
    }
}

/// RAII exclusive guard.
pub struct RmWriteGuard<'a, T> {
    lock: &'a RmLock<T>,
}

impl<T> Deref for RmWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: exclusive mode is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RmWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: exclusive mode is held and this guard is unique.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RmWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.writer.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_read_basic() {
        let lock = RmLock::new(42);
        let mut tracker = ReadTracker::new();
        let guard = lock.read(&mut tracker);
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_write_then_read() {
        let lock = RmLock::new(0);
        {
            let mut guard = lock.write();
            *guard = 7;
        }
        let mut tracker = ReadTracker::new();
        assert_eq!(*lock.read(&mut tracker), 7);
    }

    #[test]
    fn test_nested_read() {
        let lock = RmLock::new(1);
        let mut outer_tracker = ReadTracker::new();
        let outer = lock.read(&mut outer_tracker);
        let mut inner_tracker = ReadTracker::new();
        let inner = lock.read(&mut inner_tracker);
        assert_eq!(*outer + *inner, 2);
    }

    #[test]
    fn test_try_read_fails_under_writer() {
        let lock = Arc::new(RmLock::new(0));
        let guard = lock.write();

        let contender = Arc::clone(&lock);
        let blocked = thread::spawn(move || {
            let mut tracker = ReadTracker::new();
            let blocked = contender.try_read(&mut tracker).is_none();
            blocked
        });
        assert!(blocked.join().unwrap());
        drop(guard);

        let mut tracker = ReadTracker::new();
        assert!(lock.try_read(&mut tracker).is_some());
    }

    #[test]
    fn test_writer_observes_reader_quiescence() {
        let lock = Arc::new(RmLock::new(0));
        let reader_started = Arc::new(AtomicBool::new(false));
        let reader_done = Arc::new(AtomicBool::new(false));

        let reader = {
            let lock = Arc::clone(&lock);
            let started = Arc::clone(&reader_started);
            let done = Arc::clone(&reader_done);
            thread::spawn(move || {
                let mut tracker = ReadTracker::new();
                let guard = lock.read(&mut tracker);
                started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                done.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        while !reader_started.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        let guard = lock.write();
        assert!(reader_done.load(Ordering::SeqCst));
        drop(guard);
        reader.join().unwrap();
    }

    #[test]
    fn test_writers_are_mutually_exclusive() {
        let lock = Arc::new(RmLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let mut guard = lock.write();
                    *guard += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let mut tracker = ReadTracker::new();
        assert_eq!(*lock.read(&mut tracker), 4000);
    }

    #[test]
    fn test_concurrent_readers() {
        let lock = Arc::new(RmLock::new(9));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let mut tracker = ReadTracker::new();
                    assert_eq!(*lock.read(&mut tracker), 9);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
