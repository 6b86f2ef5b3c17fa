//! A signal-safe reader/writer lock for [`crate::registry::AttributeRegistry`].
//!
//! The registry must support `get_attribute` calls from within a signal
//! handler running on a thread that might, at the instant the signal
//! arrived, be holding the registry's *write* lock inside `create_attribute`.
//! A conventional mutex (including `parking_lot`'s, which can park a thread
//! in the kernel) is unsound here: if the write-lock holder is interrupted
//! mid-critical-section, any lock acquisition attempt made by the signal
//! handler on the *same thread* that blocks until the writer releases will
//! never complete, since the writer can't resume until the handler returns.
//!
//! This lock is therefore built from a single atomic word and bounded spins
//! only; it never calls into the kernel (no futex, no `park`), and the
//! signal-handler-safe entry point (`try_read`) always returns in bounded
//! time rather than blocking.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI32, Ordering};

const WRITER: i32 = -1;
const FREE: i32 = 0;

/// Number of CAS attempts a bounded spin performs before giving up. Chosen
/// to be large enough to ride out a few reader/writer handoffs under normal
/// contention but small enough that a signal handler calling [`try_read`]
/// returns in a bounded number of instructions regardless of what the
/// interrupted thread was doing.
///
/// [`try_read`]: SignalSafeRwLock::try_read
const SPIN_LIMIT: u32 = 1_000;

/// An atomics-only reader/writer lock, safe to attempt-acquire from a
/// signal handler.
pub struct SignalSafeRwLock<T> {
    state: AtomicI32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever handed out through a guard obtained
// while `state` reflects the corresponding reader/writer bookkeeping, exactly
// as with a conventional RwLock.
unsafe impl<T: Send> Send for SignalSafeRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for SignalSafeRwLock<T> {}

impl<T> SignalSafeRwLock<T> {
    pub fn new(value: T) -> Self {
        Self { state: AtomicI32::new(FREE), data: UnsafeCell::new(value) }
    }

    /// Attempt to acquire the read lock with a bounded number of spins.
    /// Never blocks unboundedly; safe to call from a signal handler. Returns
    /// `None` if the writer held the lock for the entire spin budget.
    pub fn try_read(&self) -> Option<ReadGuard<'_, T>> {
        for _ in 0..SPIN_LIMIT {
            let cur = self.state.load(Ordering::Acquire);
            if cur == WRITER {
                std::hint::spin_loop();
                continue;
            }
            if self
                .state
                .compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(ReadGuard { lock: self });
            }
        }
        None
    }

    /// Acquire the read lock, retrying indefinitely (in bounded spin
    /// batches, yielding the thread between batches). Only call this from
    /// ordinary application code, never from a signal handler.
    pub fn read(&self) -> ReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            std::thread::yield_now();
        }
    }

    /// Attempt to acquire the write lock with a bounded number of spins.
    pub fn try_write(&self) -> Option<WriteGuard<'_, T>> {
        for _ in 0..SPIN_LIMIT {
            if self
                .state
                .compare_exchange_weak(FREE, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(WriteGuard { lock: self });
            }
            std::hint::spin_loop();
        }
        None
    }

    /// Acquire the write lock, retrying indefinitely (in bounded spin
    /// batches, yielding the thread between batches). Only called from
    /// `create_attribute`, which never runs inside a signal handler, so
    /// there is no reentrancy hazard here.
    pub fn write(&self) -> WriteGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_write() {
                return guard;
            }
            std::thread::yield_now();
        }
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a SignalSafeRwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: a reader slot is reserved in `state` for the lifetime of
        // this guard, and writers never proceed while any reader slot is
        // held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a SignalSafeRwLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: exclusive access is held for the lifetime of this guard.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: exclusive access is held for the lifetime of this guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(FREE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_writer_excludes_readers() {
        let lock = SignalSafeRwLock::new(0i32);
        let w = lock.write();
        assert!(lock.try_read().is_none());
        drop(w);
        assert!(lock.try_read().is_some());
    }

    #[test]
    fn many_readers_allowed_concurrently() {
        let lock = SignalSafeRwLock::new(0i32);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1, 0);
        assert_eq!(*r2, 0);
    }

    #[test]
    fn writer_excludes_second_writer() {
        let lock = SignalSafeRwLock::new(0i32);
        let _w = lock.write();
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        let lock = Arc::new(SignalSafeRwLock::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.write() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.read(), 8000);
    }
}
