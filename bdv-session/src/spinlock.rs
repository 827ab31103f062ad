//! A lightweight per-session spin-lock guarding entry into a session's
//! command-processing or notification-delivery path:
//! a single permit, acquired with a non-blocking compare-and-swap rather
//! than a blocking mutex, so a worker that finds a session already busy can
//! immediately give up and spill its packet back onto the shared queue
//! instead of parking a thread behind it.
//!
//! Grounded on [`bdv_batch::semaphore`]'s single-purpose counting
//! semaphore, generalized here to a bound of exactly one permit with a
//! `try`-only acquire — there is no `bdv-batch`-style queued waiter, since
//! a failed acquire here means "go process something else", not "wait".

use std::sync::atomic::{AtomicBool, Ordering};

/// A single-permit, non-blocking lock: `try_enter` either returns a guard
/// or fails immediately, and never parks the caller.
#[derive(Default)]
pub struct SessionSpinlock {
    busy: AtomicBool,
}

/// Releases the spinlock when dropped, however the caller's processing
/// path exits (including panics unwound through it).
pub struct SpinlockGuard<'a> {
    lock: &'a SessionSpinlock,
}

impl SessionSpinlock {
    pub fn new() -> Self {
        SessionSpinlock {
            busy: AtomicBool::new(false),
        }
    }

    /// Attempts to enter the processing path. Returns `None` if another
    /// worker already holds the lock — the caller should re-queue its
    /// packet rather than wait.
    pub fn try_enter(&self) -> Option<SpinlockGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|()| SpinlockGuard { lock: self })
    }
}

impl Drop for SpinlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_entry_fails_while_the_first_guard_is_held() {
        let lock = SessionSpinlock::new();
        let first = lock.try_enter().expect("uncontended");
        assert!(lock.try_enter().is_none());
        drop(first);
        assert!(lock.try_enter().is_some());
    }
}
