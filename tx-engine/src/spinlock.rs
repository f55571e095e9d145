// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Single-byte spinlock (component B).
//!
//! Not recursive, not fair, not reentrant. Correct use — never holding
//! it across anything that can suspend — is the caller's responsibility.

use std::sync::atomic::{AtomicU8, Ordering};

const FREE: u8 = 0;
const HELD: u8 = 1;

#[derive(Default)]
pub struct Spinlock {
    state: AtomicU8,
}

impl Spinlock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
        }
    }

    /// One strong CAS. Acquire ordering on failure, acquire-release on
    /// success: a successful lock must not let later reads/writes move
    /// above it, and must publish everything written while held to the
    /// next locker.
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(FREE, HELD, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Spins with a weak CAS until acquired. Backs off with
    /// [`crate::breaker::BusyBreaker`] so a contended spinlock does not
    /// pin the core at full throughput.
    pub fn lock(&self) {
        let breaker = crate::breaker::BusyBreaker::default();
        loop {
            if self
                .state
                .compare_exchange_weak(FREE, HELD, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
            let _ = breaker.spin();
        }
    }

    pub fn unlock(&self) {
        self.state.store(FREE, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) == HELD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_lock_is_exclusive() {
        let lock = Spinlock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock();
        assert!(lock.try_lock());
    }

    #[test]
    fn lock_blocks_until_unlocked() {
        let lock = Arc::new(Spinlock::new());
        assert!(lock.try_lock());

        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            lock2.lock();
            lock2.unlock();
        });

        thread::sleep(std::time::Duration::from_millis(5));
        lock.unlock();
        handle.join().unwrap();
    }
}
