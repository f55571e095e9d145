// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Lock owner (component D).
//!
//! One instance per transaction, handed out by the lock manager the
//! first time a transaction touches a lock. Carries the private
//! mutex/condvar pair a transaction sleeps on while waiting for a
//! contended lock, the transaction's start timestamp (used to break
//! ties between waiters), and the singly-linked `next` pointer used to
//! chain owners together in a lock's waiter list. Index `0` is
//! reserved and never handed out, so it doubles as the "no next
//! element" / "no one waiting" sentinel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::Error;
use crate::os::clock::Timespec;
use crate::os::condvar::Condvar;

/// Sentinel `next`/index value meaning "nothing here".
pub const NO_INDEX: usize = 0;

#[derive(Default)]
struct WaitState {
    waiting: bool,
    wants_reader: bool,
}

pub struct LockOwner {
    index: usize,
    next: AtomicUsize,
    wait: Mutex<WaitState>,
    condvar: Condvar,
    timestamp: Mutex<Timespec>,
}

impl LockOwner {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            next: AtomicUsize::new(NO_INDEX),
            wait: Mutex::new(WaitState::default()),
            condvar: Condvar::new(),
            timestamp: Mutex::new(Timespec::new(0, 0)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn next(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }

    pub fn set_next(&self, next: usize) {
        self.next.store(next, Ordering::Relaxed);
    }

    pub fn timestamp(&self) -> Timespec {
        *self.timestamp.lock().expect("lock owner timestamp mutex poisoned")
    }

    /// Resets the start timestamp. Called from a transaction's `begin`,
    /// not from construction, so a pooled/reused lock owner always
    /// reflects the current attempt's start time.
    pub fn reset_timestamp(&self) {
        *self.timestamp.lock().expect("lock owner timestamp mutex poisoned") = Timespec::now();
    }

    /// Blocks until woken by [`LockOwner::wake_up`] or until `deadline`
    /// passes. Returns `true` if woken, `false` on timeout. The caller
    /// must not already be marked waiting. `is_reader` records which
    /// kind of lock this owner is waiting for, so the lock manager can
    /// decide whether to wake siblings too (§4.5 "wake up readers
    /// together").
    pub fn wait_until(&self, deadline: Instant, is_reader: bool) -> Result<bool, Error> {
        let mut guard = self.wait.lock().expect("lock owner wait mutex poisoned");
        debug_assert!(!guard.waiting, "lock owner is already waiting");
        guard.waiting = true;
        guard.wants_reader = is_reader;

        loop {
            let (next_guard, timed_out) = self.condvar.wait_until(guard, deadline)?;
            guard = next_guard;
            if timed_out {
                guard.waiting = false;
                return Ok(false);
            }
            if !guard.waiting {
                // Woken for real; wake_up already cleared the flag.
                return Ok(true);
            }
            // Spurious wake-up: the flag is still set, keep waiting.
        }
    }

    /// Wakes a thread parked in [`LockOwner::wait_until`].
    pub fn wake_up(&self) {
        let mut guard = self.wait.lock().expect("lock owner wait mutex poisoned");
        if !guard.waiting {
            return;
        }
        guard.waiting = false;
        drop(guard);
        self.condvar.wake_one();
    }

    /// True if this owner is currently parked waiting for a read lock.
    /// Only meaningful between enqueueing and being woken.
    pub fn wants_reader(&self) -> bool {
        self.wait.lock().expect("lock owner wait mutex poisoned").wants_reader
    }
}
