// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Condition-variable wrapper (component A).
//!
//! Spurious wake-ups are permitted by this wrapper exactly as they are
//! by the underlying OS primitive; callers must re-check their own
//! wait condition in a loop (this is what the lock manager's
//! WAITING-flag re-check in §4.5 step 4 does).

use std::sync::{Condvar as StdCondvar, MutexGuard};
use std::time::Instant;

use crate::error::{Error, ErrorCode};

#[derive(Default)]
pub struct Condvar {
    inner: StdCondvar,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            inner: StdCondvar::new(),
        }
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> Result<MutexGuard<'a, T>, Error> {
        self.inner
            .wait(guard)
            .map_err(|_| Error::from(ErrorCode::GeneralError))
    }

    /// Waits until either woken or `deadline` passes. Returns the
    /// reacquired guard and whether the wait timed out.
    pub fn wait_until<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Instant,
    ) -> Result<(MutexGuard<'a, T>, bool), Error> {
        let now = Instant::now();
        let timeout = deadline.saturating_duration_since(now);
        let (guard, result) = self
            .inner
            .wait_timeout(guard, timeout)
            .map_err(|_| Error::from(ErrorCode::GeneralError))?;
        Ok((guard, result.timed_out()))
    }

    pub fn wake_one(&self) {
        self.inner.notify_one();
    }

    pub fn wake_all(&self) {
        self.inner.notify_all();
    }
}
