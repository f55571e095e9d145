// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! OS-provided reader/writer lock (component A), used only inside the
//! lock manager: once to guard its growable owner table, and once more
//! as the irrevocability arbiter (§4.5). This is a plain one-writer-or-
//! many-readers lock with no waiter list of its own — unlike
//! [`crate::rwlock::RwLock`] (component C), which modules embed in
//! their own data and which plugs into the lock manager's waiter-list
//! machinery.

use std::sync::{RwLock as StdRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, ErrorCode};

#[derive(Default)]
pub struct RwLock {
    inner: StdRwLock<()>,
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            inner: StdRwLock::new(()),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, ()>, Error> {
        self.inner.read().map_err(|_| Error::from(ErrorCode::GeneralError))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, ()>, Error> {
        self.inner.write().map_err(|_| Error::from(ErrorCode::GeneralError))
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, ()>> {
        self.inner.try_read().ok()
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        self.inner.try_write().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_readers_block_a_writer() {
        let lock = RwLock::new();
        let _r1 = lock.read().unwrap();
        let _r2 = lock.read().unwrap();
        assert!(lock.try_write().is_none());
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = RwLock::new();
        let _w = lock.write().unwrap();
        assert!(lock.try_read().is_none());
    }
}
