// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Error-checking mutex wrapper (component A).
//!
//! The engine requires recursive locking by the same thread to be
//! reported rather than silently deadlocking or silently succeeding
//! (§4.1). `std::sync::Mutex` does neither on its own, so this wraps
//! it with an owner-thread record checked before the actual lock is
//! attempted: only the thread currently holding the mutex can ever
//! observe `owner == current`, so the check is race-free without
//! needing a real recursive-mutex primitive.

use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::thread::ThreadId;

use crate::error::{Error, ErrorCode};

pub struct Mutex {
    inner: StdMutex<()>,
    owner: StdMutex<Option<ThreadId>>,
}

pub struct MutexGuard<'a> {
    _inner: StdMutexGuard<'a, ()>,
    mutex: &'a Mutex,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(()),
            owner: StdMutex::new(None),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_>, Error> {
        let current = std::thread::current().id();
        {
            let owner = self.owner.lock().map_err(|_| Error::from(ErrorCode::GeneralError))?;
            if *owner == Some(current) {
                return Err(Error::from(ErrorCode::GeneralError));
            }
        }
        let inner = self.inner.lock().map_err(|_| Error::from(ErrorCode::GeneralError))?;
        *self.owner.lock().map_err(|_| Error::from(ErrorCode::GeneralError))? = Some(current);
        Ok(MutexGuard {
            _inner: inner,
            mutex: self,
        })
    }

    fn clear_owner(&self) {
        if let Ok(mut owner) = self.owner.lock() {
            *owner = None;
        }
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.clear_owner();
    }
}
