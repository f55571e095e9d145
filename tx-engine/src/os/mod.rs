// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! OS-primitive wrappers (component A): mutex, condition variable,
//! R/W lock and absolute-time clock, each a thin layer over the host's
//! thread-synchronization facilities.

pub mod clock;
pub mod condvar;
pub mod mutex;
pub mod rwlock;

pub use clock::Timespec;
pub use condvar::Condvar;
pub use mutex::Mutex;
pub use rwlock::RwLock;
