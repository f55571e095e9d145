// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # tx-engine
//!
//! Core runtime of a system-level transaction manager: per-thread
//! transactions with a uniform module callback contract, an event log
//! replayed on commit/rollback, a packed reader/writer lock with an
//! explicit waiter list, and a lock manager that also arbitrates
//! irrevocable execution.
#![allow(clippy::type_complexity)]

pub mod breaker;
pub mod driver;
pub mod error;
pub mod event;
pub mod lock_manager;
pub mod lock_owner;
pub mod module;
pub mod os;
pub mod rwlock;
pub mod spinlock;
pub mod table;
pub mod transaction;

pub use breaker::BusyBreaker;
pub use driver::{run_transaction, TxOutcome};
pub use error::{Error, ErrorCode};
pub use event::{Event, EventLog};
pub use lock_manager::{LockManager, WakeupPolicy};
pub use lock_owner::LockOwner;
pub use module::{ModuleOps, ModuleSlot};
pub use rwlock::RwLock;
pub use spinlock::Spinlock;
pub use transaction::{Mode, Transaction};
