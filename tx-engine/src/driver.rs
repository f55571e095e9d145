// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Top-level driver (component K).
//!
//! Each thread owns exactly one [`Transaction`], looked up through a
//! thread-local cell, all sharing one process-wide [`LockManager`].
//! [`run_transaction`] replaces the original's setjmp/longjmp restart
//! mechanism with a plain loop driven by [`Error::restart_mode`] and
//! [`Error::needs_recovery`] (§4.7).

use std::cell::RefCell;

use lazy_static::lazy_static;
use log::debug;

use crate::error::Error;
use crate::lock_manager::LockManager;
use crate::module::ModuleOps;
use crate::transaction::{Mode, Transaction};

lazy_static! {
    static ref MANAGER: LockManager = LockManager::new();
}

thread_local! {
    static CURRENT: RefCell<Transaction> = RefCell::new(Transaction::new(&MANAGER));
}

/// Runs `f` against the calling thread's transaction.
pub fn with_current<R>(f: impl FnOnce(&mut Transaction) -> R) -> R {
    CURRENT.with(|tx| f(&mut tx.borrow_mut()))
}

pub fn register_module(ops: Box<dyn ModuleOps>) -> Result<u16, Error> {
    with_current(|tx| tx.register_module(ops))
}

pub fn append_event(module: u16, head: u16, tail: usize) -> Result<(), Error> {
    with_current(|tx| tx.append_event(module, head, tail))
}

pub fn is_irrevocable() -> bool {
    with_current(|tx| tx.is_irrevocable())
}

pub fn number_of_restarts() -> u32 {
    with_current(|tx| tx.number_of_restarts())
}

/// Re-runs every registered module's `validate` without committing
/// (§4.7 "is_valid"); `false` if validation fails or a non-recoverable
/// error is already latched.
pub fn is_valid() -> bool {
    with_current(|tx| tx.is_valid().is_ok())
}

/// Releases the calling thread's transaction: every registered
/// module's `release` callback runs and all per-attempt state is
/// forgotten. Call once, at thread shutdown (§4.4 step 4).
pub fn release() {
    with_current(|tx| tx.release());
}

/// Demands irrevocable execution for the remainder of the current
/// attempt. If the transaction is already Irrevocable this is a
/// no-op; otherwise it reports [`Error::Revocable`], whose
/// [`Error::restart_mode`] routes the next [`run_transaction`]
/// iteration into Irrevocable mode.
pub fn irrevocable() -> Result<(), Error> {
    if is_irrevocable() {
        Ok(())
    } else {
        Err(Error::Revocable)
    }
}

/// Outcome of a completed [`run_transaction`] call.
#[derive(Debug)]
pub enum TxOutcome<T> {
    /// `body` ran and committed, yielding `T`.
    Committed(T),
    /// `body` reported an error requiring a caller-supplied recovery
    /// handler; `recovery` has already run.
    Recovery(Error),
    /// A non-recoverable error that recovery cannot address.
    Fatal(Error),
}

/// Runs `body` under the two-phase commit / restart protocol. On a
/// `Conflicting` or `Revocable` error, the transaction restarts in the
/// mode [`Error::restart_mode`] names (§7's restart table), up to
/// [`crate::transaction::MAX_RETRIES`] times before being forced
/// Irrevocable. On an error needing recovery, `recovery` runs once and
/// `body` is not retried automatically.
pub fn run_transaction<T>(body: impl Fn() -> Result<T, Error>, recovery: impl Fn(Error)) -> TxOutcome<T> {
    let mut mode = Mode::Revocable;

    loop {
        if let Err(error) = with_current(|tx| tx.begin(mode)) {
            match error.restart_mode() {
                Some(next_mode) => {
                    debug!(target: "tx_engine::driver", "begin failed ({:?}), restarting as {:?}", error, next_mode);
                    with_current(|tx| tx.restart());
                    mode = next_mode;
                    continue;
                }
                None if error.needs_recovery() => {
                    recovery(error);
                    return TxOutcome::Recovery(error);
                }
                None => return TxOutcome::Fatal(error),
            }
        }

        let outcome = match body() {
            Ok(value) => match with_current(|tx| tx.commit()) {
                Ok(()) => Ok(value),
                Err(error) => {
                    let _ = with_current(|tx| tx.rollback());
                    Err(error)
                }
            },
            Err(error) => {
                let _ = with_current(|tx| tx.rollback());
                Err(error)
            }
        };

        match outcome {
            Ok(value) => return TxOutcome::Committed(value),
            Err(error) => match error.restart_mode() {
                Some(next_mode) if !with_current(|tx| tx.is_non_recoverable()) => {
                    debug!(target: "tx_engine::driver", "attempt failed ({:?}), restarting as {:?}", error, next_mode);
                    with_current(|tx| tx.restart());
                    mode = next_mode;
                }
                _ if error.needs_recovery() => {
                    recovery(error);
                    return TxOutcome::Recovery(error);
                }
                _ => return TxOutcome::Fatal(error),
            },
        }
    }
}
