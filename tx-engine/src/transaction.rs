// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Transaction object (component H).
//!
//! Holds everything private to one attempt: the module vector, the
//! event log, the latching error state, the retry counter and mode,
//! and the lock owner the lock manager schedules this transaction's
//! waits under. None of this is shared with other threads (§5), so a
//! `Transaction` carries no internal synchronization of its own beyond
//! what the lock manager and lock owner already provide.

use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, ErrorState};
use crate::event::{Event, EventLog};
use crate::lock_manager::LockManager;
use crate::lock_owner::LockOwner;
use crate::module::{ModuleOps, ModuleSlot, MAX_MODULES};

/// A transaction attempt runs in one of two modes (§3 "Transaction
/// modes"). Revocable attempts may abort and restart; an irrevocable
/// attempt has exclusive access and must run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Revocable,
    Irrevocable,
}

/// Number of Revocable retries before a transaction is forced into
/// Irrevocable mode on its next attempt (§4.2 "Retry limit").
pub const MAX_RETRIES: u32 = 10;

enum ArbiterGuard {
    None,
    Revocable(RwLockReadGuard<'static, ()>),
    Irrevocable(RwLockWriteGuard<'static, ()>),
}

pub struct Transaction {
    manager: &'static LockManager,
    lock_owner: Arc<LockOwner>,
    modules: Vec<ModuleSlot>,
    events: EventLog,
    error: ErrorState,
    mode: Mode,
    retries: u32,
    arbiter: ArbiterGuard,
}

impl Transaction {
    pub fn new(manager: &'static LockManager) -> Self {
        let lock_owner = manager.register_owner();
        Self {
            manager,
            lock_owner,
            modules: Vec::new(),
            events: EventLog::new(),
            error: ErrorState::new(),
            mode: Mode::Revocable,
            retries: 0,
            arbiter: ArbiterGuard::None,
        }
    }

    pub fn lock_owner(&self) -> &Arc<LockOwner> {
        &self.lock_owner
    }

    pub fn lock_manager(&self) -> &'static LockManager {
        self.manager
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_irrevocable(&self) -> bool {
        self.mode == Mode::Irrevocable
    }

    pub fn number_of_restarts(&self) -> u32 {
        self.retries
    }

    pub fn error(&self) -> Error {
        self.error.current()
    }

    pub fn is_non_recoverable(&self) -> bool {
        self.error.is_non_recoverable()
    }

    /// Registers a module, returning the slot index later used to tag
    /// that module's events. Capped at [`MAX_MODULES`] (§6 "Limits").
    pub fn register_module(&mut self, ops: Box<dyn ModuleOps>) -> Result<u16, Error> {
        if self.modules.len() >= MAX_MODULES {
            return Err(Error::from(crate::error::ErrorCode::GeneralError));
        }
        self.modules.push(ModuleSlot::new(ops));
        Ok((self.modules.len() - 1) as u16)
    }

    pub fn append_event(&mut self, module: u16, head: u16, tail: usize) -> Result<(), Error> {
        self.events.append(Event::new(module, head, tail))
    }

    /// Begins a fresh attempt: clears the non-latched error, resets the
    /// lock owner's timestamp, forces Irrevocable once the retry limit
    /// is hit, and runs every registered module's `begin` (§4.4 step
    /// 1). A transaction retried for the eleventh time never goes back
    /// to Revocable.
    pub fn begin(&mut self, requested_mode: Mode) -> Result<(), Error> {
        self.error.clear();
        self.lock_owner.reset_timestamp();

        self.mode = if self.retries >= MAX_RETRIES {
            Mode::Irrevocable
        } else {
            requested_mode
        };

        match self.mode {
            Mode::Revocable => {
                let guard = self.manager.enter_revocable()?;
                self.arbiter = ArbiterGuard::Revocable(guard);
            }
            Mode::Irrevocable => {
                let guard = self.manager.try_enter_irrevocable()?;
                self.arbiter = ArbiterGuard::Irrevocable(guard);
            }
        }

        for module in self.modules.iter_mut() {
            if let Err(error) = module.begin() {
                for module in self.modules.iter_mut() {
                    if module.began() {
                        let _ = module.finish();
                    }
                }
                self.release_arbiter();
                return Err(error);
            }
        }
        Ok(())
    }

    /// Re-runs every registered module's `validate` without committing
    /// (§4.7 "is_valid"), mirroring the original's `tx_is_valid` calling
    /// `log_validate`. Returns the first module error encountered, if
    /// any; a latched non-recoverable error short-circuits immediately.
    pub fn is_valid(&mut self) -> Result<(), Error> {
        if self.is_non_recoverable() {
            return Err(self.error());
        }
        for module in self.modules.iter_mut() {
            module.validate()?;
        }
        Ok(())
    }

    /// Two-phase commit (§4.4 step 2): `prepare_commit` on every
    /// module, then replay the event log forward via `apply_event`,
    /// then `apply`/`finish` on every module. Failure past this point
    /// latches the error as non-recoverable, since rollback is no
    /// longer safe.
    pub fn commit(&mut self) -> Result<(), Error> {
        let is_irrevocable = self.is_irrevocable();

        for module in self.modules.iter_mut() {
            if let Err(error) = module.prepare_commit(is_irrevocable) {
                self.error.set(error);
                return Err(error);
            }
        }

        if let Err(error) = self.events.apply_all(&mut self.modules) {
            self.error.latch(error);
            return Err(error);
        }

        for module in self.modules.iter_mut() {
            if let Err(error) = module.apply() {
                self.error.latch(error);
                return Err(error);
            }
        }
        for module in self.modules.iter_mut() {
            if let Err(error) = module.finish() {
                self.error.latch(error);
                return Err(error);
            }
        }

        self.events.clear();
        self.release_arbiter();
        Ok(())
    }

    /// Undoes an attempt that failed before `commit`'s point of no
    /// return: calls every module's `undo`, then replays the event log
    /// in reverse via `undo_event`, then calls every module's `finish`
    /// (§4.4 step 3). Any error during rollback is latched as
    /// non-recoverable (§4.4 step 4), since there is no further recovery
    /// path once undo itself has failed.
    pub fn rollback(&mut self) -> Result<(), Error> {
        let result = (|| {
            for module in self.modules.iter_mut() {
                module.undo()?;
            }
            self.events.undo_all(&mut self.modules)?;
            for module in self.modules.iter_mut() {
                module.finish()?;
            }
            Ok(())
        })();

        self.events.clear();
        self.release_arbiter();

        if let Err(error) = result {
            self.error.latch(error);
            return Err(error);
        }
        Ok(())
    }

    /// Marks this attempt as having conflicted and bumps the retry
    /// counter, ready for the driver to call [`Transaction::begin`]
    /// again (§4.2).
    pub fn restart(&mut self) {
        self.retries += 1;
    }

    fn release_arbiter(&mut self) {
        self.arbiter = ArbiterGuard::None;
    }

    /// Releases every module and forgets all per-attempt state. Called
    /// once the transaction's owning thread is done with it for good
    /// (§4.4 step 4).
    pub fn release(&mut self) {
        for module in self.modules.iter_mut() {
            module.release();
        }
        self.modules.clear();
        self.events.clear();
        self.error.reset();
        self.retries = 0;
        self.release_arbiter();
    }
}
