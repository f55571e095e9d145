// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Module registry (component G).
//!
//! The original C core dispatches through a `{ops, data}` pair of a
//! callback-pointer struct and an opaque `void*`, null-checking each
//! callback before calling it. The natural Rust shape for "a callback
//! set any member of which may be absent" is a trait with default
//! no-op implementations: a module only overrides the callbacks it
//! needs, the handle and its data are the same object, and there is
//! nothing to null-check at the call site.

use crate::error::Error;

/// Maximum module slots per transaction (§6 "Limits").
pub const MAX_MODULES: usize = 256;

/// The callback contract every registered module implements (§4.4).
/// All methods default to a no-op success, matching "any may be
/// absent; the core calls only those that are present." Module slots
/// are transaction-local (they never cross a thread boundary — a
/// transaction does not migrate between threads), so this trait does
/// not require `Send`.
pub trait ModuleOps {
    fn begin(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn prepare_commit(&mut self, _is_irrevocable: bool) -> Result<(), Error> {
        Ok(())
    }

    fn apply(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn undo(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn apply_event(&mut self, _head: u16, _tail: usize) -> Result<(), Error> {
        Ok(())
    }

    fn undo_event(&mut self, _head: u16, _tail: usize) -> Result<(), Error> {
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Re-validates the module's state without committing, used by
    /// [`crate::transaction::Transaction::is_valid`] (§4.7).
    fn validate(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// One entry in the per-transaction module vector. Slots are appended
/// only; once assigned an index by [`crate::transaction::Transaction::register_module`]
/// the slot keeps that index for the transaction's lifetime.
pub struct ModuleSlot {
    ops: Box<dyn ModuleOps>,
    began: bool,
}

impl ModuleSlot {
    pub fn new(ops: Box<dyn ModuleOps>) -> Self {
        Self { ops, began: false }
    }

    pub fn begin(&mut self) -> Result<(), Error> {
        let result = self.ops.begin();
        if result.is_ok() {
            self.began = true;
        }
        result
    }

    pub fn began(&self) -> bool {
        self.began
    }

    pub fn prepare_commit(&mut self, is_irrevocable: bool) -> Result<(), Error> {
        self.ops.prepare_commit(is_irrevocable)
    }

    pub fn apply(&mut self) -> Result<(), Error> {
        self.ops.apply()
    }

    pub fn undo(&mut self) -> Result<(), Error> {
        self.ops.undo()
    }

    pub fn apply_event(&mut self, head: u16, tail: usize) -> Result<(), Error> {
        self.ops.apply_event(head, tail)
    }

    pub fn undo_event(&mut self, head: u16, tail: usize) -> Result<(), Error> {
        self.ops.undo_event(head, tail)
    }

    /// Terminates this module's participation in the current attempt
    /// and clears [`ModuleSlot::began`], so the next `begin` starts
    /// clean (§4.4 steps 2/3/5).
    pub fn finish(&mut self) -> Result<(), Error> {
        let result = self.ops.finish();
        self.began = false;
        result
    }

    pub fn validate(&mut self) -> Result<(), Error> {
        self.ops.validate()
    }

    pub fn release(&mut self) {
        self.ops.release();
    }
}

impl Default for ModuleSlot {
    fn default() -> Self {
        struct NullModule;
        impl ModuleOps for NullModule {}
        Self::new(Box::new(NullModule))
    }
}

impl Clone for ModuleSlot {
    fn clone(&self) -> Self {
        // Table growth needs a Clone/Default bound to zero-fill new
        // slots; a cloned placeholder slot is never observed because
        // the table is only ever grown one element at a time via
        // `push`, which immediately overwrites the new slot.
        Self::default()
    }
}
