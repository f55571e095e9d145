// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Event and event log (component F).
//!
//! An [`Event`] is an opaque `{module, head, tail}` triple; the core
//! never interprets `head`/`tail`, it only replays them in order
//! (forward for apply, reverse for undo) against the owning module's
//! callbacks.

use crate::error::Error;
use crate::module::ModuleSlot;
use crate::table::Table;

/// One recorded module-level operation (§3 "Event").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Event {
    pub module: u16,
    pub head: u16,
    pub tail: usize,
}

impl Event {
    pub fn new(module: u16, head: u16, tail: usize) -> Self {
        Self { module, head, tail }
    }
}

/// Ordered sequence of events, owned by exactly one transaction
/// (§3 "Event log"). Appends are O(1) amortised via [`Table`]'s
/// doubling growth.
#[derive(Default)]
pub struct EventLog {
    events: Table<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn append(&mut self, event: Event) -> Result<(), Error> {
        self.events.push(event)?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Replays every event in append order, dispatching each to its
    /// module's `apply_event`. Stops at the first error (mirrors
    /// `picotm_events_foreach1`'s `!picotm_error_is_set` guard).
    pub fn apply_all(&self, modules: &mut [ModuleSlot]) -> Result<(), Error> {
        for event in self.events.as_slice() {
            if let Some(slot) = modules.get_mut(event.module as usize) {
                slot.apply_event(event.head, event.tail)?;
            }
        }
        Ok(())
    }

    /// Replays every event in reverse append order, dispatching each
    /// to its module's `undo_event` (`picotm_events_rev_foreach1`).
    pub fn undo_all(&self, modules: &mut [ModuleSlot]) -> Result<(), Error> {
        for event in self.events.as_slice().iter().rev() {
            if let Some(slot) = modules.get_mut(event.module as usize) {
                slot.undo_event(event.head, event.tail)?;
            }
        }
        Ok(())
    }
}
