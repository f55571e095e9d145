// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Lock manager (component E).
//!
//! Owns the growable table of [`LockOwner`]s, mediates the generic
//! enqueue/wait/wake protocol any lock-like structure can plug into
//! via [`WaiterList`], and doubles as the irrevocability arbiter: one
//! OS-level reader/writer lock where the irrevocable transaction holds
//! the write side and every revocable transaction holds the read side
//! for the duration of its commit (§4.5).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::trace;

use crate::error::Error;
use crate::lock_owner::{LockOwner, NO_INDEX};
use crate::os::rwlock::RwLock as OsRwLock;
use crate::table::Table;

/// How long a contended lock's waiter sleeps before being re-checked.
/// Bounds the damage of a missed wake-up; correctness does not depend
/// on this value, only liveness latency does.
const WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Selects which waiting owner a lock wakes first when it is released
/// (§9 "Open question: wake-up policy"). `LongestWaiting` is the
/// default; `LongestRunning` is exposed for callers that want to
/// prioritize transactions that have done the most work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupPolicy {
    LongestWaiting,
    LongestRunning,
}

impl Default for WakeupPolicy {
    fn default() -> Self {
        WakeupPolicy::LongestWaiting
    }
}

/// Callback interface a lock-like structure implements so it can be
/// plugged into the lock manager's generic waiter-list machinery,
/// mirroring the original's `picotm_lock_slist_funcs` pair of
/// function pointers: one to read the list head, one to
/// compare-and-swap it.
pub trait WaiterList {
    /// Returns the index of the first waiting owner, or `0` if none.
    fn get_first_index(&self) -> u8;

    /// Atomically replaces the head index if it still equals
    /// `expected_index`. Always returns the index actually observed
    /// (equal to `expected_index` on success), so a caller can retry
    /// with the freshly observed head on failure.
    fn cmpxchg_first_index(&self, expected_index: u8, desired_index: u8) -> u8;
}

#[derive(Default)]
struct OwnerTable {
    owners: Table<Option<Arc<LockOwner>>>,
}

pub struct LockManager {
    table_lock: OsRwLock,
    table: std::sync::Mutex<OwnerTable>,
    next_free: AtomicUsize,
    exclusive: OsRwLock,
    policy: WakeupPolicy,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_policy(WakeupPolicy::default())
    }

    pub fn with_policy(policy: WakeupPolicy) -> Self {
        let mut owners = Table::new();
        // Index 0 is reserved as the "no owner" sentinel (§4.5).
        owners.push(None).expect("initial owner table slot");
        Self {
            table_lock: OsRwLock::new(),
            table: std::sync::Mutex::new(OwnerTable { owners }),
            next_free: AtomicUsize::new(1),
            exclusive: OsRwLock::new(),
            policy,
        }
    }

    /// Allocates a fresh [`LockOwner`] and records it in the owner
    /// table under a freshly assigned index (never `0`).
    pub fn register_owner(&self) -> Arc<LockOwner> {
        let _guard = self.table_lock.write().expect("owner table rwlock poisoned");
        let mut state = self.table.lock().expect("owner table mutex poisoned");

        let index = self.next_free.fetch_add(1, Ordering::Relaxed);
        let owner = Arc::new(LockOwner::new(index));
        if index >= state.owners.len() {
            state
                .owners
                .resize(index + 1)
                .expect("owner table growth");
        }
        *state.owners.get_mut(index).expect("freshly grown slot") = Some(owner.clone());
        owner
    }

    fn owner_at(&self, index: usize) -> Option<Arc<LockOwner>> {
        if index == NO_INDEX {
            return None;
        }
        let _guard = self.table_lock.read().expect("owner table rwlock poisoned");
        let state = self.table.lock().expect("owner table mutex poisoned");
        state.owners.get(index).and_then(|slot| slot.clone())
    }

    /// Enqueues `owner` on `slist`'s waiter list and blocks until
    /// either woken or [`WAIT_TIMEOUT`] passes, then returns so the
    /// caller can retry its non-blocking lock attempt (§4.3 "Try/wait
    /// loop", §4.5 "Wait protocol").
    pub fn wait(&self, owner: &Arc<LockOwner>, is_writer: bool, slist: &impl WaiterList) -> Result<(), Error> {
        debug_assert!(
            owner.index() <= 0xF,
            "owner index does not fit in a packed rwlock's 4-bit waiter-list field"
        );
        owner.reset_timestamp();

        let self_index = owner.index() as u8;
        loop {
            let head = slist.get_first_index();
            owner.set_next(head as usize);
            let observed = slist.cmpxchg_first_index(head, self_index);
            if observed == head {
                break;
            }
        }

        trace!(
            target: "tx_engine::lock_manager",
            "owner {} enqueued as {} waiter",
            owner.index(),
            if is_writer { "writer" } else { "reader" }
        );

        let deadline = crate::os::clock::deadline_after(WAIT_TIMEOUT);
        owner.wait_until(deadline, !is_writer)?;
        Ok(())
    }

    /// Wakes the lock manager's chosen waiter off `slist`'s waiter
    /// list. If the chosen waiter was parked for a read lock and
    /// `concurrent_readers_supported`, every other consecutive reader
    /// at the head of the list is woken too, stopping at the first
    /// writer or an empty list (§4.5 "wake up readers together").
    pub fn wake_up(&self, concurrent_readers_supported: bool, slist: &impl WaiterList) {
        let head = self.pop_best_waiter(slist);
        let Some(first) = head else {
            return;
        };

        trace!(target: "tx_engine::lock_manager", "waking owner {}", first.index());
        first.wake_up();

        if !concurrent_readers_supported || !first.wants_reader() {
            return;
        }

        loop {
            let head_index = slist.get_first_index();
            if head_index == NO_INDEX as u8 {
                return;
            }
            let Some(candidate) = self.owner_at(head_index as usize) else {
                return;
            };
            if !candidate.wants_reader() {
                return;
            }
            if !self.pop_specific(slist, head_index) {
                continue;
            }
            trace!(target: "tx_engine::lock_manager", "waking sibling reader {}", candidate.index());
            candidate.wake_up();
        }
    }

    /// Pops the waiter the configured [`WakeupPolicy`] selects: the
    /// one with the oldest timestamp, scanning the whole waiter list
    /// (both policies compare timestamps — "longest waiting" compares
    /// against enqueue order which this list already preserves at the
    /// head, "longest running" compares against transaction start
    /// time, which is the same field reused for a different ordering
    /// purpose, per §9's open question).
    fn pop_best_waiter(&self, slist: &impl WaiterList) -> Option<Arc<LockOwner>> {
        match self.policy {
            WakeupPolicy::LongestWaiting => {
                let head = slist.get_first_index();
                if head == NO_INDEX as u8 {
                    return None;
                }
                let owner = self.owner_at(head as usize)?;
                if self.pop_specific(slist, head) {
                    Some(owner)
                } else {
                    None
                }
            }
            WakeupPolicy::LongestRunning => {
                let mut best: Option<Arc<LockOwner>> = None;
                let mut cursor = slist.get_first_index();
                while cursor != NO_INDEX as u8 {
                    let candidate = match self.owner_at(cursor as usize) {
                        Some(candidate) => candidate,
                        None => break,
                    };
                    let replace = match &best {
                        None => true,
                        Some(current) => candidate.timestamp().compare(&current.timestamp()) < 0,
                    };
                    cursor = candidate.next() as u8;
                    if replace {
                        best = Some(candidate);
                    }
                }
                let best = best?;
                if self.pop_specific(slist, best.index() as u8) {
                    Some(best)
                } else {
                    None
                }
            }
        }
    }

    /// Removes `index` from the head of `slist`'s waiter list if it is
    /// still there. Returns `false` if the list changed under us
    /// (concurrent prepend/pop), in which case the caller re-reads the
    /// list from scratch.
    fn pop_specific(&self, slist: &impl WaiterList, index: u8) -> bool {
        let owner = match self.owner_at(index as usize) {
            Some(owner) => owner,
            None => return false,
        };
        let next = owner.next() as u8;
        slist.cmpxchg_first_index(index, next) == index
    }

    /// Acquires the irrevocability arbiter as a revocable transaction
    /// (the read side). The returned guard must be held for the
    /// duration of the transaction's commit, so an irrevocable
    /// transaction cannot start concurrently (§4.5 "Irrevocability").
    pub fn enter_revocable(&self) -> Result<RwLockReadGuard<'_, ()>, Error> {
        self.exclusive.read()
    }

    /// Blocks until every revocable transaction holding the read side
    /// has drained, then becomes the sole irrevocable transaction (the
    /// write side). The returned guard must be held until the
    /// irrevocable transaction finishes.
    pub fn try_enter_irrevocable(&self) -> Result<RwLockWriteGuard<'_, ()>, Error> {
        self.exclusive.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU8;

    struct TestList {
        head: AtomicU8,
    }

    impl TestList {
        fn new() -> Self {
            Self { head: AtomicU8::new(NO_INDEX as u8) }
        }
    }

    impl WaiterList for TestList {
        fn get_first_index(&self) -> u8 {
            self.head.load(Ordering::Acquire)
        }

        fn cmpxchg_first_index(&self, expected_index: u8, desired_index: u8) -> u8 {
            match self
                .head
                .compare_exchange(expected_index, desired_index, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => expected_index,
                Err(actual) => actual,
            }
        }
    }

    #[test]
    fn register_owner_assigns_increasing_nonzero_indices() {
        let manager = LockManager::new();
        let a = manager.register_owner();
        let b = manager.register_owner();
        assert_ne!(a.index(), 0);
        assert_ne!(b.index(), 0);
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn wake_up_on_empty_list_is_a_no_op() {
        let manager = LockManager::new();
        let list = TestList::new();
        manager.wake_up(true, &list);
    }

    #[test]
    fn wake_up_wakes_the_enqueued_waiter() {
        let manager = Arc::new(LockManager::new());
        let list = Arc::new(TestList::new());
        let owner = manager.register_owner();

        let m = manager.clone();
        let l = list.clone();
        let o = owner.clone();
        let handle = std::thread::spawn(move || m.wait(&o, false, &*l));

        std::thread::sleep(Duration::from_millis(20));
        manager.wake_up(true, &*list);

        handle.join().unwrap().unwrap();
        assert_eq!(list.get_first_index(), NO_INDEX as u8);
    }

    #[test]
    fn irrevocable_excludes_revocable() {
        let manager = LockManager::new();
        let _guard = manager.enter_revocable().unwrap();
        // try_enter_irrevocable now blocks until revocable readers drain
        // (§4.4 begin-step-2), so exercise the underlying OS rwlock
        // directly to confirm the exclusion without deadlocking the test.
        assert!(manager.exclusive.try_write().is_none());
    }
}
