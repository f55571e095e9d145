// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use tx_engine::{driver, Error, ModuleOps, TxOutcome};

#[ctor::ctor]
fn init_logger() {
    let _ = env_logger::builder().is_test(true).filter_level(log::LevelFilter::Debug).try_init();
}

struct CellModule {
    first: Arc<Mutex<u16>>,
    second: Arc<Mutex<u16>>,
}

impl ModuleOps for CellModule {
    fn apply_event(&mut self, head: u16, _tail: usize) -> Result<(), Error> {
        *self.first.lock().unwrap() = head;
        Ok(())
    }

    fn undo_event(&mut self, _head: u16, _tail: usize) -> Result<(), Error> {
        *self.second.lock().unwrap() = 0xBEEF;
        Ok(())
    }
}

/// S1 (spec.md:267): single-threaded append + commit. Append an event
/// carrying head `0x1234`; after commit, `apply_event` must have copied
/// it into the output cell.
#[test]
fn s1_single_threaded_append_then_commit_replays_apply_event() {
    let first = Arc::new(Mutex::new(0u16));
    let second = Arc::new(Mutex::new(0u16));
    let module = driver::register_module(Box::new(CellModule { first: first.clone(), second: second.clone() })).unwrap();

    let outcome = driver::run_transaction(
        || {
            driver::append_event(module, 0x1234, 0)?;
            Ok::<_, Error>(())
        },
        |_| panic!("no recovery expected"),
    );

    assert!(matches!(outcome, TxOutcome::Committed(())));
    assert_eq!(*first.lock().unwrap(), 0x1234);
    driver::release();
}

/// S2 (spec.md:269): same setup as S1, but the attempt fails before
/// commit. Rollback must replay `undo_event` (writing `0xBEEF` to the
/// second cell) and must never have run `apply_event` on the first.
#[test]
fn s2_single_threaded_append_then_rollback_replays_undo_event() {
    let first = Arc::new(Mutex::new(0u16));
    let second = Arc::new(Mutex::new(0u16));
    let module = driver::register_module(Box::new(CellModule { first: first.clone(), second: second.clone() })).unwrap();

    let outcome = driver::run_transaction(
        || {
            driver::append_event(module, 0x1234, 0)?;
            Err::<(), _>(Error::Errno(1))
        },
        |_| {},
    );

    assert!(matches!(outcome, TxOutcome::Recovery(Error::Errno(1))));
    assert_eq!(*first.lock().unwrap(), 0);
    assert_eq!(*second.lock().unwrap(), 0xBEEF);
    driver::release();
}

/// S4 (spec.md:273): irrevocable acquisition blocks until every
/// revocable transaction holding the arbiter's read side has drained —
/// it must never report a spurious conflict instead of waiting.
#[test]
fn s4_irrevocable_blocks_until_revocable_readers_drain() {
    let manager = Arc::new(tx_engine::LockManager::new());
    let released = Arc::new(AtomicUsize::new(0));
    let ready = Arc::new(Barrier::new(4));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let manager = manager.clone();
            let released = released.clone();
            let ready = ready.clone();
            std::thread::spawn(move || {
                let guard = manager.enter_revocable().unwrap();
                ready.wait();
                std::thread::sleep(std::time::Duration::from_millis(20));
                released.fetch_add(1, Ordering::SeqCst);
                drop(guard);
            })
        })
        .collect();

    ready.wait();
    let guard = manager.try_enter_irrevocable().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 3, "irrevocable must not enter before readers drain");
    drop(guard);

    for reader in readers {
        reader.join().unwrap();
    }
}

/// S5 (spec.md:277): a transaction that restarts unconditionally is
/// forced into Irrevocable mode on its eleventh attempt.
#[test]
fn s5_retry_limit_forces_irrevocable_mode() {
    let attempts = AtomicUsize::new(0);
    let outcome = driver::run_transaction(
        || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < tx_engine::transaction::MAX_RETRIES as usize {
                Err(Error::Conflicting(tx_engine::error::LockRef(0)))
            } else {
                Ok(driver::is_irrevocable())
            }
        },
        |_| panic!("no recovery expected"),
    );

    match outcome {
        TxOutcome::Committed(was_irrevocable) => assert!(was_irrevocable),
        other => panic!("expected Committed(true), got {:?}", other),
    }
    assert_eq!(driver::number_of_restarts(), tx_engine::transaction::MAX_RETRIES);
    driver::release();
}

// S6 (spec.md:279, upgrade conflict) and S3 (spec.md:271, two-thread
// reader conflict with enqueue/wait/wake) are exercised as unit tests
// alongside the code they cover: `rwlock::tests::upgrade_reports_conflict_when_not_sole_reader`
// and `lock_owner::tests::wake_up_releases_a_waiter` /
// `lock_manager::tests::wake_up_wakes_the_enqueued_waiter`.

struct CountingModule {
    applied: Arc<AtomicUsize>,
    undone: Arc<AtomicUsize>,
}

impl ModuleOps for CountingModule {
    fn apply(&mut self) -> Result<(), Error> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn undo(&mut self) -> Result<(), Error> {
        self.undone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A body that succeeds on the first attempt commits without any
/// restarts, and its module's `apply` runs exactly once.
#[test]
fn commits_on_first_attempt_without_restarting() {
    let applied = Arc::new(AtomicUsize::new(0));
    let undone = Arc::new(AtomicUsize::new(0));

    driver::register_module(Box::new(CountingModule {
        applied: applied.clone(),
        undone: undone.clone(),
    }))
    .unwrap();

    let outcome = driver::run_transaction(|| Ok::<_, Error>(()), |_| panic!("no recovery expected"));

    assert!(matches!(outcome, TxOutcome::Committed(())));
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(undone.load(Ordering::SeqCst), 0);
    assert_eq!(driver::number_of_restarts(), 0);
    driver::release();
}

/// A body that reports Conflicting once rolls back (running `undo`),
/// restarts, then succeeds and applies.
#[test]
fn conflicting_body_rolls_back_then_commits_on_restart() {
    let applied = Arc::new(AtomicUsize::new(0));
    let undone = Arc::new(AtomicUsize::new(0));

    driver::register_module(Box::new(CountingModule {
        applied: applied.clone(),
        undone: undone.clone(),
    }))
    .unwrap();

    let attempt = AtomicUsize::new(0);
    let outcome = driver::run_transaction(
        || {
            if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Conflicting(tx_engine::error::LockRef(0)))
            } else {
                Ok(())
            }
        },
        |_| panic!("no recovery expected"),
    );

    assert!(matches!(outcome, TxOutcome::Committed(())));
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(undone.load(Ordering::SeqCst), 1);
    assert_eq!(driver::number_of_restarts(), 1);
    driver::release();
}

/// An error the driver cannot retry away from (a bare errno) is routed
/// to the caller's recovery handler and never applied.
#[test]
fn unrecoverable_error_routes_to_recovery_and_skips_apply() {
    let applied = Arc::new(AtomicUsize::new(0));
    let undone = Arc::new(AtomicUsize::new(0));

    driver::register_module(Box::new(CountingModule {
        applied: applied.clone(),
        undone: undone.clone(),
    }))
    .unwrap();

    let recovered = Arc::new(Mutex::new(None));
    let recovered2 = recovered.clone();

    let outcome = driver::run_transaction(
        || Err::<(), _>(Error::Errno(5)),
        move |error| *recovered2.lock().unwrap() = Some(error),
    );

    assert!(matches!(outcome, TxOutcome::Recovery(Error::Errno(5))));
    assert_eq!(*recovered.lock().unwrap(), Some(Error::Errno(5)));
    assert_eq!(applied.load(Ordering::SeqCst), 0);
    driver::release();
}

/// A commit that fails after the body succeeds must still roll back:
/// `prepare_commit` reporting Conflicting must not leave the
/// transaction's event log or module state for the next attempt to
/// trip over.
#[test]
fn commit_failure_after_a_successful_body_still_rolls_back() {
    struct FlakyOnce {
        tripped: Arc<Mutex<bool>>,
        undone: Arc<AtomicUsize>,
    }

    impl ModuleOps for FlakyOnce {
        fn prepare_commit(&mut self, _is_irrevocable: bool) -> Result<(), Error> {
            let mut tripped = self.tripped.lock().unwrap();
            if !*tripped {
                *tripped = true;
                Err(Error::Conflicting(tx_engine::error::LockRef(0)))
            } else {
                Ok(())
            }
        }

        fn undo(&mut self) -> Result<(), Error> {
            self.undone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let tripped = Arc::new(Mutex::new(false));
    let undone = Arc::new(AtomicUsize::new(0));
    driver::register_module(Box::new(FlakyOnce { tripped: tripped.clone(), undone: undone.clone() })).unwrap();

    let outcome = driver::run_transaction(|| Ok::<_, Error>(()), |_| panic!("no recovery expected"));

    assert!(matches!(outcome, TxOutcome::Committed(())));
    assert_eq!(undone.load(Ordering::SeqCst), 1, "rollback must run after the first commit's prepare_commit failed");
    assert_eq!(driver::number_of_restarts(), 1);
    driver::release();
}

/// Many threads driving independent transactions through a shared
/// [`tx_engine::RwLock`] never observe torn updates to the value it
/// guards, exercising the lock manager's enqueue/wait/wake path under
/// real contention. A random minority of workers take the read side
/// instead, so the run also exercises concurrent-reader admission.
#[test]
fn concurrent_writers_serialize_through_the_packed_rwlock() {
    let manager = Arc::new(tx_engine::LockManager::new());
    let guarded = Arc::new(tx_engine::RwLock::new());
    let value = Arc::new(Mutex::new(0usize));

    // Kept below 16: a packed rwlock's waiter-list head is a 4-bit
    // field, so at most 15 distinct lock owners can ever be enqueued
    // on one lock at a time (see lock_manager::LockManager::wait).
    let pool = threadpool::ThreadPool::new(4);
    let worker_count = 12;
    let mut writer_count = 0;

    for _ in 0..worker_count {
        let manager = manager.clone();
        let guarded = guarded.clone();
        let value = value.clone();
        let is_reader = test_support::random::coinflip() && test_support::random::usize(4) == 0;
        if !is_reader {
            writer_count += 1;
        }
        pool.execute(move || {
            std::thread::sleep(std::time::Duration::from_nanos(rand::random::<u8>() as u64));
            let owner = manager.register_owner();
            if is_reader {
                guarded.try_rdlock(&manager, &owner).expect("rdlock");
                let _ = *value.lock().unwrap();
            } else {
                guarded.try_wrlock(&manager, &owner, false).expect("wrlock");
                {
                    let mut v = value.lock().unwrap();
                    *v += 1;
                }
            }
            guarded.unlock(&manager);
        });
    }

    pool.join();
    assert_eq!(*value.lock().unwrap(), writer_count);
}
