// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Growable flat array (component J), shared by the module registry
//! (G), the event log (F), and the lock manager's owner table.
//!
//! Growth strategy: round the old and new element counts up to the
//! next power of two and only reallocate when the rounded sizes
//! differ, so repeated single-element growth is amortised O(1). If a
//! rounded-size allocation ever fails, the table permanently falls
//! back to exact, linear-sized reallocation for the rest of the
//! process's lifetime — mirroring the original's static `lowmem` latch,
//! which is process-wide rather than per-table.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, ErrorCode};

static LOWMEM: AtomicBool = AtomicBool::new(false);

fn round_up_pow2(value: usize) -> usize {
    if value == 0 {
        return 0;
    }
    value.next_power_of_two()
}

pub struct Table<T> {
    data: Vec<T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl<T: Default + Clone> Table<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.data.get_mut(index)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Grows or shrinks the table to exactly `new_nelems` logical
    /// elements, applying the power-of-two reallocation strategy
    /// described in the module docs. New slots exposed by growth are
    /// zero/default-initialized.
    pub fn resize(&mut self, new_nelems: usize) -> Result<(), Error> {
        let nelems = self.data.len();

        if !LOWMEM.load(Ordering::Relaxed) {
            let old_rounded = round_up_pow2(nelems);
            let new_rounded = round_up_pow2(new_nelems);
            if old_rounded != new_rounded {
                if let Err(_ooh) = self.data.try_reserve_exact(old_rounded.max(new_rounded).saturating_sub(nelems)) {
                    LOWMEM.store(true, Ordering::Relaxed);
                    return self.linear_resize(new_nelems);
                }
            }
        } else {
            return self.linear_resize(new_nelems);
        }

        self.apply_logical_len(new_nelems);
        Ok(())
    }

    fn linear_resize(&mut self, new_nelems: usize) -> Result<(), Error> {
        if new_nelems > self.data.len() {
            self.data
                .try_reserve_exact(new_nelems - self.data.len())
                .map_err(|_| Error::from(ErrorCode::OutOfMemory))?;
        }
        self.apply_logical_len(new_nelems);
        Ok(())
    }

    fn apply_logical_len(&mut self, new_nelems: usize) {
        if new_nelems > self.data.len() {
            self.data.resize_with(new_nelems, T::default);
        } else {
            self.data.truncate(new_nelems);
        }
    }

    /// Appends one element, growing the table if needed. Returns the
    /// new element's index. Used by the module registry and event log,
    /// both of which only ever append.
    pub fn push(&mut self, value: T) -> Result<usize, Error> {
        let index = self.data.len();
        self.resize(index + 1)?;
        self.data[index] = value;
        Ok(index)
    }

    /// Truncates to zero elements without touching capacity or the
    /// power-of-two bucket bookkeeping — matches the event log's
    /// `clear`, which is expected to run every commit/rollback.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Forward walk with early stop (`tabwalk_1`/`tabwalk_2` in the
    /// original): `f` returns `true` to continue, `false` to stop.
    pub fn walk_forward<F: FnMut(&mut T) -> bool>(&mut self, mut f: F) {
        for item in self.data.iter_mut() {
            if !f(item) {
                break;
            }
        }
    }

    /// Reverse walk with early stop (`tabrwalk_1`/`tabrwalk_2`).
    pub fn walk_reverse<F: FnMut(&mut T) -> bool>(&mut self, mut f: F) {
        for item in self.data.iter_mut().rev() {
            if !f(item) {
                break;
            }
        }
    }

    /// Removes consecutive duplicates as judged by `same`, returning
    /// the number of elements kept (`tabuniq`).
    pub fn dedup_consecutive_by<F: FnMut(&T, &T) -> bool>(&mut self, mut same: F) -> usize {
        self.data.dedup_by(|a, b| same(b, a));
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_within_same_pow2_bucket_keeps_len_correct() {
        let mut table: Table<u32> = Table::new();
        table.resize(3).unwrap();
        assert_eq!(table.len(), 3);
        table.resize(4).unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn push_assigns_dense_increasing_indices() {
        let mut table: Table<u32> = Table::new();
        assert_eq!(table.push(10).unwrap(), 0);
        assert_eq!(table.push(20).unwrap(), 1);
        assert_eq!(table.push(30).unwrap(), 2);
        assert_eq!(table.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn clear_drops_all_elements() {
        let mut table: Table<u32> = Table::new();
        table.push(1).unwrap();
        table.push(2).unwrap();
        table.clear();
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn dedup_consecutive_removes_adjacent_equal_runs() {
        let mut table: Table<u32> = Table::new();
        for value in [1, 1, 2, 2, 2, 3] {
            table.push(value).unwrap();
        }
        let uniq = table.dedup_consecutive_by(|a, b| a == b);
        assert_eq!(uniq, 3);
        assert_eq!(table.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn walk_forward_stops_early() {
        let mut table: Table<u32> = Table::new();
        for value in [1, 2, 3, 4] {
            table.push(value).unwrap();
        }
        let mut seen = Vec::new();
        table.walk_forward(|v| {
            seen.push(*v);
            *v < 3
        });
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
