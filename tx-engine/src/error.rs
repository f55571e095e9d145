// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The engine's error object (component I).
//!
//! Every fallible operation in the engine reports through this type
//! rather than a bare `bool`. A transaction may only commit while its
//! error is [`Error::None`]; `is_non_recoverable` latches independently
//! of the status and is never cleared except by constructing a fresh
//! [`Error`].

use thiserror::Error as DeriveError;

/// A caller-defined error code, reported by a module through
/// [`Error::ErrorCode`]. Modules are free to interpret the payload.
pub type ModuleErrorCode = i32;

/// Opaque handle naming the [`crate::rwlock::RwLock`] a transaction
/// conflicted on. The engine never dereferences this; it exists purely
/// so the conflicting lock can be reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockRef(pub usize);

impl LockRef {
    pub fn from_ptr<T>(lock: &T) -> Self {
        LockRef(lock as *const T as usize)
    }
}

/// Tagged error union (§3, §7). `None` is the success state.
#[derive(Debug, DeriveError, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("no error")]
    None,

    /// Another transaction holds a resource we need. Carries a handle
    /// to the conflicting lock so the caller can report or log it.
    #[error("conflicting access to lock {0:?}")]
    Conflicting(LockRef),

    /// The running transaction is Revocable but an operation demands
    /// Irrevocable execution.
    #[error("operation requires an irrevocable transaction")]
    Revocable,

    /// A generic, module-defined error.
    #[error("module error code {0}")]
    ErrorCode(ModuleErrorCode),

    /// An OS-level errno from a failed system call.
    #[error("errno {0}")]
    Errno(i32),

    /// A Mach-style kernel return code.
    #[error("kern_return_t {0}")]
    KernReturn(i32),
}

impl Default for Error {
    fn default() -> Self {
        Error::None
    }
}

impl Error {
    pub fn is_set(&self) -> bool {
        !matches!(self, Error::None)
    }

    pub fn conflicting_lock(&self) -> Option<LockRef> {
        match self {
            Error::Conflicting(lock) => Some(*lock),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<ModuleErrorCode> {
        match self {
            Error::ErrorCode(code) => Some(*code),
            _ => None,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Errno(errno) => Some(*errno),
            _ => None,
        }
    }

    pub fn kern_return(&self) -> Option<i32> {
        match self {
            Error::KernReturn(value) => Some(*value),
            _ => None,
        }
    }

    /// Which mode a restart driven by this error should re-enter with,
    /// per the restart-decision table in §7. `None` here means "commit
    /// succeeded, there is nothing to restart".
    pub fn restart_mode(&self) -> Option<crate::transaction::Mode> {
        use crate::transaction::Mode;
        match self {
            Error::None => None,
            Error::Conflicting(_) => Some(Mode::Revocable),
            Error::Revocable => Some(Mode::Irrevocable),
            Error::ErrorCode(_) | Error::Errno(_) | Error::KernReturn(_) => None,
        }
    }

    /// True for the three variants that the driver routes to the
    /// caller's recovery handler instead of a plain retry.
    pub fn needs_recovery(&self) -> bool {
        matches!(self, Error::ErrorCode(_) | Error::Errno(_) | Error::KernReturn(_))
    }
}

/// A recognizable subset of module-defined [`ModuleErrorCode`] values
/// that the engine itself can produce (distinct from module-private
/// codes, which modules define on their own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    OutOfMemory = 1,
    GeneralError = 2,
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::ErrorCode(code as ModuleErrorCode)
    }
}

/// Latching error state held by a transaction: the current [`Error`]
/// plus the non-recoverable bit, which outlives any single error value
/// (§3: "latches to true and never clears without reinitialization").
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorState {
    current: Error,
    is_non_recoverable: bool,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Error {
        self.current
    }

    pub fn is_set(&self) -> bool {
        self.current.is_set()
    }

    pub fn is_non_recoverable(&self) -> bool {
        self.is_non_recoverable
    }

    /// Clears the current error but leaves the non-recoverable latch
    /// untouched. Called at the top of `begin` (§4.7).
    pub fn clear(&mut self) {
        self.current = Error::None;
    }

    /// Fully reinitializes the state, including the latch. Only valid
    /// when constructing a fresh transaction.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set(&mut self, error: Error) {
        self.current = error;
    }

    /// Sets the current error and latches non-recoverable. Used for
    /// failures observed past commit's point of no return (§4.4 step 2,
    /// §7 "Non-recoverable").
    pub fn latch(&mut self, error: Error) {
        self.current = error;
        self.is_non_recoverable = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_error_is_none_and_unset() {
        let state = ErrorState::new();
        assert_eq!(state.current(), Error::None);
        assert!(!state.is_set());
        assert!(!state.is_non_recoverable());
    }

    #[test]
    fn latch_is_sticky_across_clear() {
        let mut state = ErrorState::new();
        state.latch(Error::Errno(5));
        assert!(state.is_non_recoverable());
        state.clear();
        assert!(!state.is_set());
        assert!(state.is_non_recoverable());
    }

    #[test]
    fn restart_mode_matches_table() {
        assert_eq!(
            Error::Conflicting(LockRef(0)).restart_mode(),
            Some(crate::transaction::Mode::Revocable)
        );
        assert_eq!(Error::Revocable.restart_mode(), Some(crate::transaction::Mode::Irrevocable));
        assert_eq!(Error::Errno(1).restart_mode(), None);
        assert!(Error::Errno(1).needs_recovery());
        assert!(!Error::Conflicting(LockRef(0)).needs_recovery());
    }
}
