//! Reader/writer lock with blocking and non-blocking acquisition.
//!
//! `ReadWriteLock` owns the data it protects. Any number of readers may hold
//! it at once, or exactly one writer. A writer claims the lock first and then
//! waits for current readers to drain; while a claim is pending no new reader
//! gets in ahead of it.
//!
//! ```
//! use gdci::rwlock::ReadWriteLock;
//!
//! let lock = ReadWriteLock::new(Vec::<u32>::new());
//! lock.write().push(1);
//! assert_eq!(lock.read().len(), 1);
//!
//! let reader = lock.read();
//! assert!(lock.try_write().unwrap_err().is_lock_busy());
//! drop(reader);
//! assert!(lock.try_write().is_ok());
//! ```
//!
//! Guards release on drop, so every exit path releases exactly what was
//! acquired. A failed `try_*` call yields no guard and releases nothing.
//!
//! The lock is not reentrant: a thread holding a read guard that asks for
//! another read while a writer is waiting will deadlock.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{GdciError, GdciResult, LockMode};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    // Set by a writer as soon as it claims the lock, before readers drain.
    writer: bool,
}

// Admission control. The data lock behind it is only taken once the gate has
// admitted the caller, so it never contends.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl Gate {
    // The gate mutex only guards two counters that are never left
    // half-updated, so a poisoned guard is still consistent.
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, LockState>) -> MutexGuard<'a, LockState> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn release_read(&self) {
        let mut state = self.state();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state();
        state.writer = false;
        self.changed.notify_all();
    }
}

struct ReadTicket<'a>(&'a Gate);

impl Drop for ReadTicket<'_> {
    fn drop(&mut self) {
        self.0.release_read();
    }
}

struct WriteTicket<'a>(&'a Gate);

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        self.0.release_write();
    }
}

/// Reader/writer lock owning a `T`.
pub struct ReadWriteLock<T: ?Sized> {
    gate: Gate,
    data: RwLock<T>,
}

impl<T> ReadWriteLock<T> {
    /// Create an unlocked lock around `data`.
    pub fn new(data: T) -> Self {
        Self {
            gate: Gate::default(),
            data: RwLock::new(data),
        }
    }

    /// Consume the lock and return the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: ?Sized> ReadWriteLock<T> {
    fn read_guard(&self) -> ReadGuard<'_, T> {
        ReadGuard {
            data: self.data.read().unwrap_or_else(PoisonError::into_inner),
            _ticket: ReadTicket(&self.gate),
        }
    }

    fn write_guard(&self) -> WriteGuard<'_, T> {
        WriteGuard {
            data: self.data.write().unwrap_or_else(PoisonError::into_inner),
            _ticket: WriteTicket(&self.gate),
        }
    }

    /// Acquire shared access, waiting as long as needed.
    pub fn read(&self) -> ReadGuard<'_, T> {
        {
            let mut state = self.gate.state();
            while state.writer {
                state = self.gate.wait(state);
            }
            state.readers += 1;
        }
        self.read_guard()
    }

    /// Acquire exclusive access, waiting as long as needed.
    pub fn write(&self) -> WriteGuard<'_, T> {
        {
            let mut state = self.gate.state();
            while state.writer {
                state = self.gate.wait(state);
            }
            state.writer = true;
            while state.readers > 0 {
                state = self.gate.wait(state);
            }
        }
        self.write_guard()
    }

    /// Acquire shared access or fail with `LockBusy` if a writer holds or
    /// has claimed the lock.
    pub fn try_read(&self) -> GdciResult<ReadGuard<'_, T>> {
        {
            let mut state = self.gate.state();
            if state.writer {
                return Err(GdciError::LockBusy { mode: LockMode::Read });
            }
            state.readers += 1;
        }
        Ok(self.read_guard())
    }

    /// Acquire exclusive access or fail with `LockBusy` if anyone holds the
    /// lock.
    pub fn try_write(&self) -> GdciResult<WriteGuard<'_, T>> {
        {
            let mut state = self.gate.state();
            if state.writer || state.readers > 0 {
                return Err(GdciError::LockBusy { mode: LockMode::Write });
            }
            state.writer = true;
        }
        Ok(self.write_guard())
    }

    /// Acquire shared access, blocking when `wait` is true.
    pub fn acquire_read(&self, wait: bool) -> GdciResult<ReadGuard<'_, T>> {
        if wait {
            Ok(self.read())
        } else {
            self.try_read()
        }
    }

    /// Acquire exclusive access, blocking when `wait` is true.
    pub fn acquire_write(&self, wait: bool) -> GdciResult<WriteGuard<'_, T>> {
        if wait {
            Ok(self.write())
        } else {
            self.try_write()
        }
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of readers currently holding the lock.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.gate.state().readers
    }

    /// True while a writer holds or has claimed the lock.
    #[must_use]
    pub fn is_write_claimed(&self) -> bool {
        self.gate.state().writer
    }
}

impl<T: Default> Default for ReadWriteLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for ReadWriteLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.gate.state();
        f.debug_struct("ReadWriteLock")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .finish_non_exhaustive()
    }
}

/// Shared access guard; releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a, T: ?Sized> {
    // Declared before the ticket: the data lock is released before the gate.
    data: RwLockReadGuard<'a, T>,
    _ticket: ReadTicket<'a>,
}

impl<T: ?Sized> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadGuard").field(&&**self).finish()
    }
}

/// Exclusive access guard; releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a, T: ?Sized> {
    data: RwLockWriteGuard<'a, T>,
    _ticket: WriteTicket<'a>,
}

impl<T: ?Sized> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: ?Sized> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for WriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteGuard").field(&&**self).finish()
    }
}
