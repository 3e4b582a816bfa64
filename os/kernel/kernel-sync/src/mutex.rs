//! Guarded data over a pluggable raw lock.
//!
//! With [`RawTicket`](crate::RawTicket) as the raw lock, guards are handed
//! out in the order callers arrived at [`Mutex::lock`]; a waiting core never
//! starves behind a faster one.

use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

/// Data protected by a raw lock `R`.
///
/// The data is only reachable through a [`MutexGuard`], which releases the
/// raw lock when dropped (including during unwinding in hosted tests).
pub struct Mutex<T, R> {
    raw: R,
    data: UnsafeCell<T>,
}

// SAFETY: The raw lock hands out one guard at a time, so `&Mutex` only ever
// yields exclusive access to `T`. `T` itself moves between threads.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    /// Wrap `value` behind an already constructed raw lock.
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex and return the protected value.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Exclusive access through `&mut self`; no locking required.
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// The raw lock, for queue diagnostics such as [`RawTicket::queued`](crate::RawTicket::queued).
    #[inline]
    pub const fn raw(&self) -> &R {
        &self.raw
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    /// Wait for this caller's turn and return the guard.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { mutex: self }
    }

    /// Take the lock only if nobody holds it or waits for it.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw
            .raw_try_lock()
            .then(|| MutexGuard { mutex: self })
    }

    /// Run `f` on the protected value under the lock.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Advisory: whether the lock is currently held by anyone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.raw_is_locked()
    }
}

impl<T: fmt::Debug, R> fmt::Debug for Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish_non_exhaustive()
    }
}

/// Exclusive access to the data of a [`Mutex`]; unlocks on drop.
pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    mutex: &'a Mutex<T, R>,
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard exists only while the raw lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: As for `deref`; `&mut self` rules out a second borrow.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: fmt::Debug, R> fmt::Debug for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T, R> Drop for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        // SAFETY: This guard owns the current ticket.
        unsafe { self.mutex.raw.raw_unlock() }
    }
}
