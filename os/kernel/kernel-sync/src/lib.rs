//! # Kernel synchronization primitives
//!
//! Busy-waiting locks for the boot stage, before any scheduler exists.
//! Waiting cores spin with [`core::hint::spin_loop`] between polls.
//!
//! * [`RawTicket`]: FIFO ticket lock (next/serving counters).
//! * [`Mutex`]: data protected by any raw lock, released by an RAII guard.
//! * [`TicketMutex`]: the ticket-lock flavor of [`Mutex`], used to serialize
//!   the physical frame allocator.
//!
//! ```rust
//! use kernel_sync::TicketMutex;
//!
//! let counter = TicketMutex::new(0_u32);
//! counter.with_lock(|c| *c += 1);
//! assert_eq!(*counter.lock(), 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_ticket;

pub use mutex::{Mutex, MutexGuard};
pub use raw_ticket::RawTicket;

pub type TicketMutex<T> = Mutex<T, RawTicket>;
pub type TicketMutexGuard<'a, T> = MutexGuard<'a, T, RawTicket>;

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    unsafe fn raw_unlock(&self);
}
