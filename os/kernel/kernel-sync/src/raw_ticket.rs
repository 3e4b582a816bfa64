use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

/// FIFO ticket lock.
///
/// Every [`lock`](Self::lock) call draws a ticket from `next` and spins until
/// `owner` (the ticket being served) reaches it, so contenders are admitted
/// in the exact order they arrived. The lock is held while `next != owner`.
///
/// The lock carries no owner identity and is **not re-entrant**: a context
/// that calls [`lock`](Self::lock) while already holding it waits for its own
/// release forever. There is no timeout.
pub struct RawTicket {
    next: AtomicUsize,
    owner: AtomicUsize,
}

impl Default for RawTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTicket {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
            owner: AtomicUsize::new(0),
        }
    }

    /// Draw a ticket and spin until it is served.
    #[inline]
    pub fn lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        // Acquire when we observe our turn
        while self.owner.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
    }

    /// Take the lock only if nobody holds or waits for it.
    ///
    /// The next ticket is claimed with a single compare-exchange, so this
    /// never spins. A concurrent [`lock`](Self::lock) that draws the ticket
    /// first makes this return `false` even if the lock is released a moment
    /// later; treat it as a best-effort fast path.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let owner = self.owner.load(Ordering::Relaxed);
        let next = self.next.load(Ordering::Relaxed);
        if next == owner {
            // attempt to claim the next ticket
            self.next
                .compare_exchange(
                    next,
                    next.wrapping_add(1),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
        } else {
            false
        }
    }

    /// Serve the next ticket.
    ///
    /// Unlocking a lock that is not held does nothing.
    ///
    /// # Safety
    /// The caller must be the current holder (or the lock must be free).
    /// Releasing a lock held by another context breaks its critical section.
    #[inline]
    pub unsafe fn unlock(&self) {
        let t = self.owner.load(Ordering::Relaxed);
        if t == self.next.load(Ordering::Relaxed) {
            return;
        }
        // Release when we advance owner
        self.owner.store(t.wrapping_add(1), Ordering::Release);
    }

    /// Whether a ticket is currently being served.
    ///
    /// Advisory only: the answer may be stale by the time it is used.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != self.next.load(Ordering::Relaxed)
    }

    /// Number of tickets drawn but not yet released (holder plus waiters).
    ///
    /// Advisory only, like [`is_locked`](Self::is_locked).
    #[inline]
    pub fn queued(&self) -> usize {
        let owner = self.owner.load(Ordering::Relaxed);
        self.next.load(Ordering::Relaxed).wrapping_sub(owner)
    }
}

impl RawLock for RawTicket {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }

    fn raw_is_locked(&self) -> bool {
        self.is_locked()
    }
}

impl RawUnlock for RawTicket {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
