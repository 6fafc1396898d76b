//! Fixed-capacity FIFO pool of numeric identities.
//!
//! Concurrent runs are assigned disjoint uids so the in-container entrypoint
//! can drop privileges to a per-run identity. The pool is a circular buffer
//! over a closed range `[lower, upper]`: `reserve` removes the oldest
//! available uid and `release` appends to the back, so released uids recycle
//! in release order rather than numeric order.
//!
//! The pool is constructed once at process start and shared by reference;
//! both operations are O(1) and serialized by a single mutex.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::PoolError;

/// Interior ring-buffer state, guarded by the pool's mutex.
#[derive(Debug)]
struct PoolState {
    /// Slot storage; a slot's value is meaningful only between the take and
    /// put cursors.
    slots: Vec<u32>,
    /// Index of the next uid to hand out.
    take_idx: usize,
    /// Index of the next free slot for a released uid.
    put_idx: usize,
    /// Count of currently available uids.
    available: usize,
}

impl PoolState {
    fn next_idx(&self, idx: usize) -> usize {
        let succ = idx + 1;
        if succ == self.slots.len() { 0 } else { succ }
    }
}

/// A fixed-capacity FIFO allocator of numeric identities.
///
/// Invariant: at any time, the count of available uids plus the count of
/// reserved-and-not-yet-released uids equals the pool's capacity, and no uid
/// is held by two concurrent reservations. The pool does not validate that a
/// released uid was actually issued by it; callers must only release uids
/// they reserved from the same instance.
#[derive(Debug)]
pub struct UidPool {
    inner: Mutex<PoolState>,
    capacity: usize,
}

impl UidPool {
    /// Create a pool over the closed range `[lower, upper]`.
    ///
    /// An inverted range yields an empty pool from which every reservation
    /// fails; range validity is enforced at configuration load.
    #[must_use]
    pub fn new(lower: u32, upper: u32) -> Self {
        let slots: Vec<u32> = (lower..=upper).collect();
        let capacity = slots.len();
        Self {
            inner: Mutex::new(PoolState {
                slots,
                take_idx: 0,
                put_idx: 0,
                available: capacity,
            }),
            capacity,
        }
    }

    /// Remove and return the oldest still-available uid.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Exhausted` when every uid is currently reserved.
    pub fn reserve(&self) -> Result<u32, PoolError> {
        let mut state = self.lock();
        if state.available == 0 {
            return Err(PoolError::Exhausted);
        }

        let uid = state.slots.get(state.take_idx).copied().unwrap_or_default();
        state.take_idx = state.next_idx(state.take_idx);
        state.available -= 1;
        Ok(uid)
    }

    /// Return a uid to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Full` when the pool already holds its full
    /// capacity, which indicates a double-release.
    pub fn release(&self, uid: u32) -> Result<(), PoolError> {
        let mut state = self.lock();
        if state.available == self.capacity {
            return Err(PoolError::Full);
        }

        let put_idx = state.put_idx;
        if let Some(slot) = state.slots.get_mut(put_idx) {
            *slot = uid;
        }
        state.put_idx = state.next_idx(put_idx);
        state.available += 1;
        Ok(())
    }

    /// Reserve a uid wrapped in a lease that releases itself on drop.
    ///
    /// The release obligation is scheduled at the moment of acquisition, so
    /// no later failure can strand the identity.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Exhausted` when every uid is currently reserved.
    pub fn reserve_lease(self: &Arc<Self>) -> Result<UidLease, PoolError> {
        let uid = self.reserve()?;
        Ok(UidLease {
            uid,
            pool: Arc::clone(self),
        })
    }

    /// The count of currently available uids.
    #[must_use]
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// The pool's fixed capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the interior state, recovering from a poisoned mutex.
    ///
    /// The guarded operations are index arithmetic and cannot leave the
    /// state half-mutated, so a poisoned lock is safe to reuse.
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reserved uid that returns itself to the pool when dropped.
#[derive(Debug)]
pub struct UidLease {
    uid: u32,
    pool: Arc<UidPool>,
}

impl UidLease {
    /// The reserved uid.
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }
}

impl Drop for UidLease {
    fn drop(&mut self) {
        if let Err(error) = self.pool.release(self.uid) {
            tracing::warn!(uid = self.uid, %error, "failed to release uid lease");
        }
    }
}
