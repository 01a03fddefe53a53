//! Atomic reference counter for pooled shared structures.
//!
//! Unlike `Arc`, this counter is decoupled from deallocation: the owner
//! decides what happens when the count drops to zero (usually: return the
//! carcass to a pool). Reading the guarded object after a successful
//! [`Urefcount::release`] is forbidden.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Atomic use counter, initialized to one reference.
#[derive(Debug)]
pub struct Urefcount(AtomicUsize);

impl Urefcount {
    /// Creates a counter holding a single reference.
    pub fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    /// Takes an additional reference.
    pub fn acquire(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops a reference. Returns `true` when this was the last one; the
    /// caller then owns the guarded object exclusively and must dispose of
    /// it.
    pub fn release(&self) -> bool {
        self.0.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Whether exactly one reference is alive. Only meaningful when the
    /// caller holds one of the references (the answer is otherwise stale by
    /// the time it is observed).
    pub fn is_single(&self) -> bool {
        self.0.load(Ordering::Acquire) == 1
    }

    /// Resets the counter to one reference without synchronization.
    ///
    /// Valid only when the object is provably quiescent, as when it was
    /// just popped from a pool that held its last reference.
    pub fn reset(&self) {
        self.0.store(1, Ordering::Relaxed);
    }
}

impl Default for Urefcount {
    fn default() -> Self {
        Self::new()
    }
}
