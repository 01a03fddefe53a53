//! Fixed-capacity lock-free LIFO pool.
//!
//! Allocator pools hand back the most recently freed object first, which
//! keeps its cache lines warm. `push` rejects when the pool is full and
//! returns the value to the caller, who must dispose of it (usually: let it
//! fall back to the heap).
//!
//! # Synchronization
//!
//! The stack top is an atomic index into a slot array. A slot is handed
//! over between a pusher and a popper through a per-slot `full` flag:
//!
//! - `push`: CAS `top` from `t` to `t + 1` reserves slot `t` for writing.
//!   The writer waits for `full == false` (a popper may still be draining a
//!   previous value), writes, then publishes with `full = true` (Release).
//! - `pop`: CAS `top` from `t` to `t - 1` reserves slot `t - 1` for
//!   reading. The reader waits for `full == true` (a pusher may still be
//!   writing), takes the value (Acquire pairs with the pusher's Release),
//!   then clears `full`.
//!
//! Slot ownership is decided solely by the CAS on `top`, so two poppers or
//! two pushers never touch the same slot concurrently. Indices are not
//! pointers, so there is no ABA hazard. The short spin on `full` only
//! occurs when a reservation races the handoff of the same slot.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Slot<T> {
    full: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free LIFO of owned values.
pub struct Ulifo<T> {
    slots: Box<[Slot<T>]>,
    top: AtomicUsize,
}

// Values are moved in and out whole; the slot protocol above guarantees a
// slot is accessed by at most one thread at a time.
unsafe impl<T: Send> Send for Ulifo<T> {}
unsafe impl<T: Send> Sync for Ulifo<T> {}

impl<T> Ulifo<T> {
    /// Creates a pool holding at most `depth` elements. A zero depth is
    /// valid: every `push` is then rejected.
    pub fn new(depth: usize) -> Self {
        let slots = (0..depth)
            .map(|_| Slot {
                full: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            slots,
            top: AtomicUsize::new(0),
        }
    }

    /// Maximum number of elements the pool can hold.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Stores `value`, or hands it back when the pool is full.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        loop {
            let t = self.top.load(Ordering::Acquire);
            if t == self.slots.len() {
                return Err(value);
            }
            if self
                .top
                .compare_exchange_weak(t, t + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let slot = &self.slots[t];
                while slot.full.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                }
                unsafe { (*slot.value.get()).write(value) };
                slot.full.store(true, Ordering::Release);
                return Ok(());
            }
        }
    }

    /// Takes the most recently pushed element, if any.
    pub fn pop(&self) -> Option<T> {
        loop {
            let t = self.top.load(Ordering::Acquire);
            if t == 0 {
                return None;
            }
            if self
                .top
                .compare_exchange_weak(t, t - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let slot = &self.slots[t - 1];
                while !slot.full.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                }
                let value = unsafe { (*slot.value.get()).assume_init_read() };
                slot.full.store(false, Ordering::Release);
                return Some(value);
            }
        }
    }

    /// Drains every pooled element, dropping them. Intended for shutdown
    /// and leak-checking.
    pub fn vacuum(&self) {
        while self.pop().is_some() {}
    }
}

impl<T> Drop for Ulifo<T> {
    fn drop(&mut self) {
        self.vacuum();
    }
}
