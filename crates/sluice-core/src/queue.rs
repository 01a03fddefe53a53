//! Bounded lock-free FIFO for cross-thread command traffic.
//!
//! Multiple producers, multiple consumers, fixed capacity, issue order
//! preserved. The transfer manager uses it single-consumer: commands
//! enqueued from any thread are applied on the owning event loop in the
//! order they were enqueued globally.
//!
//! # Synchronization
//!
//! Classic bounded-queue design with one monotonically increasing sequence
//! number per cell:
//!
//! - A cell is writable for ticket `pos` when `seq == pos`; the producer
//!   claims the ticket with a CAS on `enqueue_pos`, writes the value, then
//!   stores `seq = pos + 1` (Release) to publish it.
//! - A cell is readable for ticket `pos` when `seq == pos + 1`; the
//!   consumer claims the ticket with a CAS on `dequeue_pos`, reads the
//!   value (the Acquire load of `seq` pairs with the producer's Release),
//!   then stores `seq = pos + capacity` to recycle the cell for the next
//!   lap.
//!
//! Every dequeue therefore observes the complete write of its element:
//! each enqueue happens-before its dequeue.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer/multi-consumer FIFO of owned values.
pub struct Ufifo<T> {
    cells: Box<[Cell<T>]>,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

unsafe impl<T: Send> Send for Ufifo<T> {}
unsafe impl<T: Send> Sync for Ufifo<T> {}

impl<T> Ufifo<T> {
    /// Creates a queue holding at most `length` elements.
    ///
    /// A zero length is rounded up to one so the sequence arithmetic stays
    /// well defined; such a queue still only ever holds a single element.
    pub fn new(length: usize) -> Self {
        let length = length.max(1);
        let cells = (0..length)
            .map(|i| Cell {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            cells,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    /// Maximum number of elements the queue can hold.
    pub fn length(&self) -> usize {
        self.cells.len()
    }

    /// Enqueues `value`, or hands it back when the queue is full.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let cap = self.cells.len();
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[pos % cap];
            let seq = cell.seq.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos as isize);
            if dif == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*cell.value.get()).write(value) };
                        cell.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // seq lags the ticket: the cell still holds an element from
                // the previous lap, the queue is full.
                return Err(value);
            } else {
                // Our ticket is stale, another producer advanced past it.
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeues the oldest element, if any.
    pub fn pop(&self) -> Option<T> {
        let cap = self.cells.len();
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[pos % cap];
            let seq = cell.seq.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize);
            if dif == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        cell.seq.store(pos.wrapping_add(cap), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // seq lags the ticket: nothing published here yet.
                return None;
            } else {
                // Our ticket is stale, another consumer advanced past it.
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Drains every queued element, dropping them.
    pub fn vacuum(&self) {
        while self.pop().is_some() {}
    }
}

impl<T> Drop for Ufifo<T> {
    fn drop(&mut self) {
        self.vacuum();
    }
}
