//! Clock source contract.
//!
//! Clock sources are external; the core only fixes the unit (27 MHz
//! ticks, the usual transport-stream frequency) and the interface pipes
//! use to stamp reception times.

/// Ticks per second of every `Uclock`.
pub const UCLOCK_FREQ: u64 = 27_000_000;

/// Monotonic clock source.
pub trait Uclock: Send + Sync {
    /// Current time in ticks of [`UCLOCK_FREQ`].
    fn now(&self) -> u64;
}
