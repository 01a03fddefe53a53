//! Monotonic system clock.

use std::sync::Arc;
use std::time::Instant;

use sluice_core::uclock::{UCLOCK_FREQ, Uclock};

/// Monotonic clock counting ticks since its creation.
pub struct SystemUclock {
    origin: Instant,
}

impl SystemUclock {
    pub fn new() -> Arc<dyn Uclock> {
        Arc::new(Self {
            origin: Instant::now(),
        })
    }
}

impl Uclock for SystemUclock {
    fn now(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        elapsed.as_secs() * UCLOCK_FREQ
            + u64::from(elapsed.subsec_nanos()) * (UCLOCK_FREQ / 1_000_000) / 1_000
    }
}
