//! Process-wide exclusive token for non-reentrant external libraries.
//!
//! Some third-party libraries require globally serialized initialization.
//! Pipes that need one install an idler watcher polling [`grab`]; on
//! success they do the exclusive work, then [`yield_token`] so the next
//! waiter's poll succeeds. A waiter that gives up before grabbing simply
//! drops its watcher ([`abort`]).

use std::sync::atomic::{AtomicBool, Ordering};

use sluice_core::error::Result;
use sluice_core::upump::{Upump, UpumpCb, UpumpMgr};
use std::sync::Arc;

static BUSY: AtomicBool = AtomicBool::new(false);

/// Tries to take the token. Non-blocking; the caller polls from an idler
/// watcher until it succeeds.
pub fn grab() -> bool {
    BUSY.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
}

/// Releases the token so another waiter's poll can succeed.
pub fn yield_token() {
    BUSY.store(false, Ordering::Release);
}

/// Registers the polling idler a waiter uses to acquire the token. The
/// watcher still needs `start`.
pub fn alloc_pump(mgr: &Arc<dyn UpumpMgr>, cb: UpumpCb) -> Result<Upump> {
    Upump::alloc_idler(mgr, cb)
}

/// Removes a waiter that gives up before grabbing: dropping the watcher
/// unregisters it.
pub fn abort(pump: Upump) {
    drop(pump);
}
