//! Event-loop contract.
//!
//! An event loop (`UpumpMgr`) is a single-threaded cooperative scheduler
//! owning watchers: idlers (fire every iteration), timers, and
//! fd-readable watchers. Event-loop objects are thread-affine — only the
//! owning thread may allocate, start or stop watchers; implementations
//! enforce this by returning `WrongState` from foreign threads. Pipes
//! relinquish control only by returning from their entries; long-running
//! work is divided across idler invocations.
//!
//! The contract is consumed by pooled allocators and by the cross-thread
//! transfer mechanism, which drains its command queue from a watcher on
//! the destination loop.

use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::Result;

/// What a watcher waits for.
#[derive(Debug, Clone, Copy)]
pub enum WatchSpec {
    /// Fires on every loop iteration while started.
    Idler,
    /// Fires `after` from start, then every `repeat` if given.
    Timer {
        after: Duration,
        repeat: Option<Duration>,
    },
    /// Fires when `fd` becomes readable.
    FdRead { fd: RawFd },
}

/// Callback token handed to a firing watcher; lets the callback stop or
/// restart watchers of its own loop (same-thread only).
#[derive(Clone)]
pub struct PumpCtl {
    mgr: Weak<dyn UpumpMgr>,
    id: u64,
}

impl PumpCtl {
    pub fn new(mgr: Weak<dyn UpumpMgr>, id: u64) -> Self {
        Self { mgr, id }
    }

    /// Identifier of the watcher this token controls.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start(&self) -> Result<()> {
        match self.mgr.upgrade() {
            Some(mgr) => mgr.start(self.id),
            None => Err(crate::error::Error::WrongState),
        }
    }

    pub fn stop(&self) -> Result<()> {
        match self.mgr.upgrade() {
            Some(mgr) => mgr.stop(self.id),
            None => Err(crate::error::Error::WrongState),
        }
    }

    /// Stops and unregisters the watcher.
    pub fn free(&self) -> Result<()> {
        match self.mgr.upgrade() {
            Some(mgr) => mgr.free(self.id),
            None => Err(crate::error::Error::WrongState),
        }
    }
}

/// Watcher callback. Receives a control token for the firing watcher.
pub type UpumpCb = Box<dyn FnMut(&PumpCtl) + Send>;

/// Event-loop manager contract.
pub trait UpumpMgr: Send + Sync {
    /// Registers a watcher; it stays idle until started.
    fn register(&self, spec: WatchSpec, cb: UpumpCb) -> Result<u64>;

    /// Starts a registered watcher.
    fn start(&self, id: u64) -> Result<()>;

    /// Stops a watcher without unregistering it.
    fn stop(&self, id: u64) -> Result<()>;

    /// Stops and unregisters a watcher. Idempotent.
    fn free(&self, id: u64) -> Result<()>;
}

/// Owner handle of a watcher: stops and unregisters it on drop.
pub struct Upump {
    mgr: Arc<dyn UpumpMgr>,
    id: u64,
}

impl Upump {
    /// Registers a watcher on `mgr` and returns its owner handle.
    pub fn alloc(mgr: &Arc<dyn UpumpMgr>, spec: WatchSpec, cb: UpumpCb) -> Result<Upump> {
        let id = mgr.register(spec, cb)?;
        Ok(Upump {
            mgr: Arc::clone(mgr),
            id,
        })
    }

    /// Registers an idler watcher.
    pub fn alloc_idler(mgr: &Arc<dyn UpumpMgr>, cb: UpumpCb) -> Result<Upump> {
        Self::alloc(mgr, WatchSpec::Idler, cb)
    }

    /// Registers a timer watcher.
    pub fn alloc_timer(
        mgr: &Arc<dyn UpumpMgr>,
        after: Duration,
        repeat: Option<Duration>,
        cb: UpumpCb,
    ) -> Result<Upump> {
        Self::alloc(mgr, WatchSpec::Timer { after, repeat }, cb)
    }

    /// Registers an fd-readable watcher.
    pub fn alloc_fd_read(mgr: &Arc<dyn UpumpMgr>, fd: RawFd, cb: UpumpCb) -> Result<Upump> {
        Self::alloc(mgr, WatchSpec::FdRead { fd }, cb)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start(&self) -> Result<()> {
        self.mgr.start(self.id)
    }

    pub fn stop(&self) -> Result<()> {
        self.mgr.stop(self.id)
    }
}

impl Drop for Upump {
    fn drop(&mut self) {
        let _ = self.mgr.free(self.id);
    }
}
