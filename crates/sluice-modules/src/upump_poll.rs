//! `poll(2)`-based event loop.
//!
//! Single-threaded cooperative scheduler: one call to [`PollUpumpMgr::run`]
//! drives idlers (every iteration), timers and fd-readable watchers until
//! no started watcher remains. The manager object is shareable (pipes hold
//! it through `Arc<dyn UpumpMgr>`), but watcher operations are
//! thread-affine: any call from a thread other than the creating one
//! fails with `WrongState`. Cross-thread wakeups go through an fd (see
//! the transfer manager's self-pipe).

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use sluice_core::error::{Error, Result};
use sluice_core::upump::{PumpCtl, UpumpCb, UpumpMgr, WatchSpec};

struct Watcher {
    spec: WatchSpec,
    /// Taken out while the callback runs so the loop holds no lock
    /// around user code.
    cb: Option<UpumpCb>,
    active: bool,
    /// Next fire time; timers only, armed on start.
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    watchers: HashMap<u64, Watcher>,
    next_id: u64,
}

/// Event loop over `poll(2)`.
pub struct PollUpumpMgr {
    owner: ThreadId,
    weak_self: Weak<PollUpumpMgr>,
    inner: Mutex<Inner>,
}

impl PollUpumpMgr {
    /// Creates the loop, bound to the calling thread.
    pub fn new() -> Arc<PollUpumpMgr> {
        Arc::new_cyclic(|weak| PollUpumpMgr {
            owner: thread::current().id(),
            weak_self: weak.clone(),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// The manager as the trait object pipes expect.
    pub fn as_upump_mgr(self: &Arc<Self>) -> Arc<dyn UpumpMgr> {
        Arc::clone(self) as Arc<dyn UpumpMgr>
    }

    fn check_owner(&self) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::WrongState)
        }
    }

    fn ctl(&self, id: u64) -> PumpCtl {
        let weak: Weak<dyn UpumpMgr> = self.weak_self.clone();
        PumpCtl::new(weak, id)
    }

    /// Runs until no started watcher remains.
    pub fn run(self: &Arc<Self>) {
        loop {
            // Snapshot what to wait for.
            let mut poll_ids: Vec<u64> = Vec::new();
            let mut pollfds: Vec<libc::pollfd> = Vec::new();
            let mut timeout_ms: i32 = -1;
            let mut any_active = false;
            {
                let inner = self.inner.lock().unwrap();
                let now = Instant::now();
                for (&id, w) in &inner.watchers {
                    if !w.active {
                        continue;
                    }
                    any_active = true;
                    match w.spec {
                        WatchSpec::Idler => timeout_ms = 0,
                        WatchSpec::Timer { .. } => {
                            if let Some(deadline) = w.deadline {
                                let until = deadline.saturating_duration_since(now);
                                let mut ms = until.as_millis().min(i32::MAX as u128) as i32;
                                if ms == 0 && !until.is_zero() {
                                    // Round sub-millisecond waits up, not
                                    // down to a hot spin.
                                    ms = 1;
                                }
                                if timeout_ms < 0 || ms < timeout_ms {
                                    timeout_ms = ms;
                                }
                            }
                        }
                        WatchSpec::FdRead { fd } => {
                            poll_ids.push(id);
                            pollfds.push(libc::pollfd {
                                fd,
                                events: libc::POLLIN,
                                revents: 0,
                            });
                        }
                    }
                }
            }
            if !any_active {
                return;
            }

            let ret = unsafe {
                libc::poll(
                    pollfds.as_mut_ptr(),
                    pollfds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("poll failed: {err}");
                return;
            }

            // Collect due watchers and take their callbacks out.
            let mut due: Vec<(u64, UpumpCb)> = Vec::new();
            {
                let mut inner = self.inner.lock().unwrap();
                let now = Instant::now();

                for (i, pfd) in pollfds.iter().enumerate() {
                    // Error conditions fire the callback too, so it can
                    // observe the failure and stop itself.
                    let wake = libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
                    if pfd.revents & wake != 0 {
                        let id = poll_ids[i];
                        if let Some(w) = inner.watchers.get_mut(&id)
                            && w.active
                            && let Some(cb) = w.cb.take()
                        {
                            due.push((id, cb));
                        }
                    }
                }

                let ids: Vec<u64> = inner.watchers.keys().copied().collect();
                for id in ids {
                    let Some(w) = inner.watchers.get_mut(&id) else {
                        continue;
                    };
                    if !w.active {
                        continue;
                    }
                    match w.spec {
                        WatchSpec::Idler => {
                            if let Some(cb) = w.cb.take() {
                                due.push((id, cb));
                            }
                        }
                        WatchSpec::Timer { repeat, .. } => {
                            if let Some(deadline) = w.deadline
                                && deadline <= now
                            {
                                match repeat {
                                    Some(period) => w.deadline = Some(deadline + period),
                                    None => {
                                        w.deadline = None;
                                        w.active = false;
                                    }
                                }
                                if let Some(cb) = w.cb.take() {
                                    due.push((id, cb));
                                }
                            }
                        }
                        WatchSpec::FdRead { .. } => {}
                    }
                }
            }

            // Fire with the lock released; callbacks may start, stop,
            // register or free watchers, including their own.
            for (id, mut cb) in due {
                let ctl = self.ctl(id);
                cb(&ctl);
                let mut inner = self.inner.lock().unwrap();
                if let Some(w) = inner.watchers.get_mut(&id)
                    && w.cb.is_none()
                {
                    w.cb = Some(cb);
                }
            }
        }
    }
}

impl UpumpMgr for PollUpumpMgr {
    fn register(&self, spec: WatchSpec, cb: UpumpCb) -> Result<u64> {
        self.check_owner()?;
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.watchers.insert(
            id,
            Watcher {
                spec,
                cb: Some(cb),
                active: false,
                deadline: None,
            },
        );
        Ok(id)
    }

    fn start(&self, id: u64) -> Result<()> {
        self.check_owner()?;
        let mut inner = self.inner.lock().unwrap();
        let w = inner.watchers.get_mut(&id).ok_or(Error::BadArg)?;
        w.active = true;
        if let WatchSpec::Timer { after, .. } = w.spec {
            w.deadline = Some(Instant::now() + after);
        }
        Ok(())
    }

    fn stop(&self, id: u64) -> Result<()> {
        self.check_owner()?;
        let mut inner = self.inner.lock().unwrap();
        let w = inner.watchers.get_mut(&id).ok_or(Error::BadArg)?;
        w.active = false;
        w.deadline = None;
        Ok(())
    }

    fn free(&self, id: u64) -> Result<()> {
        self.check_owner()?;
        let mut inner = self.inner.lock().unwrap();
        inner.watchers.remove(&id);
        Ok(())
    }
}
