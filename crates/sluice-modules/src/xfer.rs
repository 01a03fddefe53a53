//! Cross-thread pipe transfer.
//!
//! Event-loop objects are not thread-safe, so a pipe built on one thread
//! cannot be driven, reconfigured or released directly from another. The
//! transfer manager bridges that gap: a local proxy pipe translates
//! control verbs and the final release into messages on a bounded FIFO,
//! drained in issue order by a watcher on the destination loop. The
//! remote pipe is never touched on the submitting thread after
//! construction.
//!
//! Lifecycle: the manager is built *unattached* on any thread (commands
//! are refused), *attached* on the loop thread (commands apply in FIFO
//! order), then *detached* from any thread (submissions are poisoned and
//! a terminal message tears the watcher down on its own loop). Reattach
//! is forbidden.
//!
//! A pipe's reference is bumped when a command referencing it is
//! enqueued (the message carries the handle) and dropped after
//! application, so a `Release` that is last applies the final drop on the
//! destination thread, after every command enqueued before it.

use std::mem::ManuallyDrop;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, Weak};

use sluice_core::error::{Error, Result};
use sluice_core::queue::Ufifo;
use sluice_core::upipe::{self, Command, Reply, Upipe, UpipeRef, UprobeRef, probe};
use sluice_core::upump::{Upump, UpumpMgr};

/// FOURCC signature of transfer pipes and their manager.
pub const XFER_SIGNATURE: u32 = upipe::fourcc(b"xfer");

enum XferMsg {
    /// Apply a control command to the remote pipe on its loop.
    Control { pipe: UpipeRef, command: Command },
    /// Drop a reference to the remote pipe on its loop.
    Release(UpipeRef),
    /// Tear down the watcher; the manager becomes unusable.
    Detach,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Phase {
    Unattached,
    Attached,
    Detached,
}

struct XferState {
    phase: Phase,
    /// The drain watcher, owned by the destination loop's thread.
    pump: Option<Upump>,
}

/// Transfer manager: one per destination event loop.
pub struct XferMgr {
    queue: Ufifo<XferMsg>,
    wake_rx: RawFd,
    wake_tx: RawFd,
    state: Mutex<XferState>,
    weak_self: Weak<XferMgr>,
}

impl XferMgr {
    /// Creates an unattached manager with a command queue of
    /// `queue_length` messages. May run on any thread.
    pub fn new(queue_length: usize) -> Result<Arc<XferMgr>> {
        let (wake_rx, wake_tx) = wake_pipe()?;
        Ok(Arc::new_cyclic(|weak| XferMgr {
            queue: Ufifo::new(queue_length),
            wake_rx,
            wake_tx,
            state: Mutex::new(XferState {
                phase: Phase::Unattached,
                pump: None,
            }),
            weak_self: weak.clone(),
        }))
    }

    /// Attaches the manager to the event loop of the calling thread,
    /// which must be the loop's owner thread. Installs the drain watcher.
    pub fn attach(self: &Arc<Self>, upump_mgr: &Arc<dyn UpumpMgr>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            Phase::Unattached => {}
            Phase::Attached | Phase::Detached => return Err(Error::WrongState),
        }

        let weak = self.weak_self.clone();
        let pump = Upump::alloc_fd_read(
            upump_mgr,
            self.wake_rx,
            Box::new(move |ctl| match weak.upgrade() {
                Some(mgr) => mgr.drain(),
                // Manager gone without a detach: nothing will ever drain
                // again, stop watching the dead pipe.
                None => {
                    let _ = ctl.free();
                }
            }),
        )?;
        pump.start()?;
        state.phase = Phase::Attached;
        state.pump = Some(pump);
        Ok(())
    }

    /// Poisons further submissions and asks the destination loop to tear
    /// the watcher down. Thread-safe; the manager cannot be reattached.
    pub fn detach(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.phase {
            Phase::Attached => {
                if self.queue.push(XferMsg::Detach).is_err() {
                    return Err(Error::Alloc);
                }
                state.phase = Phase::Detached;
                drop(state);
                self.wake();
                Ok(())
            }
            Phase::Unattached => {
                state.phase = Phase::Detached;
                Ok(())
            }
            Phase::Detached => Err(Error::WrongState),
        }
    }

    /// Allocates a transfer proxy for `remote`. Control and release on
    /// the proxy apply to `remote` on the destination loop.
    pub fn alloc_xfer(self: &Arc<Self>, probe_chain: UprobeRef, remote: UpipeRef) -> Result<UpipeRef> {
        if self.state.lock().unwrap().phase == Phase::Detached {
            return Err(Error::WrongState);
        }
        let pipe: UpipeRef = Arc::new(XferPipe {
            mgr: Arc::clone(self),
            probe: probe_chain,
            remote: ManuallyDrop::new(remote),
        });
        probe::throw_ready(pipe.as_ref());
        Ok(pipe)
    }

    /// Releases pooled messages. Debug/shutdown tool.
    pub fn vacuum(&self) {
        self.queue.vacuum();
    }

    fn submit(&self, msg: XferMsg) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            match state.phase {
                Phase::Attached => {}
                Phase::Unattached | Phase::Detached => return Err(Error::WrongState),
            }
        }
        if self.queue.push(msg).is_err() {
            return Err(Error::Alloc);
        }
        self.wake();
        Ok(())
    }

    fn wake(&self) {
        // A full wake pipe already guarantees a pending wakeup.
        unsafe { libc::write(self.wake_tx, b"x".as_ptr().cast(), 1) };
    }

    /// Runs on the destination loop: applies queued commands in order.
    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.wake_rx, buf.as_mut_ptr().cast(), buf.len()) };
            if n < buf.len() as isize {
                break;
            }
        }

        while let Some(msg) = self.queue.pop() {
            match msg {
                XferMsg::Control { pipe, command } => {
                    let name = command.name();
                    if let Err(err) = pipe.control(command) {
                        log::warn!("transferred {name} failed: {err}");
                    }
                }
                XferMsg::Release(pipe) => drop(pipe),
                XferMsg::Detach => {
                    // Remaining messages were enqueued after the detach
                    // poison; dropping them still releases their pipe
                    // references on this thread.
                    while let Some(stale) = self.queue.pop() {
                        drop(stale);
                    }
                    let pump = self.state.lock().unwrap().pump.take();
                    drop(pump);
                    return;
                }
            }
        }
    }
}

impl Drop for XferMgr {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_rx);
            libc::close(self.wake_tx);
        }
    }
}

fn wake_pipe() -> Result<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(Error::External(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Local proxy of a pipe living on another loop.
struct XferPipe {
    mgr: Arc<XferMgr>,
    probe: UprobeRef,
    /// Only ever cloned into messages; the reference itself is released
    /// through the queue so the final drop happens on the remote loop.
    remote: ManuallyDrop<UpipeRef>,
}

impl Upipe for XferPipe {
    fn signature(&self) -> u32 {
        XFER_SIGNATURE
    }

    fn probe(&self) -> &UprobeRef {
        &self.probe
    }

    fn control(&self, command: Command) -> Result<Reply> {
        match command {
            // Getters cannot cross loops: submissions are fire-and-forget.
            Command::GetUrefMgr
            | Command::GetUpumpMgr
            | Command::GetUbufMgr
            | Command::GetUclock
            | Command::GetOutput
            | Command::GetFlowDef => Err(Error::Unsupported),
            command => {
                self.mgr.submit(XferMsg::Control {
                    pipe: Arc::clone(&self.remote),
                    command,
                })?;
                Ok(Reply::Ack)
            }
        }
    }
}

impl Drop for XferPipe {
    fn drop(&mut self) {
        probe::throw_dead(self);
        // SAFETY: `remote` is never touched again.
        let remote = unsafe { ManuallyDrop::take(&mut self.remote) };
        if let Err(err) = self.mgr.submit(XferMsg::Release(remote)) {
            // Detached or full: the reference drops on this thread, which
            // the remote pipe must tolerate (it is no longer driven).
            log::warn!("remote release could not be transferred: {err}");
        }
    }
}
