//! Probes: the upstream event channel.
//!
//! Events raised by a pipe walk the probe chain attached at its
//! construction, nearest probe first. Each probe either consumes the
//! event or forwards it to its parent. Probes are immutable once
//! attached. A chain that exhausts without handling falls back to the
//! `log` facade, so no event is ever lost silently.

use std::sync::Arc;

use crate::upipe::Upipe;
use crate::uref::Uref;

/// Shared handle to a probe.
pub type UprobeRef = Arc<dyn Uprobe>;

/// Events travelling upstream through the probe chain.
#[derive(Debug)]
pub enum Event<'a> {
    /// The pipe is ready to process records.
    Ready,
    /// The pipe is being destroyed; thrown before sub-resources go.
    Dead,
    /// Allocation failed inside the pipe.
    AllocError,
    /// A watcher could not be created or started.
    UpumpError,
    /// Reading `uri` failed.
    ReadEnd(Option<&'a str>),
    /// The source reached the end of its flow.
    SourceEnd,
    /// The pipe needs a record manager before it can proceed.
    NeedUrefMgr,
    /// The pipe needs an event loop before it can proceed.
    NeedUpumpMgr,
    /// The pipe needs a buffer manager for the given flow definition.
    NeedUbufMgr(&'a Uref),
    /// A split source discovered an elementary stream.
    SplitAddFlow(u64, &'a Uref),
    /// A split source lost an elementary stream.
    SplitDelFlow(u64),
}

impl Event<'_> {
    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Dead => "dead",
            Self::AllocError => "alloc_error",
            Self::UpumpError => "upump_error",
            Self::ReadEnd(_) => "read_end",
            Self::SourceEnd => "source_end",
            Self::NeedUrefMgr => "need_uref_mgr",
            Self::NeedUpumpMgr => "need_upump_mgr",
            Self::NeedUbufMgr(_) => "need_ubuf_mgr",
            Self::SplitAddFlow(..) => "split_add_flow",
            Self::SplitDelFlow(_) => "split_del_flow",
        }
    }
}

/// Outcome of delivering an event to one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The probe consumed the event.
    Handled,
    /// Pass the event to the parent probe.
    Forward,
}

/// The probe contract.
pub trait Uprobe: Send + Sync {
    /// Handles or forwards one event raised by `pipe`.
    fn on_event(&self, pipe: &dyn Upipe, event: &Event<'_>) -> ProbeResult;

    /// Parent probe, when chained.
    fn next(&self) -> Option<&UprobeRef> {
        None
    }
}

/// Throws an event through `pipe`'s probe chain.
pub fn throw(pipe: &dyn Upipe, event: &Event<'_>) {
    let mut current = Arc::clone(pipe.probe());
    loop {
        match current.on_event(pipe, event) {
            ProbeResult::Handled => return,
            ProbeResult::Forward => match current.next().cloned() {
                Some(parent) => current = parent,
                None => {
                    log::error!(
                        "unhandled event {} from pipe {:08x}",
                        event.name(),
                        pipe.signature()
                    );
                    return;
                }
            },
        }
    }
}

pub fn throw_ready(pipe: &dyn Upipe) {
    throw(pipe, &Event::Ready);
}

pub fn throw_dead(pipe: &dyn Upipe) {
    throw(pipe, &Event::Dead);
}

pub fn throw_alloc_error(pipe: &dyn Upipe) {
    throw(pipe, &Event::AllocError);
}

pub fn throw_upump_error(pipe: &dyn Upipe) {
    throw(pipe, &Event::UpumpError);
}

pub fn throw_read_end(pipe: &dyn Upipe, uri: Option<&str>) {
    throw(pipe, &Event::ReadEnd(uri));
}

pub fn throw_source_end(pipe: &dyn Upipe) {
    throw(pipe, &Event::SourceEnd);
}

pub fn throw_need_uref_mgr(pipe: &dyn Upipe) {
    throw(pipe, &Event::NeedUrefMgr);
}

pub fn throw_need_upump_mgr(pipe: &dyn Upipe) {
    throw(pipe, &Event::NeedUpumpMgr);
}

pub fn throw_need_ubuf_mgr(pipe: &dyn Upipe, flow_def: &Uref) {
    throw(pipe, &Event::NeedUbufMgr(flow_def));
}

pub fn split_throw_add_flow(pipe: &dyn Upipe, id: u64, flow_def: &Uref) {
    throw(pipe, &Event::SplitAddFlow(id, flow_def));
}

pub fn split_throw_del_flow(pipe: &dyn Upipe, id: u64) {
    throw(pipe, &Event::SplitDelFlow(id));
}

/// Root probe: consumes every event, logging it at a level matching its
/// severity. Attach it at the end of every chain so errors surface on
/// standard error through the `log` facade.
pub struct LogProbe {
    next: Option<UprobeRef>,
}

impl LogProbe {
    pub fn new() -> UprobeRef {
        Arc::new(Self { next: None })
    }

    /// A logging probe that forwards nothing but still chains, for use in
    /// the middle of a chain.
    pub fn with_next(next: UprobeRef) -> UprobeRef {
        Arc::new(Self { next: Some(next) })
    }
}

impl Uprobe for LogProbe {
    fn on_event(&self, pipe: &dyn Upipe, event: &Event<'_>) -> ProbeResult {
        let sig = pipe.signature();
        match event {
            Event::Ready | Event::Dead => {
                log::debug!("pipe {sig:08x}: {}", event.name());
            }
            Event::SplitAddFlow(id, flow_def) => {
                log::info!(
                    "pipe {sig:08x}: flow {id} added: {}",
                    crate::dump::uref_json(flow_def)
                );
            }
            Event::SplitDelFlow(id) => {
                log::info!("pipe {sig:08x}: flow {id} deleted");
            }
            Event::SourceEnd => {
                log::info!("pipe {sig:08x}: end of source");
            }
            Event::ReadEnd(uri) => {
                log::warn!("pipe {sig:08x}: read end on {}", uri.unwrap_or("<none>"));
            }
            Event::AllocError
            | Event::UpumpError
            | Event::NeedUrefMgr
            | Event::NeedUpumpMgr
            | Event::NeedUbufMgr(_) => {
                log::error!("pipe {sig:08x}: {}", event.name());
            }
        }
        ProbeResult::Handled
    }

    fn next(&self) -> Option<&UprobeRef> {
        self.next.as_ref()
    }
}
