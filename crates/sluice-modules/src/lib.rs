//! # sluice-modules
//!
//! Concrete collaborators for the sluice dataflow runtime:
//!
//! - [`upump_poll`] — a `poll(2)`-based single-threaded event loop
//!   implementing the `UpumpMgr` contract (idlers, timers, fd watchers).
//! - [`uclock_std`] — a monotonic system clock in 27 MHz ticks.
//! - [`xfer`] — the cross-thread transfer manager: hands pipes built on
//!   one thread to the event loop that will drive them, marshalling
//!   control commands and the final release through a bounded FIFO.
//! - [`deal`] — the process-wide exclusive token serializing access to
//!   non-reentrant external libraries.
//! - [`demux`] — a demultiplexer source pipe over an abstract container
//!   demuxer, emitting one split output per elementary stream.

pub mod deal;
pub mod demux;
pub mod uclock_std;
pub mod upump_poll;
pub mod xfer;

pub use demux::{DemuxContext, DemuxPacket, DemuxSrcMgr, Demuxer, StreamInfo, StreamKind};
pub use uclock_std::SystemUclock;
pub use upump_poll::PollUpumpMgr;
pub use xfer::XferMgr;

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
