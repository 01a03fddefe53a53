//! # sluice-core
//!
//! **A dataflow runtime for media: pooled buffers, typed records, pipes.**
//!
//! `sluice-core` is the core of the sluice runtime. Independently
//! scheduled processing nodes ("pipes") exchange reference-counted
//! buffers of media samples together with a typed attribute dictionary
//! (timestamps, flow definitions, picture geometry). A producer emits
//! uniformly-typed records; successive pipes consume, transform and
//! forward them until a sink disposes of them.
//!
//! ## Quick start
//!
//! ```
//! use sluice_core::udict::UdictMgr;
//! use sluice_core::ubuf::UbufBlockMgr;
//! use sluice_core::umem::HeapUmemMgr;
//! use sluice_core::uref::UrefMgr;
//!
//! let uref_mgr = UrefMgr::new(UdictMgr::new(16, 32));
//! let block_mgr = UbufBlockMgr::new(16, HeapUmemMgr::new(), 32, 32, 16);
//!
//! // A record carrying ten octets of payload and a timestamp.
//! let mut uref = uref_mgr.alloc_block(&block_mgr, 10).unwrap();
//! uref.set_pts(27_000_000);
//! let block = uref.ubuf_mut().unwrap().as_block_mut().unwrap();
//! block.write_bytes(0, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
//!
//! // Zero-copy slice of the middle.
//! let slice = block.splice(3, 4).unwrap();
//! let mut out = [0u8; 4];
//! slice.extract(0, &mut out).unwrap();
//! assert_eq!(out, [3, 4, 5, 6]);
//! ```
//!
//! ## Architecture
//!
//! Buffers are pooled and copy-on-write: duplication and slicing share
//! the underlying region, write access requires exclusivity. Control
//! traffic travels through a typed command channel per pipe; events
//! travel upstream through a chain of probes. Pipes on different event
//! loops communicate through the transfer facility of `sluice-modules`.

pub mod dump;
pub mod error;
pub mod pool;
pub mod queue;
pub mod refcount;
pub mod ubuf;
pub mod uclock;
pub mod udict;
pub mod umem;
pub mod upipe;
pub mod upump;
pub mod uref;

pub use error::{Error, Result};
pub use pool::Ulifo;
pub use queue::Ufifo;
pub use refcount::Urefcount;
pub use ubuf::{Ubuf, UbufBlockMgr, UbufMgrRef, UbufPicMgr};
pub use uclock::{UCLOCK_FREQ, Uclock};
pub use udict::{AttrValue, Udict, UdictMgr, Urational};
pub use umem::{HeapUmemMgr, PoolUmemMgr, Umem, UmemMgr};
pub use upipe::{
    Command, Event, LogProbe, ProbeResult, Reply, Upipe, UpipeMgr, UpipeRef, Uprobe, UprobeRef,
    fourcc,
};
pub use upump::{PumpCtl, Upump, UpumpCb, UpumpMgr, WatchSpec};
pub use uref::{Uref, UrefMgr};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
