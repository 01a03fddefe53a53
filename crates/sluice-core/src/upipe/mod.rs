//! Pipes: polymorphic nodes of the dataflow graph.
//!
//! A pipe accepts records on its input entry and/or emits them to a
//! designated output pipe. Control traffic (manager plumbing, flow
//! definitions, options) travels through a separate typed command
//! channel; events travel *upstream* through the probe chain attached at
//! construction (see [`probe`]).
//!
//! The input entry must not fail synchronously — errors are raised
//! through the probe chain. Pipes are thread-affine to the event loop
//! driving them; crossing loops goes through the transfer facility.

pub mod output;
pub mod probe;

use std::any::Any;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::ubuf::UbufMgrRef;
use crate::uclock::Uclock;
use crate::upump::{PumpCtl, UpumpMgr};
use crate::uref::{Uref, UrefMgr};

pub use probe::{Event, LogProbe, ProbeResult, Uprobe, UprobeRef, throw};

/// Shared handle to a pipe.
pub type UpipeRef = Arc<dyn Upipe>;

/// Builds a FOURCC signature tag.
pub const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

/// Control commands understood by every pipe. Manager-specific commands
/// ride in [`Command::Extra`], gated by the manager's signature.
pub enum Command {
    GetUrefMgr,
    SetUrefMgr(Arc<UrefMgr>),
    GetUpumpMgr,
    SetUpumpMgr(Arc<dyn UpumpMgr>),
    GetUbufMgr,
    SetUbufMgr(UbufMgrRef),
    GetUclock,
    SetUclock(Arc<dyn Uclock>),
    GetOutput,
    SetOutput(Option<UpipeRef>),
    GetFlowDef,
    SetFlowDef(Uref),
    /// Manager-private command; rejected unless `signature` matches the
    /// target manager's signature.
    Extra {
        signature: u32,
        args: Box<dyn Any + Send>,
    },
}

impl Command {
    /// Stable numeric opcode, for logs. Manager-private commands all map
    /// into the private range.
    pub fn opcode(&self) -> u32 {
        match self {
            Self::GetUrefMgr => 0x01,
            Self::SetUrefMgr(_) => 0x02,
            Self::GetUpumpMgr => 0x03,
            Self::SetUpumpMgr(_) => 0x04,
            Self::GetUbufMgr => 0x05,
            Self::SetUbufMgr(_) => 0x06,
            Self::GetUclock => 0x07,
            Self::SetUclock(_) => 0x08,
            Self::GetOutput => 0x09,
            Self::SetOutput(_) => 0x0a,
            Self::GetFlowDef => 0x0b,
            Self::SetFlowDef(_) => 0x0c,
            Self::Extra { .. } => 0x8000,
        }
    }

    /// Command name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetUrefMgr => "get_uref_mgr",
            Self::SetUrefMgr(_) => "set_uref_mgr",
            Self::GetUpumpMgr => "get_upump_mgr",
            Self::SetUpumpMgr(_) => "set_upump_mgr",
            Self::GetUbufMgr => "get_ubuf_mgr",
            Self::SetUbufMgr(_) => "set_ubuf_mgr",
            Self::GetUclock => "get_uclock",
            Self::SetUclock(_) => "set_uclock",
            Self::GetOutput => "get_output",
            Self::SetOutput(_) => "set_output",
            Self::GetFlowDef => "get_flow_def",
            Self::SetFlowDef(_) => "set_flow_def",
            Self::Extra { .. } => "extra",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Command::{} (0x{:04x})", self.name(), self.opcode())
    }
}

/// Replies to control commands.
pub enum Reply {
    /// The command was applied; nothing to return.
    Ack,
    UrefMgr(Option<Arc<UrefMgr>>),
    UpumpMgr(Option<Arc<dyn UpumpMgr>>),
    UbufMgr(Option<UbufMgrRef>),
    Uclock(Option<Arc<dyn Uclock>>),
    Output(Option<UpipeRef>),
    /// A duplicate of the stored flow definition.
    FlowDef(Option<Uref>),
    Extra(Box<dyn Any + Send>),
}

/// The pipe contract.
pub trait Upipe: Send + Sync {
    /// FOURCC tag of the pipe type.
    fn signature(&self) -> u32;

    /// Head of the probe chain attached at construction.
    fn probe(&self) -> &UprobeRef;

    /// Sink/transform entry. Must not fail synchronously; errors go
    /// through the probe chain. `pump` identifies the watcher whose
    /// callback produced the record, when any.
    fn input(&self, uref: Uref, pump: Option<&PumpCtl>) {
        let _ = (uref, pump);
        log::error!(
            "pipe {:08x} does not accept input, record dropped",
            self.signature()
        );
    }

    /// Typed control entry.
    fn control(&self, command: Command) -> Result<Reply>;
}

/// The pipe-manager contract: a factory for one pipe type. Managers with
/// extra constructor arguments expose inherent methods beside this trait.
pub trait UpipeMgr: Send + Sync {
    /// FOURCC tag shared by all pipes of this manager.
    fn signature(&self) -> u32;

    /// Allocates a pipe with `probe` as its probe chain.
    fn alloc(self: Arc<Self>, probe: UprobeRef) -> Result<UpipeRef>;

    /// Releases pooled structures, if the manager keeps any.
    fn vacuum(&self) {}
}

/// Checks and unpacks the `args` of a manager-private command.
pub fn extra_args<T: 'static>(signature: u32, expected: u32, args: Box<dyn Any + Send>) -> Result<Box<T>> {
    if signature != expected {
        return Err(Error::Unsupported);
    }
    args.downcast::<T>().map_err(|_| Error::BadArg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_is_stable() {
        assert_eq!(fourcc(b"xfer"), 0x78666572);
    }

    #[test]
    fn opcodes_stay_below_private_range() {
        assert!(Command::GetUrefMgr.opcode() < 0x8000);
        assert!(Command::SetFlowDef(crate::uref::UrefMgr::new(
            crate::udict::UdictMgr::new(1, 4)
        )
        .alloc_control())
        .opcode() < 0x8000);
        let extra = Command::Extra {
            signature: fourcc(b"test"),
            args: Box::new(0u32),
        };
        assert_eq!(extra.opcode(), 0x8000);
    }

    #[test]
    fn extra_args_checks_signature_and_type() {
        let sig = fourcc(b"abcd");
        let ok = extra_args::<u32>(sig, sig, Box::new(7u32)).unwrap();
        assert_eq!(*ok, 7);
        assert_eq!(
            extra_args::<u32>(sig, fourcc(b"zzzz"), Box::new(7u32)).err(),
            Some(Error::Unsupported)
        );
        assert_eq!(
            extra_args::<String>(sig, sig, Box::new(7u32)).err(),
            Some(Error::BadArg)
        );
    }
}
