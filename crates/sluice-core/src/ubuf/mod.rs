//! Pooled, copy-on-write media buffers.
//!
//! Two buffer families share the same discipline: a buffer handle is a
//! cheap view onto a reference-counted shared region. Duplication and
//! slicing share the region; writing requires the region's refcount to be
//! one (copy-on-write — a caller holding a shared buffer duplicates the
//! contents into a fresh buffer before writing).
//!
//! - [`block::UbufBlock`] — linear octet sequences, chainable into logical
//!   segments, with zero-copy slicing and an O(1) cached locator.
//! - [`pic::UbufPic`] — planar pictures with chroma subsampling, margins
//!   and macropixel alignment.

pub mod block;
pub mod pic;

use std::sync::Arc;

use crate::error::Result;
use crate::pool::Ulifo;
use crate::refcount::Urefcount;
use crate::umem::Umem;

pub use block::{BlockReader, BlockWriter, UbufBlock, UbufBlockMgr};
pub use pic::{PicReader, PicWriter, PlaneSpec, UbufPic, UbufPicMgr};

/// Refcounted shared region backing one or more buffer handles.
///
/// The counter tracks buffer handles, not `Arc` clones; the `Arc` only
/// keeps the descriptor memory alive so the descriptor can be recycled
/// through its manager pool once the counter hits zero.
pub(crate) struct SharedRegion {
    pub(crate) refcount: Urefcount,
    pub(crate) umem: Option<Umem>,
}

impl SharedRegion {
    pub(crate) fn fresh(umem: Umem) -> Arc<Self> {
        Arc::new(Self {
            refcount: Urefcount::new(),
            umem: Some(umem),
        })
    }

    /// The backing region. Never absent while any buffer handle points at
    /// the descriptor.
    pub(crate) fn umem(&self) -> &Umem {
        self.umem.as_ref().expect("shared region without memory")
    }
}

/// Pops a pooled descriptor and arms it with `umem`, or builds a fresh
/// one. Pooled descriptors are quiescent (the pool held their only
/// reference), which makes the refcount reset sound.
pub(crate) fn shared_from_pool(pool: &Ulifo<Arc<SharedRegion>>, umem: Umem) -> Arc<SharedRegion> {
    if let Some(mut arc) = pool.pop() {
        if let Some(shared) = Arc::get_mut(&mut arc) {
            shared.refcount.reset();
            shared.umem = Some(umem);
            return arc;
        }
    }
    SharedRegion::fresh(umem)
}

/// Disarms a descriptor whose refcount dropped to zero: the region goes
/// back to its allocator, the descriptor to the pool. When a stale `Arc`
/// clone from a concurrent release is still alive, the descriptor is left
/// to normal `Arc` teardown — the region still returns to its allocator
/// through `Umem`'s provenance.
pub(crate) fn shared_recycle(pool: &Ulifo<Arc<SharedRegion>>, mut arc: Arc<SharedRegion>) {
    if let Some(shared) = Arc::get_mut(&mut arc) {
        drop(shared.umem.take());
        let _ = pool.push(arc);
    }
}

/// Polymorphic buffer handle.
pub enum Ubuf {
    Block(UbufBlock),
    Pic(UbufPic),
}

impl Ubuf {
    /// Creates a new handle sharing the same region(s); contents still
    /// copy-on-write.
    pub fn dup(&self) -> Ubuf {
        match self {
            Self::Block(b) => Self::Block(b.dup()),
            Self::Pic(p) => Self::Pic(p.dup()),
        }
    }

    pub fn as_block(&self) -> Result<&UbufBlock> {
        match self {
            Self::Block(b) => Ok(b),
            Self::Pic(_) => Err(crate::error::Error::WrongType),
        }
    }

    pub fn as_block_mut(&mut self) -> Result<&mut UbufBlock> {
        match self {
            Self::Block(b) => Ok(b),
            Self::Pic(_) => Err(crate::error::Error::WrongType),
        }
    }

    pub fn as_pic(&self) -> Result<&UbufPic> {
        match self {
            Self::Pic(p) => Ok(p),
            Self::Block(_) => Err(crate::error::Error::WrongType),
        }
    }

    pub fn as_pic_mut(&mut self) -> Result<&mut UbufPic> {
        match self {
            Self::Pic(p) => Ok(p),
            Self::Block(_) => Err(crate::error::Error::WrongType),
        }
    }
}

impl std::fmt::Debug for Ubuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block(b) => write!(f, "Ubuf::Block(total_size={})", b.total_size()),
            Self::Pic(p) => write!(f, "Ubuf::Pic({}x{})", p.hsize(), p.vsize()),
        }
    }
}

/// Polymorphic buffer-manager handle, for control plumbing.
#[derive(Clone)]
pub enum UbufMgrRef {
    Block(Arc<UbufBlockMgr>),
    Pic(Arc<UbufPicMgr>),
}

impl UbufMgrRef {
    /// Releases pooled structures held by the manager.
    pub fn vacuum(&self) {
        match self {
            Self::Block(m) => m.vacuum(),
            Self::Pic(m) => m.vacuum(),
        }
    }
}
