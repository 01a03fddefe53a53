//! Raw memory regions and their allocators.
//!
//! A [`Umem`] is a thin handle over an octet region: pointer, size, and
//! provenance (the manager that allocated it, to which it returns on
//! drop). Buffer managers treat the region as opaque storage; access goes
//! through the unsafe crate-internal slice accessors, guarded by the
//! copy-on-write discipline of the shared descriptors that own them.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::pool::Ulifo;

/// Region alignment, generous enough for vectorized plane access.
const UMEM_ALIGN: usize = 64;

/// An allocated region without provenance. Does not free itself; it must
/// be handed back to the manager that produced it.
pub struct RawMem {
    ptr: NonNull<u8>,
    size: usize,
}

unsafe impl Send for RawMem {}

impl RawMem {
    fn layout(size: usize) -> Layout {
        // size is never zero here and UMEM_ALIGN is a constant power of
        // two, so the layout is always valid.
        Layout::from_size_align(size.max(1), UMEM_ALIGN)
            .unwrap_or_else(|_| Layout::new::<u8>())
    }

    fn allocate(size: usize) -> Option<Self> {
        let layout = Self::layout(size);
        let ptr = unsafe { alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Self { ptr, size })
    }

    fn deallocate(self) {
        unsafe { dealloc(self.ptr.as_ptr(), Self::layout(self.size)) };
    }

    /// Region size in octets.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Allocator of raw octet regions.
pub trait UmemMgr: Send + Sync {
    /// Allocates a region of at least `size` octets.
    fn alloc_raw(&self, size: usize) -> Result<RawMem>;

    /// Returns a region to the allocator.
    fn free_raw(&self, mem: RawMem);

    /// Releases any cached regions back to the heap.
    fn vacuum(&self) {}

    /// Number of regions currently handed out, when the allocator tracks
    /// it. Used by leak checks.
    fn outstanding(&self) -> Option<usize> {
        None
    }
}

/// Allocates a region with provenance from `mgr`.
pub fn umem_alloc(mgr: &Arc<dyn UmemMgr>, size: usize) -> Result<Umem> {
    let mem = mgr.alloc_raw(size)?;
    Ok(Umem {
        mem: Some(mem),
        mgr: Arc::clone(mgr),
    })
}

/// A raw region bound to the manager that allocated it.
pub struct Umem {
    mem: Option<RawMem>,
    mgr: Arc<dyn UmemMgr>,
}

// The region itself carries no aliasing guarantees; those are provided by
// the shared-descriptor refcount of whoever embeds the Umem.
unsafe impl Send for Umem {}
unsafe impl Sync for Umem {}

impl Umem {
    /// Region size in octets.
    pub fn size(&self) -> usize {
        self.mem.as_ref().map_or(0, RawMem::size)
    }

    /// Base address of the region, for alignment arithmetic.
    pub(crate) fn base_addr(&self) -> usize {
        self.mem.as_ref().map_or(0, |m| m.ptr.as_ptr() as usize)
    }

    /// Read view of `[offset, offset + len)`.
    ///
    /// # Safety
    /// The caller must guarantee the range is in bounds and that no
    /// exclusive (write) view of any overlapping range is alive.
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        let mem = self.mem.as_ref().expect("mapped an empty umem");
        debug_assert!(offset + len <= mem.size);
        unsafe { std::slice::from_raw_parts(mem.ptr.as_ptr().add(offset), len) }
    }

    /// Write view of `[offset, offset + len)`.
    ///
    /// # Safety
    /// The caller must guarantee the range is in bounds and that this is
    /// the only live view of any overlapping range (shared refcount of the
    /// owning descriptor equal to one, exclusive borrow of the handle).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        let mem = self.mem.as_ref().expect("mapped an empty umem");
        debug_assert!(offset + len <= mem.size);
        unsafe { std::slice::from_raw_parts_mut(mem.ptr.as_ptr().add(offset), len) }
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        if let Some(mem) = self.mem.take() {
            self.mgr.free_raw(mem);
        }
    }
}

/// Plain heap allocator with an outstanding-region counter.
pub struct HeapUmemMgr {
    outstanding: AtomicUsize,
}

impl HeapUmemMgr {
    pub fn new() -> Arc<dyn UmemMgr> {
        Arc::new(Self {
            outstanding: AtomicUsize::new(0),
        })
    }
}

impl UmemMgr for HeapUmemMgr {
    fn alloc_raw(&self, size: usize) -> Result<RawMem> {
        let mem = RawMem::allocate(size).ok_or(Error::Alloc)?;
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(mem)
    }

    fn free_raw(&self, mem: RawMem) {
        mem.deallocate();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
    }

    fn outstanding(&self) -> Option<usize> {
        Some(self.outstanding.load(Ordering::Relaxed))
    }
}

/// Pooling allocator: recycles freed regions per power-of-two size class.
///
/// Requests are rounded up to the class size, so a recycled region always
/// satisfies any request of its class. Pools reject when full; the region
/// then falls back to the heap.
pub struct PoolUmemMgr {
    classes: Vec<Ulifo<RawMem>>,
    min_shift: u32,
    outstanding: AtomicUsize,
}

impl PoolUmemMgr {
    /// `pool_depth` regions are cached per size class, for classes from
    /// 2^`min_shift` up to 2^`max_shift` octets.
    pub fn new(pool_depth: usize, min_shift: u32, max_shift: u32) -> Arc<dyn UmemMgr> {
        let min_shift = min_shift.min(max_shift);
        let classes = (min_shift..=max_shift).map(|_| Ulifo::new(pool_depth)).collect();
        Arc::new(Self {
            classes,
            min_shift,
            outstanding: AtomicUsize::new(0),
        })
    }

    fn class_of(&self, size: usize) -> Option<usize> {
        let bits = usize::BITS - size.max(1).next_power_of_two().leading_zeros() - 1;
        let idx = bits.saturating_sub(self.min_shift) as usize;
        (bits >= self.min_shift && idx < self.classes.len()).then_some(idx)
    }

    fn rounded(&self, size: usize) -> usize {
        size.max(1 << self.min_shift).next_power_of_two()
    }
}

impl UmemMgr for PoolUmemMgr {
    fn alloc_raw(&self, size: usize) -> Result<RawMem> {
        let rounded = self.rounded(size);
        let mem = match self.class_of(rounded).and_then(|c| self.classes[c].pop()) {
            Some(mem) => mem,
            None => RawMem::allocate(rounded).ok_or(Error::Alloc)?,
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(mem)
    }

    fn free_raw(&self, mem: RawMem) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        match self.class_of(mem.size()) {
            Some(class) => {
                if let Err(mem) = self.classes[class].push(mem) {
                    mem.deallocate();
                }
            }
            None => mem.deallocate(),
        }
    }

    fn vacuum(&self) {
        for class in &self.classes {
            while let Some(mem) = class.pop() {
                mem.deallocate();
            }
        }
    }

    fn outstanding(&self) -> Option<usize> {
        Some(self.outstanding.load(Ordering::Relaxed))
    }
}
