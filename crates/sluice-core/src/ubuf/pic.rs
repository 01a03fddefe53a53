//! Planar picture buffers.
//!
//! A picture manager fixes the plane layout once (chroma name, horizontal
//! and vertical subsampling, macropixel size per plane) and then allocates
//! pictures as a single region sliced plane by plane. Lines carry
//! configurable prepend/append margins (in macropixels and lines) so
//! filters can overread; an optional alignment constraint places a chosen
//! macropixel of every line on an `align`-octet boundary.
//!
//! All coordinates are in pixels and lines at the API; horizontal extents
//! must be multiples of the macropixel.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};
use crate::pool::Ulifo;
use crate::umem::{UmemMgr, umem_alloc};

use super::{SharedRegion, shared_from_pool, shared_recycle};

/// Layout of one plane, fixed at manager level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneSpec {
    /// Opaque short chroma name (`"y8"`, `"u8"`, `"y8u8y8v8"`, …).
    pub chroma: String,
    /// Horizontal subsampling (macropixels per plane macropixel).
    pub hsub: u8,
    /// Vertical subsampling (lines per plane line).
    pub vsub: u8,
    /// Octets per macropixel in this plane.
    pub macropixel_size: u8,
}

/// Manager for planar picture buffers.
pub struct UbufPicMgr {
    macropixel: u8,
    hmprepend: usize,
    hmappend: usize,
    vprepend: usize,
    vappend: usize,
    align: usize,
    align_hmoffset: isize,
    planes: Vec<PlaneSpec>,
    shared_pool: Ulifo<Arc<SharedRegion>>,
    umem_mgr: Arc<dyn UmemMgr>,
}

/// Per-picture view of one plane.
#[derive(Debug, Clone)]
struct PlaneView {
    /// Octet offset of the plane origin (margins included) in the region.
    offset: usize,
    /// Octets per line.
    stride: usize,
}

impl UbufPicMgr {
    /// Creates a picture manager. `hmprepend`/`hmappend` are extra
    /// macropixels before/after each line, `vprepend`/`vappend` extra
    /// lines around the picture, `align` (0 = none) the line alignment in
    /// octets and `align_hmoffset` the horizontal macropixel whose first
    /// octet must land on the alignment boundary.
    pub fn new(
        shared_pool_depth: usize,
        umem_mgr: Arc<dyn UmemMgr>,
        macropixel: u8,
        hmprepend: usize,
        hmappend: usize,
        vprepend: usize,
        vappend: usize,
        align: usize,
        align_hmoffset: isize,
    ) -> Result<Arc<Self>> {
        if macropixel == 0 {
            return Err(Error::BadArg);
        }
        Ok(Arc::new(Self {
            macropixel,
            hmprepend,
            hmappend,
            vprepend,
            vappend,
            align,
            align_hmoffset,
            planes: Vec::new(),
            shared_pool: Ulifo::new(shared_pool_depth),
            umem_mgr,
        }))
    }

    /// Registers a plane. Only possible while the manager handle is not
    /// shared — no live picture and no other manager reference — since the
    /// layout of already-allocated pictures could not be reconciled.
    pub fn add_plane(
        mgr: &mut Arc<Self>,
        chroma: &str,
        hsub: u8,
        vsub: u8,
        macropixel_size: u8,
    ) -> Result<()> {
        if hsub == 0 || vsub == 0 || macropixel_size == 0 || chroma.is_empty() {
            return Err(Error::BadArg);
        }
        {
            let this = Arc::get_mut(mgr).ok_or(Error::WrongState)?;
            if this.planes.iter().any(|p| p.chroma == chroma) {
                return Err(Error::BadArg);
            }
            this.shared_pool.vacuum();
            this.planes.push(PlaneSpec {
                chroma: chroma.to_owned(),
                hsub,
                vsub,
                macropixel_size,
            });
        }
        Ok(())
    }

    /// Builds a manager preconfigured for a fourcc image format.
    #[allow(clippy::too_many_arguments)]
    pub fn for_fourcc(
        shared_pool_depth: usize,
        umem_mgr: Arc<dyn UmemMgr>,
        fourcc: &str,
        hmprepend: usize,
        hmappend: usize,
        vprepend: usize,
        vappend: usize,
        align: usize,
        align_hmoffset: isize,
    ) -> Result<Arc<Self>> {
        let (macropixel, planes): (u8, &[(&str, u8, u8, u8)]) = match fourcc {
            "I420" | "YV12" | "IYUV" => (1, &[("y8", 1, 1, 1), ("u8", 2, 2, 1), ("v8", 2, 2, 1)]),
            "YV16" => (1, &[("y8", 1, 1, 1), ("u8", 2, 1, 1), ("v8", 2, 1, 1)]),
            "YUVY" | "YUY2" | "YUNV" | "V422" => (2, &[("y8u8y8v8", 1, 1, 4)]),
            "UYVY" => (2, &[("u8y8v8y8", 1, 1, 4)]),
            "YVYU" => (2, &[("y8v8y8u8", 1, 1, 4)]),
            "AYUV" => (1, &[("a8y8u8v8", 1, 1, 4)]),
            "V410" => (1, &[("u10y10v10", 1, 1, 4)]),
            "RGBA" => (1, &[("a8r8g8b8", 1, 1, 4)]),
            _ => return Err(Error::BadArg),
        };
        let mut mgr = Self::new(
            shared_pool_depth,
            umem_mgr,
            macropixel,
            hmprepend,
            hmappend,
            vprepend,
            vappend,
            align,
            align_hmoffset,
        )?;
        for &(chroma, hsub, vsub, mpsize) in planes {
            Self::add_plane(&mut mgr, chroma, hsub, vsub, mpsize)?;
        }
        Ok(mgr)
    }

    /// Number of pixels in a macropixel.
    pub fn macropixel(&self) -> u8 {
        self.macropixel
    }

    /// Registered plane layouts, in registration order.
    pub fn planes(&self) -> &[PlaneSpec] {
        &self.planes
    }

    /// Allocates (or recycles) a picture of `hsize`x`vsize` pixels.
    pub fn alloc(self: &Arc<Self>, hsize: usize, vsize: usize) -> Result<UbufPic> {
        if hsize == 0 || vsize == 0 || hsize % self.macropixel as usize != 0 {
            return Err(Error::BadArg);
        }
        if self.planes.is_empty() {
            return Err(Error::WrongState);
        }
        let hmsize = hsize / self.macropixel as usize;

        let mut strides = Vec::with_capacity(self.planes.len());
        let mut plane_sizes = Vec::with_capacity(self.planes.len());
        let mut buffer_size = 0usize;
        for plane in &self.planes {
            let mut stride = (hmsize + self.hmprepend + self.hmappend) / plane.hsub as usize
                * plane.macropixel_size as usize;
            if self.align > 0 {
                // Keep every line on the alignment boundary, not just the
                // first one.
                stride = stride.next_multiple_of(self.align);
            }
            // `align` octets of slack allow shifting the plane origin.
            let plane_size =
                (vsize + self.vprepend + self.vappend) / plane.vsub as usize * stride + self.align;
            strides.push(stride);
            plane_sizes.push(plane_size);
            buffer_size += plane_size;
        }

        let umem = umem_alloc(&self.umem_mgr, buffer_size)?;
        let shared = shared_from_pool(&self.shared_pool, umem);
        let base = shared.umem().base_addr();

        let mut views = Vec::with_capacity(self.planes.len());
        let mut cursor = 0usize;
        for (i, plane) in self.planes.iter().enumerate() {
            let mut offset = cursor;
            if self.align > 0 {
                // Shift the plane origin inside the per-line alignment
                // slack so that the first octet of the macropixel at
                // `align_hmoffset` lands on an `align` boundary.
                let probe_off = (self.align_hmoffset + self.hmprepend as isize)
                    / plane.hsub as isize
                    * plane.macropixel_size as isize;
                let addr = (base + cursor + self.align) as isize + probe_off;
                let adj = addr.rem_euclid(self.align as isize) as usize;
                offset = cursor + self.align - adj;
            }
            views.push(PlaneView {
                offset,
                stride: strides[i],
            });
            cursor += plane_sizes[i];
        }

        Ok(UbufPic {
            mgr: Arc::clone(self),
            shared: ManuallyDrop::new(shared),
            views,
            hmprepend: self.hmprepend,
            hmsize,
            hm_total: self.hmprepend + hmsize + self.hmappend,
            vprepend: self.vprepend,
            vsize,
            v_total: self.vprepend + vsize + self.vappend,
            readers: AtomicU32::new(0),
        })
    }

    /// Releases pooled descriptors and cached regions.
    pub fn vacuum(&self) {
        self.shared_pool.vacuum();
        self.umem_mgr.vacuum();
    }

    fn plane_index(&self, chroma: &str) -> Result<usize> {
        self.planes
            .iter()
            .position(|p| p.chroma == chroma)
            .ok_or(Error::NotFound)
    }

    pub(crate) fn recycle(&self, shared: Arc<SharedRegion>) {
        shared_recycle(&self.shared_pool, shared);
    }
}

/// One picture buffer: a window into a shared planar region.
pub struct UbufPic {
    mgr: Arc<UbufPicMgr>,
    shared: ManuallyDrop<Arc<SharedRegion>>,
    views: Vec<PlaneView>,
    /// Remaining margin before the first visible macropixel of each line.
    hmprepend: usize,
    /// Visible width in macropixels.
    hmsize: usize,
    /// Allocated width in macropixels, margins included.
    hm_total: usize,
    /// Remaining margin above the first visible line.
    vprepend: usize,
    /// Visible height in lines.
    vsize: usize,
    /// Allocated height in lines, margins included.
    v_total: usize,
    /// Outstanding map guards, asserted zero on free in debug builds.
    readers: AtomicU32,
}

impl UbufPic {
    /// Visible width in pixels.
    pub fn hsize(&self) -> usize {
        self.hmsize * self.mgr.macropixel as usize
    }

    /// Visible height in lines.
    pub fn vsize(&self) -> usize {
        self.vsize
    }

    /// Number of pixels in a macropixel.
    pub fn macropixel(&self) -> u8 {
        self.mgr.macropixel
    }

    /// Iterates the chroma names of the planes.
    pub fn iter_planes(&self) -> impl Iterator<Item = &str> {
        self.mgr.planes.iter().map(|p| p.chroma.as_str())
    }

    /// Layout of a plane: `(stride, hsub, vsub, macropixel_size)`.
    pub fn plane_size(&self, chroma: &str) -> Result<(usize, u8, u8, u8)> {
        let idx = self.mgr.plane_index(chroma)?;
        let spec = &self.mgr.planes[idx];
        Ok((
            self.views[idx].stride,
            spec.hsub,
            spec.vsub,
            spec.macropixel_size,
        ))
    }

    /// Creates a new handle sharing the same region; contents still
    /// copy-on-write.
    pub fn dup(&self) -> UbufPic {
        self.shared.refcount.acquire();
        UbufPic {
            mgr: Arc::clone(&self.mgr),
            shared: ManuallyDrop::new(Arc::clone(&self.shared)),
            views: self.views.clone(),
            hmprepend: self.hmprepend,
            hmsize: self.hmsize,
            hm_total: self.hm_total,
            vprepend: self.vprepend,
            vsize: self.vsize,
            v_total: self.v_total,
            readers: AtomicU32::new(0),
        }
    }

    /// Checks a map rectangle and computes `(start, stride, row_bytes,
    /// rows)` for a plane.
    fn map_geometry(
        &self,
        chroma: &str,
        hoffset: usize,
        voffset: usize,
        hsize: usize,
        vsize: usize,
    ) -> Result<(usize, usize, usize, usize)> {
        let macropixel = self.mgr.macropixel as usize;
        if hoffset % macropixel != 0 {
            return Err(Error::BadArg);
        }
        if hoffset + hsize > self.hmsize * macropixel || voffset + vsize > self.vsize {
            return Err(Error::OutOfRange);
        }
        let idx = self.mgr.plane_index(chroma)?;
        let spec = &self.mgr.planes[idx];
        let view = &self.views[idx];

        let start = view.offset
            + (self.vprepend + voffset) / spec.vsub as usize * view.stride
            + (self.hmprepend + hoffset / macropixel) / spec.hsub as usize
                * spec.macropixel_size as usize;
        let rows = vsize / spec.vsub as usize;
        let row_bytes =
            hsize / macropixel / spec.hsub as usize * spec.macropixel_size as usize;
        Ok((start, view.stride, row_bytes, rows))
    }

    /// Maps a plane rectangle read-only.
    pub fn read_plane(
        &self,
        chroma: &str,
        hoffset: usize,
        voffset: usize,
        hsize: usize,
        vsize: usize,
    ) -> Result<PicReader<'_>> {
        let (start, stride, row_bytes, rows) =
            self.map_geometry(chroma, hoffset, voffset, hsize, vsize)?;
        let len = if rows == 0 || row_bytes == 0 {
            0
        } else {
            (rows - 1) * stride + row_bytes
        };
        // SAFETY: geometry is inside the plane region by construction;
        // concurrent writers are excluded by the copy-on-write rule.
        let slice = unsafe { self.shared.umem().slice(start, len) };
        self.readers.fetch_add(1, Ordering::Relaxed);
        Ok(PicReader {
            slice,
            stride,
            row_bytes,
            rows,
            readers: &self.readers,
        })
    }

    /// Maps a plane rectangle for writing. Fails with `NotSingle` while
    /// the region is shared.
    pub fn write_plane(
        &mut self,
        chroma: &str,
        hoffset: usize,
        voffset: usize,
        hsize: usize,
        vsize: usize,
    ) -> Result<PicWriter<'_>> {
        if !self.shared.refcount.is_single() {
            return Err(Error::NotSingle);
        }
        let (start, stride, row_bytes, rows) =
            self.map_geometry(chroma, hoffset, voffset, hsize, vsize)?;
        let len = if rows == 0 || row_bytes == 0 {
            0
        } else {
            (rows - 1) * stride + row_bytes
        };
        // SAFETY: region refcount is one and the receiver is exclusive, so
        // no other view of this region is reachable.
        let slice = unsafe { self.shared.umem().slice_mut(start, len) };
        self.readers.fetch_add(1, Ordering::Relaxed);
        Ok(PicWriter {
            slice,
            stride,
            row_bytes,
            rows,
            readers: &self.readers,
        })
    }

    /// Moves the visible window inside the allocated extents: `hskip`
    /// pixels (multiple of the macropixel, negative = grow into the left
    /// margin) and `vskip` lines off the origin, then `new_hsize` x
    /// `new_vsize` visible. Growing past the allocated margins fails;
    /// resizing a shared picture is allowed, a subsequent write still
    /// enforces copy-on-write.
    pub fn resize(
        &mut self,
        hskip: isize,
        vskip: isize,
        new_hsize: usize,
        new_vsize: usize,
    ) -> Result<()> {
        let macropixel = self.mgr.macropixel as usize;
        if hskip.unsigned_abs() % macropixel != 0 || new_hsize % macropixel != 0 {
            return Err(Error::BadArg);
        }
        let hmskip = hskip / macropixel as isize;
        let new_hmsize = new_hsize / macropixel;

        let hmprepend = self.hmprepend as isize + hmskip;
        let vprepend = self.vprepend as isize + vskip;
        if hmprepend < 0 || vprepend < 0 {
            return Err(Error::OutOfRange);
        }
        if hmprepend as usize + new_hmsize > self.hm_total
            || vprepend as usize + new_vsize > self.v_total
        {
            return Err(Error::OutOfRange);
        }
        self.hmprepend = hmprepend as usize;
        self.hmsize = new_hmsize;
        self.vprepend = vprepend as usize;
        self.vsize = new_vsize;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn mapped_base_addr(&self, chroma: &str) -> usize {
        let (start, ..) = self
            .map_geometry(chroma, 0, 0, self.hsize(), self.vsize)
            .unwrap();
        self.shared.umem().base_addr() + start
    }

    #[cfg(test)]
    pub(crate) fn shares_region_with(&self, other: &UbufPic) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Drop for UbufPic {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.readers.load(Ordering::Relaxed),
            0,
            "picture buffer freed while mapped"
        );
        // SAFETY: `shared` is never touched again; `ManuallyDrop` exists
        // precisely so the Arc can be moved out here.
        let shared = unsafe { ManuallyDrop::take(&mut self.shared) };
        if shared.refcount.release() {
            self.mgr.recycle(shared);
        }
    }
}

/// Read mapping of a plane rectangle. Unmaps on drop.
pub struct PicReader<'a> {
    slice: &'a [u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
    readers: &'a AtomicU32,
}

impl PicReader<'_> {
    /// Octets between the starts of two successive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Mapped rows (lines divided by the plane's vertical subsampling).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// One mapped row.
    pub fn row(&self, i: usize) -> &[u8] {
        &self.slice[i * self.stride..i * self.stride + self.row_bytes]
    }
}

impl Deref for PicReader<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.slice
    }
}

impl Drop for PicReader<'_> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Write mapping of a plane rectangle. Unmaps on drop.
pub struct PicWriter<'a> {
    slice: &'a mut [u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
    readers: &'a AtomicU32,
}

impl PicWriter<'_> {
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn row(&self, i: usize) -> &[u8] {
        &self.slice[i * self.stride..i * self.stride + self.row_bytes]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [u8] {
        &mut self.slice[i * self.stride..i * self.stride + self.row_bytes]
    }
}

impl Deref for PicWriter<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.slice
    }
}

impl DerefMut for PicWriter<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.slice
    }
}

impl Drop for PicWriter<'_> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::umem::HeapUmemMgr;

    /// The YV12-style manager of the classic planar layout: 8 macropixel
    /// margins, 2 line margins, 16-octet alignment.
    fn yv12_mgr() -> Arc<UbufPicMgr> {
        let mut mgr =
            UbufPicMgr::new(2, HeapUmemMgr::new(), 1, 8, 8, 2, 2, 16, 0).unwrap();
        UbufPicMgr::add_plane(&mut mgr, "y8", 1, 1, 1).unwrap();
        UbufPicMgr::add_plane(&mut mgr, "u8", 2, 2, 1).unwrap();
        UbufPicMgr::add_plane(&mut mgr, "v8", 2, 2, 1).unwrap();
        mgr
    }

    // -----------------------------------------------------------------------
    // Manager configuration
    // -----------------------------------------------------------------------

    #[test]
    fn add_plane_rejects_duplicates_and_bad_args() {
        let mut mgr = UbufPicMgr::new(2, HeapUmemMgr::new(), 1, 0, 0, 0, 0, 0, 0).unwrap();
        UbufPicMgr::add_plane(&mut mgr, "y8", 1, 1, 1).unwrap();
        assert_eq!(
            UbufPicMgr::add_plane(&mut mgr, "y8", 1, 1, 1),
            Err(Error::BadArg)
        );
        assert_eq!(
            UbufPicMgr::add_plane(&mut mgr, "u8", 0, 1, 1),
            Err(Error::BadArg)
        );
    }

    #[test]
    fn add_plane_fails_once_shared() {
        let mut mgr = UbufPicMgr::new(2, HeapUmemMgr::new(), 1, 0, 0, 0, 0, 0, 0).unwrap();
        UbufPicMgr::add_plane(&mut mgr, "y8", 1, 1, 1).unwrap();
        let pic = mgr.alloc(4, 4).unwrap();
        assert_eq!(
            UbufPicMgr::add_plane(&mut mgr, "u8", 2, 2, 1),
            Err(Error::WrongState)
        );
        drop(pic);
        UbufPicMgr::add_plane(&mut mgr, "u8", 2, 2, 1).unwrap();
    }

    #[test]
    fn alloc_without_planes_fails() {
        let mgr = UbufPicMgr::new(2, HeapUmemMgr::new(), 1, 0, 0, 0, 0, 0, 0).unwrap();
        assert_eq!(mgr.alloc(4, 4).err(), Some(Error::WrongState));
    }

    #[test]
    fn macropixel_misalignment_is_rejected() {
        let mgr = UbufPicMgr::for_fourcc(2, HeapUmemMgr::new(), "YUY2", 0, 0, 0, 0, 0, 0).unwrap();
        assert_eq!(mgr.alloc(7, 4).err(), Some(Error::BadArg));
        assert!(mgr.alloc(8, 4).is_ok());
    }

    // -----------------------------------------------------------------------
    // Allocation geometry
    // -----------------------------------------------------------------------

    #[test]
    fn yv12_geometry_and_alignment() {
        let mgr = yv12_mgr();
        let pic = mgr.alloc(64, 32).unwrap();
        assert_eq!(pic.hsize(), 64);
        assert_eq!(pic.vsize(), 32);

        let (stride_y, hsub_y, vsub_y, mpsize_y) = pic.plane_size("y8").unwrap();
        assert!(stride_y >= 80);
        assert_eq!((hsub_y, vsub_y, mpsize_y), (1, 1, 1));
        let (stride_u, ..) = pic.plane_size("u8").unwrap();
        let (stride_v, ..) = pic.plane_size("v8").unwrap();
        assert_eq!(stride_u, stride_v);
        assert!(stride_u >= 40);

        for chroma in ["y8", "u8", "v8"] {
            assert_eq!(pic.mapped_base_addr(chroma) % 16, 0, "{chroma} misaligned");
        }
    }

    #[test]
    fn plane_iteration_matches_registration_order() {
        let mgr = yv12_mgr();
        let pic = mgr.alloc(16, 16).unwrap();
        let chromas: Vec<_> = pic.iter_planes().collect();
        assert_eq!(chromas, ["y8", "u8", "v8"]);
    }

    // -----------------------------------------------------------------------
    // Mapping
    // -----------------------------------------------------------------------

    #[test]
    fn write_then_read_roundtrips_every_plane() {
        let mgr = yv12_mgr();
        let mut pic = mgr.alloc(16, 8).unwrap();
        for (pi, chroma) in ["y8", "u8", "v8"].iter().enumerate() {
            let mut map = pic.write_plane(chroma, 0, 0, 16, 8).unwrap();
            for y in 0..map.rows() {
                let row = map.row_mut(y);
                for (x, b) in row.iter_mut().enumerate() {
                    *b = (pi * 64 + y * 16 + x) as u8;
                }
            }
        }
        for (pi, chroma) in ["y8", "u8", "v8"].iter().enumerate() {
            let map = pic.read_plane(chroma, 0, 0, 16, 8).unwrap();
            for y in 0..map.rows() {
                let row = map.row(y);
                for (x, b) in row.iter().enumerate() {
                    assert_eq!(*b, (pi * 64 + y * 16 + x) as u8);
                }
            }
        }
    }

    #[test]
    fn subsampled_plane_has_fewer_rows() {
        let mgr = yv12_mgr();
        let pic = mgr.alloc(16, 8).unwrap();
        assert_eq!(pic.read_plane("y8", 0, 0, 16, 8).unwrap().rows(), 8);
        assert_eq!(pic.read_plane("u8", 0, 0, 16, 8).unwrap().rows(), 4);
    }

    #[test]
    fn map_bounds_are_checked() {
        let mgr = yv12_mgr();
        let pic = mgr.alloc(16, 8).unwrap();
        assert_eq!(
            pic.read_plane("y8", 0, 0, 17, 8).err(),
            Some(Error::OutOfRange)
        );
        assert_eq!(
            pic.read_plane("y8", 0, 4, 16, 8).err(),
            Some(Error::OutOfRange)
        );
        assert_eq!(
            pic.read_plane("a8", 0, 0, 16, 8).err(),
            Some(Error::NotFound)
        );
    }

    #[test]
    fn packed_format_rejects_odd_hoffset() {
        let mgr = UbufPicMgr::for_fourcc(2, HeapUmemMgr::new(), "YUY2", 0, 0, 0, 0, 0, 0).unwrap();
        let pic = mgr.alloc(8, 4).unwrap();
        assert_eq!(
            pic.read_plane("y8u8y8v8", 1, 0, 2, 4).err(),
            Some(Error::BadArg)
        );
    }

    // -----------------------------------------------------------------------
    // Copy-on-write
    // -----------------------------------------------------------------------

    #[test]
    fn write_on_shared_fails_until_unshared() {
        let mgr = yv12_mgr();
        let mut p1 = mgr.alloc(16, 8).unwrap();
        let p2 = p1.dup();
        assert!(p1.shares_region_with(&p2));
        assert_eq!(
            p1.write_plane("y8", 0, 0, 16, 8).err(),
            Some(Error::NotSingle)
        );
        drop(p2);
        assert!(p1.write_plane("y8", 0, 0, 16, 8).is_ok());
    }

    #[test]
    fn dup_sees_same_octets() {
        let mgr = yv12_mgr();
        let mut p1 = mgr.alloc(16, 8).unwrap();
        {
            let mut map = p1.write_plane("y8", 0, 0, 16, 8).unwrap();
            map.row_mut(0).fill(0x5a);
        }
        let p2 = p1.dup();
        let map = p2.read_plane("y8", 0, 0, 16, 8).unwrap();
        assert!(map.row(0).iter().all(|&b| b == 0x5a));
    }

    // -----------------------------------------------------------------------
    // Resize
    // -----------------------------------------------------------------------

    #[test]
    fn resize_moves_window_within_margins() {
        let mgr = yv12_mgr();
        let mut pic = mgr.alloc(64, 32).unwrap();
        // Crop 8 pixels off the left, 2 lines off the top.
        pic.resize(8, 2, 48, 28).unwrap();
        assert_eq!(pic.hsize(), 48);
        assert_eq!(pic.vsize(), 28);
        // Grow back into the margins.
        pic.resize(-8, -2, 64, 32).unwrap();
        assert_eq!(pic.hsize(), 64);
    }

    #[test]
    fn resize_cannot_leave_allocation() {
        let mgr = yv12_mgr();
        let mut pic = mgr.alloc(64, 32).unwrap();
        assert_eq!(pic.resize(-16, 0, 64, 32).err(), Some(Error::OutOfRange));
        assert_eq!(pic.resize(0, 0, 96, 32).err(), Some(Error::OutOfRange));
        assert_eq!(pic.resize(0, -4, 64, 32).err(), Some(Error::OutOfRange));
    }

    #[test]
    fn resized_window_maps_shifted_octets() {
        let mgr = yv12_mgr();
        let mut pic = mgr.alloc(16, 8).unwrap();
        {
            let mut map = pic.write_plane("y8", 0, 0, 16, 8).unwrap();
            for y in 0..8 {
                for (x, b) in map.row_mut(y).iter_mut().enumerate() {
                    *b = (y * 16 + x) as u8;
                }
            }
        }
        pic.resize(2, 1, 14, 7).unwrap();
        let map = pic.read_plane("y8", 0, 0, 14, 7).unwrap();
        assert_eq!(map.row(0)[0], 16 + 2);
    }

    // -----------------------------------------------------------------------
    // Pooling
    // -----------------------------------------------------------------------

    #[test]
    fn vacuum_leaves_no_heap_residue() {
        let umem_mgr = HeapUmemMgr::new();
        let mut mgr =
            UbufPicMgr::new(2, Arc::clone(&umem_mgr), 1, 0, 0, 0, 0, 0, 0).unwrap();
        UbufPicMgr::add_plane(&mut mgr, "y8", 1, 1, 1).unwrap();
        let pics: Vec<_> = (0..4).map(|_| mgr.alloc(8, 8).unwrap()).collect();
        drop(pics);
        mgr.vacuum();
        assert_eq!(umem_mgr.outstanding(), Some(0));
    }
}
