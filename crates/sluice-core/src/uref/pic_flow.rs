//! Picture flow-definition attributes.
//!
//! A `pic.` flow definition describes the planar layout a producer emits:
//! macropixel width, plane count, and per-plane subsampling, macropixel
//! size and chroma name, plus optional geometry hints (margins, alignment,
//! frame rate).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::uref::{Uref, UrefMgr};

/// Flow definition prefix of raw pictures.
pub const PIC_FLOW_DEF: &str = "pic.";

uref_attr_small_unsigned!(
    set_pic_macropixel,
    get_pic_macropixel,
    delete_pic_macropixel,
    "p.macropixel",
    "the number of pixels in a macropixel"
);
uref_attr_small_unsigned!(
    set_pic_planes,
    get_pic_planes,
    delete_pic_planes,
    "p.planes",
    "the number of planes"
);
uref_attr_unsigned!(
    set_pic_hsize,
    get_pic_hsize,
    delete_pic_hsize,
    "p.hsize",
    "the horizontal size in pixels"
);
uref_attr_unsigned!(
    set_pic_vsize,
    get_pic_vsize,
    delete_pic_vsize,
    "p.vsize",
    "the vertical size in lines"
);
uref_attr_rational!(
    set_pic_fps,
    get_pic_fps,
    delete_pic_fps,
    "p.fps",
    "the frames per second"
);
uref_attr_small_unsigned!(
    set_pic_hmprepend,
    get_pic_hmprepend,
    delete_pic_hmprepend,
    "p.hmprepend",
    "the extra macropixels added before each line"
);
uref_attr_small_unsigned!(
    set_pic_hmappend,
    get_pic_hmappend,
    delete_pic_hmappend,
    "p.hmappend",
    "the extra macropixels added after each line"
);
uref_attr_small_unsigned!(
    set_pic_vprepend,
    get_pic_vprepend,
    delete_pic_vprepend,
    "p.vprepend",
    "the extra lines added before the picture"
);
uref_attr_small_unsigned!(
    set_pic_vappend,
    get_pic_vappend,
    delete_pic_vappend,
    "p.vappend",
    "the extra lines added after the picture"
);
uref_attr_unsigned!(
    set_pic_align,
    get_pic_align,
    delete_pic_align,
    "p.align",
    "the line alignment in octets"
);
uref_attr_int!(
    set_pic_align_hmoffset,
    get_pic_align_hmoffset,
    delete_pic_align_hmoffset,
    "p.align_hmoffset",
    "the horizontal offset of the aligned macropixel"
);
uref_attr_small_unsigned_va!(
    set_pic_hsubsampling,
    get_pic_hsubsampling,
    "p.hsub[{}]",
    "the horizontal subsampling"
);
uref_attr_small_unsigned_va!(
    set_pic_vsubsampling,
    get_pic_vsubsampling,
    "p.vsub[{}]",
    "the vertical subsampling"
);
uref_attr_small_unsigned_va!(
    set_pic_macropixel_size,
    get_pic_macropixel_size,
    "p.macropix[{}]",
    "the octets per macropixel"
);
uref_attr_string_va!(set_pic_chroma, get_pic_chroma, "p.chroma[{}]", "the chroma name");

/// Allocates a control record defining a new picture flow. Planes are
/// registered afterwards with [`Uref::pic_flow_add_plane`].
pub fn pic_flow_alloc_def(mgr: &Arc<UrefMgr>, macropixel: u8) -> Result<Uref> {
    if macropixel == 0 {
        return Err(Error::BadArg);
    }
    let mut uref = mgr.alloc_control();
    uref.set_flow_def(PIC_FLOW_DEF);
    uref.set_pic_macropixel(macropixel);
    uref.set_pic_planes(0);
    Ok(uref)
}

impl Uref {
    /// Registers a plane in a picture flow definition.
    pub fn pic_flow_add_plane(
        &mut self,
        hsub: u8,
        vsub: u8,
        macropixel_size: u8,
        chroma: &str,
    ) -> Result<()> {
        if hsub == 0 || vsub == 0 || macropixel_size == 0 || chroma.is_empty() {
            return Err(Error::BadArg);
        }
        let plane = self.get_pic_planes()?;
        self.set_pic_planes(plane + 1);
        self.set_pic_hsubsampling(hsub, plane);
        self.set_pic_vsubsampling(vsub, plane);
        self.set_pic_macropixel_size(macropixel_size, plane);
        self.set_pic_chroma(chroma, plane);
        Ok(())
    }

    /// Finds the plane number carrying `chroma`.
    pub fn pic_flow_find_chroma(&self, chroma: &str) -> Result<u8> {
        let planes = self.get_pic_planes()?;
        for plane in 0..planes {
            if self.get_pic_chroma(plane)? == chroma {
                return Ok(plane);
            }
        }
        Err(Error::NotFound)
    }
}
