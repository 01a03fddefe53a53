//! Records: the unit of exchange between pipes.
//!
//! A [`Uref`] carries an optional media buffer plus a typed attribute
//! dictionary (timestamps, flow definition, geometry, …). Control records
//! carry only attributes — flow definitions and option plumbing travel as
//! control records through the same entries as media.
//!
//! Well-known attributes get typed accessors in the submodules, generated
//! by the small macros below so that names, types and documentation stay
//! in one place per attribute.

use std::sync::Arc;

use crate::error::Result;
use crate::ubuf::{Ubuf, UbufBlockMgr, UbufPicMgr};
use crate::udict::{Udict, UdictMgr};

// Accessor generators. Each expands to set/get/delete methods on `Uref`
// for one named attribute; the `_va` variants address per-plane attributes
// through a formatted name.

macro_rules! uref_attr_unsigned {
    ($set:ident, $get:ident, $del:ident, $name:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " (`", $name, "`).")]
            pub fn $set(&mut self, value: u64) {
                self.udict.set_unsigned($name, value);
            }

            #[doc = concat!("Returns ", $doc, " (`", $name, "`).")]
            pub fn $get(&self) -> crate::error::Result<u64> {
                self.udict.get_unsigned($name)
            }

            #[doc = concat!("Deletes ", $doc, " (`", $name, "`).")]
            pub fn $del(&mut self) -> crate::error::Result<()> {
                self.udict.delete($name)
            }
        }
    };
}

macro_rules! uref_attr_small_unsigned {
    ($set:ident, $get:ident, $del:ident, $name:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " (`", $name, "`).")]
            pub fn $set(&mut self, value: u8) {
                self.udict.set_small_unsigned($name, value);
            }

            #[doc = concat!("Returns ", $doc, " (`", $name, "`).")]
            pub fn $get(&self) -> crate::error::Result<u8> {
                self.udict.get_small_unsigned($name)
            }

            #[doc = concat!("Deletes ", $doc, " (`", $name, "`).")]
            pub fn $del(&mut self) -> crate::error::Result<()> {
                self.udict.delete($name)
            }
        }
    };
}

macro_rules! uref_attr_int {
    ($set:ident, $get:ident, $del:ident, $name:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " (`", $name, "`).")]
            pub fn $set(&mut self, value: i64) {
                self.udict.set_int($name, value);
            }

            #[doc = concat!("Returns ", $doc, " (`", $name, "`).")]
            pub fn $get(&self) -> crate::error::Result<i64> {
                self.udict.get_int($name)
            }

            #[doc = concat!("Deletes ", $doc, " (`", $name, "`).")]
            pub fn $del(&mut self) -> crate::error::Result<()> {
                self.udict.delete($name)
            }
        }
    };
}

macro_rules! uref_attr_rational {
    ($set:ident, $get:ident, $del:ident, $name:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " (`", $name, "`).")]
            pub fn $set(&mut self, value: crate::udict::Urational) {
                self.udict.set_rational($name, value);
            }

            #[doc = concat!("Returns ", $doc, " (`", $name, "`).")]
            pub fn $get(&self) -> crate::error::Result<crate::udict::Urational> {
                self.udict.get_rational($name)
            }

            #[doc = concat!("Deletes ", $doc, " (`", $name, "`).")]
            pub fn $del(&mut self) -> crate::error::Result<()> {
                self.udict.delete($name)
            }
        }
    };
}

macro_rules! uref_attr_string {
    ($set:ident, $get:ident, $del:ident, $name:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " (`", $name, "`). The value is copied.")]
            pub fn $set(&mut self, value: &str) {
                self.udict.set_string($name, value);
            }

            #[doc = concat!("Returns ", $doc, " (`", $name, "`).")]
            pub fn $get(&self) -> crate::error::Result<&str> {
                self.udict.get_string($name)
            }

            #[doc = concat!("Deletes ", $doc, " (`", $name, "`).")]
            pub fn $del(&mut self) -> crate::error::Result<()> {
                self.udict.delete($name)
            }
        }
    };
}

macro_rules! uref_attr_small_unsigned_va {
    ($set:ident, $get:ident, $fmt:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " of plane `plane`.")]
            pub fn $set(&mut self, value: u8, plane: u8) {
                self.udict.set_small_unsigned(format!($fmt, plane), value);
            }

            #[doc = concat!("Returns ", $doc, " of plane `plane`.")]
            pub fn $get(&self, plane: u8) -> crate::error::Result<u8> {
                self.udict.get_small_unsigned(&format!($fmt, plane))
            }
        }
    };
}

macro_rules! uref_attr_string_va {
    ($set:ident, $get:ident, $fmt:expr, $doc:expr) => {
        impl crate::uref::Uref {
            #[doc = concat!("Sets ", $doc, " of plane `plane`. The value is copied.")]
            pub fn $set(&mut self, value: &str, plane: u8) {
                self.udict.set_string(format!($fmt, plane), value);
            }

            #[doc = concat!("Returns ", $doc, " of plane `plane`.")]
            pub fn $get(&self, plane: u8) -> crate::error::Result<&str> {
                self.udict.get_string(&format!($fmt, plane))
            }
        }
    };
}

pub mod block_flow;
pub mod clock;
pub mod flow;
pub mod pic_flow;
pub mod sound_flow;

/// Record manager: allocates records whose dictionaries come from (and
/// return to) a pooled dictionary manager.
pub struct UrefMgr {
    udict_mgr: Arc<UdictMgr>,
}

impl UrefMgr {
    pub fn new(udict_mgr: Arc<UdictMgr>) -> Arc<Self> {
        Arc::new(Self { udict_mgr })
    }

    /// Allocates a record carrying only attributes (flow definitions,
    /// options).
    pub fn alloc_control(self: &Arc<Self>) -> Uref {
        Uref {
            mgr: Arc::clone(self),
            udict: self.udict_mgr.alloc(),
            ubuf: None,
        }
    }

    /// Allocates a record carrying a fresh block buffer of `size` octets.
    pub fn alloc_block(
        self: &Arc<Self>,
        ubuf_mgr: &Arc<UbufBlockMgr>,
        size: usize,
    ) -> Result<Uref> {
        let ubuf = ubuf_mgr.alloc(size)?;
        let mut uref = self.alloc_control();
        uref.ubuf = Some(Ubuf::Block(ubuf));
        Ok(uref)
    }

    /// Allocates a record carrying a fresh picture buffer.
    pub fn alloc_pic(
        self: &Arc<Self>,
        ubuf_mgr: &Arc<UbufPicMgr>,
        hsize: usize,
        vsize: usize,
    ) -> Result<Uref> {
        let ubuf = ubuf_mgr.alloc(hsize, vsize)?;
        let mut uref = self.alloc_control();
        uref.ubuf = Some(Ubuf::Pic(ubuf));
        Ok(uref)
    }

    /// Releases pooled dictionaries.
    pub fn vacuum(&self) {
        self.udict_mgr.vacuum();
    }
}

/// One record: optional buffer plus attribute dictionary.
pub struct Uref {
    mgr: Arc<UrefMgr>,
    udict: Udict,
    ubuf: Option<Ubuf>,
}

impl Uref {
    /// The attribute dictionary.
    pub fn udict(&self) -> &Udict {
        &self.udict
    }

    pub fn udict_mut(&mut self) -> &mut Udict {
        &mut self.udict
    }

    /// The attached buffer, if any.
    pub fn ubuf(&self) -> Option<&Ubuf> {
        self.ubuf.as_ref()
    }

    pub fn ubuf_mut(&mut self) -> Option<&mut Ubuf> {
        self.ubuf.as_mut()
    }

    /// Attaches a buffer, returning the previous one.
    pub fn set_ubuf(&mut self, ubuf: Ubuf) -> Option<Ubuf> {
        self.ubuf.replace(ubuf)
    }

    /// Detaches the buffer.
    pub fn take_ubuf(&mut self) -> Option<Ubuf> {
        self.ubuf.take()
    }

    /// Clones the dictionary (through the pool) and shares the buffer
    /// head; buffer contents remain copy-on-write.
    pub fn dup(&self) -> Uref {
        Uref {
            mgr: Arc::clone(&self.mgr),
            udict: self.mgr.udict_mgr.dup(&self.udict),
            ubuf: self.ubuf.as_ref().map(Ubuf::dup),
        }
    }
}

impl Drop for Uref {
    fn drop(&mut self) {
        // The dictionary returns to its pool; the buffer recycles through
        // its own manager when the last handle goes.
        let dict = std::mem::take(&mut self.udict);
        self.mgr.udict_mgr.free(dict);
    }
}

impl std::fmt::Debug for Uref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uref")
            .field("attrs", &self.udict.len())
            .field("ubuf", &self.ubuf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::umem::HeapUmemMgr;

    fn uref_mgr() -> Arc<UrefMgr> {
        UrefMgr::new(UdictMgr::new(4, 16))
    }

    #[test]
    fn control_record_has_no_buffer() {
        let mgr = uref_mgr();
        let uref = mgr.alloc_control();
        assert!(uref.ubuf().is_none());
        assert!(uref.udict().is_empty());
    }

    #[test]
    fn block_record_carries_buffer() {
        let mgr = uref_mgr();
        let block_mgr = UbufBlockMgr::new(2, HeapUmemMgr::new(), 0, 0, 0);
        let uref = mgr.alloc_block(&block_mgr, 32).unwrap();
        let block = uref.ubuf().unwrap().as_block().unwrap();
        assert_eq!(block.total_size(), 32);
    }

    #[test]
    fn dup_clones_dict_and_shares_buffer() {
        let mgr = uref_mgr();
        let block_mgr = UbufBlockMgr::new(2, HeapUmemMgr::new(), 0, 0, 0);
        let mut uref = mgr.alloc_block(&block_mgr, 8).unwrap();
        uref.set_pts(42);

        let copy = uref.dup();
        assert_eq!(copy.get_pts().unwrap(), 42);

        // Dict copies diverge.
        uref.set_pts(43);
        assert_eq!(copy.get_pts().unwrap(), 42);

        // Buffers share: writing through either fails while both live.
        let block = uref.ubuf_mut().unwrap().as_block_mut().unwrap();
        assert_eq!(
            block.write(0, 8).err(),
            Some(crate::error::Error::NotSingle)
        );
        drop(copy);
        assert!(block.write(0, 8).is_ok());
    }

    #[test]
    fn dict_returns_to_pool_on_drop() {
        let udict_mgr = UdictMgr::new(1, 4);
        let mgr = UrefMgr::new(Arc::clone(&udict_mgr));
        let mut uref = mgr.alloc_control();
        uref.set_pts(7);
        drop(uref);
        // The recycled dictionary comes back empty.
        let d = udict_mgr.alloc();
        assert!(d.is_empty());
    }
}
