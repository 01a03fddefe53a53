//! Block flow-definition attributes, for coded elementary streams.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::uref::{Uref, UrefMgr};

/// Flow definition prefix of block streams.
pub const BLOCK_FLOW_DEF: &str = "block.";

uref_attr_unsigned!(
    set_block_octetrate,
    get_block_octetrate,
    delete_block_octetrate,
    "b.octetrate",
    "the octet rate"
);
uref_attr_unsigned!(
    set_block_size,
    get_block_size,
    delete_block_size,
    "b.size",
    "the block size in octets"
);

/// Allocates a control record defining a new block flow. `suffix` extends
/// the hierarchy (e.g. `"mpeg2video."` yields `"block.mpeg2video."`); an
/// empty suffix defines a bare block flow.
pub fn block_flow_alloc_def(mgr: &Arc<UrefMgr>, suffix: &str) -> Result<Uref> {
    if !suffix.is_empty() && !suffix.ends_with('.') {
        return Err(Error::BadArg);
    }
    let mut uref = mgr.alloc_control();
    uref.set_flow_def(&format!("{BLOCK_FLOW_DEF}{suffix}"));
    Ok(uref)
}
