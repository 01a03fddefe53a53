//! Sound flow-definition attributes.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::uref::{Uref, UrefMgr};

/// Flow definition prefix of raw sound.
pub const SOUND_FLOW_DEF: &str = "sound.";

uref_attr_small_unsigned!(
    set_sound_channels,
    get_sound_channels,
    delete_sound_channels,
    "s.channels",
    "the number of channels"
);
uref_attr_small_unsigned!(
    set_sound_sample_size,
    get_sound_sample_size,
    delete_sound_sample_size,
    "s.sample_size",
    "the size in octets of a sample of one channel"
);
uref_attr_unsigned!(
    set_sound_rate,
    get_sound_rate,
    delete_sound_rate,
    "s.rate",
    "the sample rate in Hz"
);
uref_attr_unsigned!(
    set_sound_samples,
    get_sound_samples,
    delete_sound_samples,
    "s.samples",
    "the number of samples per frame"
);

/// Allocates a control record defining a new raw-sound flow.
pub fn sound_flow_alloc_def(
    mgr: &Arc<UrefMgr>,
    channels: u8,
    sample_size: u8,
) -> Result<Uref> {
    if channels == 0 || sample_size == 0 {
        return Err(Error::BadArg);
    }
    let mut uref = mgr.alloc_control();
    uref.set_flow_def(SOUND_FLOW_DEF);
    uref.set_sound_channels(channels);
    uref.set_sound_sample_size(sample_size);
    Ok(uref)
}
