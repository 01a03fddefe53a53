//! Clock attributes: timestamps, durations, playing rate.
//!
//! All timestamps are in system ticks (see `uclock::UCLOCK_FREQ`).
//! `*_orig` variants carry the stream's own clock, `*_sys` the system
//! clock of the machine.

uref_attr_unsigned!(
    set_systime,
    get_systime,
    delete_systime,
    "k.systime",
    "the reception time in system clock"
);
uref_attr_unsigned!(
    set_systime_rap,
    get_systime_rap,
    delete_systime_rap,
    "k.systime_rap",
    "the reception time of the last random access point"
);
uref_attr_unsigned!(set_pts, get_pts, delete_pts, "k.pts", "the presentation timestamp");
uref_attr_unsigned!(
    set_pts_orig,
    get_pts_orig,
    delete_pts_orig,
    "k.pts_orig",
    "the original presentation timestamp in stream clock"
);
uref_attr_unsigned!(
    set_pts_sys,
    get_pts_sys,
    delete_pts_sys,
    "k.pts_sys",
    "the presentation timestamp in system clock"
);
uref_attr_unsigned!(set_dts, get_dts, delete_dts, "k.dts", "the decoding timestamp");
uref_attr_unsigned!(
    set_dts_orig,
    get_dts_orig,
    delete_dts_orig,
    "k.dts_orig",
    "the original decoding timestamp in stream clock"
);
uref_attr_unsigned!(
    set_dts_sys,
    get_dts_sys,
    delete_dts_sys,
    "k.dts_sys",
    "the decoding timestamp in system clock"
);
uref_attr_unsigned!(
    set_vbv_delay,
    get_vbv_delay,
    delete_vbv_delay,
    "k.vbv_delay",
    "the vbv/dts delay"
);
uref_attr_unsigned!(
    set_duration,
    get_duration,
    delete_duration,
    "k.duration",
    "the duration"
);
uref_attr_small_unsigned!(
    set_index_rap,
    get_index_rap,
    delete_index_rap,
    "k.index_rap",
    "the frame offset from the last random access point"
);
uref_attr_rational!(set_rate, get_rate, delete_rate, "k.rate", "the playing rate");

#[cfg(test)]
mod tests {
    use crate::udict::{UdictMgr, Urational};
    use crate::uref::UrefMgr;

    #[test]
    fn clock_attrs_roundtrip() {
        let mgr = UrefMgr::new(UdictMgr::new(2, 16));
        let mut uref = mgr.alloc_control();
        uref.set_pts(27_000_000);
        uref.set_dts(26_000_000);
        uref.set_duration(900_000);
        uref.set_rate(Urational::new(1, 1));
        assert_eq!(uref.get_pts().unwrap(), 27_000_000);
        assert_eq!(uref.get_dts().unwrap(), 26_000_000);
        assert_eq!(uref.get_duration().unwrap(), 900_000);
        assert_eq!(uref.get_rate().unwrap(), Urational::new(1, 1));
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let mgr = UrefMgr::new(UdictMgr::new(2, 16));
        let mut uref = mgr.alloc_control();
        uref.set_pts(1);
        uref.delete_pts().unwrap();
        assert_eq!(uref.get_pts(), Err(crate::error::Error::NotFound));
    }
}
