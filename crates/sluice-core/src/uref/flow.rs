//! Flow attributes: the flow definition, language, stream id.
//!
//! A flow definition is a dotted hierarchy string (`"pic."`,
//! `"block.mpeg2video."`, `"sound."`). Producers emit the most specific
//! prefix; consumers match by prefix.

use crate::error::Result;
use crate::uref::Uref;

/// Attribute name of the flow definition.
pub const FLOW_DEF: &str = "f.def";
/// Attribute name of the flow language.
pub const FLOW_LANG: &str = "f.lang";
/// Attribute name of the stream id a sub-pipe serves.
pub const FLOW_ID: &str = "a.id";

uref_attr_string!(
    set_flow_def,
    get_flow_def,
    delete_flow_def,
    "f.def",
    "the flow definition"
);
uref_attr_string!(
    set_flow_lang,
    get_flow_lang,
    delete_flow_lang,
    "f.lang",
    "the flow language (ISO-639)"
);
uref_attr_unsigned!(
    set_flow_id,
    get_flow_id,
    delete_flow_id,
    "a.id",
    "the stream id inside the container"
);

impl Uref {
    /// Whether the flow definition starts with `prefix`.
    pub fn flow_def_matches(&self, prefix: &str) -> Result<bool> {
        Ok(self.get_flow_def()?.starts_with(prefix))
    }
}
