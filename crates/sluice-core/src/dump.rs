//! Structured snapshots of records, for logging and debugging.
//!
//! A snapshot renders the attribute dictionary and a summary of the
//! attached buffer as JSON, so diagnostics can be grepped and diffed
//! without reaching into the binary layout.

use serde::Serialize;
use serde_json::{Value, json};

use crate::udict::{AttrValue, Udict};
use crate::uref::Uref;

/// Buffer summary inside a record snapshot.
#[derive(Debug, Serialize)]
#[serde(tag = "family")]
pub enum BufferSnapshot {
    #[serde(rename = "block")]
    Block { total_size: usize },
    #[serde(rename = "pic")]
    Pic { hsize: usize, vsize: usize },
}

fn attr_value_json(value: &AttrValue) -> Value {
    match value {
        AttrValue::Void => Value::Null,
        AttrValue::Bool(b) => json!(b),
        AttrValue::SmallUnsigned(v) => json!(v),
        AttrValue::Unsigned(v) => json!(v),
        AttrValue::Int(v) => json!(v),
        AttrValue::Rational(r) => json!({ "num": r.num, "den": r.den }),
        AttrValue::String(s) => json!(s),
        AttrValue::Opaque(bytes) => json!({ "len": bytes.len() }),
    }
}

/// Renders a dictionary as a JSON object, one member per attribute.
pub fn udict_json(dict: &Udict) -> Value {
    let mut map = serde_json::Map::new();
    for attr in dict.iter() {
        map.insert(
            attr.name.to_string(),
            json!({
                "type": attr.value.type_tag(),
                "value": attr_value_json(&attr.value),
            }),
        );
    }
    Value::Object(map)
}

/// Renders a record as a JSON object: attributes plus buffer summary.
pub fn uref_json(uref: &Uref) -> Value {
    let buffer = uref.ubuf().map(|ubuf| match ubuf {
        crate::ubuf::Ubuf::Block(b) => BufferSnapshot::Block {
            total_size: b.total_size(),
        },
        crate::ubuf::Ubuf::Pic(p) => BufferSnapshot::Pic {
            hsize: p.hsize(),
            vsize: p.vsize(),
        },
    });
    json!({
        "attrs": udict_json(uref.udict()),
        "buffer": buffer,
    })
}
