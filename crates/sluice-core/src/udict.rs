//! Typed attribute dictionaries.
//!
//! A [`Udict`] is an ordered set of attributes keyed by name. Names are
//! short ASCII strings; well-known attributes use `'static` constants (see
//! the `uref` accessor modules) so most keys never allocate. Duplicate
//! names are forbidden: setting an existing name replaces its value,
//! whatever the previous type was. Reading an existing name with the wrong
//! type fails with [`Error::WrongType`] and never mutates the dictionary.
//!
//! Dictionaries are pool-allocated: the manager keeps emptied dictionaries
//! (and their backing storage) for reuse.

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::Ulifo;

/// Rational number, `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Urational {
    pub num: i64,
    pub den: u64,
}

impl Urational {
    pub fn new(num: i64, den: u64) -> Self {
        Self { num, den }
    }
}

impl std::fmt::Display for Urational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Typed attribute payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Presence-only marker.
    Void,
    Bool(bool),
    SmallUnsigned(u8),
    Unsigned(u64),
    Int(i64),
    Rational(Urational),
    String(String),
    Opaque(Vec<u8>),
}

impl AttrValue {
    /// Stable lowercase tag, used by snapshots and logging.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool(_) => "bool",
            Self::SmallUnsigned(_) => "small_unsigned",
            Self::Unsigned(_) => "unsigned",
            Self::Int(_) => "int",
            Self::Rational(_) => "rational",
            Self::String(_) => "string",
            Self::Opaque(_) => "opaque",
        }
    }
}

/// One attribute: name plus typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: Cow<'static, str>,
    pub value: AttrValue,
}

/// Ordered, duplicate-free attribute dictionary.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Udict {
    attrs: Vec<Attr>,
}

macro_rules! typed_accessors {
    ($set:ident, $get:ident, $variant:ident, $ty:ty) => {
        pub fn $set(&mut self, name: impl Into<Cow<'static, str>>, value: $ty) {
            self.set(name, AttrValue::$variant(value));
        }

        pub fn $get(&self, name: &str) -> Result<$ty> {
            match self.get(name) {
                Some(AttrValue::$variant(v)) => Ok(v.clone()),
                Some(_) => Err(Error::WrongType),
                None => Err(Error::NotFound),
            }
        }
    };
}

impl Udict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Raw lookup by name.
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|a| a.name == name).map(|a| &a.value)
    }

    /// Raw insert/replace by name. Replacement keeps the attribute's
    /// position so iteration order stays stable.
    pub fn set(&mut self, name: impl Into<Cow<'static, str>>, value: AttrValue) {
        let name = name.into();
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attr { name, value }),
        }
    }

    /// Removes an attribute.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let pos = self
            .attrs
            .iter()
            .position(|a| a.name == name)
            .ok_or(Error::NotFound)?;
        self.attrs.remove(pos);
        Ok(())
    }

    /// Iterates attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Attr> {
        self.attrs.iter()
    }

    /// Merges every attribute of `other` into `self`, replacing clashes.
    pub fn import(&mut self, other: &Udict) {
        for attr in &other.attrs {
            self.set(attr.name.clone(), attr.value.clone());
        }
    }

    /// Drops every attribute, keeping the backing storage for reuse.
    pub fn clear(&mut self) {
        self.attrs.clear();
    }

    typed_accessors!(set_bool, get_bool, Bool, bool);
    typed_accessors!(set_small_unsigned, get_small_unsigned, SmallUnsigned, u8);
    typed_accessors!(set_unsigned, get_unsigned, Unsigned, u64);
    typed_accessors!(set_int, get_int, Int, i64);
    typed_accessors!(set_rational, get_rational, Rational, Urational);
    typed_accessors!(set_opaque, get_opaque, Opaque, Vec<u8>);

    /// Marks a presence-only attribute.
    pub fn set_void(&mut self, name: impl Into<Cow<'static, str>>) {
        self.set(name, AttrValue::Void);
    }

    /// Whether a presence-only attribute is set.
    pub fn get_void(&self, name: &str) -> Result<()> {
        match self.get(name) {
            Some(AttrValue::Void) => Ok(()),
            Some(_) => Err(Error::WrongType),
            None => Err(Error::NotFound),
        }
    }

    /// Stores a copy of `value`; the caller retains nothing.
    pub fn set_string(&mut self, name: impl Into<Cow<'static, str>>, value: &str) {
        self.set(name, AttrValue::String(value.to_owned()));
    }

    pub fn get_string(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(AttrValue::String(s)) => Ok(s),
            Some(_) => Err(Error::WrongType),
            None => Err(Error::NotFound),
        }
    }
}

/// Pool-allocating dictionary manager.
///
/// `pool_depth` emptied dictionaries are kept for reuse; `attr_capacity`
/// is the storage preallocated in fresh dictionaries (a dictionary may
/// still grow beyond it).
pub struct UdictMgr {
    pool: Ulifo<Udict>,
    attr_capacity: usize,
}

impl UdictMgr {
    pub fn new(pool_depth: usize, attr_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: Ulifo::new(pool_depth),
            attr_capacity,
        })
    }

    /// Pops a pooled dictionary or builds a fresh one.
    pub fn alloc(&self) -> Udict {
        self.pool.pop().unwrap_or_else(|| Udict {
            attrs: Vec::with_capacity(self.attr_capacity),
        })
    }

    /// Pool-allocated deep copy.
    pub fn dup(&self, dict: &Udict) -> Udict {
        let mut copy = self.alloc();
        copy.import(dict);
        copy
    }

    /// Empties `dict` and returns it to the pool; falls back to the heap
    /// when the pool is full.
    pub fn free(&self, mut dict: Udict) {
        dict.clear();
        let _ = self.pool.push(dict);
    }

    /// Releases pooled dictionaries.
    pub fn vacuum(&self) {
        self.pool.vacuum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Typed round-trips
    // -----------------------------------------------------------------------

    #[test]
    fn set_get_roundtrips_every_type() {
        let mut d = Udict::new();
        d.set_void("t.void");
        d.set_bool("t.bool", true);
        d.set_small_unsigned("t.su", 7);
        d.set_unsigned("t.u", 42);
        d.set_int("t.i", -42);
        d.set_rational("t.r", Urational::new(30000, 1001));
        d.set_string("t.s", "pic.");
        d.set_opaque("t.o", vec![1, 2, 3]);

        d.get_void("t.void").unwrap();
        assert!(d.get_bool("t.bool").unwrap());
        assert_eq!(d.get_small_unsigned("t.su").unwrap(), 7);
        assert_eq!(d.get_unsigned("t.u").unwrap(), 42);
        assert_eq!(d.get_int("t.i").unwrap(), -42);
        assert_eq!(d.get_rational("t.r").unwrap(), Urational::new(30000, 1001));
        assert_eq!(d.get_string("t.s").unwrap(), "pic.");
        assert_eq!(d.get_opaque("t.o").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn wrong_type_fails_without_mutating() {
        let mut d = Udict::new();
        d.set_unsigned("k.pts", 42);
        let before = d.clone();
        assert_eq!(d.get_string("k.pts"), Err(Error::WrongType));
        assert_eq!(d, before);
        assert_eq!(d.get_unsigned("k.pts").unwrap(), 42);
    }

    #[test]
    fn missing_name_is_not_found() {
        let d = Udict::new();
        assert_eq!(d.get_unsigned("k.pts"), Err(Error::NotFound));
    }

    // -----------------------------------------------------------------------
    // Replacement, deletion, ordering
    // -----------------------------------------------------------------------

    #[test]
    fn set_replaces_in_place() {
        let mut d = Udict::new();
        d.set_unsigned("a", 1);
        d.set_unsigned("b", 2);
        d.set_unsigned("a", 9);
        assert_eq!(d.len(), 2);
        let names: Vec<_> = d.iter().map(|a| a.name.as_ref()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(d.get_unsigned("a").unwrap(), 9);
    }

    #[test]
    fn set_replaces_across_types() {
        let mut d = Udict::new();
        d.set_unsigned("x", 5);
        d.set_string("x", "five");
        assert_eq!(d.len(), 1);
        assert_eq!(d.get_string("x").unwrap(), "five");
        assert_eq!(d.get_unsigned("x"), Err(Error::WrongType));
    }

    #[test]
    fn delete_removes_and_reports_missing() {
        let mut d = Udict::new();
        d.set_bool("gone", false);
        d.delete("gone").unwrap();
        assert_eq!(d.delete("gone"), Err(Error::NotFound));
        assert!(d.is_empty());
    }

    #[test]
    fn import_merges_and_overrides() {
        let mut a = Udict::new();
        a.set_unsigned("k", 1);
        a.set_string("only_a", "x");
        let mut b = Udict::new();
        b.set_unsigned("k", 2);
        b.set_string("only_b", "y");
        a.import(&b);
        assert_eq!(a.get_unsigned("k").unwrap(), 2);
        assert_eq!(a.get_string("only_a").unwrap(), "x");
        assert_eq!(a.get_string("only_b").unwrap(), "y");
    }

    // -----------------------------------------------------------------------
    // Manager pooling
    // -----------------------------------------------------------------------

    #[test]
    fn mgr_recycles_dictionaries() {
        let mgr = UdictMgr::new(2, 8);
        let mut d = mgr.alloc();
        d.set_unsigned("k", 1);
        mgr.free(d);

        let d2 = mgr.alloc();
        assert!(d2.is_empty(), "recycled dictionary must come back clean");
    }

    #[test]
    fn mgr_dup_is_deep() {
        let mgr = UdictMgr::new(2, 8);
        let mut d = mgr.alloc();
        d.set_string("f.def", "block.");
        let copy = mgr.dup(&d);
        d.set_string("f.def", "pic.");
        assert_eq!(copy.get_string("f.def").unwrap(), "block.");
    }

    #[test]
    fn mgr_pool_overflow_goes_to_heap() {
        let mgr = UdictMgr::new(1, 4);
        mgr.free(mgr.alloc());
        mgr.free(mgr.alloc()); // pool full, silently dropped
        mgr.vacuum();
    }
}
