//! [`Variant`]: the tagged value type stored at every tree node and in
//! every `ContextBuffer` as-value entry.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The type tag of a [`Variant`], also used as the value stored at each of
/// the tree's reserved type nodes (see [`crate::tree::MetadataTree`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TypeTag {
    /// Invalid / unset.
    Inv,
    /// Opaque user-defined payload, identified only by its blob bytes.
    Usr,
    Int,
    Uint,
    String,
    /// An address-sized integer, rendered in hex.
    Addr,
    Double,
    Bool,
    /// A [`TypeTag`] itself stored as a value (used by the meta `type`
    /// attribute to record another attribute's type).
    Type,
}

impl TypeTag {
    /// All type tags, in the fixed order their reserved tree nodes are
    /// created in during bootstrap.
    pub const ALL: [TypeTag; 9] = [
        TypeTag::Inv,
        TypeTag::Usr,
        TypeTag::Int,
        TypeTag::Uint,
        TypeTag::String,
        TypeTag::Addr,
        TypeTag::Double,
        TypeTag::Bool,
        TypeTag::Type,
    ];
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TypeTag::Inv => "inv",
            TypeTag::Usr => "usr",
            TypeTag::Int => "int",
            TypeTag::Uint => "uint",
            TypeTag::String => "string",
            TypeTag::Addr => "addr",
            TypeTag::Double => "double",
            TypeTag::Bool => "bool",
            TypeTag::Type => "type",
        };
        f.write_str(s)
    }
}

/// A tagged value. Cheap to clone: strings and blobs are reference-counted.
///
/// Equality and hashing are defined over the logical value (so two
/// `Variant::String`s built from different `Arc` allocations but equal
/// bytes compare equal), which is what [`crate::tree::MetadataTree`]'s
/// interning relies on.
#[derive(Clone, Debug)]
pub enum Variant {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Arc<str>),
    Blob(Arc<[u8]>),
    /// A type tag stored as a value, e.g. the meta `type` attribute's data.
    Type(TypeTag),
}

impl Variant {
    /// The [`TypeTag`] this value's shape corresponds to.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Variant::Bool(_) => TypeTag::Bool,
            Variant::Int(_) => TypeTag::Int,
            Variant::Uint(_) => TypeTag::Uint,
            Variant::Double(_) => TypeTag::Double,
            Variant::String(_) => TypeTag::String,
            Variant::Blob(_) => TypeTag::Usr,
            Variant::Type(_) => TypeTag::Type,
        }
    }

    /// Construct a string variant, copying `s` into a freshly-owned `Arc`.
    pub fn from_str(s: impl AsRef<str>) -> Self {
        Variant::String(Arc::from(s.as_ref()))
    }

    /// Construct a blob variant, copying `bytes` into a freshly-owned `Arc`.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Variant::Blob(Arc::from(bytes.as_ref()))
    }

    /// Render as a human-readable string, as the source's `Variant::to_string`
    /// does for display/debug tooling.
    pub fn to_display_string(&self) -> String {
        match self {
            Variant::Bool(b) => b.to_string(),
            Variant::Int(i) => i.to_string(),
            Variant::Uint(u) => u.to_string(),
            Variant::Double(d) => d.to_string(),
            Variant::String(s) => s.to_string(),
            Variant::Blob(b) => format!("{b:02x?}"),
            Variant::Type(t) => t.to_string(),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::Int(a), Variant::Int(b)) => a == b,
            (Variant::Uint(a), Variant::Uint(b)) => a == b,
            // NaN != NaN, matching IEEE754 and the source's bitwise-compare
            // semantics being reserved for hashing only.
            (Variant::Double(a), Variant::Double(b)) => a == b,
            (Variant::String(a), Variant::String(b)) => a == b,
            (Variant::Blob(a), Variant::Blob(b)) => a == b,
            (Variant::Type(a), Variant::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Variant::Bool(b) => b.hash(state),
            Variant::Int(i) => i.hash(state),
            Variant::Uint(u) => u.hash(state),
            // Hash by bit pattern; NaN payloads with identical bits hash
            // identically, which is all the interner's HashMap needs (the
            // `Eq` impl above is the source of truth for equality).
            Variant::Double(d) => d.to_bits().hash(state),
            Variant::String(s) => s.hash(state),
            Variant::Blob(b) => b.hash(state),
            Variant::Type(t) => t.hash(state),
        }
    }
}
