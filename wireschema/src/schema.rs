//! Runtime representation of an expected type position: a tag bit-set plus
//! payload slots holding user-type references and child schemas.
//!
//! A `TypeNode` with several tags set represents a union. The invariants a
//! union must satisfy are checked when the node is built (see
//! [`build_type_node`](crate::build_type_node)), never at decode time, so
//! the codecs can trust any node they are handed.

use crate::{
    desc::CustomType,
    enum_meta::{EnumKind, EnumMeta},
    error::Result,
    struct_meta::StructMeta,
};
use bitflags::bitflags;
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

bitflags! {
    /// Tag bits of a type position. Multiple bits set = union.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeTags: u32 {
        const ANY            = 1 << 0;
        const NONE           = 1 << 1;
        const BOOL           = 1 << 2;
        const INT            = 1 << 3;
        const FLOAT          = 1 << 4;
        const STR            = 1 << 5;
        const BYTES          = 1 << 6;
        const BYTEARRAY      = 1 << 7;
        const DATETIME       = 1 << 8;
        const EXT            = 1 << 9;
        const STRUCT         = 1 << 10;
        const ENUM           = 1 << 11;
        const INT_ENUM       = 1 << 12;
        const CUSTOM         = 1 << 13;
        const CUSTOM_GENERIC = 1 << 14;
        const DICT           = 1 << 15;
        const LIST           = 1 << 16;
        const SET            = 1 << 17;
        const VAR_TUPLE      = 1 << 18;
        const FIX_TUPLE      = 1 << 19;
    }
}

impl TypeTags {
    /// Tags decoded from a wire array.
    pub(crate) const ARRAY_KINDS: TypeTags = TypeTags::LIST
        .union(TypeTags::SET)
        .union(TypeTags::VAR_TUPLE)
        .union(TypeTags::FIX_TUPLE);

    /// Tags which are mutually exclusive within a union.
    pub(crate) const USER_KINDS: TypeTags = TypeTags::STRUCT
        .union(TypeTags::INT_ENUM)
        .union(TypeTags::ENUM)
        .union(TypeTags::CUSTOM);

    pub(crate) const CUSTOM_KINDS: TypeTags =
        TypeTags::CUSTOM.union(TypeTags::CUSTOM_GENERIC);
}

/// Why a tag combination is not a legal union, if it isn't.
pub(crate) fn union_violation(
    tags: TypeTags,
    struct_array_like: Option<bool>,
) -> Option<&'static str> {
    if tags.contains(TypeTags::ANY) && tags != TypeTags::ANY {
        return Some("`any` absorbs all other types");
    }
    if tags.intersects(TypeTags::CUSTOM_KINDS)
        && !tags
            .difference(TypeTags::CUSTOM_KINDS.union(TypeTags::NONE))
            .is_empty()
    {
        return Some("custom types may only be combined with null");
    }
    if tags.intersection(TypeTags::USER_KINDS).bits().count_ones() > 1 {
        return Some("more than one struct, enum, or custom type");
    }
    if tags.intersection(TypeTags::ARRAY_KINDS).bits().count_ones() > 1 {
        return Some("more than one array-like type");
    }
    if tags.contains(TypeTags::INT_ENUM | TypeTags::INT) {
        return Some("an int enum shadows int");
    }
    if tags.contains(TypeTags::ENUM | TypeTags::STR) {
        return Some("a str enum shadows str");
    }
    match struct_array_like {
        Some(true) if tags.intersects(TypeTags::ARRAY_KINDS) => {
            Some("an array-like struct conflicts with another array-like type")
        }
        Some(false) if tags.contains(TypeTags::DICT) => {
            Some("a map-encoded struct conflicts with dict")
        }
        _ => None,
    }
}

/// Compact description of an expected type.
///
/// Owns its children; immutable once built. Cheap to clone when there is no
/// payload (scalars, plain unions of scalars).
#[derive(Debug, Clone)]
pub struct TypeNode {
    tags: TypeTags,
    payload: Option<Box<Payload>>,
}

/// Extra slots, present only when some tag needs them. `children` holds, in
/// order: the dict key and value schemas (when `DICT` is set), then either
/// the single array-element schema or the N fix-tuple element schemas.
#[derive(Debug, Clone, Default)]
pub(crate) struct Payload {
    pub(crate) struct_ref: Option<Arc<StructMeta>>,
    pub(crate) int_enum_ref: Option<Arc<EnumMeta>>,
    pub(crate) str_enum_ref: Option<Arc<EnumMeta>>,
    pub(crate) custom_ref: Option<Arc<CustomType>>,
    pub(crate) children: SmallVec<[TypeNode; 2]>,
}

impl TypeNode {
    pub fn any() -> Self {
        TypeNode {
            tags: TypeTags::ANY,
            payload: None,
        }
    }

    pub(crate) fn from_parts(tags: TypeTags, payload: Option<Box<Payload>>) -> Self {
        TypeNode { tags, payload }
    }

    pub fn tags(&self) -> TypeTags {
        self.tags
    }

    pub fn is_any(&self) -> bool {
        self.tags.contains(TypeTags::ANY)
    }

    /// Whether this position admits values of the given tag. `ANY` admits
    /// everything.
    pub fn admits(&self, tag: TypeTags) -> bool {
        self.is_any() || self.tags.intersects(tag)
    }

    pub fn struct_ref(&self) -> Option<&Arc<StructMeta>> {
        self.payload.as_ref()?.struct_ref.as_ref()
    }

    pub fn int_enum_ref(&self) -> Option<&Arc<EnumMeta>> {
        self.payload.as_ref()?.int_enum_ref.as_ref()
    }

    pub fn str_enum_ref(&self) -> Option<&Arc<EnumMeta>> {
        self.payload.as_ref()?.str_enum_ref.as_ref()
    }

    pub fn custom_ref(&self) -> Option<&Arc<CustomType>> {
        self.payload.as_ref()?.custom_ref.as_ref()
    }

    pub fn dict_children(&self) -> Option<(&TypeNode, &TypeNode)> {
        if !self.tags.contains(TypeTags::DICT) {
            return None;
        }
        let children = &self.payload.as_ref()?.children;
        Some((&children[0], &children[1]))
    }

    fn array_children_offset(&self) -> usize {
        if self.tags.contains(TypeTags::DICT) {
            2
        } else {
            0
        }
    }

    /// Element schema of a list / set / var-tuple position.
    pub fn array_elem(&self) -> Option<&TypeNode> {
        if !self.tags.intersects(
            TypeTags::LIST | TypeTags::SET | TypeTags::VAR_TUPLE,
        ) {
            return None;
        }
        self.payload
            .as_ref()?
            .children
            .get(self.array_children_offset())
    }

    /// Positional element schemas of a fix-tuple position.
    pub fn tuple_elems(&self) -> Option<&[TypeNode]> {
        if !self.tags.contains(TypeTags::FIX_TUPLE) {
            return None;
        }
        let children = &self.payload.as_ref()?.children;
        Some(&children[self.array_children_offset()..])
    }

    /// Label decode-error paths start from: the struct name when this
    /// position is (or contains) a struct, `$` otherwise.
    pub(crate) fn root_label(&self) -> String {
        match self.struct_ref() {
            Some(meta) => meta.name().to_owned(),
            None => "$".to_owned(),
        }
    }

    /// SHA-256 of a canonical walk over the schema, usable as a wire-level
    /// schema identity. Struct references already visited hash as
    /// back-references, so self-referential record types terminate.
    ///
    /// Fails only if a lazily-built field schema turns out invalid.
    pub fn fingerprint(&self) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        let mut seen: Vec<*const StructMeta> = Vec::new();
        self.hash_into(&mut hasher, &mut seen)?;
        Ok(hasher.finalize().into())
    }

    fn hash_into(
        &self,
        hasher: &mut Sha256,
        seen: &mut Vec<*const StructMeta>,
    ) -> Result<()> {
        hasher.update(self.tags.bits().to_le_bytes());
        let Some(payload) = &self.payload else {
            return Ok(());
        };
        if let Some(meta) = &payload.struct_ref {
            let ptr = Arc::as_ptr(meta);
            if let Some(back) = seen.iter().position(|&p| p == ptr) {
                hasher.update([0xff]);
                hasher.update((back as u64).to_le_bytes());
            } else {
                seen.push(ptr);
                hasher.update([0x01]);
                hash_str(hasher, meta.name());
                hasher.update([
                    meta.config().immutable as u8,
                    meta.config().array_like as u8,
                ]);
                hasher.update((meta.n_fields() as u64).to_le_bytes());
                let types = meta.field_types()?;
                for (field, node) in meta.fields().iter().zip(types) {
                    hash_str(hasher, &field.name);
                    hasher.update([field.default.is_some() as u8]);
                    node.hash_into(hasher, seen)?;
                }
            }
        }
        for enum_ref in [&payload.int_enum_ref, &payload.str_enum_ref]
            .into_iter()
            .flatten()
        {
            hasher.update([0x02]);
            hash_str(hasher, enum_ref.name());
            for member in enum_ref.members() {
                hash_str(hasher, &member.name);
                if enum_ref.kind() == EnumKind::Int {
                    hasher.update(member.value.to_le_bytes());
                }
            }
        }
        if let Some(custom) = &payload.custom_ref {
            hasher.update([0x03]);
            hash_str(hasher, custom.name());
        }
        hasher.update((payload.children.len() as u64).to_le_bytes());
        for child in &payload.children {
            child.hash_into(hasher, seen)?;
        }
        Ok(())
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

impl Display for TypeNode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_any() {
            return f.write_str("any");
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(meta) = self.struct_ref() {
            parts.push(meta.name().to_owned());
        }
        if let Some(e) = self.int_enum_ref() {
            parts.push(e.name().to_owned());
        }
        if let Some(e) = self.str_enum_ref() {
            parts.push(e.name().to_owned());
        }
        if let Some(c) = self.custom_ref() {
            parts.push(c.name().to_owned());
        }
        if let Some((k, v)) = self.dict_children() {
            parts.push(format!("dict[{}, {}]", k, v));
        }
        if let Some(elem) = self.array_elem() {
            if self.tags.contains(TypeTags::LIST) {
                parts.push(format!("list[{}]", elem));
            } else if self.tags.contains(TypeTags::SET) {
                parts.push(format!("set[{}]", elem));
            } else {
                parts.push(format!("tuple[{}, ...]", elem));
            }
        }
        if let Some(elems) = self.tuple_elems() {
            let inner: Vec<String> = elems.iter().map(|e| e.to_string()).collect();
            parts.push(format!("tuple[{}]", inner.join(", ")));
        }
        for (tag, name) in [
            (TypeTags::BOOL, "bool"),
            (TypeTags::INT, "int"),
            (TypeTags::FLOAT, "float"),
            (TypeTags::STR, "str"),
            (TypeTags::BYTES, "bytes"),
            (TypeTags::BYTEARRAY, "bytearray"),
            (TypeTags::DATETIME, "datetime"),
            (TypeTags::EXT, "ext"),
            (TypeTags::NONE, "null"),
        ] {
            if self.tags.contains(tag) {
                parts.push(name.to_owned());
            }
        }
        f.write_str(&parts.join(" | "))
    }
}

#[test]
fn test_union_violations() {
    assert!(union_violation(TypeTags::INT | TypeTags::NONE, None).is_none());
    assert!(union_violation(TypeTags::ANY | TypeTags::INT, None).is_some());
    assert!(union_violation(TypeTags::CUSTOM | TypeTags::NONE, None).is_none());
    assert!(union_violation(TypeTags::CUSTOM | TypeTags::INT, None).is_some());
    assert!(union_violation(TypeTags::LIST | TypeTags::SET, None).is_some());
    assert!(union_violation(TypeTags::INT_ENUM | TypeTags::INT, None).is_some());
    assert!(union_violation(TypeTags::ENUM | TypeTags::STR, None).is_some());
    assert!(
        union_violation(TypeTags::STRUCT | TypeTags::LIST, Some(true)).is_some()
    );
    assert!(
        union_violation(TypeTags::STRUCT | TypeTags::DICT, Some(false)).is_some()
    );
    assert!(
        union_violation(TypeTags::STRUCT | TypeTags::LIST, Some(false)).is_none()
    );
}
