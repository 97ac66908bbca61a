//! User-facing type descriptions, and the builder that turns them into
//! validated [`TypeNode`]s.
//!
//! Descriptions arrive as in-memory trees (there is no schema DSL). The
//! [`typedesc!`] macro provides syntactic sugar for writing them inline.

use crate::{
    enum_meta::EnumMeta,
    error::{bail, error, Result},
    schema::{union_violation, Payload, TypeNode, TypeTags},
    struct_meta::StructMeta,
    value::Value,
};
use std::sync::{Arc, OnceLock};

/// Late-bound reference to a record type, for record types that reference
/// themselves or each other. Declare the handle first, use it in field
/// descriptions, then [`bind`](StructHandle::bind) it to the built
/// metadata; the reference is resolved when field schemas are built on
/// first codec use.
#[derive(Debug, Clone, Default)]
pub struct StructHandle(Arc<OnceLock<Arc<StructMeta>>>);

impl StructHandle {
    pub fn new() -> Self {
        StructHandle(Arc::new(OnceLock::new()))
    }

    pub fn bind(&self, meta: &Arc<StructMeta>) -> Result<()> {
        self.0
            .set(meta.clone())
            .map_err(|_| error!(Schema, "struct handle bound twice"))
    }

    pub fn get(&self) -> Option<&Arc<StructMeta>> {
        self.0.get()
    }
}

/// A user-defined type the engine does not natively understand. The decoder
/// routes its decoded-as-`any` form through the caller's `dec_hook`.
#[derive(Debug)]
pub struct CustomType {
    name: String,
}

impl CustomType {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(CustomType { name: name.into() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Check that a (possibly hook-converted) value is an instance of the
/// custom type a schema position expects.
pub(crate) fn verify_custom(
    target: &Arc<CustomType>,
    converted: Value,
) -> Result<Value> {
    match converted {
        Value::Custom(cv) if Arc::ptr_eq(cv.custom_type(), target) => {
            Ok(Value::Custom(cv))
        }
        other => bail!(
            Validation,
            "expected {}, got {}",
            target.name(),
            other.kind_label(),
        ),
    }
}

/// Description of an expected type, as supplied by the caller.
#[derive(Debug, Clone)]
pub enum TypeDesc {
    Any,
    Null,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    ByteArray,
    DateTime,
    Ext,
    List(Box<TypeDesc>),
    Set(Box<TypeDesc>),
    /// Variable-length tuple of one element type (the `tuple[T, ...]`
    /// form).
    VarTuple(Box<TypeDesc>),
    /// Fixed-arity tuple.
    Tuple(Vec<TypeDesc>),
    Dict(Box<TypeDesc>, Box<TypeDesc>),
    Union(Vec<TypeDesc>),
    Struct(Arc<StructMeta>),
    /// Late-bound struct reference; see [`StructHandle`].
    Deferred(StructHandle),
    IntEnum(Arc<EnumMeta>),
    StrEnum(Arc<EnumMeta>),
    Custom(Arc<CustomType>),
    /// A parametrised application of a custom type. Only the origin is
    /// retained in the built node; instance checks compare against it.
    CustomGeneric {
        origin: Arc<CustomType>,
        args: Vec<TypeDesc>,
    },
}

/// Walk a description and produce a validated [`TypeNode`], or a schema
/// error citing the offending description.
///
/// Struct references do not build their per-field schemas here; those are
/// built lazily on first codec use, which is what lets record types
/// reference each other (and themselves).
pub fn build_type_node(desc: &TypeDesc) -> Result<TypeNode> {
    let mut builder = NodeBuilder::new();
    builder.collect(desc)?;
    builder.finish(desc)
}

struct NodeBuilder<'d> {
    tags: TypeTags,
    struct_ref: Option<Arc<StructMeta>>,
    int_enum_ref: Option<Arc<EnumMeta>>,
    str_enum_ref: Option<Arc<EnumMeta>>,
    custom_ref: Option<Arc<CustomType>>,
    dict: Option<(&'d TypeDesc, &'d TypeDesc)>,
    array_elem: Option<&'d TypeDesc>,
    tuple_elems: Option<&'d [TypeDesc]>,
}

impl<'d> NodeBuilder<'d> {
    fn new() -> Self {
        NodeBuilder {
            tags: TypeTags::empty(),
            struct_ref: None,
            int_enum_ref: None,
            str_enum_ref: None,
            custom_ref: None,
            dict: None,
            array_elem: None,
            tuple_elems: None,
        }
    }

    fn set_array(&mut self, tag: TypeTags, elem: &'d TypeDesc, whole: &'d TypeDesc) -> Result<()> {
        if self.array_elem.is_some() || self.tuple_elems.is_some() {
            bail!(
                Schema,
                "invalid type description {:?}: more than one array-like type",
                whole,
            );
        }
        self.tags.insert(tag);
        self.array_elem = Some(elem);
        Ok(())
    }

    fn collect(&mut self, desc: &'d TypeDesc) -> Result<()> {
        match desc {
            TypeDesc::Any => self.tags.insert(TypeTags::ANY),
            TypeDesc::Null => self.tags.insert(TypeTags::NONE),
            TypeDesc::Bool => self.tags.insert(TypeTags::BOOL),
            TypeDesc::Int => self.tags.insert(TypeTags::INT),
            TypeDesc::Float => self.tags.insert(TypeTags::FLOAT),
            TypeDesc::Str => self.tags.insert(TypeTags::STR),
            TypeDesc::Bytes => self.tags.insert(TypeTags::BYTES),
            TypeDesc::ByteArray => self.tags.insert(TypeTags::BYTEARRAY),
            TypeDesc::DateTime => self.tags.insert(TypeTags::DATETIME),
            TypeDesc::Ext => self.tags.insert(TypeTags::EXT),
            TypeDesc::List(elem) => self.set_array(TypeTags::LIST, &**elem, desc)?,
            TypeDesc::Set(elem) => self.set_array(TypeTags::SET, &**elem, desc)?,
            TypeDesc::VarTuple(elem) => {
                self.set_array(TypeTags::VAR_TUPLE, &**elem, desc)?
            }
            TypeDesc::Tuple(elems) => {
                if self.array_elem.is_some() || self.tuple_elems.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one array-like type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::FIX_TUPLE);
                self.tuple_elems = Some(elems.as_slice());
            }
            TypeDesc::Dict(key, value) => {
                if self.dict.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one dict type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::DICT);
                self.dict = Some((&**key, &**value));
            }
            TypeDesc::Union(alts) => {
                for alt in alts {
                    self.collect(alt)?;
                }
            }
            TypeDesc::Struct(meta) => {
                if self.struct_ref.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one struct type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::STRUCT);
                self.struct_ref = Some(meta.clone());
            }
            TypeDesc::Deferred(handle) => {
                let meta = handle.get().ok_or_else(|| {
                    error!(Schema, "unresolved struct handle in {:?}", desc)
                })?;
                if self.struct_ref.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one struct type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::STRUCT);
                self.struct_ref = Some(meta.clone());
            }
            TypeDesc::IntEnum(meta) => {
                if self.int_enum_ref.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one int enum type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::INT_ENUM);
                self.int_enum_ref = Some(meta.clone());
            }
            TypeDesc::StrEnum(meta) => {
                if self.str_enum_ref.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one str enum type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::ENUM);
                self.str_enum_ref = Some(meta.clone());
            }
            TypeDesc::Custom(ty) => {
                if self.custom_ref.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one custom type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::CUSTOM);
                self.custom_ref = Some(ty.clone());
            }
            TypeDesc::CustomGeneric { origin, args: _ } => {
                if self.custom_ref.is_some() {
                    bail!(
                        Schema,
                        "invalid type description {:?}: more than one custom type",
                        desc,
                    );
                }
                self.tags.insert(TypeTags::CUSTOM_GENERIC);
                self.custom_ref = Some(origin.clone());
            }
        }
        Ok(())
    }

    fn finish(self, root: &TypeDesc) -> Result<TypeNode> {
        // `any` clears everything else
        if self.tags.contains(TypeTags::ANY) {
            return Ok(TypeNode::any());
        }
        if self.tags.is_empty() {
            bail!(Schema, "empty type description {:?}", root);
        }
        let struct_array_like = self
            .struct_ref
            .as_ref()
            .map(|meta| meta.config().array_like);
        if let Some(why) = union_violation(self.tags, struct_array_like) {
            bail!(Schema, "invalid type description {:?}: {}", root, why);
        }

        let needs_payload = self.struct_ref.is_some()
            || self.int_enum_ref.is_some()
            || self.str_enum_ref.is_some()
            || self.custom_ref.is_some()
            || self.dict.is_some()
            || self.array_elem.is_some()
            || self.tuple_elems.is_some();
        if !needs_payload {
            return Ok(TypeNode::from_parts(self.tags, None));
        }

        let mut payload = Payload {
            struct_ref: self.struct_ref,
            int_enum_ref: self.int_enum_ref,
            str_enum_ref: self.str_enum_ref,
            custom_ref: self.custom_ref,
            children: Default::default(),
        };
        if let Some((key, value)) = self.dict {
            payload.children.push(build_type_node(key)?);
            payload.children.push(build_type_node(value)?);
        }
        if let Some(elem) = self.array_elem {
            payload.children.push(build_type_node(elem)?);
        }
        if let Some(elems) = self.tuple_elems {
            for elem in elems {
                payload.children.push(build_type_node(elem)?);
            }
        }
        Ok(TypeNode::from_parts(self.tags, Some(Box::new(payload))))
    }
}

/// Syntactic sugar for building [`TypeDesc`] trees.
///
/// ```
/// use wireschema::{typedesc, build_type_node};
///
/// let desc = typedesc!(dict(str)(union { (list(int)), (null) }));
/// let node = build_type_node(&desc).unwrap();
/// assert_eq!(node.to_string(), "dict[str, list[int] | null]");
/// ```
#[macro_export]
macro_rules! typedesc {
    (any)=>{ $crate::TypeDesc::Any };
    (null)=>{ $crate::TypeDesc::Null };
    (bool)=>{ $crate::TypeDesc::Bool };
    (int)=>{ $crate::TypeDesc::Int };
    (float)=>{ $crate::TypeDesc::Float };
    (str)=>{ $crate::TypeDesc::Str };
    (bytes)=>{ $crate::TypeDesc::Bytes };
    (bytearray)=>{ $crate::TypeDesc::ByteArray };
    (datetime)=>{ $crate::TypeDesc::DateTime };
    (ext)=>{ $crate::TypeDesc::Ext };
    (list($($inner:tt)*))=>{ $crate::TypeDesc::List(::std::boxed::Box::new($crate::typedesc!($($inner)*))) };
    (set($($inner:tt)*))=>{ $crate::TypeDesc::Set(::std::boxed::Box::new($crate::typedesc!($($inner)*))) };
    (vartuple($($inner:tt)*))=>{ $crate::TypeDesc::VarTuple(::std::boxed::Box::new($crate::typedesc!($($inner)*))) };
    (tuple { $(($($item:tt)*)),*$(,)? })=>{ $crate::TypeDesc::Tuple(::std::vec![$( $crate::typedesc!($($item)*), )*]) };
    (dict($($key:tt)*)($($value:tt)*))=>{ $crate::TypeDesc::Dict(::std::boxed::Box::new($crate::typedesc!($($key)*)), ::std::boxed::Box::new($crate::typedesc!($($value)*))) };
    (union { $(($($alt:tt)*)),*$(,)? })=>{ $crate::TypeDesc::Union(::std::vec![$( $crate::typedesc!($($alt)*), )*]) };
    (option($($inner:tt)*))=>{ $crate::TypeDesc::Union(::std::vec![$crate::typedesc!($($inner)*), $crate::TypeDesc::Null]) };
    (%$desc:expr)=>{ $desc };
}

pub use typedesc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeTags;

    #[test]
    fn test_atoms() {
        let node = build_type_node(&typedesc!(int)).unwrap();
        assert_eq!(node.tags(), TypeTags::INT);
        assert!(node.array_elem().is_none());
    }

    #[test]
    fn test_any_absorbs() {
        let node = build_type_node(&typedesc!(union { (any), (int), (null) })).unwrap();
        assert!(node.is_any());
        assert_eq!(node.tags(), TypeTags::ANY);
    }

    #[test]
    fn test_union_flattening() {
        let desc = typedesc!(union { (int), (union { (str), (null) }) });
        let node = build_type_node(&desc).unwrap();
        assert_eq!(node.tags(), TypeTags::INT | TypeTags::STR | TypeTags::NONE);
    }

    #[test]
    fn test_dict_and_list_children() {
        let desc = typedesc!(union { (dict(str)(int)), (list(float)) });
        let node = build_type_node(&desc).unwrap();
        let (key, value) = node.dict_children().unwrap();
        assert_eq!(key.tags(), TypeTags::STR);
        assert_eq!(value.tags(), TypeTags::INT);
        assert_eq!(node.array_elem().unwrap().tags(), TypeTags::FLOAT);
    }

    #[test]
    fn test_fix_tuple_children() {
        let node = build_type_node(&typedesc!(tuple { (int), (str), (bool) })).unwrap();
        let elems = node.tuple_elems().unwrap();
        assert_eq!(elems.len(), 3);
        assert_eq!(elems[1].tags(), TypeTags::STR);
    }

    #[test]
    fn test_conflicting_unions_rejected() {
        assert!(build_type_node(&typedesc!(union { (list(int)), (set(str)) })).is_err());
        assert!(build_type_node(&typedesc!(union { (list(int)), (list(str)) })).is_err());
        assert!(
            build_type_node(&typedesc!(union { (dict(str)(int)), (dict(int)(int)) }))
                .is_err()
        );
    }

    #[test]
    fn test_custom_combines_only_with_null() {
        let ty = CustomType::new("Decimal");
        let ok = TypeDesc::Union(vec![TypeDesc::Custom(ty.clone()), TypeDesc::Null]);
        assert!(build_type_node(&ok).is_ok());
        let bad = TypeDesc::Union(vec![TypeDesc::Custom(ty), TypeDesc::Int]);
        assert!(build_type_node(&bad).is_err());
    }

    #[test]
    fn test_deferred_struct_reference() {
        use crate::StructMeta;
        let handle = StructHandle::new();
        let desc = TypeDesc::Union(vec![
            TypeDesc::Deferred(handle.clone()),
            TypeDesc::Null,
        ]);
        // unresolved handles fail at node-build time
        assert!(build_type_node(&desc).is_err());
        let meta = StructMeta::builder("Tree")
            .field_default("children", desc.clone(), Value::Null)
            .build()
            .unwrap();
        handle.bind(&meta).unwrap();
        // once bound, the self-referential field schema builds
        let types = meta.field_types().unwrap();
        assert!(std::sync::Arc::ptr_eq(
            types[0].struct_ref().unwrap(),
            &meta,
        ));
        assert!(handle.bind(&meta).is_err());
    }

    #[test]
    fn test_generic_keeps_origin() {
        let origin = CustomType::new("Pair");
        let desc = TypeDesc::CustomGeneric {
            origin: origin.clone(),
            args: vec![TypeDesc::Int, TypeDesc::Str],
        };
        let node = build_type_node(&desc).unwrap();
        assert!(std::sync::Arc::ptr_eq(node.custom_ref().unwrap(), &origin));
    }
}
