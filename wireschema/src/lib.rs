//! This serialization engine is designed around the idea that a _schema_,
//! a description of which value shapes are permitted at each position, is
//! a runtime data structure, and that validating input against it should
//! not be a separate pass: the decoders read the wire bytes exactly once,
//! and every byte consumed is simultaneously parsed and checked against
//! the schema. The result is either a fully-typed [`Value`] or an error
//! naming the offending location (`Error decoding User.groups[0]:
//! expected str, got int`).
//!
//! Two wire formats share the one schema model: MessagePack (2017
//! revision, including the Timestamp extension) in [`msgpack`], and JSON
//! (RFC 8259) in [`json`].
//!
//! Typical usage pattern:
//!
//! - describe the expected type with a [`TypeDesc`] (the [`typedesc!`]
//!   macro is sugar for this), registering record types via
//!   [`StructMeta::builder`] and enumerations via [`EnumMeta`]
//! - build the schema once with [`build_type_node`]
//! - construct a `Decoder` from the schema (and optional hooks) and feed
//!   it byte slices; construct an `Encoder` and feed it values
//! - for typed Rust data, bridge through [`convert::to_value`] /
//!   [`convert::from_value`]
//!
//! The data model supports:
//!
//! - null, bool, integers in `[-2^63, 2^64)`, 64-bit floats
//! - utf8 strings, byte strings and byte arrays
//! - datetimes (MessagePack Timestamp / RFC 3339 strings)
//! - MessagePack extensions
//! - lists, sets, fixed- and variable-length tuples, dicts
//! - record types ("structs") with named fields, defaults, inheritance,
//!   and per-type configuration (immutability, array-form encoding)
//! - int- and str-valued enumerations
//! - custom types routed through caller-supplied hooks
//!
//! Unions of these are expressed as multiple tags on one [`TypeNode`];
//! the combinations that would make decoding ambiguous are rejected at
//! schema-build time, never discovered at decode time.

pub mod convert;
pub mod error;
pub mod json;
pub mod msgpack;
pub mod value;

mod buf;
mod desc;
mod enum_meta;
mod freelist;
mod instance;
mod schema;
mod struct_meta;

pub use crate::{
    desc::{build_type_node, CustomType, StructHandle, TypeDesc},
    enum_meta::{EnumKind, EnumMember, EnumMeta, EnumValue},
    error::{Error, ErrorKind, PathSeg, Result},
    freelist::shrink_freelist,
    instance::StructInstance,
    schema::{TypeNode, TypeTags},
    struct_meta::{FieldDef, PostInitFn, StructBuilder, StructConfig, StructMeta},
    value::{CustomValue, Value},
};

use std::sync::Arc;

/// Invoked by an encoder for a value it cannot natively emit; the returned
/// value is encoded in its place.
pub type EncHook = Box<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Invoked by a decoder at a custom-type schema position with the
/// decoded-as-`any` value; must return an instance of the expected custom
/// type.
pub type DecHook =
    Box<dyn Fn(&Arc<CustomType>, Value) -> Result<Value> + Send + Sync>;

/// Invoked by the MessagePack decoder for non-timestamp extensions under
/// `any`/`ext` schemas. The payload borrow does not outlive the call.
pub type ExtHook = Box<dyn Fn(i8, &[u8]) -> Result<Value> + Send + Sync>;

/// Bound on schema/value nesting in both codecs.
pub(crate) const RECURSE_LIMIT: usize = 1024;
