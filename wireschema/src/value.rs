//! Dynamic representation of data within the serialized data model,
//! analogous to `serde_json::Value`.
//!
//! `Dict` and `Set` are order-preserving vectors: wire order is significant
//! (a canonical decode/encode round trip must reproduce its input).
//! Duplicate handling uses structural equality: last write wins for dict
//! keys, set members coalesce.

use crate::{
    desc::CustomType,
    enum_meta::EnumValue,
    instance::StructInstance,
};
use chrono::{DateTime, FixedOffset};
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// Holds the full wire-representable range `[-2^63, 2^64)`.
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    DateTime(DateTime<FixedOffset>),
    /// MessagePack extension: type code and payload.
    Ext(i8, Vec<u8>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Struct(StructInstance),
    Enum(EnumValue),
    Custom(CustomValue),
}

impl Value {
    /// Short name of this value's shape, used in error messages.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::ByteArray(_) => "bytearray",
            Value::DateTime(_) => "datetime",
            Value::Ext(..) => "ext",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Enum(_) => "enum",
            Value::Custom(_) => "custom",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            &Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            &Value::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            &Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) | Value::ByteArray(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) | Value::Tuple(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructInstance> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }
}

/// Insert into a set vector, silently coalescing duplicates.
pub(crate) fn set_insert(set: &mut Vec<Value>, value: Value) {
    if !set.iter().any(|existing| *existing == value) {
        set.push(value);
    }
}

/// Insert into a dict vector; a repeated key overwrites in place (last
/// write wins, matching wire map semantics).
pub(crate) fn dict_insert(pairs: &mut Vec<(Value, Value)>, key: Value, value: Value) {
    match pairs.iter_mut().find(|(k, _)| *k == key) {
        Some((_, slot)) => *slot = value,
        None => pairs.push((key, value)),
    }
}

/// Rendering of a dict key for decode-error paths.
pub(crate) fn key_label(key: &Value) -> String {
    match key {
        Value::Str(s) => s.clone(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::DateTime(dt) => dt.to_rfc3339(),
        Value::Enum(e) => e.name().to_owned(),
        other => other.kind_label().to_owned(),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::ByteArray(a), Value::ByteArray(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Ext(ca, pa), Value::Ext(cb, pb)) => ca == cb && pa == pb,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            // set and dict equality ignore insertion order
            (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len()
                    && a.iter().all(|x| b.iter().any(|y| x == y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k == k2 && v == v2)
                    })
            }
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident($conv:expr),)*)=>{$(
        impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant($conv(v))
            }
        }
    )*};
}

value_from!(
    bool => Bool(|v| v),
    i8 => Int(i128::from),
    i16 => Int(i128::from),
    i32 => Int(i128::from),
    i64 => Int(i128::from),
    u8 => Int(i128::from),
    u16 => Int(i128::from),
    u32 => Int(i128::from),
    u64 => Int(i128::from),
    f32 => Float(f64::from),
    f64 => Float(|v| v),
    String => Str(|v| v),
    Vec<u8> => Bytes(|v| v),
    DateTime<FixedOffset> => DateTime(|v| v),
    StructInstance => Struct(|v| v),
    EnumValue => Enum(|v| v),
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// An instance of a [`CustomType`]: an opaque host payload the codecs only
/// touch through the caller's hooks.
#[derive(Clone)]
pub struct CustomValue {
    ty: Arc<CustomType>,
    data: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    pub fn new(ty: Arc<CustomType>, data: Arc<dyn Any + Send + Sync>) -> Self {
        CustomValue { ty, data }
    }

    pub fn custom_type(&self) -> &Arc<CustomType> {
        &self.ty
    }

    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref()
    }
}

impl PartialEq for CustomValue {
    // identity semantics; the engine cannot see inside the payload
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ty, &other.ty)
            && Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Debug for CustomValue {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "<{}>", self.ty.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_insert_coalesces() {
        let mut set = Vec::new();
        set_insert(&mut set, Value::Int(1));
        set_insert(&mut set, Value::Int(2));
        set_insert(&mut set, Value::Int(1));
        assert_eq!(set, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_dict_insert_last_wins() {
        let mut pairs = Vec::new();
        dict_insert(&mut pairs, Value::from("a"), Value::Int(1));
        dict_insert(&mut pairs, Value::from("b"), Value::Int(2));
        dict_insert(&mut pairs, Value::from("a"), Value::Int(3));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1, Value::Int(3));
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a = Value::Set(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::Set(vec![Value::Int(2), Value::Int(1)]);
        assert_eq!(a, b);
        let c = Value::Set(vec![Value::Int(1)]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nan_not_equal() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }
}
