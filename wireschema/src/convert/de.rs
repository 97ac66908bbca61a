use crate::{
    error::{Error, ErrorKind, Result},
    value::Value,
};
use serde::de::{
    DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess,
    IntoDeserializer, MapAccess, SeqAccess, VariantAccess, Visitor,
};
use serde::forward_to_deserialize_any;
use std::fmt::Display;
use std::vec;

impl serde::de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::new(ErrorKind::Decode, msg.to_string())
    }
}

/// Convert a [`Value`] into any `Deserialize` type.
pub fn from_value<T>(value: Value) -> Result<T>
where
    T: DeserializeOwned,
{
    T::deserialize(ValueDeserializer { value })
}

struct ValueDeserializer {
    value: Value,
}

impl<'de> IntoDeserializer<'de, Error> for ValueDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl<'de> Deserializer<'de> for ValueDeserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Int(n) => {
                if let Ok(small) = i64::try_from(n) {
                    visitor.visit_i64(small)
                } else if let Ok(big) = u64::try_from(n) {
                    visitor.visit_u64(big)
                } else {
                    visitor.visit_i128(n)
                }
            }
            Value::Float(f) => visitor.visit_f64(f),
            Value::Str(s) => visitor.visit_string(s),
            Value::Bytes(b) | Value::ByteArray(b) => visitor.visit_byte_buf(b),
            Value::DateTime(dt) => visitor.visit_string(dt.to_rfc3339()),
            Value::Ext(..) => Err(Error::new(
                ErrorKind::Decode,
                "ext values do not convert to typed data",
            )),
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                visitor.visit_seq(SeqDeserializer {
                    iter: items.into_iter(),
                })
            }
            Value::Dict(pairs) => visitor.visit_map(MapDeserializer {
                iter: pairs.into_iter(),
                pending: None,
            }),
            Value::Struct(inst) => {
                let (meta, slots) = inst.into_parts();
                let pairs = meta
                    .fields()
                    .iter()
                    .map(|f| Value::Str(f.name.clone()))
                    .zip(slots)
                    .collect::<Vec<_>>();
                visitor.visit_map(MapDeserializer {
                    iter: pairs.into_iter(),
                    pending: None,
                })
            }
            Value::Enum(e) => match e.kind() {
                crate::enum_meta::EnumKind::Str => {
                    visitor.visit_string(e.name().to_owned())
                }
                crate::enum_meta::EnumKind::Int => {
                    visitor.visit_i64(e.int_value())
                }
            },
            Value::Custom(cv) => Err(Error::new(
                ErrorKind::Decode,
                format!(
                    "custom value `{}` does not convert to typed data",
                    cv.custom_type().name(),
                ),
            )),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Value::Null => visitor.visit_none(),
            value => visitor.visit_some(ValueDeserializer { value }),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Value::Str(variant) => visitor.visit_enum(EnumDeserializer {
                variant,
                value: None,
            }),
            Value::Dict(mut pairs) if pairs.len() == 1 => {
                let (key, inner) = pairs.remove(0);
                let variant = match key {
                    Value::Str(s) => s,
                    other => {
                        return Err(Error::new(
                            ErrorKind::Decode,
                            format!(
                                "expected a string variant key, got {}",
                                other.kind_label(),
                            ),
                        ))
                    }
                };
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(inner),
                })
            }
            other => Err(Error::new(
                ErrorKind::Decode,
                format!("expected an enum shape, got {}", other.kind_label()),
            )),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

struct SeqDeserializer {
    iter: vec::IntoIter<Value>,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: DeserializeSeed<'de>,
    {
        self.iter
            .next()
            .map(|value| seed.deserialize(ValueDeserializer { value }))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: vec::IntoIter<(Value, Value)>,
    pending: Option<Value>,
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        match self.iter.next() {
            Some((key, value)) => {
                self.pending = Some(value);
                seed.deserialize(ValueDeserializer { value: key }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        let value = self
            .pending
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Decode, "value before key"))?;
        seed.deserialize(ValueDeserializer { value })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Value>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, VariantDeserializer)>
    where
        V: DeserializeSeed<'de>,
    {
        let variant = seed.deserialize(ValueDeserializer {
            value: Value::Str(self.variant),
        })?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Value>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        match self.value {
            None | Some(Value::Null) => Ok(()),
            Some(other) => Err(Error::new(
                ErrorKind::Decode,
                format!("expected a unit variant, got {}", other.kind_label()),
            )),
        }
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        let value = self.value.ok_or_else(|| {
            Error::new(ErrorKind::Decode, "expected a newtype variant payload")
        })?;
        seed.deserialize(ValueDeserializer { value })
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Some(value) => ValueDeserializer { value }.deserialize_any(visitor),
            None => Err(Error::new(
                ErrorKind::Decode,
                "expected a tuple variant payload",
            )),
        }
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Some(value) => ValueDeserializer { value }.deserialize_any(visitor),
            None => Err(Error::new(
                ErrorKind::Decode,
                "expected a struct variant payload",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::to_value;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Config {
        name: String,
        retries: u32,
        ratio: f64,
        tags: Vec<String>,
        parent: Option<Box<Config>>,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    enum Shape {
        Point,
        Circle(f64),
        Rect { w: f64, h: f64 },
    }

    #[test]
    fn test_struct_round_trip() {
        let config = Config {
            name: "root".to_owned(),
            retries: 3,
            ratio: 0.5,
            tags: vec!["a".to_owned(), "b".to_owned()],
            parent: None,
        };
        let value = to_value(&config).unwrap();
        match &value {
            Value::Dict(pairs) => assert_eq!(pairs.len(), 5),
            other => panic!("expected dict, got {:?}", other),
        }
        let back: Config = from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_enum_shapes() {
        for shape in [
            Shape::Point,
            Shape::Circle(2.0),
            Shape::Rect { w: 1.0, h: 2.0 },
        ] {
            let value = to_value(&shape).unwrap();
            let back: Shape = from_value(value).unwrap();
            assert_eq!(back, shape);
        }
    }

    #[test]
    fn test_map_and_ints() {
        let mut map = BTreeMap::new();
        map.insert(1u64, "one".to_owned());
        map.insert(u64::MAX, "max".to_owned());
        let value = to_value(&map).unwrap();
        let back: BTreeMap<u64, String> = from_value(value).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[&u64::MAX], "max");
    }

    #[test]
    fn test_value_through_codec() {
        let config = Config {
            name: "leaf".to_owned(),
            retries: 0,
            ratio: 1.0,
            tags: Vec::new(),
            parent: None,
        };
        let bytes = crate::msgpack::encode(&to_value(&config).unwrap()).unwrap();
        let back: Config =
            from_value(crate::msgpack::decode(&bytes).unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
