use crate::{
    error::{Error, ErrorKind, Result},
    value::Value,
};
use serde::ser::{
    Serialize, SerializeMap, SerializeSeq, SerializeStruct,
    SerializeStructVariant, SerializeTuple, SerializeTupleStruct,
    SerializeTupleVariant, Serializer,
};
use std::fmt::Display;

impl serde::ser::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::new(ErrorKind::Encode, msg.to_string())
    }
}

/// Convert any `Serialize` type into a [`Value`].
pub fn to_value<T>(value: &T) -> Result<Value>
where
    T: Serialize + ?Sized,
{
    value.serialize(ValueSerializer)
}

struct ValueSerializer;

fn int_value(n: i128) -> Result<Value> {
    if n >= i64::MIN as i128 && n <= u64::MAX as i128 {
        Ok(Value::Int(n))
    } else {
        Err(Error::new(
            ErrorKind::Encode,
            format!("integer {} out of range", n),
        ))
    }
}

macro_rules! leaf_methods {
    ($(
        $serialize:ident($type:ty), $build:expr;
    )*)=>{$(
        fn $serialize(self, v: $type) -> Result<Value> {
            $build(v)
        }
    )*};
}

impl Serializer for ValueSerializer {
    type Ok = Value;
    type Error = Error;
    type SerializeSeq = SeqSerializer;
    type SerializeTuple = SeqSerializer;
    type SerializeTupleStruct = SeqSerializer;
    type SerializeTupleVariant = VariantSeqSerializer;
    type SerializeMap = MapSerializer;
    type SerializeStruct = StructSerializer;
    type SerializeStructVariant = VariantStructSerializer;

    leaf_methods!(
        serialize_bool(bool), |v| Ok(Value::Bool(v));
        serialize_i8(i8), |v| Ok(Value::Int(v as i128));
        serialize_i16(i16), |v| Ok(Value::Int(v as i128));
        serialize_i32(i32), |v| Ok(Value::Int(v as i128));
        serialize_i64(i64), |v| Ok(Value::Int(v as i128));
        serialize_i128(i128), int_value;
        serialize_u8(u8), |v| Ok(Value::Int(v as i128));
        serialize_u16(u16), |v| Ok(Value::Int(v as i128));
        serialize_u32(u32), |v| Ok(Value::Int(v as i128));
        serialize_u64(u64), |v| Ok(Value::Int(v as i128));
        serialize_u128(u128), |v: u128| {
            if v <= u64::MAX as u128 {
                Ok(Value::Int(v as i128))
            } else {
                Err(Error::new(
                    ErrorKind::Encode,
                    format!("integer {} out of range", v),
                ))
            }
        };
        serialize_f32(f32), |v| Ok(Value::Float(v as f64));
        serialize_f64(f64), |v| Ok(Value::Float(v));
        serialize_char(char), |v: char| Ok(Value::Str(v.to_string()));
        serialize_str(&str), |v: &str| Ok(Value::Str(v.to_owned()));
        serialize_bytes(&[u8]), |v: &[u8]| Ok(Value::Bytes(v.to_vec()));
    );

    fn serialize_none(self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T>(self, value: &T) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value> {
        Ok(Value::Str(variant.to_owned()))
    }

    fn serialize_newtype_struct<T>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        let inner = value.serialize(ValueSerializer)?;
        Ok(Value::Dict(vec![(Value::Str(variant.to_owned()), inner)]))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqSerializer> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len.unwrap_or(0)),
            tuple: false,
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqSerializer> {
        Ok(SeqSerializer {
            items: Vec::with_capacity(len),
            tuple: true,
        })
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqSerializer> {
        self.serialize_tuple(len)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqSerializer> {
        Ok(VariantSeqSerializer {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapSerializer> {
        Ok(MapSerializer {
            pairs: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<StructSerializer> {
        Ok(StructSerializer {
            pairs: Vec::with_capacity(len),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantStructSerializer> {
        Ok(VariantStructSerializer {
            variant,
            pairs: Vec::with_capacity(len),
        })
    }
}

struct SeqSerializer {
    items: Vec<Value>,
    tuple: bool,
}

impl SerializeSeq for SeqSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(if self.tuple {
            Value::Tuple(self.items)
        } else {
            Value::List(self.items)
        })
    }
}

impl SerializeTuple for SeqSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value> {
        SerializeSeq::end(self)
    }
}

impl SerializeTupleStruct for SeqSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value> {
        SerializeSeq::end(self)
    }
}

struct VariantSeqSerializer {
    variant: &'static str,
    items: Vec<Value>,
}

impl SerializeTupleVariant for VariantSeqSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(vec![(
            Value::Str(self.variant.to_owned()),
            Value::Tuple(self.items),
        )]))
    }
}

struct MapSerializer {
    pairs: Vec<(Value, Value)>,
    pending_key: Option<Value>,
}

impl SerializeMap for MapSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.pending_key = Some(key.serialize(ValueSerializer)?);
        Ok(())
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Encode, "value before key"))?;
        self.pairs.push((key, value.serialize(ValueSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(self.pairs))
    }
}

struct StructSerializer {
    pairs: Vec<(Value, Value)>,
}

impl SerializeStruct for StructSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.pairs.push((
            Value::Str(key.to_owned()),
            value.serialize(ValueSerializer)?,
        ));
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(self.pairs))
    }
}

struct VariantStructSerializer {
    variant: &'static str,
    pairs: Vec<(Value, Value)>,
}

impl SerializeStructVariant for VariantStructSerializer {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.pairs.push((
            Value::Str(key.to_owned()),
            value.serialize(ValueSerializer)?,
        ));
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::Dict(vec![(
            Value::Str(self.variant.to_owned()),
            Value::Dict(self.pairs),
        )]))
    }
}
