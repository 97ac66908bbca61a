//! Single-pass, type-directed MessagePack decoder. Every byte read is
//! simultaneously parsed and checked against the schema.

use crate::{
    desc::verify_custom,
    error::{bail, ensure, error, Error, Result},
    freelist,
    instance::{materialize_default, run_post_init, StructInstance},
    msgpack::format::*,
    schema::{TypeNode, TypeTags},
    struct_meta::StructMeta,
    value::{dict_insert, key_label, set_insert, Value},
    DecHook, ExtHook, RECURSE_LIMIT,
};
use chrono::{FixedOffset, TimeZone, Utc};
use smallvec::{smallvec, SmallVec};
use std::{mem::size_of, sync::Arc};

/// Decodes MessagePack bytes into [`Value`]s conforming to a schema.
pub struct Decoder {
    schema: TypeNode,
    dec_hook: Option<DecHook>,
    ext_hook: Option<ExtHook>,
    tz: Option<FixedOffset>,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new(TypeNode::any())
    }
}

impl Decoder {
    pub fn new(schema: TypeNode) -> Self {
        Decoder {
            schema,
            dec_hook: None,
            ext_hook: None,
            tz: None,
        }
    }

    /// Called for custom-type schema positions with the decoded-as-`any`
    /// value.
    pub fn with_dec_hook(mut self, hook: DecHook) -> Self {
        self.dec_hook = Some(hook);
        self
    }

    /// Called for non-timestamp extensions under `any`/`ext` schemas.
    pub fn with_ext_hook(mut self, hook: ExtHook) -> Self {
        self.ext_hook = Some(hook);
        self
    }

    /// Timezone attached to decoded timestamps. Defaults to UTC.
    pub fn with_timezone(mut self, tz: FixedOffset) -> Self {
        self.tz = Some(tz);
        self
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut ctx = Ctx {
            input: bytes,
            pos: 0,
            dec_hook: self.dec_hook.as_ref(),
            ext_hook: self.ext_hook.as_ref(),
            tz: self.tz,
        };
        let value = ctx
            .decode_node(&self.schema, 0)
            .map_err(|e| e.with_root(self.schema.root_label()))?;
        ensure!(
            ctx.pos == bytes.len(),
            Decode,
            "trailing bytes ({} past message end)",
            bytes.len() - ctx.pos,
        );
        Ok(value)
    }
}

/// Decode with the `any` schema and no hooks.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    Decoder::default().decode(bytes)
}

struct Ctx<'a, 'h> {
    input: &'a [u8],
    pos: usize,
    dec_hook: Option<&'h DecHook>,
    ext_hook: Option<&'h ExtHook>,
    tz: Option<FixedOffset>,
}

fn type_err(node: &TypeNode, got: &str) -> Error {
    error!(Validation, "expected {}, got {}", node, got)
}

macro_rules! read_be {
    ($($m:ident($t:ty),)*)=>{$(
        fn $m(&mut self) -> Result<$t> {
            let bytes = self.take(size_of::<$t>())?;
            Ok(<$t>::from_be_bytes(bytes.try_into().unwrap()))
        }
    )*};
}

impl<'a, 'h> Ctx<'a, 'h> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            n <= self.input.len() - self.pos,
            Decode,
            "truncated message",
        );
        let bytes = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    read_be!(
        read_u8(u8),
        read_u16(u16),
        read_u32(u32),
        read_u64(u64),
        read_i8(i8),
        read_i16(i16),
        read_i32(i32),
        read_i64(i64),
    );

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn decode_node(&mut self, node: &TypeNode, depth: usize) -> Result<Value> {
        ensure!(
            depth < RECURSE_LIMIT,
            Decode,
            "maximum recursion depth exceeded",
        );

        if node.tags().intersects(TypeTags::CUSTOM_KINDS) {
            if node.tags().contains(TypeTags::NONE)
                && self.peek_byte() == Some(NIL)
            {
                self.pos += 1;
                return Ok(Value::Null);
            }
            let any = TypeNode::any();
            let generic = self.decode_node(&any, depth + 1)?;
            return self.finish_custom(node, generic);
        }

        let op = self.take_byte()?;
        match op {
            0x00..=0x7f => self.int_value(op as i128, node),
            0xe0..=0xff => self.int_value((op as i8) as i128, node),
            0x80..=0x8f => self.map_value((op & 0x0f) as usize, node, depth),
            0x90..=0x9f => self.array_value((op & 0x0f) as usize, node, depth),
            0xa0..=0xbf => self.str_value((op & 0x1f) as usize, node),
            NIL => {
                if node.admits(TypeTags::NONE) {
                    Ok(Value::Null)
                } else {
                    Err(type_err(node, "nil"))
                }
            }
            NEVER_USED => bail!(Decode, "invalid opcode 0xc1"),
            FALSE | TRUE => {
                if node.admits(TypeTags::BOOL) {
                    Ok(Value::Bool(op == TRUE))
                } else {
                    Err(type_err(node, "bool"))
                }
            }
            BIN8 => {
                let len = self.read_u8()? as usize;
                self.bin_value(len, node)
            }
            BIN16 => {
                let len = self.read_u16()? as usize;
                self.bin_value(len, node)
            }
            BIN32 => {
                let len = self.read_u32()? as usize;
                self.bin_value(len, node)
            }
            FLOAT32 => {
                let f = self.read_f32()?;
                self.float_value(f as f64, node)
            }
            FLOAT64 => {
                let f = self.read_f64()?;
                self.float_value(f, node)
            }
            UINT8 => {
                let n = self.read_u8()?;
                self.int_value(n as i128, node)
            }
            UINT16 => {
                let n = self.read_u16()?;
                self.int_value(n as i128, node)
            }
            UINT32 => {
                let n = self.read_u32()?;
                self.int_value(n as i128, node)
            }
            UINT64 => {
                let n = self.read_u64()?;
                self.int_value(n as i128, node)
            }
            INT8 => {
                let n = self.read_i8()?;
                self.int_value(n as i128, node)
            }
            INT16 => {
                let n = self.read_i16()?;
                self.int_value(n as i128, node)
            }
            INT32 => {
                let n = self.read_i32()?;
                self.int_value(n as i128, node)
            }
            INT64 => {
                let n = self.read_i64()?;
                self.int_value(n as i128, node)
            }
            FIXEXT1 => self.ext_value(1, node),
            FIXEXT2 => self.ext_value(2, node),
            FIXEXT4 => self.ext_value(4, node),
            FIXEXT8 => self.ext_value(8, node),
            FIXEXT16 => self.ext_value(16, node),
            EXT8 => {
                let len = self.read_u8()? as usize;
                self.ext_value(len, node)
            }
            EXT16 => {
                let len = self.read_u16()? as usize;
                self.ext_value(len, node)
            }
            EXT32 => {
                let len = self.read_u32()? as usize;
                self.ext_value(len, node)
            }
            STR8 => {
                let len = self.read_u8()? as usize;
                self.str_value(len, node)
            }
            STR16 => {
                let len = self.read_u16()? as usize;
                self.str_value(len, node)
            }
            STR32 => {
                let len = self.read_u32()? as usize;
                self.str_value(len, node)
            }
            ARRAY16 => {
                let len = self.read_u16()? as usize;
                self.array_value(len, node, depth)
            }
            ARRAY32 => {
                let len = self.read_u32()? as usize;
                self.array_value(len, node, depth)
            }
            MAP16 => {
                let len = self.read_u16()? as usize;
                self.map_value(len, node, depth)
            }
            MAP32 => {
                let len = self.read_u32()? as usize;
                self.map_value(len, node, depth)
            }
        }
    }

    fn finish_custom(&mut self, node: &TypeNode, generic: Value) -> Result<Value> {
        let Some(target) = node.custom_ref() else {
            unreachable!("custom tag without custom ref");
        };
        let converted = match self.dec_hook {
            Some(hook) => hook(target, generic).map_err(|e| {
                if e.is_validation_error() {
                    e
                } else {
                    error!(Validation, "{}", e.message())
                }
            })?,
            None => generic,
        };
        verify_custom(target, converted)
    }

    fn int_value(&self, n: i128, node: &TypeNode) -> Result<Value> {
        if node.is_any() || node.tags().contains(TypeTags::INT) {
            return Ok(Value::Int(n));
        }
        if let Some(enum_ref) = node.int_enum_ref() {
            return i64::try_from(n)
                .ok()
                .and_then(|v| enum_ref.member_by_value(v))
                .map(Value::Enum)
                .ok_or_else(|| {
                    error!(
                        Validation,
                        "invalid value {} for enum '{}'",
                        n,
                        enum_ref.name(),
                    )
                });
        }
        if node.tags().contains(TypeTags::FLOAT) {
            // int wire values widen when only a float is admissible
            return Ok(Value::Float(n as f64));
        }
        Err(type_err(node, "int"))
    }

    fn float_value(&self, f: f64, node: &TypeNode) -> Result<Value> {
        if node.admits(TypeTags::FLOAT) {
            Ok(Value::Float(f))
        } else {
            Err(type_err(node, "float"))
        }
    }

    fn str_value(&mut self, len: usize, node: &TypeNode) -> Result<Value> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(Error::from)?;
        if node.admits(TypeTags::STR) {
            return Ok(Value::Str(s.to_owned()));
        }
        if let Some(enum_ref) = node.str_enum_ref() {
            return enum_ref.member_by_name(s).map(Value::Enum).ok_or_else(|| {
                error!(
                    Validation,
                    "invalid value {:?} for enum '{}'",
                    s,
                    enum_ref.name(),
                )
            });
        }
        Err(type_err(node, "str"))
    }

    fn bin_value(&mut self, len: usize, node: &TypeNode) -> Result<Value> {
        let bytes = self.take(len)?;
        if node.is_any() || node.tags().contains(TypeTags::BYTES) {
            Ok(Value::Bytes(bytes.to_vec()))
        } else if node.tags().contains(TypeTags::BYTEARRAY) {
            Ok(Value::ByteArray(bytes.to_vec()))
        } else {
            Err(type_err(node, "bin"))
        }
    }

    fn array_value(
        &mut self,
        len: usize,
        node: &TypeNode,
        depth: usize,
    ) -> Result<Value> {
        if let Some(elems) = node.tuple_elems() {
            ensure!(
                len == elems.len(),
                Validation,
                "expected array of length {}, got {}",
                elems.len(),
                len,
            );
            let mut items = Vec::with_capacity(len);
            for (i, elem) in elems.iter().enumerate() {
                items.push(
                    self.decode_node(elem, depth + 1)
                        .map_err(|e| e.at_index(i))?,
                );
            }
            return Ok(Value::Tuple(items));
        }
        if let Some(meta) = node.struct_ref() {
            if meta.config().array_like {
                let meta = meta.clone();
                return self.struct_from_array(&meta, len, depth);
            }
        }
        let any;
        let elem = match node.array_elem() {
            Some(elem) => elem,
            None if node.is_any() => {
                any = TypeNode::any();
                &any
            }
            None => return Err(type_err(node, "array")),
        };
        if node.tags().contains(TypeTags::SET) {
            let mut items = Vec::with_capacity(len.min(1024));
            for i in 0..len {
                let value = self
                    .decode_node(elem, depth + 1)
                    .map_err(|e| e.at_index(i))?;
                set_insert(&mut items, value);
            }
            return Ok(Value::Set(items));
        }
        let mut items = Vec::with_capacity(len.min(1024));
        for i in 0..len {
            items.push(
                self.decode_node(elem, depth + 1)
                    .map_err(|e| e.at_index(i))?,
            );
        }
        if node.tags().contains(TypeTags::VAR_TUPLE) {
            Ok(Value::Tuple(items))
        } else {
            Ok(Value::List(items))
        }
    }

    fn map_value(
        &mut self,
        len: usize,
        node: &TypeNode,
        depth: usize,
    ) -> Result<Value> {
        if let Some(meta) = node.struct_ref() {
            if !meta.config().array_like {
                let meta = meta.clone();
                return self.struct_from_map(&meta, len, depth);
            }
        }
        let (any_key, any_value);
        let (key_node, value_node) = match node.dict_children() {
            Some(children) => children,
            None if node.is_any() => {
                any_key = TypeNode::any();
                any_value = TypeNode::any();
                (&any_key, &any_value)
            }
            None => return Err(type_err(node, "map")),
        };
        let mut pairs = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = self.decode_node(key_node, depth + 1)?;
            let value = self
                .decode_node(value_node, depth + 1)
                .map_err(|e| e.at_key(key_label(&key)))?;
            dict_insert(&mut pairs, key, value);
        }
        Ok(Value::Dict(pairs))
    }

    /// Read a struct field key; only str opcodes are accepted here.
    fn read_str_key(&mut self, meta: &StructMeta) -> Result<&'a str> {
        let op = self.take_byte()?;
        let len = match op {
            0xa0..=0xbf => (op & 0x1f) as usize,
            STR8 => self.read_u8()? as usize,
            STR16 => self.read_u16()? as usize,
            STR32 => self.read_u32()? as usize,
            _ => bail!(
                Validation,
                "expected str field key for struct '{}', got {}",
                meta.name(),
                family(op),
            ),
        };
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(Error::from)
    }

    fn struct_from_map(
        &mut self,
        meta: &Arc<StructMeta>,
        n_entries: usize,
        depth: usize,
    ) -> Result<Value> {
        let types = meta.field_types()?;
        let n = meta.n_fields();
        let mut slots = freelist::acquire(n);
        slots.resize(n, Value::Null);
        let mut seen: SmallVec<[bool; 32]> = smallvec![false; n];
        let mut hint = 0usize;
        for _ in 0..n_entries {
            let key = self.read_str_key(meta)?;
            match meta.field_index_hint(key, &mut hint) {
                Some(i) => {
                    // a repeated key overwrites: last write wins
                    slots[i] = self
                        .decode_node(&types[i], depth + 1)
                        .map_err(|e| e.at_field(&meta.fields()[i].name))?;
                    seen[i] = true;
                }
                None => self.skip_value()?,
            }
        }
        for (i, field) in meta.fields().iter().enumerate() {
            if seen[i] {
                continue;
            }
            match &field.default {
                Some(default) => slots[i] = materialize_default(default),
                None => bail!(
                    Validation,
                    "missing required field `{}`",
                    field.name,
                ),
            }
        }
        let instance = StructInstance::from_raw(meta.clone(), slots);
        run_post_init(&instance)?;
        Ok(Value::Struct(instance))
    }

    fn struct_from_array(
        &mut self,
        meta: &Arc<StructMeta>,
        len: usize,
        depth: usize,
    ) -> Result<Value> {
        let types = meta.field_types()?;
        let n = meta.n_fields();
        let mut slots = freelist::acquire(n);
        for i in 0..n.min(len) {
            slots.push(
                self.decode_node(&types[i], depth + 1)
                    .map_err(|e| e.at_index(i))?,
            );
        }
        for field in &meta.fields()[n.min(len)..] {
            match &field.default {
                Some(default) => slots.push(materialize_default(default)),
                None => bail!(
                    Validation,
                    "missing required field `{}`",
                    field.name,
                ),
            }
        }
        // surplus elements are skipped
        for _ in n..len {
            self.skip_value()?;
        }
        let instance = StructInstance::from_raw(meta.clone(), slots);
        run_post_init(&instance)?;
        Ok(Value::Struct(instance))
    }

    fn ext_value(&mut self, len: usize, node: &TypeNode) -> Result<Value> {
        let code = self.read_i8()?;
        let payload = self.take(len)?;
        if code == TIMESTAMP_EXT && node.admits(TypeTags::DATETIME) {
            return self.timestamp_value(payload);
        }
        if node.admits(TypeTags::EXT) {
            if code != TIMESTAMP_EXT {
                if let Some(hook) = self.ext_hook {
                    return hook(code, payload);
                }
            }
            return Ok(Value::Ext(code, payload.to_vec()));
        }
        Err(type_err(node, "ext"))
    }

    fn timestamp_value(&self, payload: &[u8]) -> Result<Value> {
        let (secs, nanos): (i64, u32) = match payload.len() {
            4 => (u32::from_be_bytes(payload.try_into().unwrap()) as i64, 0),
            8 => {
                let packed = u64::from_be_bytes(payload.try_into().unwrap());
                ((packed & ((1 << 34) - 1)) as i64, (packed >> 34) as u32)
            }
            12 => (
                i64::from_be_bytes(payload[4..12].try_into().unwrap()),
                u32::from_be_bytes(payload[..4].try_into().unwrap()),
            ),
            n => bail!(Decode, "invalid timestamp payload length {}", n),
        };
        ensure!(
            nanos < 1_000_000_000,
            Decode,
            "invalid timestamp nanoseconds {}",
            nanos,
        );
        let utc = Utc
            .timestamp_opt(secs, nanos)
            .single()
            .ok_or_else(|| error!(Decode, "timestamp out of range"))?;
        Ok(Value::DateTime(match self.tz {
            Some(tz) => utc.with_timezone(&tz),
            None => utc.fixed_offset(),
        }))
    }

    /// Consume exactly one value of any shape without materialising it.
    fn skip_value(&mut self) -> Result<()> {
        let mut remaining: u64 = 1;
        while remaining > 0 {
            remaining -= 1;
            let op = self.take_byte()?;
            match op {
                0x00..=0x7f | 0xe0..=0xff | NIL | FALSE | TRUE => {}
                0x80..=0x8f => {
                    remaining =
                        remaining.saturating_add(2 * (op & 0x0f) as u64);
                }
                0x90..=0x9f => {
                    remaining = remaining.saturating_add((op & 0x0f) as u64);
                }
                0xa0..=0xbf => {
                    self.take((op & 0x1f) as usize)?;
                }
                UINT8 | INT8 => {
                    self.take(1)?;
                }
                UINT16 | INT16 => {
                    self.take(2)?;
                }
                UINT32 | INT32 | FLOAT32 => {
                    self.take(4)?;
                }
                UINT64 | INT64 | FLOAT64 => {
                    self.take(8)?;
                }
                STR8 | BIN8 => {
                    let len = self.read_u8()? as usize;
                    self.take(len)?;
                }
                STR16 | BIN16 => {
                    let len = self.read_u16()? as usize;
                    self.take(len)?;
                }
                STR32 | BIN32 => {
                    let len = self.read_u32()? as usize;
                    self.take(len)?;
                }
                ARRAY16 => {
                    let len = self.read_u16()?;
                    remaining = remaining.saturating_add(len as u64);
                }
                ARRAY32 => {
                    let len = self.read_u32()?;
                    remaining = remaining.saturating_add(len as u64);
                }
                MAP16 => {
                    let len = self.read_u16()?;
                    remaining = remaining.saturating_add(2 * len as u64);
                }
                MAP32 => {
                    let len = self.read_u32()?;
                    remaining = remaining.saturating_add(2 * len as u64);
                }
                FIXEXT1 => {
                    self.take(2)?;
                }
                FIXEXT2 => {
                    self.take(3)?;
                }
                FIXEXT4 => {
                    self.take(5)?;
                }
                FIXEXT8 => {
                    self.take(9)?;
                }
                FIXEXT16 => {
                    self.take(17)?;
                }
                EXT8 => {
                    let len = self.read_u8()? as usize;
                    self.take(len + 1)?;
                }
                EXT16 => {
                    let len = self.read_u16()? as usize;
                    self.take(len + 1)?;
                }
                EXT32 => {
                    let len = self.read_u32()? as usize;
                    self.take(len + 1)?;
                }
                NEVER_USED => bail!(Decode, "invalid opcode 0xc1"),
            }
        }
        Ok(())
    }
}
