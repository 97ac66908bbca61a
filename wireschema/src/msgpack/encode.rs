//! Type-dispatch MessagePack encoder.

use crate::{
    buf::{OutBuf, DEFAULT_WRITE_BUFFER, MIN_WRITE_BUFFER},
    enum_meta::EnumKind,
    error::{bail, ensure, error, Result},
    msgpack::format::*,
    value::Value,
    EncHook, RECURSE_LIMIT,
};
use chrono::{DateTime, FixedOffset};

/// Encodes [`Value`]s to MessagePack bytes.
pub struct Encoder {
    enc_hook: Option<EncHook>,
    write_buffer_size: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            enc_hook: None,
            write_buffer_size: DEFAULT_WRITE_BUFFER,
        }
    }

    /// Called for values the encoder cannot natively emit (custom types);
    /// the hook's return value is re-encoded.
    pub fn with_enc_hook(mut self, hook: EncHook) -> Self {
        self.enc_hook = Some(hook);
        self
    }

    /// Initial reservation for each encode call. Floored at 32.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(MIN_WRITE_BUFFER);
        self
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = OutBuf::new(&mut out, self.write_buffer_size);
        self.enc_value(&mut buf, value, 0)?;
        Ok(out)
    }

    /// Write into a caller-owned buffer starting at `offset`: `-1` appends,
    /// beyond-the-end offsets clamp to the end. On success the buffer's
    /// length covers exactly the written bytes; on error it is rolled back
    /// to the write offset.
    pub fn encode_into(
        &self,
        value: &Value,
        target: &mut Vec<u8>,
        offset: isize,
    ) -> Result<()> {
        let mut buf = OutBuf::at_offset(target, offset, self.write_buffer_size)?;
        if let Err(e) = self.enc_value(&mut buf, value, 0) {
            buf.rewind();
            return Err(e);
        }
        Ok(())
    }

    fn enc_value(&self, buf: &mut OutBuf, value: &Value, depth: usize) -> Result<()> {
        ensure!(
            depth < RECURSE_LIMIT,
            Encode,
            "maximum recursion depth exceeded",
        );
        match value {
            Value::Null => buf.push(NIL),
            &Value::Bool(b) => buf.push(if b { TRUE } else { FALSE }),
            &Value::Int(n) => write_int(buf, n)?,
            &Value::Float(f) => {
                buf.push(FLOAT64);
                buf.extend(&f.to_be_bytes());
            }
            Value::Str(s) => write_str(buf, s)?,
            Value::Bytes(b) | Value::ByteArray(b) => write_bin(buf, b)?,
            Value::DateTime(dt) => write_timestamp(buf, dt),
            Value::Ext(code, payload) => write_ext(buf, *code, payload)?,
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                write_array_header(buf, items.len())?;
                for item in items {
                    self.enc_value(buf, item, depth + 1)?;
                }
            }
            Value::Dict(pairs) => {
                write_map_header(buf, pairs.len())?;
                for (key, value) in pairs {
                    self.enc_value(buf, key, depth + 1)?;
                    self.enc_value(buf, value, depth + 1)?;
                }
            }
            Value::Struct(inst) => {
                if inst.meta().config().array_like {
                    write_array_header(buf, inst.slots().len())?;
                    for slot in inst.slots() {
                        self.enc_value(buf, slot, depth + 1)?;
                    }
                } else {
                    write_map_header(buf, inst.slots().len())?;
                    for (field, slot) in
                        inst.meta().fields().iter().zip(inst.slots())
                    {
                        write_str(buf, &field.name)?;
                        self.enc_value(buf, slot, depth + 1)?;
                    }
                }
            }
            Value::Enum(e) => match e.kind() {
                EnumKind::Int => write_int(buf, e.int_value() as i128)?,
                EnumKind::Str => write_str(buf, e.name())?,
            },
            Value::Custom(cv) => {
                let hook = self.enc_hook.as_ref().ok_or_else(|| {
                    error!(
                        Encode,
                        "cannot encode custom type `{}` (no enc_hook configured)",
                        cv.custom_type().name(),
                    )
                })?;
                let converted = hook(value)?;
                ensure!(
                    !matches!(converted, Value::Custom(_)),
                    Encode,
                    "enc_hook returned an unencodable value",
                );
                self.enc_value(buf, &converted, depth + 1)?;
            }
        }
        Ok(())
    }
}

/// Encode with a fresh default encoder.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    Encoder::new().encode(value)
}

/// Narrowest-width integer encoding; `[2^63, 2^64)` takes the unsigned
/// path.
fn write_int(buf: &mut OutBuf, n: i128) -> Result<()> {
    if n >= 0 {
        if n < 0x80 {
            buf.push(n as u8);
        } else if n <= 0xff {
            buf.push(UINT8);
            buf.push(n as u8);
        } else if n <= 0xffff {
            buf.push(UINT16);
            buf.extend(&(n as u16).to_be_bytes());
        } else if n <= 0xffff_ffff {
            buf.push(UINT32);
            buf.extend(&(n as u32).to_be_bytes());
        } else if n <= u64::MAX as i128 {
            buf.push(UINT64);
            buf.extend(&(n as u64).to_be_bytes());
        } else {
            bail!(Encode, "integer {} out of range", n);
        }
    } else if n >= -32 {
        buf.push((n as i8) as u8);
    } else if n >= i8::MIN as i128 {
        buf.push(INT8);
        buf.push((n as i8) as u8);
    } else if n >= i16::MIN as i128 {
        buf.push(INT16);
        buf.extend(&(n as i16).to_be_bytes());
    } else if n >= i32::MIN as i128 {
        buf.push(INT32);
        buf.extend(&(n as i32).to_be_bytes());
    } else if n >= i64::MIN as i128 {
        buf.push(INT64);
        buf.extend(&(n as i64).to_be_bytes());
    } else {
        bail!(Encode, "integer {} out of range", n);
    }
    Ok(())
}

fn write_str(buf: &mut OutBuf, s: &str) -> Result<()> {
    let len = s.len();
    if len < 32 {
        buf.push(0xa0 | len as u8);
    } else if len <= 0xff {
        buf.push(STR8);
        buf.push(len as u8);
    } else if len <= 0xffff {
        buf.push(STR16);
        buf.extend(&(len as u16).to_be_bytes());
    } else if len <= 0xffff_ffff {
        buf.push(STR32);
        buf.extend(&(len as u32).to_be_bytes());
    } else {
        bail!(Encode, "str of {} bytes exceeds the wire format limit", len);
    }
    buf.extend(s.as_bytes());
    Ok(())
}

fn write_bin(buf: &mut OutBuf, b: &[u8]) -> Result<()> {
    let len = b.len();
    if len <= 0xff {
        buf.push(BIN8);
        buf.push(len as u8);
    } else if len <= 0xffff {
        buf.push(BIN16);
        buf.extend(&(len as u16).to_be_bytes());
    } else if len <= 0xffff_ffff {
        buf.push(BIN32);
        buf.extend(&(len as u32).to_be_bytes());
    } else {
        bail!(Encode, "bytes of {} bytes exceeds the wire format limit", len);
    }
    buf.extend(b);
    Ok(())
}

fn write_array_header(buf: &mut OutBuf, len: usize) -> Result<()> {
    if len < 16 {
        buf.push(0x90 | len as u8);
    } else if len <= 0xffff {
        buf.push(ARRAY16);
        buf.extend(&(len as u16).to_be_bytes());
    } else if len <= 0xffff_ffff {
        buf.push(ARRAY32);
        buf.extend(&(len as u32).to_be_bytes());
    } else {
        bail!(Encode, "array of {} elements exceeds the wire format limit", len);
    }
    Ok(())
}

fn write_map_header(buf: &mut OutBuf, len: usize) -> Result<()> {
    if len < 16 {
        buf.push(0x80 | len as u8);
    } else if len <= 0xffff {
        buf.push(MAP16);
        buf.extend(&(len as u16).to_be_bytes());
    } else if len <= 0xffff_ffff {
        buf.push(MAP32);
        buf.extend(&(len as u32).to_be_bytes());
    } else {
        bail!(Encode, "map of {} entries exceeds the wire format limit", len);
    }
    Ok(())
}

fn write_ext(buf: &mut OutBuf, code: i8, payload: &[u8]) -> Result<()> {
    match payload.len() {
        1 => buf.push(FIXEXT1),
        2 => buf.push(FIXEXT2),
        4 => buf.push(FIXEXT4),
        8 => buf.push(FIXEXT8),
        16 => buf.push(FIXEXT16),
        len if len <= 0xff => {
            buf.push(EXT8);
            buf.push(len as u8);
        }
        len if len <= 0xffff => {
            buf.push(EXT16);
            buf.extend(&(len as u16).to_be_bytes());
        }
        len if len <= 0xffff_ffff => {
            buf.push(EXT32);
            buf.extend(&(len as u32).to_be_bytes());
        }
        len => bail!(Encode, "ext of {} bytes exceeds the wire format limit", len),
    }
    buf.push(code as u8);
    buf.extend(payload);
    Ok(())
}

/// Timestamp extension, in the smallest of the 32/64/96 layouts that fits.
fn write_timestamp(buf: &mut OutBuf, dt: &DateTime<FixedOffset>) {
    let mut secs = dt.timestamp();
    let mut nanos = dt.timestamp_subsec_nanos();
    // chrono folds leap seconds into the subsecond field
    secs += (nanos / 1_000_000_000) as i64;
    nanos %= 1_000_000_000;

    if secs >= 0 && secs < (1 << 34) {
        let packed = ((nanos as u64) << 34) | (secs as u64);
        if packed & 0xffff_ffff_0000_0000 == 0 {
            buf.push(FIXEXT4);
            buf.push(TIMESTAMP_EXT as u8);
            buf.extend(&(secs as u32).to_be_bytes());
        } else {
            buf.push(FIXEXT8);
            buf.push(TIMESTAMP_EXT as u8);
            buf.extend(&packed.to_be_bytes());
        }
    } else {
        buf.push(EXT8);
        buf.push(12);
        buf.push(TIMESTAMP_EXT as u8);
        buf.extend(&nanos.to_be_bytes());
        buf.extend(&secs.to_be_bytes());
    }
}
