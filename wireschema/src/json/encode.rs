//! Type-dispatch JSON encoder (RFC 8259).

use crate::{
    buf::{OutBuf, DEFAULT_WRITE_BUFFER, MIN_WRITE_BUFFER},
    enum_meta::EnumKind,
    error::{bail, ensure, error, Result},
    value::Value,
    EncHook, RECURSE_LIMIT,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::SecondsFormat;

// Per-byte escape dispatch: 0 = emit verbatim, b'u' = \u00XX, anything
// else is the short-escape letter.
static ESCAPE: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 0x20 {
        table[i] = b'u';
        i += 1;
    }
    table[0x08] = b'b';
    table[0x09] = b't';
    table[0x0a] = b'n';
    table[0x0c] = b'f';
    table[0x0d] = b'r';
    table[b'"' as usize] = b'"';
    table[b'\\' as usize] = b'\\';
    table
};

/// Encodes [`Value`]s to JSON bytes.
pub struct Encoder {
    enc_hook: Option<EncHook>,
    write_buffer_size: usize,
    big_int: bool,
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
            big_int: false,
        }
    }

    pub fn with_enc_hook(mut self, hook: EncHook) -> Self {
        self.enc_hook = Some(hook);
        self
    }

    /// Initial reservation for each encode call. Floored at 32.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(MIN_WRITE_BUFFER);
        self
    }

    /// Permit integers outside the signed 64-bit range (up to the full
    /// `[-2^63, 2^64)` value domain). Off by default: out-of-range
    /// integers fail to encode.
    pub fn big_int(mut self, enabled: bool) -> Self {
        self.big_int = enabled;
        self
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = OutBuf::new(&mut out, self.write_buffer_size);
        self.enc_value(&mut buf, value, 0)?;
        Ok(out)
    }

    /// Write into a caller-owned buffer starting at `offset`; same offset
    /// semantics as the MessagePack encoder.
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
            Value::Null => buf.extend(b"null"),
            Value::Bool(true) => buf.extend(b"true"),
            Value::Bool(false) => buf.extend(b"false"),
            &Value::Int(n) => self.write_int(buf, n)?,
            &Value::Float(f) => write_float(buf, f)?,
            Value::Str(s) => write_json_str(buf, s),
            Value::Bytes(b) | Value::ByteArray(b) => {
                buf.push(b'"');
                buf.extend(BASE64.encode(b).as_bytes());
                buf.push(b'"');
            }
            Value::DateTime(dt) => {
                buf.push(b'"');
                buf.extend(
                    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true).as_bytes(),
                );
                buf.push(b'"');
            }
            Value::Ext(..) => {
                bail!(Encode, "extension values are not representable in JSON")
            }
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                buf.push(b'[');
                for item in items {
                    self.enc_value(buf, item, depth + 1)?;
                    buf.push(b',');
                }
                close_container(buf, b']');
            }
            Value::Dict(pairs) => {
                buf.push(b'{');
                for (key, value) in pairs {
                    self.write_key(buf, key)?;
                    buf.push(b':');
                    self.enc_value(buf, value, depth + 1)?;
                    buf.push(b',');
                }
                close_container(buf, b'}');
            }
            // records are always objects in JSON; array_like applies to
            // MessagePack only
            Value::Struct(inst) => {
                buf.push(b'{');
                for (field, slot) in
                    inst.meta().fields().iter().zip(inst.slots())
                {
                    write_json_str(buf, &field.name);
                    buf.push(b':');
                    self.enc_value(buf, slot, depth + 1)?;
                    buf.push(b',');
                }
                close_container(buf, b'}');
            }
            Value::Enum(e) => match e.kind() {
                EnumKind::Int => {
                    let mut digits = itoa::Buffer::new();
                    buf.extend(digits.format(e.int_value()).as_bytes());
                }
                EnumKind::Str => write_json_str(buf, e.name()),
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

    fn write_int(&self, buf: &mut OutBuf, n: i128) -> Result<()> {
        if !self.big_int {
            ensure!(
                n >= i64::MIN as i128 && n <= i64::MAX as i128,
                Encode,
                "integer {} exceeds the signed 64-bit range (enable big_int)",
                n,
            );
        }
        ensure!(
            n >= i64::MIN as i128 && n <= u64::MAX as i128,
            Encode,
            "integer {} out of range",
            n,
        );
        let mut digits = itoa::Buffer::new();
        buf.extend(digits.format(n).as_bytes());
        Ok(())
    }

    /// Object keys must be strings or string-convertible.
    fn write_key(&self, buf: &mut OutBuf, key: &Value) -> Result<()> {
        match key {
            Value::Str(s) => write_json_str(buf, s),
            &Value::Int(n) => {
                buf.push(b'"');
                self.write_int(buf, n)?;
                buf.push(b'"');
            }
            &Value::Float(f) => {
                buf.push(b'"');
                write_float(buf, f)?;
                buf.push(b'"');
            }
            Value::DateTime(dt) => {
                buf.push(b'"');
                buf.extend(
                    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true).as_bytes(),
                );
                buf.push(b'"');
            }
            Value::Enum(e) => match e.kind() {
                EnumKind::Str => write_json_str(buf, e.name()),
                EnumKind::Int => {
                    let mut digits = itoa::Buffer::new();
                    buf.push(b'"');
                    buf.extend(digits.format(e.int_value()).as_bytes());
                    buf.push(b'"');
                }
            },
            other => bail!(
                Encode,
                "dict key of type {} is not representable as a JSON object key",
                other.kind_label(),
            ),
        }
        Ok(())
    }
}

/// Encode with a fresh default encoder.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    Encoder::new().encode(value)
}

/// Replace the trailing element comma with the closing bracket, or append
/// the bracket for an empty container.
fn close_container(buf: &mut OutBuf, close: u8) {
    if buf.last() == Some(b',') {
        buf.overwrite_last(close);
    } else {
        buf.push(close);
    }
}

fn write_float(buf: &mut OutBuf, f: f64) -> Result<()> {
    ensure!(f.is_finite(), Encode, "{} is not representable in JSON", f);
    let mut shortest = ryu::Buffer::new();
    buf.extend(shortest.format_finite(f).as_bytes());
    Ok(())
}

fn write_json_str(buf: &mut OutBuf, s: &str) {
    buf.push(b'"');
    let bytes = s.as_bytes();
    let mut run_start = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        let escape = ESCAPE[byte as usize];
        if escape == 0 {
            continue;
        }
        buf.extend(&bytes[run_start..i]);
        run_start = i + 1;
        buf.push(b'\\');
        if escape == b'u' {
            const HEX: &[u8; 16] = b"0123456789abcdef";
            buf.extend(&[
                b'u',
                b'0',
                b'0',
                HEX[(byte >> 4) as usize],
                HEX[(byte & 0x0f) as usize],
            ]);
        } else {
            buf.push(escape);
        }
    }
    buf.extend(&bytes[run_start..]);
    buf.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(encode(&Value::Null).unwrap(), b"null");
        assert_eq!(encode(&Value::Bool(true)).unwrap(), b"true");
        assert_eq!(encode(&Value::Int(-42)).unwrap(), b"-42");
        assert_eq!(encode(&Value::Float(1.5)).unwrap(), b"1.5");
    }

    #[test]
    fn test_string_escapes() {
        let out = encode(&Value::from("a\"b\\c\nd\x01é")).unwrap();
        // utf-8 passes through verbatim; control bytes become \u00XX
        assert_eq!(out, b"\"a\\\"b\\\\c\\nd\\u0001\xc3\xa9\"");
    }

    #[test]
    fn test_base64_bytes() {
        let out = encode(&Value::Bytes(vec![0, 1, 2])).unwrap();
        assert_eq!(out, b"\"AAEC\"");
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn test_containers_and_empty() {
        let out = encode(&Value::List(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(out, b"[1,2]");
        assert_eq!(encode(&Value::List(Vec::new())).unwrap(), b"[]");
        assert_eq!(encode(&Value::Dict(Vec::new())).unwrap(), b"{}");
        let out = encode(&Value::Dict(vec![(
            Value::from("k"),
            Value::List(Vec::new()),
        )]))
        .unwrap();
        assert_eq!(out, b"{\"k\":[]}");
    }

    #[test]
    fn test_int_keys_quoted() {
        let out = encode(&Value::Dict(vec![(Value::Int(3), Value::Bool(true))]))
            .unwrap();
        assert_eq!(out, b"{\"3\":true}");
        assert!(encode(&Value::Dict(vec![(
            Value::List(Vec::new()),
            Value::Null,
        )]))
        .is_err());
    }

    #[test]
    fn test_nonfinite_floats_fail() {
        assert!(encode(&Value::Float(f64::NAN)).is_err());
        assert!(encode(&Value::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_big_int_mode() {
        let big = Value::Int(u64::MAX as i128);
        assert!(encode(&big).is_err());
        let out = Encoder::new().big_int(true).encode(&big).unwrap();
        assert_eq!(out, u64::MAX.to_string().as_bytes());
    }

    #[test]
    fn test_ext_not_representable() {
        assert!(encode(&Value::Ext(1, vec![0])).is_err());
    }
}
