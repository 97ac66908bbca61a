//! Type-directed JSON decoder (RFC 8259): accepts only input that matches
//! the expected schema, in a single pass over the bytes.

use crate::{
    desc::verify_custom,
    error::{bail, ensure, error, Error, Result},
    freelist,
    instance::{materialize_default, run_post_init, StructInstance},
    schema::{TypeNode, TypeTags},
    struct_meta::StructMeta,
    value::{dict_insert, key_label, set_insert, Value},
    DecHook, RECURSE_LIMIT,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::DateTime;
use smallvec::{smallvec, SmallVec};
use std::{borrow::Cow, sync::Arc};

/// Decodes JSON bytes into [`Value`]s conforming to a schema.
///
/// Holds a reusable scratch buffer for un-escaping strings, so decoding
/// takes `&mut self`.
pub struct Decoder {
    schema: TypeNode,
    dec_hook: Option<DecHook>,
    scratch: Vec<u8>,
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
            scratch: Vec::new(),
        }
    }

    /// Called for custom-type schema positions with the decoded-as-`any`
    /// value.
    pub fn with_dec_hook(mut self, hook: DecHook) -> Self {
        self.dec_hook = Some(hook);
        self
    }

    pub fn decode(&mut self, bytes: &[u8]) -> Result<Value> {
        let Decoder {
            schema,
            dec_hook,
            scratch,
        } = self;
        let mut ctx = Ctx {
            input: bytes,
            pos: 0,
            scratch,
            dec_hook: dec_hook.as_ref(),
        };
        let value = ctx
            .parse_node(schema, 0)
            .map_err(|e| e.with_root(schema.root_label()))?;
        ctx.skip_ws();
        ensure!(
            ctx.pos == bytes.len(),
            Decode,
            "trailing characters at byte {}",
            ctx.pos,
        );
        Ok(value)
    }
}

/// Decode with the `any` schema.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    Decoder::default().decode(bytes)
}

struct Ctx<'a, 'h> {
    input: &'a [u8],
    pos: usize,
    scratch: &'h mut Vec<u8>,
    dec_hook: Option<&'h DecHook>,
}

fn type_err(node: &TypeNode, got: &str) -> Error {
    error!(Validation, "expected {}, got {}", node, got)
}

impl<'a, 'h> Ctx<'a, 'h> {
    fn skip_ws(&mut self) {
        while matches!(
            self.input.get(self.pos),
            Some(b' ' | b'\t' | b'\n' | b'\r')
        ) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            n <= self.input.len() - self.pos,
            Decode,
            "unexpected end of input",
        );
        let bytes = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn expect_literal(&mut self, literal: &'static [u8]) -> Result<()> {
        let got = self.take(literal.len())?;
        ensure!(
            got == literal,
            Decode,
            "invalid literal at byte {}",
            self.pos - literal.len(),
        );
        Ok(())
    }

    fn parse_node(&mut self, node: &TypeNode, depth: usize) -> Result<Value> {
        ensure!(
            depth < RECURSE_LIMIT,
            Decode,
            "maximum recursion depth exceeded",
        );
        self.skip_ws();

        if node.tags().intersects(TypeTags::CUSTOM_KINDS) {
            if node.tags().contains(TypeTags::NONE) && self.peek() == Some(b'n')
            {
                self.expect_literal(b"null")?;
                return Ok(Value::Null);
            }
            let any = TypeNode::any();
            let generic = self.parse_node(&any, depth + 1)?;
            return self.finish_custom(node, generic);
        }

        match self.peek() {
            None => bail!(Decode, "unexpected end of input"),
            Some(b'n') => {
                self.expect_literal(b"null")?;
                if node.admits(TypeTags::NONE) {
                    Ok(Value::Null)
                } else {
                    Err(type_err(node, "null"))
                }
            }
            Some(b't') => {
                self.expect_literal(b"true")?;
                self.bool_value(true, node)
            }
            Some(b'f') => {
                self.expect_literal(b"false")?;
                self.bool_value(false, node)
            }
            Some(b'"') => {
                let s = self.parse_string()?;
                str_value(s, node)
            }
            Some(b'[') => self.parse_array(node, depth),
            Some(b'{') => self.parse_object(node, depth),
            Some(b'-' | b'0'..=b'9') => self.number_value(node),
            Some(c) => bail!(
                Decode,
                "invalid character {:?} at byte {}",
                c as char,
                self.pos,
            ),
        }
    }

    fn bool_value(&self, b: bool, node: &TypeNode) -> Result<Value> {
        if node.admits(TypeTags::BOOL) {
            Ok(Value::Bool(b))
        } else {
            Err(type_err(node, "bool"))
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

    /// Parse a string token. Zero-copy while no escape appears; escapes
    /// switch to assembling the unescaped text in the scratch buffer.
    fn parse_string(&mut self) -> Result<Cow<'a, str>> {
        let quote = self.take_byte()?;
        ensure!(quote == b'"', Decode, "expected string");
        let start = self.pos;
        loop {
            match self.peek() {
                None => bail!(Decode, "unexpected end of input in string"),
                Some(b'"') => {
                    let slice = &self.input[start..self.pos];
                    self.pos += 1;
                    return Ok(Cow::Borrowed(
                        std::str::from_utf8(slice).map_err(Error::from)?,
                    ));
                }
                Some(b'\\') => break,
                Some(b) if b < 0x20 => {
                    bail!(Decode, "invalid control character in string")
                }
                Some(_) => self.pos += 1,
            }
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(&self.input[start..self.pos]);
        loop {
            let byte = self.take_byte()?;
            match byte {
                b'"' => break,
                b'\\' => {
                    let escape = self.take_byte()?;
                    match escape {
                        b'"' => self.scratch.push(b'"'),
                        b'\\' => self.scratch.push(b'\\'),
                        b'/' => self.scratch.push(b'/'),
                        b'b' => self.scratch.push(0x08),
                        b'f' => self.scratch.push(0x0c),
                        b'n' => self.scratch.push(b'\n'),
                        b'r' => self.scratch.push(b'\r'),
                        b't' => self.scratch.push(b'\t'),
                        b'u' => {
                            let c = self.parse_unicode_escape()?;
                            let mut utf8 = [0u8; 4];
                            self.scratch
                                .extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                        }
                        other => bail!(
                            Decode,
                            "invalid escape character {:?}",
                            other as char,
                        ),
                    }
                }
                b if b < 0x20 => {
                    bail!(Decode, "invalid control character in string")
                }
                b => self.scratch.push(b),
            }
        }
        let s = std::str::from_utf8(self.scratch).map_err(Error::from)?;
        Ok(Cow::Owned(s.to_owned()))
    }

    fn parse_hex4(&mut self) -> Result<u16> {
        let bytes = self.take(4)?;
        let mut n: u16 = 0;
        for &b in bytes {
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| error!(Decode, "invalid \\u escape"))?;
            n = n * 16 + digit as u16;
        }
        Ok(n)
    }

    fn parse_unicode_escape(&mut self) -> Result<char> {
        let n = self.parse_hex4()?;
        if (0xd800..=0xdbff).contains(&n) {
            // high surrogate: its low half must follow immediately
            let marker = self.take(2)?;
            ensure!(
                marker == b"\\u",
                Decode,
                "unpaired surrogate in \\u escape",
            );
            let low = self.parse_hex4()?;
            ensure!(
                (0xdc00..=0xdfff).contains(&low),
                Decode,
                "unpaired surrogate in \\u escape",
            );
            let c = 0x10000
                + (((n - 0xd800) as u32) << 10)
                + (low - 0xdc00) as u32;
            char::from_u32(c)
                .ok_or_else(|| error!(Decode, "invalid \\u escape"))
        } else if (0xdc00..=0xdfff).contains(&n) {
            bail!(Decode, "unpaired surrogate in \\u escape")
        } else {
            char::from_u32(n as u32)
                .ok_or_else(|| error!(Decode, "invalid \\u escape"))
        }
    }

    /// Scan one number token per the RFC 8259 grammar. Returns the raw
    /// ASCII slice and whether a fraction or exponent made it a float.
    fn parse_number_token(&mut self) -> Result<(&'a [u8], bool)> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => {
                self.pos += 1;
                if matches!(self.peek(), Some(b'0'..=b'9')) {
                    bail!(Decode, "invalid number (leading zero)");
                }
            }
            Some(b'1'..=b'9') => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
            _ => bail!(Decode, "invalid number at byte {}", self.pos),
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            ensure!(
                matches!(self.peek(), Some(b'0'..=b'9')),
                Decode,
                "invalid number (missing fraction digits)",
            );
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            ensure!(
                matches!(self.peek(), Some(b'0'..=b'9')),
                Decode,
                "invalid number (missing exponent digits)",
            );
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        Ok((&self.input[start..self.pos], is_float))
    }

    fn number_value(&mut self, node: &TypeNode) -> Result<Value> {
        let (slice, is_float) = self.parse_number_token()?;
        let text = std::str::from_utf8(slice).map_err(Error::from)?;
        if !is_float {
            if node.is_any() || node.tags().contains(TypeTags::INT) {
                return match text.parse::<i128>() {
                    Ok(n) if n >= i64::MIN as i128 && n <= u64::MAX as i128 => {
                        Ok(Value::Int(n))
                    }
                    _ if node.tags().contains(TypeTags::FLOAT) => {
                        float_from(text)
                    }
                    _ => Err(error!(Validation, "integer {} out of range", text)),
                };
            }
            if let Some(enum_ref) = node.int_enum_ref() {
                return text
                    .parse::<i64>()
                    .ok()
                    .and_then(|v| enum_ref.member_by_value(v))
                    .map(Value::Enum)
                    .ok_or_else(|| {
                        error!(
                            Validation,
                            "invalid value {} for enum '{}'",
                            text,
                            enum_ref.name(),
                        )
                    });
            }
            if node.tags().contains(TypeTags::FLOAT) {
                // integer literals widen when only a float is admissible
                return float_from(text);
            }
            return Err(type_err(node, "int"));
        }
        if node.admits(TypeTags::FLOAT) {
            return float_from(text);
        }
        // strict: a non-integer literal never satisfies an int schema
        Err(type_err(node, "float"))
    }

    fn parse_array(&mut self, node: &TypeNode, depth: usize) -> Result<Value> {
        if let Some(elems) = node.tuple_elems() {
            self.pos += 1;
            let items =
                self.parse_elements(depth, |i| elems.get(i), Some(elems.len()))?;
            return Ok(Value::Tuple(items));
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
        self.pos += 1;
        let items = self.parse_elements(depth, |_| Some(elem), None)?;
        if node.tags().contains(TypeTags::SET) {
            let mut set = Vec::with_capacity(items.len());
            for item in items {
                set_insert(&mut set, item);
            }
            Ok(Value::Set(set))
        } else if node.tags().contains(TypeTags::VAR_TUPLE) {
            Ok(Value::Tuple(items))
        } else {
            Ok(Value::List(items))
        }
    }

    /// Comma-separated elements after a consumed `[`. Rejects trailing
    /// commas.
    fn parse_elements<'n>(
        &mut self,
        depth: usize,
        schema_for: impl Fn(usize) -> Option<&'n TypeNode>,
        fixed_len: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
        } else {
            loop {
                let index = items.len();
                let elem_node = match schema_for(index) {
                    Some(elem_node) => elem_node,
                    None => bail!(
                        Validation,
                        "expected array of length {}, got {} or more",
                        fixed_len.unwrap_or(index),
                        index + 1,
                    ),
                };
                let value = self
                    .parse_node(elem_node, depth + 1)
                    .map_err(|e| e.at_index(index))?;
                items.push(value);
                self.skip_ws();
                match self.take_byte()? {
                    b',' => {
                        self.skip_ws();
                        ensure!(
                            self.peek() != Some(b']'),
                            Decode,
                            "trailing comma in array",
                        );
                    }
                    b']' => break,
                    c => bail!(
                        Decode,
                        "expected ',' or ']', got {:?}",
                        c as char,
                    ),
                }
            }
        }
        if let Some(need) = fixed_len {
            ensure!(
                items.len() == need,
                Validation,
                "expected array of length {}, got {}",
                need,
                items.len(),
            );
        }
        Ok(items)
    }

    fn parse_object(&mut self, node: &TypeNode, depth: usize) -> Result<Value> {
        // records are always objects in JSON, whatever their wire form
        // elsewhere
        if let Some(meta) = node.struct_ref() {
            let meta = meta.clone();
            self.pos += 1;
            return self.struct_from_object(&meta, depth);
        }
        let (any_key, any_value);
        let (key_node, value_node) = match node.dict_children() {
            Some(children) => children,
            None if node.is_any() => {
                any_key = TypeNode::any();
                any_value = TypeNode::any();
                (&any_key, &any_value)
            }
            None => return Err(type_err(node, "object")),
        };
        self.pos += 1;
        self.dict_from_object(key_node, value_node, depth)
    }

    fn struct_from_object(
        &mut self,
        meta: &Arc<StructMeta>,
        depth: usize,
    ) -> Result<Value> {
        let types = meta.field_types()?;
        let n = meta.n_fields();
        let mut slots = freelist::acquire(n);
        slots.resize(n, Value::Null);
        let mut seen: SmallVec<[bool; 32]> = smallvec![false; n];
        let mut hint = 0usize;

        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
        } else {
            loop {
                self.skip_ws();
                ensure!(
                    self.peek() == Some(b'"'),
                    Decode,
                    "expected object key string",
                );
                let key = self.parse_string()?;
                self.skip_ws();
                ensure!(
                    self.take_byte()? == b':',
                    Decode,
                    "expected ':' after object key",
                );
                match meta.field_index_hint(&key, &mut hint) {
                    Some(i) => {
                        slots[i] = self
                            .parse_node(&types[i], depth + 1)
                            .map_err(|e| e.at_field(&meta.fields()[i].name))?;
                        seen[i] = true;
                    }
                    // unknown fields are skipped wholesale
                    None => self.skip_json(depth + 1)?,
                }
                self.skip_ws();
                match self.take_byte()? {
                    b',' => {
                        self.skip_ws();
                        ensure!(
                            self.peek() != Some(b'}'),
                            Decode,
                            "trailing comma in object",
                        );
                    }
                    b'}' => break,
                    c => bail!(
                        Decode,
                        "expected ',' or '}}', got {:?}",
                        c as char,
                    ),
                }
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

    fn dict_from_object(
        &mut self,
        key_node: &TypeNode,
        value_node: &TypeNode,
        depth: usize,
    ) -> Result<Value> {
        let mut pairs = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::Dict(pairs));
        }
        loop {
            self.skip_ws();
            ensure!(
                self.peek() == Some(b'"'),
                Decode,
                "expected object key string",
            );
            let raw_key = self.parse_string()?;
            let key = coerce_key(raw_key, key_node)?;
            self.skip_ws();
            ensure!(
                self.take_byte()? == b':',
                Decode,
                "expected ':' after object key",
            );
            let value = self
                .parse_node(value_node, depth + 1)
                .map_err(|e| e.at_key(key_label(&key)))?;
            dict_insert(&mut pairs, key, value);
            self.skip_ws();
            match self.take_byte()? {
                b',' => {
                    self.skip_ws();
                    ensure!(
                        self.peek() != Some(b'}'),
                        Decode,
                        "trailing comma in object",
                    );
                }
                b'}' => break,
                c => bail!(Decode, "expected ',' or '}}', got {:?}", c as char),
            }
        }
        Ok(Value::Dict(pairs))
    }

    /// Consume one JSON value of any shape without materialising it.
    fn skip_json(&mut self, depth: usize) -> Result<()> {
        ensure!(
            depth < RECURSE_LIMIT,
            Decode,
            "maximum recursion depth exceeded",
        );
        self.skip_ws();
        match self.peek() {
            None => bail!(Decode, "unexpected end of input"),
            Some(b'n') => self.expect_literal(b"null"),
            Some(b't') => self.expect_literal(b"true"),
            Some(b'f') => self.expect_literal(b"false"),
            Some(b'"') => {
                self.parse_string()?;
                Ok(())
            }
            Some(b'-' | b'0'..=b'9') => {
                self.parse_number_token()?;
                Ok(())
            }
            Some(b'[') => {
                self.pos += 1;
                self.skip_ws();
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(());
                }
                loop {
                    self.skip_json(depth + 1)?;
                    self.skip_ws();
                    match self.take_byte()? {
                        b',' => {
                            self.skip_ws();
                            ensure!(
                                self.peek() != Some(b']'),
                                Decode,
                                "trailing comma in array",
                            );
                        }
                        b']' => return Ok(()),
                        c => bail!(
                            Decode,
                            "expected ',' or ']', got {:?}",
                            c as char,
                        ),
                    }
                }
            }
            Some(b'{') => {
                self.pos += 1;
                self.skip_ws();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(());
                }
                loop {
                    self.skip_ws();
                    ensure!(
                        self.peek() == Some(b'"'),
                        Decode,
                        "expected object key string",
                    );
                    self.parse_string()?;
                    self.skip_ws();
                    ensure!(
                        self.take_byte()? == b':',
                        Decode,
                        "expected ':' after object key",
                    );
                    self.skip_json(depth + 1)?;
                    self.skip_ws();
                    match self.take_byte()? {
                        b',' => {
                            self.skip_ws();
                            ensure!(
                                self.peek() != Some(b'}'),
                                Decode,
                                "trailing comma in object",
                            );
                        }
                        b'}' => return Ok(()),
                        c => bail!(
                            Decode,
                            "expected ',' or '}}', got {:?}",
                            c as char,
                        ),
                    }
                }
            }
            Some(c) => bail!(
                Decode,
                "invalid character {:?} at byte {}",
                c as char,
                self.pos,
            ),
        }
    }
}

fn float_from(text: &str) -> Result<Value> {
    let f: f64 = text
        .parse()
        .map_err(|_| error!(Decode, "invalid number {:?}", text))?;
    ensure!(f.is_finite(), Validation, "number {} out of range", text);
    Ok(Value::Float(f))
}

fn str_value(s: Cow<'_, str>, node: &TypeNode) -> Result<Value> {
    if node.admits(TypeTags::STR) {
        return Ok(Value::Str(s.into_owned()));
    }
    if let Some(enum_ref) = node.str_enum_ref() {
        return enum_ref.member_by_name(&s).map(Value::Enum).ok_or_else(|| {
            error!(
                Validation,
                "invalid value {:?} for enum '{}'",
                &*s,
                enum_ref.name(),
            )
        });
    }
    if node.tags().contains(TypeTags::DATETIME) {
        return DateTime::parse_from_rfc3339(&s)
            .map(Value::DateTime)
            .map_err(|_| {
                error!(Validation, "invalid RFC 3339 datetime {:?}", &*s)
            });
    }
    if node
        .tags()
        .intersects(TypeTags::BYTES | TypeTags::BYTEARRAY)
    {
        let decoded = BASE64
            .decode(s.as_bytes())
            .map_err(|_| error!(Decode, "invalid base64 string"))?;
        return if node.tags().contains(TypeTags::BYTES) {
            Ok(Value::Bytes(decoded))
        } else {
            Ok(Value::ByteArray(decoded))
        };
    }
    Err(type_err(node, "str"))
}

/// Coerce an object key string to the dict's key schema.
fn coerce_key(s: Cow<'_, str>, node: &TypeNode) -> Result<Value> {
    if node.is_any() || node.tags().contains(TypeTags::STR) {
        return Ok(Value::Str(s.into_owned()));
    }
    if node.tags().contains(TypeTags::INT) {
        return match s.parse::<i128>() {
            Ok(n) if n >= i64::MIN as i128 && n <= u64::MAX as i128 => {
                Ok(Value::Int(n))
            }
            _ => Err(error!(Validation, "invalid integer key {:?}", &*s)),
        };
    }
    if let Some(enum_ref) = node.int_enum_ref() {
        return s
            .parse::<i64>()
            .ok()
            .and_then(|v| enum_ref.member_by_value(v))
            .map(Value::Enum)
            .ok_or_else(|| {
                error!(
                    Validation,
                    "invalid value {:?} for enum '{}'",
                    &*s,
                    enum_ref.name(),
                )
            });
    }
    if let Some(enum_ref) = node.str_enum_ref() {
        return enum_ref.member_by_name(&s).map(Value::Enum).ok_or_else(|| {
            error!(
                Validation,
                "invalid value {:?} for enum '{}'",
                &*s,
                enum_ref.name(),
            )
        });
    }
    if node.tags().contains(TypeTags::FLOAT) {
        let f: f64 = s
            .parse()
            .map_err(|_| error!(Validation, "invalid float key {:?}", &*s))?;
        return Ok(Value::Float(f));
    }
    if node.tags().contains(TypeTags::DATETIME) {
        return DateTime::parse_from_rfc3339(&s)
            .map(Value::DateTime)
            .map_err(|_| {
                error!(Validation, "invalid RFC 3339 datetime key {:?}", &*s)
            });
    }
    Err(error!(
        Validation,
        "cannot decode a JSON object key as {}",
        node,
    ))
}
