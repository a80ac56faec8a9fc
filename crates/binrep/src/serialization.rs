//! Schema-driven variable-length field codec
//!
//! MySQL 8.3+ encodes tagged GTID events with a self-describing message
//! format: an ordered schema of named fields, each present field prefixed
//! by its field id so optional fields can be skipped on the wire. Readers
//! walk the schema in order and observe a `skipped` flag for absent
//! optionals.
//!
//! Wire layout: one version byte, then for each present field a varuint
//! field id followed by the payload. Varuints carry seven bits per byte,
//! least-significant group first, with the high bit flagging continuation;
//! signed values are zigzag-mapped first.

use std::fmt;

use crate::error::{Error, Result};

const MAX_VARINT_LEN: usize = 10;

/// Field payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Fixed-length big bag of bytes (UUIDs, flag bytes).
    IntFixed(usize),
    /// Zigzag varint, signed.
    IntVar,
    /// Plain varuint, unsigned.
    UintVar,
    /// Varuint-length-prefixed UTF-8 string.
    String,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Unset,
    Bytes(Vec<u8>),
    Int(i64),
    Uint(u64),
    Str(String),
}

/// One named field of a message schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name, used for lookups after decoding.
    pub name: &'static str,
    /// Payload type.
    pub kind: FieldKind,
    /// Whether the field may be absent on the wire.
    pub optional: bool,
    /// Set by `unmarshal` when an optional field was absent.
    pub skipped: bool,
    value: FieldValue,
}

impl Field {
    /// Fixed-length byte field.
    pub fn int_fixed(name: &'static str, length: usize) -> Self {
        Field {
            name,
            kind: FieldKind::IntFixed(length),
            optional: false,
            skipped: false,
            value: FieldValue::Unset,
        }
    }

    /// Signed varint field.
    pub fn int_var(name: &'static str) -> Self {
        Field {
            name,
            kind: FieldKind::IntVar,
            optional: false,
            skipped: false,
            value: FieldValue::Unset,
        }
    }

    /// Unsigned varint field.
    pub fn uint_var(name: &'static str) -> Self {
        Field {
            name,
            kind: FieldKind::UintVar,
            optional: false,
            skipped: false,
            value: FieldValue::Unset,
        }
    }

    /// Length-prefixed string field.
    pub fn string_field(name: &'static str) -> Self {
        Field {
            name,
            kind: FieldKind::String,
            optional: false,
            skipped: false,
            value: FieldValue::Unset,
        }
    }

    /// Marks the field as skippable on the wire.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets a raw byte value (for marshalling).
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.value = FieldValue::Bytes(bytes);
    }

    /// Sets a signed value (for marshalling).
    pub fn set_int(&mut self, v: i64) {
        self.value = FieldValue::Int(v);
    }

    /// Sets an unsigned value (for marshalling).
    pub fn set_uint(&mut self, v: u64) {
        self.value = FieldValue::Uint(v);
    }

    /// Sets a string value (for marshalling).
    pub fn set_string(&mut self, v: impl Into<String>) {
        self.value = FieldValue::Str(v.into());
    }

    fn wrong_kind(&self, want: &str) -> Error {
        Error::MalformedMessage(format!(
            "field {:?} is {:?}, wanted {want}",
            self.name, self.kind
        ))
    }

    /// Decoded bytes of an `IntFixed` field.
    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.value {
            FieldValue::Bytes(b) => Ok(b),
            _ => Err(self.wrong_kind("bytes")),
        }
    }

    /// Decoded value of an `IntVar` field.
    pub fn int(&self) -> Result<i64> {
        match self.value {
            FieldValue::Int(v) => Ok(v),
            _ => Err(self.wrong_kind("int")),
        }
    }

    /// Decoded value of a `UintVar` field; zero when skipped.
    pub fn uint(&self) -> Result<u64> {
        match self.value {
            FieldValue::Uint(v) => Ok(v),
            FieldValue::Unset if self.skipped => Ok(0),
            _ => Err(self.wrong_kind("uint")),
        }
    }

    /// Decoded value of a `String` field; empty when skipped.
    pub fn string(&self) -> Result<&str> {
        match &self.value {
            FieldValue::Str(v) => Ok(v),
            FieldValue::Unset if self.skipped => Ok(""),
            _ => Err(self.wrong_kind("string")),
        }
    }
}

/// A message: a fixed ordered schema plus decoded values.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Message format version from the leading byte.
    pub version: u8,
    /// Schema fields in wire order.
    pub fields: Vec<Field>,
}

impl Message {
    /// Creates a message with the given schema and version 0.
    pub fn new(fields: Vec<Field>) -> Self {
        Message { version: 0, fields }
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::MalformedMessage(format!("no field named {name:?}")))
    }

    /// Decodes `data` against the schema.
    ///
    /// Present fields fill their values; absent optionals get `skipped`.
    /// Any mismatch between schema and wire fails with `MalformedMessage`.
    pub fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::MalformedMessage("empty message".into()));
        }

        self.version = data[0];
        let mut pos = 1;
        let mut pending: Option<(u64, usize)> = None;

        for idx in 0..self.fields.len() {
            if pending.is_none() && pos < data.len() {
                let (id, n) = read_var_uint(&data[pos..])?;
                pending = Some((id, pos + n));
            }

            match pending {
                Some((id, after)) if id == idx as u64 => {
                    pos = Self::decode_value(&mut self.fields[idx], data, after)?;
                    pending = None;
                }
                Some((id, _)) if id > idx as u64 => Self::skip_field(&mut self.fields[idx])?,
                Some((id, _)) => {
                    return Err(Error::MalformedMessage(format!(
                        "field id {id} out of order at index {idx}"
                    )));
                }
                None => Self::skip_field(&mut self.fields[idx])?,
            }
        }

        if pending.is_some() || pos != data.len() {
            return Err(Error::MalformedMessage(format!(
                "{} trailing bytes after last schema field",
                data.len() - pos
            )));
        }

        Ok(())
    }

    fn skip_field(field: &mut Field) -> Result<()> {
        if !field.optional {
            return Err(Error::MalformedMessage(format!(
                "required field {:?} absent",
                field.name
            )));
        }
        field.skipped = true;
        Ok(())
    }

    fn decode_value(field: &mut Field, data: &[u8], mut pos: usize) -> Result<usize> {
        field.skipped = false;
        match field.kind {
            FieldKind::IntFixed(length) => {
                if data.len() - pos < length {
                    return Err(Error::MalformedMessage(format!(
                        "field {:?} needs {length} bytes, {} left",
                        field.name,
                        data.len() - pos
                    )));
                }
                field.value = FieldValue::Bytes(data[pos..pos + length].to_vec());
                pos += length;
            }
            FieldKind::IntVar => {
                let (raw, n) = read_var_uint(&data[pos..])?;
                field.value = FieldValue::Int(zigzag_decode(raw));
                pos += n;
            }
            FieldKind::UintVar => {
                let (raw, n) = read_var_uint(&data[pos..])?;
                field.value = FieldValue::Uint(raw);
                pos += n;
            }
            FieldKind::String => {
                let (len, n) = read_var_uint(&data[pos..])?;
                pos += n;
                let len = len as usize;
                if data.len() - pos < len {
                    return Err(Error::MalformedMessage(format!(
                        "string field {:?} declares {len} bytes, {} left",
                        field.name,
                        data.len() - pos
                    )));
                }
                let s = std::str::from_utf8(&data[pos..pos + len]).map_err(|_| {
                    Error::MalformedMessage(format!("field {:?} is not UTF-8", field.name))
                })?;
                field.value = FieldValue::Str(s.to_owned());
                pos += len;
            }
        }
        Ok(pos)
    }

    /// Encodes the message; unset or skipped optionals are omitted.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut buf = vec![self.version];

        for (idx, field) in self.fields.iter().enumerate() {
            if matches!(field.value, FieldValue::Unset) || field.skipped {
                if !field.optional {
                    return Err(Error::MalformedMessage(format!(
                        "required field {:?} has no value",
                        field.name
                    )));
                }
                continue;
            }

            write_var_uint(&mut buf, idx as u64);
            match (&field.kind, &field.value) {
                (FieldKind::IntFixed(length), FieldValue::Bytes(b)) => {
                    if b.len() != *length {
                        return Err(Error::MalformedMessage(format!(
                            "field {:?} value is {} bytes, declared {length}",
                            field.name,
                            b.len()
                        )));
                    }
                    buf.extend_from_slice(b);
                }
                (FieldKind::IntVar, FieldValue::Int(v)) => {
                    write_var_uint(&mut buf, zigzag_encode(*v));
                }
                (FieldKind::UintVar, FieldValue::Uint(v)) => write_var_uint(&mut buf, *v),
                (FieldKind::String, FieldValue::Str(s)) => {
                    write_var_uint(&mut buf, s.len() as u64);
                    buf.extend_from_slice(s.as_bytes());
                }
                _ => return Err(field.wrong_kind("value matching its kind")),
            }
        }

        Ok(buf)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message v{} [", self.version)?;
        let mut sep = "";
        for field in &self.fields {
            write!(f, "{sep}{}", field.name)?;
            if field.skipped {
                write!(f, "(skipped)")?;
            }
            sep = ", ";
        }
        write!(f, "]")
    }
}

fn read_var_uint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, b) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::MalformedMessage("unterminated varint".into()))
}

fn write_var_uint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(b);
            return;
        }
        buf.push(b | 0x80);
    }
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}
