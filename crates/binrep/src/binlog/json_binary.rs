//! MySQL JSON-binary column decoder
//!
//! Decodes the `JSONB` payload of a JSON column into a generic value
//! tree. Containers come in small and large variants (2- vs 4-byte
//! offsets); small scalars are inlined into the value entry instead of
//! being stored in the value area. Object key order is the binary's
//! insertion order and is preserved.

use std::fmt;

use crate::codec;
use crate::error::{Error, Result};

const JSONB_SMALL_OBJECT: u8 = 0;
const JSONB_LARGE_OBJECT: u8 = 1;
const JSONB_SMALL_ARRAY: u8 = 2;
const JSONB_LARGE_ARRAY: u8 = 3;
const JSONB_LITERAL: u8 = 4;
const JSONB_INT16: u8 = 5;
const JSONB_UINT16: u8 = 6;
const JSONB_INT32: u8 = 7;
const JSONB_UINT32: u8 = 8;
const JSONB_INT64: u8 = 9;
const JSONB_UINT64: u8 = 10;
const JSONB_DOUBLE: u8 = 11;
const JSONB_STRING: u8 = 12;
const JSONB_OPAQUE: u8 = 0x0f;

const JSONB_NULL_LITERAL: u8 = 0x00;
const JSONB_TRUE_LITERAL: u8 = 0x01;
const JSONB_FALSE_LITERAL: u8 = 0x02;

// Opaque payload type codes (MySQL column types).
const MYSQL_TYPE_TIMESTAMP: u8 = 7;
const MYSQL_TYPE_DATE: u8 = 10;
const MYSQL_TYPE_TIME: u8 = 11;
const MYSQL_TYPE_DATETIME: u8 = 12;
const MYSQL_TYPE_NEWDECIMAL: u8 = 246;

/// Options for JSON-binary decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonDecodeOptions {
    /// Swallow container-size mismatches and yield `null` instead of
    /// failing the record. Exists only for a pre-5.7.22 generated-column
    /// corruption; leave off unless replicating from such a server.
    pub ignore_decode_errors: bool,
}

/// A decoded JSON value.
///
/// Objects keep the binary's insertion order. Opaque values whose MySQL
/// type has a sub-decoder (DECIMAL, TIME, DATE, DATETIME, TIMESTAMP)
/// arrive as formatted strings; anything else is carried raw.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Array of values.
    Array(Vec<JsonValue>),
    /// Object in insertion order.
    Object(Vec<(String, JsonValue)>),
    /// Opaque MySQL-typed payload without a sub-decoder.
    Opaque {
        /// MySQL column type byte.
        type_code: u8,
        /// Raw payload bytes.
        data: Vec<u8>,
    },
}

impl JsonValue {
    /// Converts into a `serde_json` value; object order is preserved.
    pub fn to_serde(&self) -> serde_json::Value {
        match self {
            JsonValue::Null => serde_json::Value::Null,
            JsonValue::Bool(b) => serde_json::Value::Bool(*b),
            JsonValue::Int(v) => serde_json::Value::from(*v),
            JsonValue::Uint(v) => serde_json::Value::from(*v),
            JsonValue::Double(v) => serde_json::Value::from(*v),
            JsonValue::String(s) => serde_json::Value::String(s.clone()),
            JsonValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(JsonValue::to_serde).collect())
            }
            JsonValue::Object(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_serde());
                }
                serde_json::Value::Object(map)
            }
            JsonValue::Opaque { data, .. } => {
                serde_json::Value::String(String::from_utf8_lossy(data).into_owned())
            }
        }
    }
}

fn write_json_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for JsonValue {
    /// Compact JSON text, object keys in insertion order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonValue::Null => f.write_str("null"),
            JsonValue::Bool(b) => write!(f, "{b}"),
            JsonValue::Int(v) => write!(f, "{v}"),
            JsonValue::Uint(v) => write!(f, "{v}"),
            JsonValue::Double(v) if v.is_finite() => write!(f, "{v}"),
            JsonValue::Double(_) => f.write_str("null"),
            JsonValue::String(s) => write_json_string(f, s),
            JsonValue::Array(items) => {
                f.write_str("[")?;
                let mut sep = "";
                for item in items {
                    write!(f, "{sep}{item}")?;
                    sep = ",";
                }
                f.write_str("]")
            }
            JsonValue::Object(entries) => {
                f.write_str("{")?;
                let mut sep = "";
                for (key, value) in entries {
                    f.write_str(sep)?;
                    write_json_string(f, key)?;
                    write!(f, ":{value}")?;
                    sep = ",";
                }
                f.write_str("}")
            }
            JsonValue::Opaque { data, .. } => {
                write_json_string(f, &String::from_utf8_lossy(data))
            }
        }
    }
}

/// Decodes a JSON-binary column payload: one type byte plus the value
/// body. An empty payload decodes to `null` (MySQL writes it for JSON
/// `null` columns in some paths).
pub fn decode_json_binary(data: &[u8], opts: JsonDecodeOptions) -> Result<JsonValue> {
    if data.is_empty() {
        return Ok(JsonValue::Null);
    }
    Decoder { opts }.decode_value(data[0], &data[1..])
}

struct Decoder {
    opts: JsonDecodeOptions,
}

impl Decoder {
    fn decode_value(&self, tp: u8, data: &[u8]) -> Result<JsonValue> {
        match tp {
            JSONB_SMALL_OBJECT => self.decode_object_or_array(data, true, true),
            JSONB_LARGE_OBJECT => self.decode_object_or_array(data, false, true),
            JSONB_SMALL_ARRAY => self.decode_object_or_array(data, true, false),
            JSONB_LARGE_ARRAY => self.decode_object_or_array(data, false, false),
            JSONB_LITERAL => self.decode_literal(data),
            JSONB_INT16 => Ok(JsonValue::Int(i64::from(parse(data, 2, codec::parse_binary_i16)?))),
            JSONB_UINT16 => Ok(JsonValue::Uint(u64::from(parse(data, 2, codec::parse_binary_u16)?))),
            JSONB_INT32 => Ok(JsonValue::Int(i64::from(parse(data, 4, codec::parse_binary_i32)?))),
            JSONB_UINT32 => Ok(JsonValue::Uint(u64::from(parse(data, 4, codec::parse_binary_u32)?))),
            JSONB_INT64 => Ok(JsonValue::Int(parse(data, 8, codec::parse_binary_i64)?)),
            JSONB_UINT64 => Ok(JsonValue::Uint(parse(data, 8, codec::parse_binary_u64)?)),
            JSONB_DOUBLE => Ok(JsonValue::Double(parse(data, 8, codec::parse_binary_f64)?)),
            JSONB_STRING => self.decode_string(data),
            JSONB_OPAQUE => self.decode_opaque(data),
            _ => Err(Error::MalformedJsonBinary(format!("invalid json type {tp}"))),
        }
    }

    fn decode_object_or_array(
        &self,
        data: &[u8],
        is_small: bool,
        is_object: bool,
    ) -> Result<JsonValue> {
        let offset_size = if is_small { 2 } else { 4 };
        let key_entry_size = 2 + offset_size;
        let value_entry_size = 1 + offset_size;

        if data.len() < 2 * offset_size {
            return Err(data_short(data, 2 * offset_size));
        }

        let count = self.decode_count(data, is_small)?;
        let size = self.decode_count(&data[offset_size..], is_small)?;

        if data.len() < size {
            // Before MySQL 5.7.22, a JSON generated column could be
            // persisted with a bad container size; the lenient mode maps
            // the value to null instead of failing the record.
            if self.opts.ignore_decode_errors {
                return Ok(JsonValue::Null);
            }
            return Err(data_short(data, size));
        }

        let mut header_size = 2 * offset_size + count * value_entry_size;
        if is_object {
            header_size += count * key_entry_size;
        }
        if header_size > size {
            return Err(Error::MalformedJsonBinary(format!(
                "header size {header_size} > size {size}"
            )));
        }

        let mut keys = Vec::new();
        if is_object {
            keys.reserve(count);
            for i in 0..count {
                let entry_offset = 2 * offset_size + key_entry_size * i;
                let key_offset = self.decode_count(&data[entry_offset..], is_small)?;
                let key_length =
                    usize::from(parse(&data[entry_offset + offset_size..], 2, codec::parse_binary_u16)?);

                // Keys live after all entries.
                if key_offset < header_size {
                    return Err(Error::MalformedJsonBinary(format!(
                        "invalid key offset {key_offset}, must be >= {header_size}"
                    )));
                }
                if data.len() < key_offset + key_length {
                    return Err(data_short(data, key_offset + key_length));
                }

                keys.push(
                    String::from_utf8_lossy(&data[key_offset..key_offset + key_length])
                        .into_owned(),
                );
            }
        }

        let mut values = Vec::with_capacity(count);
        for i in 0..count {
            let mut entry_offset = 2 * offset_size + value_entry_size * i;
            if is_object {
                entry_offset += key_entry_size * count;
            }

            let tp = data[entry_offset];

            if is_inline_value(tp, is_small) {
                values.push(
                    self.decode_value(tp, &data[entry_offset + 1..entry_offset + value_entry_size])?,
                );
                continue;
            }

            let value_offset = self.decode_count(&data[entry_offset + 1..], is_small)?;
            if data.len() < value_offset {
                return Err(data_short(data, value_offset));
            }
            values.push(self.decode_value(tp, &data[value_offset..])?);
        }

        if is_object {
            Ok(JsonValue::Object(keys.into_iter().zip(values).collect()))
        } else {
            Ok(JsonValue::Array(values))
        }
    }

    fn decode_literal(&self, data: &[u8]) -> Result<JsonValue> {
        if data.is_empty() {
            return Err(data_short(data, 1));
        }
        match data[0] {
            JSONB_NULL_LITERAL => Ok(JsonValue::Null),
            JSONB_TRUE_LITERAL => Ok(JsonValue::Bool(true)),
            JSONB_FALSE_LITERAL => Ok(JsonValue::Bool(false)),
            other => Err(Error::MalformedJsonBinary(format!("invalid literal {other}"))),
        }
    }

    fn decode_string(&self, data: &[u8]) -> Result<JsonValue> {
        let (length, n) = decode_variable_length(data)?;
        if data.len() < length + n {
            return Err(data_short(data, length + n));
        }
        Ok(JsonValue::String(
            String::from_utf8_lossy(&data[n..n + length]).into_owned(),
        ))
    }

    fn decode_opaque(&self, data: &[u8]) -> Result<JsonValue> {
        if data.is_empty() {
            return Err(data_short(data, 1));
        }
        let type_code = data[0];
        let data = &data[1..];

        let (length, n) = decode_variable_length(data)?;
        if data.len() < length + n {
            return Err(data_short(data, length + n));
        }
        let payload = &data[n..n + length];

        match type_code {
            MYSQL_TYPE_NEWDECIMAL => self.decode_opaque_decimal(payload),
            MYSQL_TYPE_TIME => Ok(JsonValue::String(format_opaque_time(parse(
                payload,
                8,
                codec::parse_binary_i64,
            )?))),
            MYSQL_TYPE_DATE | MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP => Ok(JsonValue::String(
                format_opaque_datetime(parse(payload, 8, codec::parse_binary_i64)?),
            )),
            _ => Ok(JsonValue::Opaque {
                type_code,
                data: payload.to_vec(),
            }),
        }
    }

    fn decode_opaque_decimal(&self, data: &[u8]) -> Result<JsonValue> {
        if data.len() < 2 {
            return Err(data_short(data, 2));
        }
        let precision = usize::from(data[0]);
        let scale = usize::from(data[1]);
        let (value, _) = codec::decode_decimal(&data[2..], precision, scale)
            .map_err(|e| Error::MalformedJsonBinary(format!("bad opaque decimal: {e}")))?;
        Ok(JsonValue::String(value))
    }

    fn decode_count(&self, data: &[u8], is_small: bool) -> Result<usize> {
        if is_small {
            Ok(usize::from(parse(data, 2, codec::parse_binary_u16)?))
        } else {
            Ok(parse(data, 4, codec::parse_binary_u32)? as usize)
        }
    }
}

fn parse<T>(data: &[u8], need: usize, f: impl Fn(&[u8]) -> Result<T>) -> Result<T> {
    if data.len() < need {
        return Err(data_short(data, need));
    }
    f(data)
}

fn data_short(data: &[u8], expected: usize) -> Error {
    Error::MalformedJsonBinary(format!("data len {} < expected {expected}", data.len()))
}

fn is_inline_value(tp: u8, is_small: bool) -> bool {
    match tp {
        JSONB_INT16 | JSONB_UINT16 | JSONB_LITERAL => true,
        JSONB_INT32 | JSONB_UINT32 => !is_small,
        _ => false,
    }
}

/// Variable-length length field: seven bits per byte, little-endian
/// groups, high bit flags continuation; at most five bytes and the total
/// must fit in `u32`.
fn decode_variable_length(data: &[u8]) -> Result<(usize, usize)> {
    let max_count = data.len().min(5);
    let mut length = 0u64;
    for pos in 0..max_count {
        let v = data[pos];
        length |= u64::from(v & 0x7f) << (7 * pos);
        if v & 0x80 == 0 {
            if length > u64::from(u32::MAX) {
                return Err(Error::MalformedJsonBinary(format!(
                    "variable length {length} must fit in u32"
                )));
            }
            return Ok((length as usize, pos + 1));
        }
    }
    Err(Error::MalformedJsonBinary("decode variable length failed".into()))
}

fn format_opaque_time(packed: i64) -> String {
    if packed == 0 {
        return "00:00:00".to_string();
    }

    let (sign, v) = if packed < 0 { ("-", -packed) } else { ("", packed) };
    let int_part = v >> 24;
    let hour = (int_part >> 12) % (1 << 10);
    let minute = (int_part >> 6) % (1 << 6);
    let second = int_part % (1 << 6);
    let frac = v % (1 << 24);

    format!("{sign}{hour:02}:{minute:02}:{second:02}.{frac:06}")
}

fn format_opaque_datetime(packed: i64) -> String {
    if packed == 0 {
        return "0000-00-00 00:00:00".to_string();
    }

    let v = packed.abs();
    let int_part = v >> 24;
    let ymd = int_part >> 17;
    let ym = ymd >> 5;
    let hms = int_part % (1 << 17);

    let year = ym / 13;
    let month = ym % 13;
    let day = ymd % (1 << 5);
    let hour = hms >> 12;
    let minute = (hms >> 6) % (1 << 6);
    let second = hms % (1 << 6);
    let frac = v % (1 << 24);

    format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{frac:06}")
}
