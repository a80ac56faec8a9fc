//! Partial-JSON diff decoder
//!
//! `PARTIAL_UPDATE_ROWS_EVENT` encodes JSON columns of the after image as
//! a vector of diffs instead of a full document: an operation byte, a
//! length-prefixed path, and (except for removals) a length-prefixed
//! JSON-binary value.

use std::fmt;

use crate::codec;
use crate::error::{Error, Result};

use super::json_binary::{decode_json_binary, JsonDecodeOptions};

/// What a JSON diff does at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonDiffOperation {
    /// Replace the value at the path, like `JSON_REPLACE`.
    Replace,
    /// Insert a new element at the path, like `JSON_INSERT` /
    /// `JSON_ARRAY_INSERT`.
    Insert,
    /// Remove the value at the path, like `JSON_REMOVE`.
    Remove,
}

impl TryFrom<u8> for JsonDiffOperation {
    type Error = Error;

    fn try_from(op: u8) -> Result<JsonDiffOperation> {
        match op {
            0 => Ok(JsonDiffOperation::Replace),
            1 => Ok(JsonDiffOperation::Insert),
            2 => Ok(JsonDiffOperation::Remove),
            other => Err(Error::CorruptedJsonDiff(other)),
        }
    }
}

impl fmt::Display for JsonDiffOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One decoded JSON diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonDiff {
    /// The operation.
    pub op: JsonDiffOperation,
    /// JSON path the operation applies to.
    pub path: String,
    /// JSON text of the new value; `None` for removals.
    pub value: Option<String>,
}

impl fmt::Display for JsonDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "json_diff(op:{} path:{} value:{})",
            self.op,
            self.path,
            self.value.as_deref().unwrap_or("")
        )
    }
}

/// Decodes one diff from the front of `data`, returning it and the bytes
/// consumed.
pub fn decode_json_diff(data: &[u8], opts: JsonDecodeOptions) -> Result<(JsonDiff, usize)> {
    if data.is_empty() {
        return Err(Error::InvalidBuffer("empty json diff".into()));
    }

    let op = JsonDiffOperation::try_from(data[0])?;
    let mut pos = 1;

    let (path_length, _, n) = codec::length_encoded_int(&data[pos..])?;
    pos += n;
    let path_length = path_length as usize;
    if data.len() < pos + path_length {
        return Err(Error::InvalidBuffer(format!(
            "json diff path declares {path_length} bytes, {} left",
            data.len() - pos
        )));
    }
    let path = String::from_utf8_lossy(&data[pos..pos + path_length]).into_owned();
    pos += path_length;

    if op == JsonDiffOperation::Remove {
        return Ok((
            JsonDiff {
                op,
                path,
                value: None,
            },
            pos,
        ));
    }

    let (value_length, _, n) = codec::length_encoded_int(&data[pos..])?;
    pos += n;
    let value_length = value_length as usize;
    if data.len() < pos + value_length {
        return Err(Error::InvalidBuffer(format!(
            "json diff value declares {value_length} bytes, {} left",
            data.len() - pos
        )));
    }

    let value = decode_json_binary(&data[pos..pos + value_length], opts)
        .map_err(|e| Error::MalformedJsonBinary(format!("json diff for {path:?}: {e}")))?;
    pos += value_length;

    Ok((
        JsonDiff {
            op,
            path,
            value: Some(value.to_string()),
        },
        pos,
    ))
}

/// Decodes a whole diff vector, consuming the buffer.
pub fn decode_json_diffs(data: &[u8], opts: JsonDecodeOptions) -> Result<Vec<JsonDiff>> {
    let mut diffs = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let (diff, n) = decode_json_diff(&data[pos..], opts)?;
        diffs.push(diff);
        pos += n;
    }
    Ok(diffs)
}
