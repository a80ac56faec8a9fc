//! Row-based replication events: TABLE_MAP and the ROWS family
//!
//! Rows events carry no schema of their own; decoding needs the
//! TABLE_MAP event previously seen for the same table id, which supplies
//! column types and per-column metadata. The stream driver caches table
//! maps and attaches them before decoding.

use std::io;
use std::sync::Arc;

use tracing::trace;

use crate::codec;
use crate::error::{Error, Result};

use super::event::Event;
use super::json_binary::{decode_json_binary, JsonDecodeOptions, JsonValue};
use super::json_diff::{decode_json_diffs, JsonDiff};
use super::EventType;

/// `binlog_row_value_options` bit: JSON columns may arrive as diffs.
const PARTIAL_JSON_UPDATES: u64 = 1;

/// MySQL column type codes as used in TABLE_MAP events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    TypedArray = 20,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    /// Maps a wire code to a column type; unknown codes read as
    /// `VarString` so the row decoder still makes progress.
    pub fn from_u8(code: u8) -> ColumnType {
        use ColumnType::*;
        match code {
            0 => Decimal,
            1 => Tiny,
            2 => Short,
            3 => Long,
            4 => Float,
            5 => Double,
            6 => Null,
            7 => Timestamp,
            8 => LongLong,
            9 => Int24,
            10 => Date,
            11 => Time,
            12 => DateTime,
            13 => Year,
            14 => NewDate,
            15 => Varchar,
            16 => Bit,
            17 => Timestamp2,
            18 => DateTime2,
            19 => Time2,
            20 => TypedArray,
            245 => Json,
            246 => NewDecimal,
            247 => Enum,
            248 => Set,
            249 => TinyBlob,
            250 => MediumBlob,
            251 => LongBlob,
            252 => Blob,
            253 => VarString,
            254 => String,
            255 => Geometry,
            _ => VarString,
        }
    }
}

/// One decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// Any signed integer column.
    SignedInt(i64),
    /// Unsigned integer value (SET bitmasks and friends).
    UnsignedInt(u64),
    /// FLOAT column.
    Float(f32),
    /// DOUBLE column.
    Double(f64),
    /// DECIMAL column, exact textual form.
    Decimal(String),
    /// Character data.
    String(String),
    /// Binary data (BLOB, GEOMETRY).
    Bytes(Vec<u8>),
    /// DATE column.
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    /// TIME column; hours can exceed 24 (up to 838).
    Time {
        negative: bool,
        hours: u16,
        minutes: u8,
        seconds: u8,
        microseconds: u32,
    },
    /// DATETIME column.
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        microseconds: u32,
    },
    /// TIMESTAMP column, seconds since the epoch.
    Timestamp {
        seconds: u32,
        microseconds: u32,
    },
    /// YEAR column.
    Year(u16),
    /// ENUM ordinal.
    Enum(u16),
    /// SET bitmask.
    Set(u64),
    /// BIT column, raw big-endian bytes.
    Bit(Vec<u8>),
    /// JSON column, fully materialized.
    Json(JsonValue),
    /// JSON column of a partial update, as a diff vector.
    JsonDiffs(Vec<JsonDiff>),
}

/// TABLE_MAP event: schema context for subsequent rows events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMapEvent {
    /// Width of the table id field, 6 bytes on current servers; the
    /// stream driver sets it from the format description.
    pub table_id_size: usize,
    /// Table id the following rows events refer to.
    pub table_id: u64,
    /// Reserved flags.
    pub flags: u16,
    /// Database name.
    pub schema_name: String,
    /// Table name.
    pub table_name: String,
    /// Number of columns.
    pub column_count: usize,
    /// Per-column type codes.
    pub column_types: Vec<ColumnType>,
    /// Per-column metadata, layout depends on the type.
    pub column_metadata: Vec<u16>,
    /// Columns that may be NULL.
    pub null_bitmap: Vec<u8>,
}

impl TableMapEvent {
    /// Number of JSON columns; partial-update bitmaps are sized by it.
    pub fn json_column_count(&self) -> usize {
        self.column_types
            .iter()
            .filter(|t| **t == ColumnType::Json)
            .count()
    }

    fn decode_metadata(&mut self, data: &[u8]) -> Result<usize> {
        let mut pos = 0;
        self.column_metadata = Vec::with_capacity(self.column_types.len());

        for t in &self.column_types {
            let need = |n: usize| -> Result<()> {
                if data.len() < pos + n {
                    Err(Error::InvalidBuffer("table map metadata truncated".into()))
                } else {
                    Ok(())
                }
            };
            let meta = match t {
                // Big-endian pair: real type in the high byte.
                ColumnType::String | ColumnType::NewDecimal => {
                    need(2)?;
                    let x = u16::from(data[pos]) << 8 | u16::from(data[pos + 1]);
                    pos += 2;
                    x
                }
                ColumnType::Varchar | ColumnType::VarString | ColumnType::Bit => {
                    need(2)?;
                    let x = codec::parse_binary_u16(&data[pos..])?;
                    pos += 2;
                    x
                }
                ColumnType::Blob
                | ColumnType::Float
                | ColumnType::Double
                | ColumnType::Json
                | ColumnType::Geometry
                | ColumnType::Time2
                | ColumnType::DateTime2
                | ColumnType::Timestamp2 => {
                    need(1)?;
                    let x = u16::from(data[pos]);
                    pos += 1;
                    x
                }
                // These never appear as table-map column types; the server
                // encodes them through STRING or BLOB.
                ColumnType::NewDate
                | ColumnType::Enum
                | ColumnType::Set
                | ColumnType::TinyBlob
                | ColumnType::MediumBlob
                | ColumnType::LongBlob => {
                    return Err(Error::MalformedEvent(format!(
                        "unsupported column type {t:?} in table map"
                    )));
                }
                _ => 0,
            };
            self.column_metadata.push(meta);
        }

        Ok(pos)
    }
}

impl Event for TableMapEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if self.table_id_size == 0 {
            self.table_id_size = 6;
        }

        let need = |pos: usize, n: usize| -> Result<()> {
            if data.len() < pos + n {
                Err(Error::MalformedEvent(format!(
                    "table map truncated at byte {pos}"
                )))
            } else {
                Ok(())
            }
        };

        need(0, self.table_id_size + 2)?;
        self.table_id = codec::fixed_length_int(&data[..self.table_id_size]);
        let mut pos = self.table_id_size;
        self.flags = codec::parse_binary_u16(&data[pos..])?;
        pos += 2;

        need(pos, 1)?;
        let schema_length = usize::from(data[pos]);
        pos += 1;
        need(pos, schema_length + 1)?;
        self.schema_name = String::from_utf8_lossy(&data[pos..pos + schema_length]).into_owned();
        pos += schema_length + 1; // trailing 0x00

        need(pos, 1)?;
        let table_length = usize::from(data[pos]);
        pos += 1;
        need(pos, table_length + 1)?;
        self.table_name = String::from_utf8_lossy(&data[pos..pos + table_length]).into_owned();
        pos += table_length + 1; // trailing 0x00

        let (count, _, n) = codec::length_encoded_int(&data[pos..])?;
        pos += n;
        self.column_count = count as usize;

        need(pos, self.column_count)?;
        self.column_types = data[pos..pos + self.column_count]
            .iter()
            .map(|b| ColumnType::from_u8(*b))
            .collect();
        pos += self.column_count;

        let (metadata_length, _, n) = codec::length_encoded_int(&data[pos..])?;
        pos += n;
        need(pos, metadata_length as usize)?;
        let consumed = self.decode_metadata(&data[pos..pos + metadata_length as usize])?;
        if consumed != metadata_length as usize {
            return Err(Error::MalformedEvent(format!(
                "table map metadata length {metadata_length} but consumed {consumed}"
            )));
        }
        pos += metadata_length as usize;

        let bitmap_length = self.column_count.div_ceil(8);
        need(pos, bitmap_length)?;
        self.null_bitmap = data[pos..pos + bitmap_length].to_vec();

        // Optional metadata (signedness, charsets, column names) may
        // follow; it is not needed for decoding row images.
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "TableID: {}", self.table_id)?;
        writeln!(w, "Flags: {}", self.flags)?;
        writeln!(w, "Schema: {}", self.schema_name)?;
        writeln!(w, "Table: {}", self.table_name)?;
        writeln!(w, "Column count: {}", self.column_count)?;
        writeln!(w)
    }
}

/// What a rows event does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowsEventKind {
    /// Row insert.
    #[default]
    Write,
    /// Row update (before and after images).
    Update,
    /// Row delete.
    Delete,
}

/// One decoded row: the before image for deletes, the after image for
/// writes, both for updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowImage {
    /// Pre-change column values (UPDATE / DELETE).
    pub before: Option<Vec<ColumnValue>>,
    /// Post-change column values (WRITE / UPDATE).
    pub after: Option<Vec<ColumnValue>>,
}

/// WRITE/UPDATE/DELETE rows event, any version, including the
/// partial-JSON update variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowsEvent {
    /// Write, update or delete.
    pub kind: RowsEventKind,
    /// Wire version (0, 1 or 2).
    pub version: u8,
    /// Whether this is a PARTIAL_UPDATE_ROWS_EVENT.
    pub partial: bool,
    /// Width of the table id field; set by the stream driver.
    pub table_id_size: usize,
    /// Table map for this event's table; attached by the stream driver.
    pub table: Option<Arc<TableMapEvent>>,
    /// JSON decoding options; set by the stream driver.
    pub json_options: JsonDecodeOptions,
    /// Table id.
    pub table_id: u64,
    /// Event flags.
    pub flags: u16,
    /// Raw v2 extra data.
    pub extra_data: Vec<u8>,
    /// Number of columns in the table.
    pub column_count: usize,
    /// Present-columns bitmap of the first image.
    pub columns_present_bitmap1: Vec<u8>,
    /// Present-columns bitmap of the second image (updates only).
    pub columns_present_bitmap2: Option<Vec<u8>>,
    /// Decoded rows.
    pub rows: Vec<RowImage>,
}

#[derive(Clone, Copy, PartialEq)]
enum RowImageType {
    WriteAfter,
    DeleteBefore,
    UpdateBefore,
    UpdateAfter,
}

impl RowsEvent {
    /// Configures kind, version and partial flag from the event type.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        use EventType::*;
        (self.kind, self.version) = match event_type {
            WriteRowsV0 => (RowsEventKind::Write, 0),
            UpdateRowsV0 => (RowsEventKind::Update, 0),
            DeleteRowsV0 => (RowsEventKind::Delete, 0),
            WriteRowsV1 => (RowsEventKind::Write, 1),
            UpdateRowsV1 => (RowsEventKind::Update, 1),
            DeleteRowsV1 => (RowsEventKind::Delete, 1),
            WriteRowsV2 => (RowsEventKind::Write, 2),
            UpdateRowsV2 | PartialUpdateRows => (RowsEventKind::Update, 2),
            DeleteRowsV2 => (RowsEventKind::Delete, 2),
            _ => (RowsEventKind::Write, 2),
        };
        self.partial = event_type == PartialUpdateRows;
        self
    }

    fn table(&self) -> Result<&TableMapEvent> {
        self.table.as_deref().ok_or_else(|| {
            Error::MalformedEvent(format!(
                "no table map event for table id {}",
                self.table_id
            ))
        })
    }

    fn decode_image(
        &self,
        data: &[u8],
        bitmap: &[u8],
        image_type: RowImageType,
    ) -> Result<(Vec<ColumnValue>, usize)> {
        let table = self.table()?;
        let mut pos = 0;

        // The after image of a partial update leads with its own value
        // options and, when partial JSON is on, a bitmap over the JSON
        // columns telling which arrive as diffs.
        let mut partial_bitmap: Option<&[u8]> = None;
        if self.partial && image_type == RowImageType::UpdateAfter {
            let (options, _, n) = codec::length_encoded_int(&data[pos..])?;
            pos += n;
            if options & PARTIAL_JSON_UPDATES != 0 {
                let byte_count = table.json_column_count().div_ceil(8);
                if data.len() < pos + byte_count {
                    return Err(Error::MalformedEvent("partial bitmap truncated".into()));
                }
                partial_bitmap = Some(&data[pos..pos + byte_count]);
                pos += byte_count;
            }
        }

        let present_count = codec::bit_count(bitmap);
        let null_bitmap_length = present_count.div_ceil(8);
        if data.len() < pos + null_bitmap_length {
            return Err(Error::MalformedEvent("row null bitmap truncated".into()));
        }
        let null_bitmap = &data[pos..pos + null_bitmap_length];
        pos += null_bitmap_length;

        let mut values = Vec::with_capacity(present_count);
        let mut null_index = 0;
        let mut json_index = 0;

        for column in 0..self.column_count {
            if !codec::is_bit_set(bitmap, column) {
                continue;
            }

            let column_type = table
                .column_types
                .get(column)
                .copied()
                .unwrap_or(ColumnType::VarString);
            let is_partial_json = column_type == ColumnType::Json && {
                let partial = partial_bitmap
                    .map(|b| codec::is_bit_set(b, json_index))
                    .unwrap_or(false);
                json_index += 1;
                partial
            };

            if codec::is_bit_set(null_bitmap, null_index) {
                values.push(ColumnValue::Null);
                null_index += 1;
                continue;
            }
            null_index += 1;

            let meta = table.column_metadata.get(column).copied().unwrap_or(0);
            let (value, n) = decode_column_value(
                &data[pos..],
                column_type,
                meta,
                is_partial_json,
                self.json_options,
            )?;
            trace!(column, ?column_type, consumed = n, "decoded column");
            values.push(value);
            pos += n;
        }

        Ok((values, pos))
    }
}

impl Event for RowsEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if self.table_id_size == 0 {
            self.table_id_size = 6;
        }

        if data.len() < self.table_id_size + 2 {
            return Err(Error::MalformedEvent(format!(
                "rows event too short: {} bytes",
                data.len()
            )));
        }

        self.table_id = codec::fixed_length_int(&data[..self.table_id_size]);
        let mut pos = self.table_id_size;
        self.flags = codec::parse_binary_u16(&data[pos..])?;
        pos += 2;

        if self.version == 2 {
            if data.len() < pos + 2 {
                return Err(Error::MalformedEvent("rows event misses extra data length".into()));
            }
            let extra_length = usize::from(codec::parse_binary_u16(&data[pos..])?);
            pos += 2;
            if extra_length < 2 || data.len() < pos + extra_length - 2 {
                return Err(Error::MalformedEvent("rows event extra data truncated".into()));
            }
            self.extra_data = data[pos..pos + extra_length - 2].to_vec();
            pos += extra_length - 2;
        }

        let (count, _, n) = codec::length_encoded_int(&data[pos..])?;
        pos += n;
        self.column_count = count as usize;

        let bitmap_length = self.column_count.div_ceil(8);
        if data.len() < pos + bitmap_length {
            return Err(Error::MalformedEvent("rows event bitmap truncated".into()));
        }
        self.columns_present_bitmap1 = data[pos..pos + bitmap_length].to_vec();
        pos += bitmap_length;

        if self.kind == RowsEventKind::Update && self.version > 0 {
            if data.len() < pos + bitmap_length {
                return Err(Error::MalformedEvent("rows event bitmap truncated".into()));
            }
            self.columns_present_bitmap2 = Some(data[pos..pos + bitmap_length].to_vec());
            pos += bitmap_length;
        }

        self.rows = Vec::new();
        while pos < data.len() {
            match self.kind {
                RowsEventKind::Write => {
                    let (after, n) = self.decode_image(
                        &data[pos..],
                        &self.columns_present_bitmap1,
                        RowImageType::WriteAfter,
                    )?;
                    pos += n;
                    self.rows.push(RowImage {
                        before: None,
                        after: Some(after),
                    });
                }
                RowsEventKind::Delete => {
                    let (before, n) = self.decode_image(
                        &data[pos..],
                        &self.columns_present_bitmap1,
                        RowImageType::DeleteBefore,
                    )?;
                    pos += n;
                    self.rows.push(RowImage {
                        before: Some(before),
                        after: None,
                    });
                }
                RowsEventKind::Update => {
                    let (before, n) = self.decode_image(
                        &data[pos..],
                        &self.columns_present_bitmap1,
                        RowImageType::UpdateBefore,
                    )?;
                    pos += n;
                    let bitmap2 = self
                        .columns_present_bitmap2
                        .clone()
                        .unwrap_or_else(|| self.columns_present_bitmap1.clone());
                    let (after, n) = self.decode_image(
                        &data[pos..],
                        &bitmap2,
                        RowImageType::UpdateAfter,
                    )?;
                    pos += n;
                    self.rows.push(RowImage {
                        before: Some(before),
                        after: Some(after),
                    });
                }
            }
        }

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "TableID: {}", self.table_id)?;
        writeln!(w, "Kind: {:?} v{}", self.kind, self.version)?;
        writeln!(w, "Flags: {}", self.flags)?;
        writeln!(w, "Column count: {}", self.column_count)?;
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(before) = &row.before {
                writeln!(w, "Row[{i}].before: {before:?}")?;
            }
            if let Some(after) = &row.after {
                writeln!(w, "Row[{i}].after: {after:?}")?;
            }
        }
        writeln!(w)
    }
}

fn need(data: &[u8], n: usize, what: &str) -> Result<()> {
    if data.len() < n {
        Err(Error::InvalidBuffer(format!(
            "{what}: need {n} bytes, got {}",
            data.len()
        )))
    } else {
        Ok(())
    }
}

fn decode_length_prefixed_string(data: &[u8], max_length: u16) -> Result<(ColumnValue, usize)> {
    let (length, prefix) = if max_length < 256 {
        need(data, 1, "string length")?;
        (usize::from(data[0]), 1)
    } else {
        need(data, 2, "string length")?;
        (usize::from(codec::parse_binary_u16(data)?), 2)
    };
    need(data, prefix + length, "string body")?;
    Ok((
        ColumnValue::String(String::from_utf8_lossy(&data[prefix..prefix + length]).into_owned()),
        prefix + length,
    ))
}

fn decode_fractional_seconds(data: &[u8], dec: u16) -> Result<(u32, usize)> {
    match dec {
        1 | 2 => {
            need(data, 1, "fractional seconds")?;
            Ok((u32::from(data[0]) * 10_000, 1))
        }
        3 | 4 => {
            need(data, 2, "fractional seconds")?;
            Ok((
                codec::big_endian_fixed_length_int(&data[..2]) as u32 * 100,
                2,
            ))
        }
        5 | 6 => {
            need(data, 3, "fractional seconds")?;
            Ok((codec::big_endian_fixed_length_int(&data[..3]) as u32, 3))
        }
        _ => Ok((0, 0)),
    }
}

fn decode_column_value(
    data: &[u8],
    column_type: ColumnType,
    meta: u16,
    is_partial_json: bool,
    json_options: JsonDecodeOptions,
) -> Result<(ColumnValue, usize)> {
    use ColumnType::*;

    match column_type {
        Tiny => {
            need(data, 1, "tinyint")?;
            Ok((ColumnValue::SignedInt(i64::from(data[0] as i8)), 1))
        }
        Short => Ok((
            ColumnValue::SignedInt(i64::from(codec::parse_binary_i16(data)?)),
            2,
        )),
        Int24 => {
            need(data, 3, "mediumint")?;
            let raw = codec::fixed_length_int(&data[..3]) as u32;
            let value = if raw & 0x0080_0000 != 0 {
                (raw | 0xff00_0000) as i32
            } else {
                raw as i32
            };
            Ok((ColumnValue::SignedInt(i64::from(value)), 3))
        }
        Long => Ok((
            ColumnValue::SignedInt(i64::from(codec::parse_binary_i32(data)?)),
            4,
        )),
        LongLong => Ok((ColumnValue::SignedInt(codec::parse_binary_i64(data)?), 8)),
        Float => Ok((ColumnValue::Float(codec::parse_binary_f32(data)?), 4)),
        Double => Ok((ColumnValue::Double(codec::parse_binary_f64(data)?), 8)),
        NewDecimal => {
            let precision = usize::from(meta >> 8);
            let scale = usize::from(meta & 0xff);
            let (value, n) = codec::decode_decimal(data, precision, scale)?;
            Ok((ColumnValue::Decimal(value), n))
        }
        Year => {
            need(data, 1, "year")?;
            Ok((ColumnValue::Year(u16::from(data[0]) + 1900), 1))
        }
        Date => {
            need(data, 3, "date")?;
            let packed = codec::fixed_length_int(&data[..3]) as u32;
            Ok((
                ColumnValue::Date {
                    year: (packed >> 9) as u16,
                    month: ((packed >> 5) & 0x0f) as u8,
                    day: (packed & 0x1f) as u8,
                },
                3,
            ))
        }
        Time => {
            need(data, 3, "time")?;
            let packed = codec::fixed_length_int(&data[..3]) as i64;
            Ok((
                ColumnValue::Time {
                    negative: false,
                    hours: (packed / 10_000) as u16,
                    minutes: ((packed % 10_000) / 100) as u8,
                    seconds: (packed % 100) as u8,
                    microseconds: 0,
                },
                3,
            ))
        }
        Time2 => decode_time2(data, meta),
        DateTime => {
            let packed = codec::parse_binary_u64(data)?;
            let date = packed / 1_000_000;
            let time = packed % 1_000_000;
            Ok((
                ColumnValue::DateTime {
                    year: (date / 10_000) as u16,
                    month: ((date % 10_000) / 100) as u8,
                    day: (date % 100) as u8,
                    hour: (time / 10_000) as u8,
                    minute: ((time % 10_000) / 100) as u8,
                    second: (time % 100) as u8,
                    microseconds: 0,
                },
                8,
            ))
        }
        DateTime2 => decode_datetime2(data, meta),
        Timestamp => Ok((
            ColumnValue::Timestamp {
                seconds: codec::parse_binary_u32(data)?,
                microseconds: 0,
            },
            4,
        )),
        Timestamp2 => {
            need(data, 4, "timestamp2")?;
            let seconds = codec::big_endian_fixed_length_int(&data[..4]) as u32;
            let (micros, n) = decode_fractional_seconds(&data[4..], meta)?;
            Ok((
                ColumnValue::Timestamp {
                    seconds,
                    microseconds: micros,
                },
                4 + n,
            ))
        }
        Varchar | VarString => decode_length_prefixed_string(data, meta),
        String => {
            // meta >= 256 packs the real type and length; ENUM and SET
            // are transported this way.
            let (real_type, length) = if meta >= 256 {
                let b0 = (meta >> 8) as u8;
                let b1 = meta & 0xff;
                if b0 & 0x30 != 0x30 {
                    (
                        ColumnType::from_u8(b0 | 0x30),
                        b1 | u16::from((b0 & 0x30) ^ 0x30) << 4,
                    )
                } else {
                    (ColumnType::from_u8(b0), b1)
                }
            } else {
                (ColumnType::String, meta)
            };

            match real_type {
                Enum => match length {
                    1 => {
                        need(data, 1, "enum")?;
                        Ok((ColumnValue::Enum(u16::from(data[0])), 1))
                    }
                    2 => Ok((ColumnValue::Enum(codec::parse_binary_u16(data)?), 2)),
                    _ => Err(Error::MalformedEvent(format!(
                        "unexpected enum length {length}"
                    ))),
                },
                Set => {
                    let byte_count = usize::from(length).div_ceil(8).max(1);
                    need(data, byte_count, "set")?;
                    Ok((
                        ColumnValue::Set(codec::fixed_length_int(&data[..byte_count])),
                        byte_count,
                    ))
                }
                _ => decode_length_prefixed_string(data, length),
            }
        }
        Bit => {
            let bits = usize::from(meta >> 8) * 8 + usize::from(meta & 0xff);
            let byte_count = bits.div_ceil(8);
            need(data, byte_count, "bit")?;
            Ok((ColumnValue::Bit(data[..byte_count].to_vec()), byte_count))
        }
        Enum => match meta {
            1 => {
                need(data, 1, "enum")?;
                Ok((ColumnValue::Enum(u16::from(data[0])), 1))
            }
            _ => Ok((ColumnValue::Enum(codec::parse_binary_u16(data)?), 2)),
        },
        Set => {
            let byte_count = usize::from(meta).max(1);
            need(data, byte_count, "set")?;
            Ok((
                ColumnValue::Set(codec::fixed_length_int(&data[..byte_count])),
                byte_count,
            ))
        }
        TinyBlob | MediumBlob | LongBlob | Blob | Geometry => {
            let prefix = usize::from(meta).clamp(1, 4);
            need(data, prefix, "blob length")?;
            let length = codec::fixed_length_int(&data[..prefix]) as usize;
            need(data, prefix + length, "blob body")?;
            Ok((
                ColumnValue::Bytes(data[prefix..prefix + length].to_vec()),
                prefix + length,
            ))
        }
        Json => {
            let prefix = usize::from(meta).clamp(1, 4);
            need(data, prefix, "json length")?;
            let length = codec::fixed_length_int(&data[..prefix]) as usize;
            need(data, prefix + length, "json body")?;
            let payload = &data[prefix..prefix + length];
            let value = if is_partial_json {
                ColumnValue::JsonDiffs(decode_json_diffs(payload, json_options)?)
            } else {
                ColumnValue::Json(decode_json_binary(payload, json_options)?)
            };
            Ok((value, prefix + length))
        }
        Null => Ok((ColumnValue::Null, 0)),
        _ => Err(Error::MalformedEvent(format!(
            "don't know how to decode column type {column_type:?}"
        ))),
    }
}

fn decode_time2(data: &[u8], dec: u16) -> Result<(ColumnValue, usize)> {
    const INT_OFFSET: i64 = 0x80_0000;
    const FULL_OFFSET: i64 = 0x8000_0000_0000;

    let total = 3 + (usize::from(dec) + 1) / 2;
    need(data, total, "time2")?;

    let tmp: i64 = match dec {
        1 | 2 => {
            let mut int_part = codec::big_endian_fixed_length_int(&data[..3]) as i64 - INT_OFFSET;
            let mut frac = i64::from(data[3]);
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x100;
            }
            (int_part << 24) + frac * 10_000
        }
        3 | 4 => {
            let mut int_part = codec::big_endian_fixed_length_int(&data[..3]) as i64 - INT_OFFSET;
            let mut frac = codec::big_endian_fixed_length_int(&data[3..5]) as i64;
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x1_0000;
            }
            (int_part << 24) + frac * 100
        }
        5 | 6 => codec::big_endian_fixed_length_int(&data[..6]) as i64 - FULL_OFFSET,
        _ => {
            let int_part = codec::big_endian_fixed_length_int(&data[..3]) as i64 - INT_OFFSET;
            int_part << 24
        }
    };

    let (negative, v) = if tmp < 0 { (true, -tmp) } else { (false, tmp) };
    let hms = v >> 24;
    Ok((
        ColumnValue::Time {
            negative,
            hours: ((hms >> 12) & ((1 << 10) - 1)) as u16,
            minutes: ((hms >> 6) & ((1 << 6) - 1)) as u8,
            seconds: (hms & ((1 << 6) - 1)) as u8,
            microseconds: (v % (1 << 24)) as u32,
        },
        total,
    ))
}

fn decode_datetime2(data: &[u8], dec: u16) -> Result<(ColumnValue, usize)> {
    const OFFSET: i64 = 0x80_0000_0000;

    let total = 5 + (usize::from(dec) + 1) / 2;
    need(data, total, "datetime2")?;

    let int_part = codec::big_endian_fixed_length_int(&data[..5]) as i64 - OFFSET;
    let (micros, _) = decode_fractional_seconds(&data[5..], dec)?;

    if int_part == 0 {
        return Ok((
            ColumnValue::DateTime {
                year: 0,
                month: 0,
                day: 0,
                hour: 0,
                minute: 0,
                second: 0,
                microseconds: micros,
            },
            total,
        ));
    }

    let ymdhms = int_part.abs();
    let ymd = ymdhms >> 17;
    let ym = ymd >> 5;
    let hms = ymdhms % (1 << 17);

    Ok((
        ColumnValue::DateTime {
            year: (ym / 13) as u16,
            month: (ym % 13) as u8,
            day: (ymd % (1 << 5)) as u8,
            hour: (hms >> 12) as u8,
            minute: ((hms >> 6) % (1 << 6)) as u8,
            second: (hms % (1 << 6)) as u8,
            microseconds: micros,
        },
        total,
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn table_map_body(
        table_id: u64,
        schema: &str,
        table: &str,
        column_types: &[(u8, &[u8])],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[..6]);
        body.extend_from_slice(&1u16.to_le_bytes());
        body.push(schema.len() as u8);
        body.extend_from_slice(schema.as_bytes());
        body.push(0);
        body.push(table.len() as u8);
        body.extend_from_slice(table.as_bytes());
        body.push(0);
        body.push(column_types.len() as u8);
        for (t, _) in column_types {
            body.push(*t);
        }
        let metadata: Vec<u8> = column_types
            .iter()
            .flat_map(|(_, m)| m.iter().copied())
            .collect();
        body.push(metadata.len() as u8);
        body.extend_from_slice(&metadata);
        body.extend_from_slice(&vec![0u8; column_types.len().div_ceil(8)]);
        body
    }

    fn decoded_table(column_types: &[(u8, &[u8])]) -> Arc<TableMapEvent> {
        let mut tme = TableMapEvent::default();
        tme.decode(&table_map_body(42, "test", "t", column_types)).unwrap();
        Arc::new(tme)
    }

    #[test]
    fn test_table_map_decode() {
        let table = decoded_table(&[(3, &[]), (15, &[0x40, 0x00]), (246, &[0x0a, 0x02])]);
        assert_eq!(table.table_id, 42);
        assert_eq!(table.schema_name, "test");
        assert_eq!(table.table_name, "t");
        assert_eq!(table.column_count, 3);
        assert_eq!(table.column_types[0], ColumnType::Long);
        assert_eq!(table.column_types[1], ColumnType::Varchar);
        assert_eq!(table.column_metadata[1], 0x40);
        // NewDecimal meta is a big-endian (precision, scale) pair
        assert_eq!(table.column_metadata[2], 0x0a02);
    }

    #[test]
    fn test_table_map_truncated() {
        let body = table_map_body(42, "test", "t", &[(3, &[])]);
        for cut in [3, 9, 12, body.len() - 1] {
            assert!(TableMapEvent::default().decode(&body[..cut]).is_err());
        }
    }

    fn write_rows_body(column_count: usize, rows: &[&[u8]]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&42u64.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.extend_from_slice(&2u16.to_le_bytes()); // extra data length (just itself)
        body.push(column_count as u8);
        body.extend_from_slice(&vec![0xffu8; column_count.div_ceil(8)]);
        for row in rows {
            body.extend_from_slice(row);
        }
        body
    }

    #[test]
    fn test_write_rows_long_and_varchar() {
        let table = decoded_table(&[(3, &[]), (15, &[0x40, 0x00])]);

        // one row: null bitmap 0x00, id = 7, name = "bob"
        let mut row = vec![0x00];
        row.extend_from_slice(&7i32.to_le_bytes());
        row.push(3);
        row.extend_from_slice(b"bob");

        let mut e = RowsEvent {
            table: Some(table),
            ..Default::default()
        }
        .with_event_type(EventType::WriteRowsV2);
        e.decode(&write_rows_body(2, &[&row])).unwrap();

        assert_eq!(e.table_id, 42);
        assert_eq!(e.rows.len(), 1);
        let after = e.rows[0].after.as_ref().unwrap();
        assert_eq!(after[0], ColumnValue::SignedInt(7));
        assert_eq!(after[1], ColumnValue::String("bob".into()));
        assert!(e.rows[0].before.is_none());
    }

    #[test]
    fn test_write_rows_null_column() {
        let table = decoded_table(&[(3, &[]), (15, &[0x40, 0x00])]);

        // name is NULL: second null-bit set
        let mut row = vec![0b0000_0010];
        row.extend_from_slice(&9i32.to_le_bytes());

        let mut e = RowsEvent {
            table: Some(table),
            ..Default::default()
        }
        .with_event_type(EventType::WriteRowsV2);
        e.decode(&write_rows_body(2, &[&row])).unwrap();

        let after = e.rows[0].after.as_ref().unwrap();
        assert_eq!(after[0], ColumnValue::SignedInt(9));
        assert_eq!(after[1], ColumnValue::Null);
    }

    #[test]
    fn test_update_rows_before_and_after() {
        let table = decoded_table(&[(3, &[])]);

        let mut body = Vec::new();
        body.extend_from_slice(&42u64.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.push(1); // column count
        body.push(0x01); // bitmap 1
        body.push(0x01); // bitmap 2
        body.push(0x00); // before null bitmap
        body.extend_from_slice(&1i32.to_le_bytes());
        body.push(0x00); // after null bitmap
        body.extend_from_slice(&2i32.to_le_bytes());

        let mut e = RowsEvent {
            table: Some(table),
            ..Default::default()
        }
        .with_event_type(EventType::UpdateRowsV2);
        e.decode(&body).unwrap();

        assert_eq!(
            e.rows[0].before.as_ref().unwrap()[0],
            ColumnValue::SignedInt(1)
        );
        assert_eq!(
            e.rows[0].after.as_ref().unwrap()[0],
            ColumnValue::SignedInt(2)
        );
    }

    #[test]
    fn test_rows_without_table_map_fails() {
        let mut e = RowsEvent::default().with_event_type(EventType::WriteRowsV2);
        let body = write_rows_body(1, &[&[0x00, 0x01, 0x00, 0x00, 0x00]]);
        assert!(e.decode(&body).is_err());
    }

    #[test]
    fn test_decode_decimal_column() {
        let (v, n) =
            decode_column_value(&[0x80 | 12, 34], ColumnType::NewDecimal, 0x0402, false, JsonDecodeOptions::default())
                .unwrap();
        assert_eq!(v, ColumnValue::Decimal("12.34".into()));
        assert_eq!(n, 2);
    }

    #[test]
    fn test_decode_datetime2_column() {
        // 2024-03-05 06:07:08, no fractional part
        let ym = 2024i64 * 13 + 3;
        let ymd = (ym << 5) | 5;
        let hms = (6i64 << 12) | (7 << 6) | 8;
        let packed = ((ymd << 17) | hms) + 0x80_0000_0000;
        let mut data = packed.to_be_bytes()[3..].to_vec();
        assert_eq!(data.len(), 5);
        data.push(0xaa); // trailing noise must not be consumed

        let (v, n) =
            decode_column_value(&data, ColumnType::DateTime2, 0, false, JsonDecodeOptions::default())
                .unwrap();
        assert_eq!(n, 5);
        assert_eq!(
            v,
            ColumnValue::DateTime {
                year: 2024,
                month: 3,
                day: 5,
                hour: 6,
                minute: 7,
                second: 8,
                microseconds: 0
            }
        );
    }

    #[test]
    fn test_decode_time2_column() {
        // 01:02:03
        let hms = (1i64 << 12) | (2 << 6) | 3;
        let packed = hms + 0x80_0000;
        let data = packed.to_be_bytes()[5..].to_vec();

        let (v, n) =
            decode_column_value(&data, ColumnType::Time2, 0, false, JsonDecodeOptions::default())
                .unwrap();
        assert_eq!(n, 3);
        assert_eq!(
            v,
            ColumnValue::Time {
                negative: false,
                hours: 1,
                minutes: 2,
                seconds: 3,
                microseconds: 0
            }
        );
    }

    #[test]
    fn test_decode_json_column() {
        // jsonb string "hi" with a 2-byte length prefix (meta = 2)
        let payload = [0x0cu8, 0x02, b'h', b'i'];
        let mut data = (payload.len() as u16).to_le_bytes().to_vec();
        data.extend_from_slice(&payload);

        let (v, n) =
            decode_column_value(&data, ColumnType::Json, 2, false, JsonDecodeOptions::default())
                .unwrap();
        assert_eq!(n, data.len());
        assert_eq!(v, ColumnValue::Json(JsonValue::String("hi".into())));
    }

    #[test]
    fn test_decode_json_column_partial() {
        // a single Remove diff
        let diff = [2u8, 3, b'$', b'.', b'a'];
        let mut data = vec![diff.len() as u8];
        data.extend_from_slice(&diff);

        let (v, _) =
            decode_column_value(&data, ColumnType::Json, 1, true, JsonDecodeOptions::default())
                .unwrap();
        match v {
            ColumnValue::JsonDiffs(diffs) => {
                assert_eq!(diffs.len(), 1);
                assert_eq!(diffs[0].path, "$.a");
            }
            other => panic!("expected JsonDiffs, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_blob_column() {
        let mut data = vec![3u8];
        data.extend_from_slice(b"abc");
        let (v, n) =
            decode_column_value(&data, ColumnType::Blob, 1, false, JsonDecodeOptions::default())
                .unwrap();
        assert_eq!(v, ColumnValue::Bytes(b"abc".to_vec()));
        assert_eq!(n, 4);
    }

    #[test]
    fn test_decode_enum_via_string_meta() {
        // ENUM transported as STRING: high byte 247, length 1
        let meta = (247u16 << 8) | 1;
        let (v, n) =
            decode_column_value(&[2u8], ColumnType::String, meta, false, JsonDecodeOptions::default())
                .unwrap();
        assert_eq!(v, ColumnValue::Enum(2));
        assert_eq!(n, 1);
    }

    #[test]
    fn test_partial_update_rows_with_json_diff() {
        let table = decoded_table(&[(245, &[0x01])]);

        let mut body = Vec::new();
        body.extend_from_slice(&42u64.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.push(1); // column count
        body.push(0x01); // bitmap 1
        body.push(0x01); // bitmap 2

        // before image: full json document "hi"
        body.push(0x00); // null bitmap
        body.push(4); // json length (meta = 1 byte)
        body.extend_from_slice(&[0x0c, 0x02, b'h', b'i']);

        // after image: value options = PARTIAL_JSON, partial bitmap, then
        // a diff vector
        body.push(0x01); // binlog_row_value_options
        body.push(0x01); // partial bitmap: column 0 is partial
        body.push(0x00); // null bitmap
        let diff = [0u8, 3, b'$', b'.', b'a', 3, 0x0c, 0x01, b'x'];
        body.push(diff.len() as u8);
        body.extend_from_slice(&diff);

        let mut e = RowsEvent {
            table: Some(table),
            ..Default::default()
        }
        .with_event_type(EventType::PartialUpdateRows);
        e.decode(&body).unwrap();

        assert!(e.partial);
        let before = e.rows[0].before.as_ref().unwrap();
        assert_eq!(before[0], ColumnValue::Json(JsonValue::String("hi".into())));
        let after = e.rows[0].after.as_ref().unwrap();
        match &after[0] {
            ColumnValue::JsonDiffs(diffs) => {
                assert_eq!(diffs[0].op, super::super::json_diff::JsonDiffOperation::Replace);
                assert_eq!(diffs[0].path, "$.a");
                assert_eq!(diffs[0].value.as_deref(), Some(r#""x""#));
            }
            other => panic!("expected JsonDiffs, got {other:?}"),
        }
    }
}
