//! Shared byte-level codecs for the MySQL wire and binlog formats
//!
//! Length-encoded integers, fixed-length integers, binary scalar parsing,
//! packed DECIMAL decoding and the MariaDB compressed-block format. All
//! helpers are bounds-checked and never panic on truncated input.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::{Error, Result};

/// Number of decimal digits packed into one 4-byte word.
const DIGITS_PER_INTEGER: usize = 9;

/// Storage bytes for a partial group of 0..=9 decimal digits.
const COMPRESSED_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

fn short(what: &str, need: usize, got: usize) -> Error {
    Error::InvalidBuffer(format!("{what}: need {need} bytes, got {got}"))
}

/// Decodes a MySQL length-encoded integer.
///
/// Returns `(value, is_null, bytes_consumed)`; `0xfb` encodes SQL NULL.
pub fn length_encoded_int(data: &[u8]) -> Result<(u64, bool, usize)> {
    if data.is_empty() {
        return Err(short("length-encoded int", 1, 0));
    }

    match data[0] {
        0xfb => Ok((0, true, 1)),
        0xfc => {
            if data.len() < 3 {
                return Err(short("length-encoded int", 3, data.len()));
            }
            Ok((u64::from(data[1]) | u64::from(data[2]) << 8, false, 3))
        }
        0xfd => {
            if data.len() < 4 {
                return Err(short("length-encoded int", 4, data.len()));
            }
            Ok((
                u64::from(data[1]) | u64::from(data[2]) << 8 | u64::from(data[3]) << 16,
                false,
                4,
            ))
        }
        0xfe => {
            if data.len() < 9 {
                return Err(short("length-encoded int", 9, data.len()));
            }
            Ok((fixed_length_int(&data[1..9]), false, 9))
        }
        b => Ok((u64::from(b), false, 1)),
    }
}

/// Little-endian integer of up to 8 bytes.
pub fn fixed_length_int(data: &[u8]) -> u64 {
    let mut num = 0u64;
    for (i, b) in data.iter().enumerate() {
        num |= u64::from(*b) << (i * 8);
    }
    num
}

/// Big-endian integer of up to 8 bytes.
pub fn big_endian_fixed_length_int(data: &[u8]) -> u64 {
    let mut num = 0u64;
    for b in data {
        num = num << 8 | u64::from(*b);
    }
    num
}

/// Little-endian `i16` from the first two bytes.
pub fn parse_binary_i16(data: &[u8]) -> Result<i16> {
    let raw: [u8; 2] = data
        .get(..2)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| short("i16", 2, data.len()))?;
    Ok(i16::from_le_bytes(raw))
}

/// Little-endian `u16` from the first two bytes.
pub fn parse_binary_u16(data: &[u8]) -> Result<u16> {
    let raw: [u8; 2] = data
        .get(..2)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| short("u16", 2, data.len()))?;
    Ok(u16::from_le_bytes(raw))
}

/// Little-endian `i32` from the first four bytes.
pub fn parse_binary_i32(data: &[u8]) -> Result<i32> {
    let raw: [u8; 4] = data
        .get(..4)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| short("i32", 4, data.len()))?;
    Ok(i32::from_le_bytes(raw))
}

/// Little-endian `u32` from the first four bytes.
pub fn parse_binary_u32(data: &[u8]) -> Result<u32> {
    let raw: [u8; 4] = data
        .get(..4)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| short("u32", 4, data.len()))?;
    Ok(u32::from_le_bytes(raw))
}

/// Little-endian `i64` from the first eight bytes.
pub fn parse_binary_i64(data: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = data
        .get(..8)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| short("i64", 8, data.len()))?;
    Ok(i64::from_le_bytes(raw))
}

/// Little-endian `u64` from the first eight bytes.
pub fn parse_binary_u64(data: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = data
        .get(..8)
        .and_then(|d| d.try_into().ok())
        .ok_or_else(|| short("u64", 8, data.len()))?;
    Ok(u64::from_le_bytes(raw))
}

/// Little-endian IEEE-754 `f32` from the first four bytes.
pub fn parse_binary_f32(data: &[u8]) -> Result<f32> {
    Ok(f32::from_bits(parse_binary_u32(data)?))
}

/// Little-endian IEEE-754 `f64` from the first eight bytes.
pub fn parse_binary_f64(data: &[u8]) -> Result<f64> {
    Ok(f64::from_bits(parse_binary_u64(data)?))
}

/// Whether bit `idx` is set in a little-endian column bitmap.
pub fn is_bit_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap
        .get(idx / 8)
        .is_some_and(|b| b & (1 << (idx % 8)) != 0)
}

/// Number of set bits in a column bitmap.
pub fn bit_count(bitmap: &[u8]) -> usize {
    bitmap.iter().map(|b| b.count_ones() as usize).sum()
}

fn decompress_value(comp_digits: usize, data: &[u8], mask: u8) -> (usize, u32) {
    let size = COMPRESSED_BYTES[comp_digits];
    let mut value = 0u32;
    for b in &data[..size] {
        value = value << 8 | u32::from(b ^ mask);
    }
    (size, value)
}

/// Decodes a packed MySQL DECIMAL value.
///
/// The on-disk format stores nine digits per 4-byte big-endian word with a
/// compressed leading group on each side of the point; negative values are
/// stored bitwise-inverted with the sign in the high bit of the first byte.
/// Returns the textual value and the number of bytes consumed.
pub fn decode_decimal(data: &[u8], precision: usize, scale: usize) -> Result<(String, usize)> {
    let integral = precision - scale;
    let uncomp_integral = integral / DIGITS_PER_INTEGER;
    let uncomp_fractional = scale / DIGITS_PER_INTEGER;
    let comp_integral = integral - uncomp_integral * DIGITS_PER_INTEGER;
    let comp_fractional = scale - uncomp_fractional * DIGITS_PER_INTEGER;

    let bin_size = uncomp_integral * 4
        + COMPRESSED_BYTES[comp_integral]
        + uncomp_fractional * 4
        + COMPRESSED_BYTES[comp_fractional];

    if data.len() < bin_size {
        return Err(short("decimal", bin_size, data.len()));
    }

    let mut buf = data[..bin_size].to_vec();

    // Sign lives in the high bit of the first byte; negative values are
    // stored as the bitwise complement so they sort correctly.
    let negative = buf[0] & 0x80 == 0;
    let mask: u8 = if negative { 0xff } else { 0 };
    let word_mask: u32 = if negative { 0xffff_ffff } else { 0 };
    buf[0] ^= 0x80;

    let mut res = String::with_capacity(precision + 2);
    if negative {
        res.push('-');
    }

    let mut zero_leading = true;
    let (mut pos, value) = decompress_value(comp_integral, &buf, mask);
    if value != 0 {
        zero_leading = false;
        res.push_str(&value.to_string());
    }

    for _ in 0..uncomp_integral {
        let value = big_endian_fixed_length_int(&buf[pos..pos + 4]) as u32 ^ word_mask;
        pos += 4;
        if zero_leading {
            if value != 0 {
                zero_leading = false;
                res.push_str(&value.to_string());
            }
        } else {
            res.push_str(&format!("{value:09}"));
        }
    }

    if zero_leading {
        res.push('0');
    }

    if pos < bin_size {
        res.push('.');

        for _ in 0..uncomp_fractional {
            let value = big_endian_fixed_length_int(&buf[pos..pos + 4]) as u32 ^ word_mask;
            pos += 4;
            res.push_str(&format!("{value:09}"));
        }

        if comp_fractional > 0 {
            let (n, value) = decompress_value(comp_fractional, &buf[pos..], mask);
            pos += n;
            res.push_str(&format!("{value:0width$}", width = comp_fractional));
        }
    }

    Ok((res, pos))
}

/// Decompresses a MariaDB compressed block (compressed query and row
/// events).
///
/// Layout: one header byte whose low three bits give the byte count of the
/// big-endian uncompressed length that follows, then a zlib stream.
pub fn decompress_mariadb_data(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(short("compressed block", 1, 0));
    }

    let len_bytes = usize::from(data[0] & 0x07);
    if data.len() < 1 + len_bytes {
        return Err(short("compressed block header", 1 + len_bytes, data.len()));
    }

    let uncompressed_len = big_endian_fixed_length_int(&data[1..1 + len_bytes]) as usize;

    let mut out = Vec::with_capacity(uncompressed_len);
    let mut decoder = ZlibDecoder::new(&data[1 + len_bytes..]);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::InvalidBuffer(format!("zlib inflate failed: {e}")))?;

    Ok(out)
}
