//! Format description and log-management events
//!
//! The FORMAT_DESCRIPTION event is the first non-ROTATE event of every
//! binlog file and fixes the decoding context for the rest of the stream:
//! per-event-type header lengths and the checksum algorithm.

use std::io;

use crate::codec;
use crate::error::{Error, Result};

use super::event::Event;
use super::EventHeader;

/// Length of the fixed part of a FORMAT_DESCRIPTION body:
/// version (2) + server version (50) + create timestamp (4) + header
/// length (1).
const FORMAT_DESCRIPTION_FIXED_LEN: usize = 57;

/// Servers of at least these versions write a checksum-algorithm byte and
/// a CRC32 trailer; encoded as `(x * 256 + y) * 256 + z`.
const CHECKSUM_VERSION_PRODUCT_MYSQL: u32 = (5 * 256 + 6) * 256 + 1;
const CHECKSUM_VERSION_PRODUCT_MARIADB: u32 = (5 * 256 + 3) * 256;

/// Checksum algorithm declared by a FORMAT_DESCRIPTION event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// Checksums disabled.
    Off,
    /// Events carry a trailing CRC32.
    Crc32,
    /// Pre-checksum server, nothing to strip.
    #[default]
    Undefined,
}

impl ChecksumAlgorithm {
    /// Maps the wire byte to an algorithm; anything unexpected reads as
    /// undefined.
    pub fn from_u8(b: u8) -> ChecksumAlgorithm {
        match b {
            0 => ChecksumAlgorithm::Off,
            1 => ChecksumAlgorithm::Crc32,
            _ => ChecksumAlgorithm::Undefined,
        }
    }
}

/// `x.y.z[suffix]` → `[x, y, z]`; anything unparsable reads as zero.
fn split_server_version(server: &str) -> [u32; 3] {
    let mut parts = server.split('.');
    let x = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let y = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let z = parts
        .next()
        .map(|p| {
            let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().unwrap_or(0)
        })
        .unwrap_or(0);
    [x, y, z]
}

fn calc_version_product(server: &str) -> u32 {
    let [x, y, z] = split_server_version(server);
    (x * 256 + y) * 256 + z
}

/// FORMAT_DESCRIPTION event: binlog version, server version and the
/// decoding context for every later event in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatDescriptionEvent {
    /// Binlog format version, 4 since MySQL 5.0.
    pub version: u16,
    /// Server version string, at most 50 bytes on the wire.
    pub server_version: String,
    /// Binlog file creation timestamp.
    pub create_timestamp: u32,
    /// Common header length, always 19.
    pub event_header_length: u8,
    /// Post-header length per event type, indexed by `type code - 1`.
    pub event_type_header_lengths: Vec<u8>,
    /// Checksum algorithm for the rest of the stream.
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl FormatDescriptionEvent {
    /// Post-header length for `event_type`, if the table covers it.
    pub fn post_header_length(&self, event_type: super::EventType) -> Option<u8> {
        let code = event_type.code();
        if code == 0 {
            return None;
        }
        self.event_type_header_lengths.get(usize::from(code) - 1).copied()
    }
}

impl Event for FormatDescriptionEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < FORMAT_DESCRIPTION_FIXED_LEN {
            return Err(Error::MalformedEvent(format!(
                "format description too short: {} bytes",
                data.len()
            )));
        }

        self.version = codec::parse_binary_u16(&data[0..])?;

        let raw_version = &data[2..52];
        let end = raw_version.iter().position(|&b| b == 0).unwrap_or(50);
        self.server_version = String::from_utf8_lossy(&raw_version[..end]).into_owned();

        self.create_timestamp = codec::parse_binary_u32(&data[52..])?;
        self.event_header_length = data[56];
        if self.event_header_length != EventHeader::SIZE as u8 {
            return Err(Error::MalformedEvent(format!(
                "invalid event header length {}, must 19",
                self.event_header_length
            )));
        }

        let checksum_product = if self.server_version.to_lowercase().contains("mariadb") {
            CHECKSUM_VERSION_PRODUCT_MARIADB
        } else {
            CHECKSUM_VERSION_PRODUCT_MYSQL
        };

        if calc_version_product(&self.server_version) >= checksum_product {
            // Last five bytes are the algorithm byte plus the event's own
            // CRC32 trailer.
            if data.len() < FORMAT_DESCRIPTION_FIXED_LEN + 5 {
                return Err(Error::MalformedEvent(
                    "format description misses checksum suffix".into(),
                ));
            }
            self.checksum_algorithm = ChecksumAlgorithm::from_u8(data[data.len() - 5]);
            self.event_type_header_lengths =
                data[FORMAT_DESCRIPTION_FIXED_LEN..data.len() - 5].to_vec();
        } else {
            self.checksum_algorithm = ChecksumAlgorithm::Undefined;
            self.event_type_header_lengths = data[FORMAT_DESCRIPTION_FIXED_LEN..].to_vec();
        }

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Version: {}", self.version)?;
        writeln!(w, "Server version: {}", self.server_version)?;
        writeln!(w, "Checksum algorithm: {:?}", self.checksum_algorithm)?;
        writeln!(w)
    }
}

/// ROTATE event: the stream continues in another log file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotateEvent {
    /// Position to resume from in the next file.
    pub position: u64,
    /// Name of the next log file.
    pub next_log_name: String,
}

impl Event for RotateEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 8 {
            return Err(Error::MalformedEvent(format!(
                "rotate event too short: {} bytes",
                data.len()
            )));
        }
        self.position = codec::parse_binary_u64(&data[0..])?;
        self.next_log_name = String::from_utf8_lossy(&data[8..])
            .trim_end_matches('\0')
            .to_string();
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Position: {}", self.position)?;
        writeln!(w, "Next log name: {}", self.next_log_name)?;
        writeln!(w)
    }
}

/// PREVIOUS_GTIDS event: the GTID sets executed before this binlog file,
/// printed in textual form. Understands both the classic and the MySQL
/// 8.3+ tagged encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviousGtidsEvent {
    /// Textual GTID set.
    pub gtid_sets: String,
}

#[derive(PartialEq)]
enum GtidFormat {
    Classic,
    Tagged,
}

/// Decodes the leading 8-byte `(format, sid count)` word. Byte 7 equal to
/// one signals the tagged format, which masks the count into bytes 1..=6.
fn decode_sid_count(data: &[u8]) -> (GtidFormat, u64) {
    if data[7] == 1 {
        let mut masked = [0u8; 8];
        masked[..6].copy_from_slice(&data[1..7]);
        (GtidFormat::Tagged, codec::fixed_length_int(&masked))
    } else {
        (GtidFormat::Classic, codec::fixed_length_int(&data[..8]))
    }
}

impl Event for PreviousGtidsEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 8 {
            return Err(Error::MalformedEvent(format!(
                "previous gtids event too short: {} bytes",
                data.len()
            )));
        }

        let (format, sid_count) = decode_sid_count(data);
        let mut pos = 8;

        let mut buf = String::new();
        let mut set_count = 0usize;
        let need = |pos: usize, n: usize| -> Result<()> {
            if data.len() < pos + n {
                Err(Error::InvalidBuffer(format!(
                    "previous gtids truncated at byte {pos}"
                )))
            } else {
                Ok(())
            }
        };

        for _ in 0..sid_count {
            need(pos, 16)?;
            let sid = uuid::Uuid::from_slice(&data[pos..pos + 16])
                .map_err(|e| Error::InvalidBuffer(format!("bad sid bytes: {e}")))?;
            pos += 16;

            let mut tag = String::new();
            if format == GtidFormat::Tagged {
                need(pos, 1)?;
                let tag_length = usize::from(data[pos]) / 2;
                pos += 1;
                if tag_length > 0 {
                    need(pos, tag_length)?;
                    tag = String::from_utf8_lossy(&data[pos..pos + tag_length]).into_owned();
                    pos += tag_length;
                }
            }

            // A tagged entry extends the previous UUID's set rather than
            // starting a new one.
            if !tag.is_empty() {
                buf.push(':');
                buf.push_str(&tag);
            } else {
                if set_count != 0 {
                    buf.push(',');
                }
                buf.push_str(&sid.to_string());
                set_count += 1;
            }

            need(pos, 8)?;
            let slice_count = codec::fixed_length_int(&data[pos..pos + 8]);
            pos += 8;
            for _ in 0..slice_count {
                need(pos, 16)?;
                let start = codec::fixed_length_int(&data[pos..pos + 8]);
                let stop = codec::fixed_length_int(&data[pos + 8..pos + 16]);
                pos += 16;
                buf.push(':');
                if stop == start + 1 {
                    buf.push_str(&start.to_string());
                } else {
                    buf.push_str(&format!("{start}-{}", stop - 1));
                }
            }
        }

        self.gtid_sets = buf;
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Previous GTID Event: {}", self.gtid_sets)?;
        writeln!(w)
    }
}

/// Kind of an INTVAR event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IntVarEventType {
    /// Unset.
    #[default]
    Invalid,
    /// `LAST_INSERT_ID()` value.
    LastInsertId,
    /// `AUTO_INCREMENT` value.
    InsertId,
}

/// INTVAR event: auto-increment context for the following statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntVarEvent {
    /// Which variable the value applies to.
    pub kind: IntVarEventType,
    /// The value.
    pub value: u64,
}

impl Event for IntVarEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 9 {
            return Err(Error::MalformedEvent(format!(
                "intvar event too short: {} bytes",
                data.len()
            )));
        }
        self.kind = match data[0] {
            1 => IntVarEventType::LastInsertId,
            2 => IntVarEventType::InsertId,
            _ => IntVarEventType::Invalid,
        };
        self.value = codec::parse_binary_u64(&data[1..])?;
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Type: {:?}", self.kind)?;
        writeln!(w, "Value: {}", self.value)
    }
}
