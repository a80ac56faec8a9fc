//! Binlog event header

use std::io;

use crate::codec;
use crate::error::{Error, Result};

use super::EventType;

/// The fixed 19-byte header carried by every binlog event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Commit timestamp, seconds since the epoch.
    pub timestamp: u32,
    /// Event type code.
    pub event_type: EventType,
    /// Server that wrote the event.
    pub server_id: u32,
    /// Size of the whole record including this header.
    pub event_size: u32,
    /// Position of the next event in the log file.
    pub log_pos: u32,
    /// Event flags.
    pub flags: u16,
}

impl EventHeader {
    /// Wire size of the header.
    pub const SIZE: usize = 19;

    /// Decodes the header from the front of a record.
    pub fn decode(data: &[u8]) -> Result<EventHeader> {
        if data.len() < Self::SIZE {
            return Err(Error::MalformedEvent(format!(
                "header size too short {}, must 19",
                data.len()
            )));
        }

        let header = EventHeader {
            timestamp: codec::parse_binary_u32(&data[0..])?,
            event_type: EventType::from_u8(data[4]),
            server_id: codec::parse_binary_u32(&data[5..])?,
            event_size: codec::parse_binary_u32(&data[9..])?,
            log_pos: codec::parse_binary_u32(&data[13..])?,
            flags: codec::parse_binary_u16(&data[17..])?,
        };

        if header.event_size < Self::SIZE as u32 {
            return Err(Error::MalformedEvent(format!(
                "invalid event size {}, must >= 19",
                header.event_size
            )));
        }

        Ok(header)
    }

    /// Writes a human-readable header summary.
    pub fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "=== {} ===", self.event_type)?;
        writeln!(w, "Timestamp: {}", self.timestamp)?;
        writeln!(w, "Log position: {}", self.log_pos)?;
        writeln!(w, "Event size: {}", self.event_size)
    }
}
