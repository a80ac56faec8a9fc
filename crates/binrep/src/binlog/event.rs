//! Event capability trait and the decoded-event union

use std::io;
use std::sync::Arc;

use crate::error::Result;

use super::format::{FormatDescriptionEvent, IntVarEvent, PreviousGtidsEvent, RotateEvent};
use super::gtid_event::{GtidEvent, MariadbGtidEvent, MariadbGtidListEvent};
use super::header::EventHeader;
use super::query::{
    BeginLoadQueryEvent, ExecuteLoadQueryEvent, MariadbAnnotateRowsEvent,
    MariadbBinlogCheckPointEvent, QueryEvent, RowsQueryEvent, XidEvent,
};
use super::rows::{RowsEvent, TableMapEvent};

/// Capability set of every event decoder: fill from body bytes, and print
/// a human-readable dump.
pub trait Event {
    /// Decodes the event from its body (header and checksum stripped).
    fn decode(&mut self, data: &[u8]) -> Result<()>;

    /// Writes a human-readable rendering, `mysqlbinlog`-style.
    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()>;
}

/// An event this crate has no decoder for; the raw body is surfaced so
/// consumers can decide what to do with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownEvent {
    /// Raw body bytes.
    pub data: Vec<u8>,
}

impl Event for UnknownEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Unknown event, {} bytes", self.data.len())?;
        writeln!(w)
    }
}

/// Decoded body of a binlog event, tagged by what it is.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// FORMAT_DESCRIPTION.
    FormatDescription(FormatDescriptionEvent),
    /// ROTATE.
    Rotate(RotateEvent),
    /// PREVIOUS_GTIDS, classic or tagged.
    PreviousGtids(PreviousGtidsEvent),
    /// QUERY, including MariaDB compressed queries.
    Query(QueryEvent),
    /// XID (transaction commit).
    Xid(XidEvent),
    /// GTID, ANONYMOUS_GTID or GTID_TAGGED.
    Gtid(GtidEvent),
    /// MariaDB GTID.
    MariadbGtid(MariadbGtidEvent),
    /// MariaDB GTID_LIST.
    MariadbGtidList(MariadbGtidListEvent),
    /// MariaDB ANNOTATE_ROWS.
    MariadbAnnotateRows(MariadbAnnotateRowsEvent),
    /// MariaDB BINLOG_CHECKPOINT.
    MariadbBinlogCheckPoint(MariadbBinlogCheckPointEvent),
    /// INTVAR.
    IntVar(IntVarEvent),
    /// TABLE_MAP; shared with the driver's table cache.
    TableMap(Arc<TableMapEvent>),
    /// WRITE/UPDATE/DELETE rows, any version.
    Rows(RowsEvent),
    /// ROWS_QUERY.
    RowsQuery(RowsQueryEvent),
    /// BEGIN_LOAD_QUERY.
    BeginLoadQuery(BeginLoadQueryEvent),
    /// EXECUTE_LOAD_QUERY.
    ExecuteLoadQuery(ExecuteLoadQueryEvent),
    /// HEARTBEAT; carries nothing.
    Heartbeat,
    /// Event type without a decoder, surfaced raw.
    Unknown(UnknownEvent),
    /// Body decode failed and the driver is configured to surface rather
    /// than fail; carries the error text and the raw body.
    DecodeError {
        /// Why decoding failed.
        message: String,
        /// Raw body bytes.
        data: Vec<u8>,
    },
}

impl EventData {
    /// Writes the event's human-readable rendering.
    pub fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        match self {
            EventData::FormatDescription(e) => e.dump(w),
            EventData::Rotate(e) => e.dump(w),
            EventData::PreviousGtids(e) => e.dump(w),
            EventData::Query(e) => e.dump(w),
            EventData::Xid(e) => e.dump(w),
            EventData::Gtid(e) => e.dump(w),
            EventData::MariadbGtid(e) => e.dump(w),
            EventData::MariadbGtidList(e) => e.dump(w),
            EventData::MariadbAnnotateRows(e) => e.dump(w),
            EventData::MariadbBinlogCheckPoint(e) => e.dump(w),
            EventData::IntVar(e) => e.dump(w),
            EventData::TableMap(e) => e.dump(w),
            EventData::Rows(e) => e.dump(w),
            EventData::RowsQuery(e) => e.dump(w),
            EventData::BeginLoadQuery(e) => e.dump(w),
            EventData::ExecuteLoadQuery(e) => e.dump(w),
            EventData::Heartbeat => writeln!(w, "Heartbeat"),
            EventData::Unknown(e) => e.dump(w),
            EventData::DecodeError { message, data } => {
                writeln!(w, "Decode error: {message} ({} raw bytes)", data.len())
            }
        }
    }
}

/// One decoded binlog record: raw bytes, header, and typed body.
///
/// `raw_data` is an owned copy of the whole record including header and
/// any checksum trailer, so events may be retained after the read buffer
/// is reused.
#[derive(Debug, Clone, PartialEq)]
pub struct BinlogEvent {
    /// The whole record as read from the wire.
    pub raw_data: Vec<u8>,
    /// Decoded header.
    pub header: EventHeader,
    /// Decoded body.
    pub event: EventData,
}

impl BinlogEvent {
    /// Writes header and body dumps.
    pub fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        self.header.dump(w)?;
        self.event.dump(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_event_keeps_raw_bytes() {
        let mut e = UnknownEvent::default();
        e.decode(&[1, 2, 3]).unwrap();
        assert_eq!(e.data, vec![1, 2, 3]);

        let mut out = Vec::new();
        e.dump(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("3 bytes"));
    }
}
