//! Statement-level events: QUERY, XID, load-query and MariaDB annotations

use std::io;

use crate::codec;
use crate::error::{Error, Result};
use crate::gtid::GtidSet;

use super::event::Event;

/// QUERY event: a statement executed on the source.
///
/// `gset` is not part of the wire format; the stream driver fills it with
/// the GTID context preceding this event for consumer convenience.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryEvent {
    /// Thread id that executed the statement.
    pub slave_proxy_id: u32,
    /// Statement execution time in seconds.
    pub execution_time: u32,
    /// Error code of the statement, zero on success.
    pub error_code: u16,
    /// Raw status variable block.
    pub status_vars: Vec<u8>,
    /// Default schema of the session.
    pub schema: String,
    /// The statement text.
    pub query: String,
    /// Whether the body carries a MariaDB-compressed query.
    pub compressed: bool,
    /// GTID context threaded in by the stream driver.
    pub gset: Option<GtidSet>,
}

impl Event for QueryEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 13 {
            return Err(Error::MalformedEvent(format!(
                "query event too short: {} bytes",
                data.len()
            )));
        }

        let mut pos = 0;
        self.slave_proxy_id = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        self.execution_time = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        let schema_length = usize::from(data[pos]);
        pos += 1;
        self.error_code = codec::parse_binary_u16(&data[pos..])?;
        pos += 2;
        let status_vars_length = usize::from(codec::parse_binary_u16(&data[pos..])?);
        pos += 2;

        // status vars, schema, the 0x00 separator, then the query text
        if data.len() < pos + status_vars_length + schema_length + 1 {
            return Err(Error::MalformedEvent(format!(
                "query event truncated: {} bytes",
                data.len()
            )));
        }

        self.status_vars = data[pos..pos + status_vars_length].to_vec();
        pos += status_vars_length;
        self.schema = String::from_utf8_lossy(&data[pos..pos + schema_length]).into_owned();
        pos += schema_length;
        pos += 1; // skip 0x00

        if self.compressed {
            let decompressed = codec::decompress_mariadb_data(&data[pos..])?;
            self.query = String::from_utf8_lossy(&decompressed).into_owned();
        } else {
            self.query = String::from_utf8_lossy(&data[pos..]).into_owned();
        }

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Slave proxy ID: {}", self.slave_proxy_id)?;
        writeln!(w, "Execution time: {}", self.execution_time)?;
        writeln!(w, "Error code: {}", self.error_code)?;
        writeln!(w, "Schema: {}", self.schema)?;
        writeln!(w, "Query: {}", self.query)?;
        if let Some(gset) = &self.gset {
            writeln!(w, "GTIDSet: {gset}")?;
        }
        writeln!(w)
    }
}

/// XID event: commit boundary of a transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XidEvent {
    /// The transaction's XA id.
    pub xid: u64,
    /// GTID context threaded in by the stream driver.
    pub gset: Option<GtidSet>,
}

impl Event for XidEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        self.xid = codec::parse_binary_u64(data)
            .map_err(|_| Error::MalformedEvent(format!("xid event too short: {} bytes", data.len())))?;
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "XID: {}", self.xid)?;
        if let Some(gset) = &self.gset {
            writeln!(w, "GTIDSet: {gset}")?;
        }
        writeln!(w)
    }
}

/// ROWS_QUERY event: the original statement text for a row-based event
/// group, present when `binlog_rows_query_log_events` is on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowsQueryEvent {
    /// The statement text.
    pub query: String,
}

impl Event for RowsQueryEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::MalformedEvent("empty rows query event".into()));
        }
        // The first byte is a length that may be truncated; the text runs
        // to the end of the body.
        self.query = String::from_utf8_lossy(&data[1..]).into_owned();
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Query: {}", self.query)?;
        writeln!(w)
    }
}

/// BEGIN_LOAD_QUERY event: the first block of a `LOAD DATA INFILE`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeginLoadQueryEvent {
    /// Id of the file being loaded.
    pub file_id: u32,
    /// Raw block data.
    pub block_data: Vec<u8>,
}

impl Event for BeginLoadQueryEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(Error::MalformedEvent(format!(
                "begin load query event too short: {} bytes",
                data.len()
            )));
        }
        self.file_id = codec::parse_binary_u32(&data[0..])?;
        self.block_data = data[4..].to_vec();
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "File ID: {}", self.file_id)?;
        writeln!(w, "Block data: {}", String::from_utf8_lossy(&self.block_data))?;
        writeln!(w)
    }
}

/// EXECUTE_LOAD_QUERY event: completion record of a `LOAD DATA INFILE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteLoadQueryEvent {
    /// Thread id that executed the statement.
    pub slave_proxy_id: u32,
    /// Statement execution time in seconds.
    pub execution_time: u32,
    /// Length of the schema name.
    pub schema_length: u8,
    /// Error code of the statement.
    pub error_code: u16,
    /// Length of the status variable block.
    pub status_vars: u16,
    /// Id of the loaded file.
    pub file_id: u32,
    /// Start offset of the replaced filename inside the query.
    pub start_pos: u32,
    /// End offset of the replaced filename inside the query.
    pub end_pos: u32,
    /// Duplicate-handling mode.
    pub dup_handling_flags: u8,
}

impl Event for ExecuteLoadQueryEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 26 {
            return Err(Error::MalformedEvent(format!(
                "execute load query event too short: {} bytes",
                data.len()
            )));
        }

        let mut pos = 0;
        self.slave_proxy_id = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        self.execution_time = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        self.schema_length = data[pos];
        pos += 1;
        self.error_code = codec::parse_binary_u16(&data[pos..])?;
        pos += 2;
        self.status_vars = codec::parse_binary_u16(&data[pos..])?;
        pos += 2;
        self.file_id = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        self.start_pos = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        self.end_pos = codec::parse_binary_u32(&data[pos..])?;
        pos += 4;
        self.dup_handling_flags = data[pos];

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Slave proxy ID: {}", self.slave_proxy_id)?;
        writeln!(w, "Execution time: {}", self.execution_time)?;
        writeln!(w, "Schema length: {}", self.schema_length)?;
        writeln!(w, "Error code: {}", self.error_code)?;
        writeln!(w, "File ID: {}", self.file_id)?;
        writeln!(w, "Start pos: {}", self.start_pos)?;
        writeln!(w, "End pos: {}", self.end_pos)?;
        writeln!(w, "Dup handling flags: {}", self.dup_handling_flags)?;
        writeln!(w)
    }
}

/// MariaDB ANNOTATE_ROWS event: the statement behind a row event group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MariadbAnnotateRowsEvent {
    /// The statement text.
    pub query: String,
}

impl Event for MariadbAnnotateRowsEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        self.query = String::from_utf8_lossy(data).into_owned();
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Query: {}", self.query)?;
        writeln!(w)
    }
}

/// MariaDB BINLOG_CHECKPOINT event: the oldest log file still needed for
/// crash recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MariadbBinlogCheckPointEvent {
    /// Checkpoint log file name.
    pub info: String,
}

impl Event for MariadbBinlogCheckPointEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        self.info = String::from_utf8_lossy(data).into_owned();
        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Info: {}", self.info)?;
        writeln!(w)
    }
}
