#![allow(dead_code)]

//! Shared fixtures: binlog record builders and a mock pool transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use binrep::pool::{Connection, ConnectionFactory};
use binrep::{Error, EventHeader, Result};

pub const SID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

/// Frames a whole binlog record; appends a valid CRC32 when `checksum`.
pub fn record(event_type: u8, body: &[u8], log_pos: u32, checksum: bool) -> Vec<u8> {
    let trailer = if checksum { 4 } else { 0 };
    let size = (EventHeader::SIZE + body.len() + trailer) as u32;

    let mut raw = Vec::with_capacity(size as usize);
    raw.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    raw.push(event_type);
    raw.extend_from_slice(&1234u32.to_le_bytes());
    raw.extend_from_slice(&size.to_le_bytes());
    raw.extend_from_slice(&log_pos.to_le_bytes());
    raw.extend_from_slice(&0u16.to_le_bytes());
    raw.extend_from_slice(body);
    if checksum {
        let crc = crc32fast::hash(&raw);
        raw.extend_from_slice(&crc.to_le_bytes());
    }
    raw
}

/// FORMAT_DESCRIPTION body declaring the given checksum algorithm.
pub fn format_description_body(server_version: &str, checksum: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&4u16.to_le_bytes());
    let mut version = [0u8; 50];
    version[..server_version.len()].copy_from_slice(server_version.as_bytes());
    body.extend_from_slice(&version);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(19);
    body.extend_from_slice(&[0u8; 42]);
    body.push(checksum);
    body.extend_from_slice(&[0u8; 4]);
    body
}

/// Classic GTID event body for `SID:gno`.
pub fn gtid_body(gno: i64) -> Vec<u8> {
    let mut body = vec![1u8];
    body.extend_from_slice(uuid::Uuid::parse_str(SID).unwrap().as_bytes());
    body.extend_from_slice(&gno.to_le_bytes());
    body
}

/// QUERY event body with empty status vars.
pub fn query_body(schema: &str, query: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&7u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(schema.len() as u8);
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(schema.as_bytes());
    body.push(0);
    body.extend_from_slice(query);
    body
}

/// TABLE_MAP body for a table of the given `(type, metadata)` columns.
pub fn table_map_body(table_id: u64, schema: &str, table: &str, columns: &[(u8, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_id.to_le_bytes()[..6]);
    body.extend_from_slice(&1u16.to_le_bytes());
    body.push(schema.len() as u8);
    body.extend_from_slice(schema.as_bytes());
    body.push(0);
    body.push(table.len() as u8);
    body.extend_from_slice(table.as_bytes());
    body.push(0);
    body.push(columns.len() as u8);
    for (t, _) in columns {
        body.push(*t);
    }
    let metadata: Vec<u8> = columns.iter().flat_map(|(_, m)| m.iter().copied()).collect();
    body.push(metadata.len() as u8);
    body.extend_from_slice(&metadata);
    body.extend_from_slice(&vec![0u8; columns.len().div_ceil(8)]);
    body
}

pub struct MockConnection {
    pub id: usize,
    pub ping_ok: Arc<AtomicBool>,
    pub closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn ping(&mut self) -> Result<()> {
        if self.ping_ok.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::ConnectFailed("mock ping failure".into()))
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

pub struct MockFactory {
    pub dialed: AtomicUsize,
    pub fail: AtomicBool,
    pub ping_ok: Arc<AtomicBool>,
    pub closed: Arc<AtomicUsize>,
}

impl Default for MockFactory {
    fn default() -> Self {
        MockFactory {
            dialed: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            ping_ok: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.fail.load(Ordering::Acquire) {
            return Err(Error::ConnectFailed("mock dial failure".into()));
        }
        let id = self.dialed.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockConnection {
            id,
            ping_ok: Arc::clone(&self.ping_ok),
            closed: Arc::clone(&self.closed),
        }))
    }
}
