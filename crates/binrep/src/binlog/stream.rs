//! Per-record stream driver
//!
//! [`BinlogDecoder`] consumes whole framed records, verifies and strips
//! checksums according to the stream's FORMAT_DESCRIPTION, dispatches to
//! the per-type decoders, and threads GTID context into the QUERY and XID
//! events that follow. [`BinlogStream`] wraps it for async sources with
//! cooperative cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::gtid::GtidSet;

use super::event::{BinlogEvent, Event, EventData, UnknownEvent};
use super::format::{
    ChecksumAlgorithm, FormatDescriptionEvent, IntVarEvent, PreviousGtidsEvent, RotateEvent,
};
use super::gtid_event::{GtidEvent, MariadbGtidEvent, MariadbGtidListEvent};
use super::header::EventHeader;
use super::json_binary::JsonDecodeOptions;
use super::query::{
    BeginLoadQueryEvent, ExecuteLoadQueryEvent, MariadbAnnotateRowsEvent,
    MariadbBinlogCheckPointEvent, QueryEvent, RowsQueryEvent, XidEvent,
};
use super::rows::{RowsEvent, TableMapEvent};
use super::{EventType, BINLOG_CHECKSUM_LENGTH};

/// Configuration of the stream driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinlogDecoderConfig {
    /// Verify trailing CRC32 checksums when the stream declares them.
    pub verify_checksum: bool,
    /// Deliver a `DecodeError` sentinel event on body-decode failure
    /// instead of failing the stream.
    pub surface_decode_errors: bool,
    /// Options for decoding JSON columns.
    pub json_options: JsonDecodeOptions,
}

impl Default for BinlogDecoderConfig {
    fn default() -> Self {
        BinlogDecoderConfig {
            verify_checksum: true,
            surface_decode_errors: false,
            json_options: JsonDecodeOptions::default(),
        }
    }
}

/// Stateful per-record decoder for one binlog stream.
#[derive(Debug, Default)]
pub struct BinlogDecoder {
    config: BinlogDecoderConfig,
    format: Option<FormatDescriptionEvent>,
    tables: HashMap<u64, Arc<TableMapEvent>>,
    gset: Option<GtidSet>,
    log_name: String,
    log_pos: u64,
}

impl BinlogDecoder {
    /// Creates a decoder with the given configuration.
    pub fn new(config: BinlogDecoderConfig) -> Self {
        BinlogDecoder {
            config,
            ..Default::default()
        }
    }

    /// The stream's format description, once seen.
    pub fn format(&self) -> Option<&FormatDescriptionEvent> {
        self.format.as_ref()
    }

    /// Last observed `(log file name, position)`; what a consumer needs
    /// to resume after reconnecting.
    pub fn position(&self) -> (&str, u64) {
        (&self.log_name, self.log_pos)
    }

    /// The GTID context accumulated so far.
    pub fn gtid_set(&self) -> Option<&GtidSet> {
        self.gset.as_ref()
    }

    /// Forgets stream state (format, table maps); call when restarting
    /// from a new position.
    pub fn reset(&mut self) {
        self.format = None;
        self.tables.clear();
    }

    fn table_id_size(&self) -> usize {
        // Old servers wrote 4-byte table ids and declare it through the
        // TABLE_MAP post-header length.
        match self
            .format
            .as_ref()
            .and_then(|f| f.post_header_length(EventType::TableMap))
        {
            Some(6) => 4,
            _ => 6,
        }
    }

    /// Decodes one whole framed record.
    pub fn decode(&mut self, raw: &[u8]) -> Result<BinlogEvent> {
        let header = EventHeader::decode(raw)?;
        if raw.len() != header.event_size as usize {
            return Err(Error::MalformedEvent(format!(
                "record is {} bytes but header declares {}",
                raw.len(),
                header.event_size
            )));
        }

        let mut body = &raw[EventHeader::SIZE..];

        // The format description's own trailer is handled inside its
        // decoder; for everything after it, verify and strip.
        if header.event_type != EventType::FormatDescription {
            if let Some(format) = &self.format {
                if format.checksum_algorithm == ChecksumAlgorithm::Crc32 {
                    if body.len() < BINLOG_CHECKSUM_LENGTH {
                        return Err(Error::MalformedEvent(
                            "event shorter than its checksum".into(),
                        ));
                    }
                    if self.config.verify_checksum {
                        let boundary = raw.len() - BINLOG_CHECKSUM_LENGTH;
                        let computed = crc32fast::hash(&raw[..boundary]);
                        let stored = crate::codec::parse_binary_u32(&raw[boundary..])?;
                        if computed != stored {
                            return Err(Error::ChecksumMismatch { computed, stored });
                        }
                    }
                    body = &body[..body.len() - BINLOG_CHECKSUM_LENGTH];
                }
            }
        }

        trace!(event_type = %header.event_type, size = header.event_size, "decoding event");

        let event = match self.decode_body(&header, body) {
            Ok(event) => event,
            Err(err) if self.config.surface_decode_errors => {
                warn!(event_type = %header.event_type, %err, "surfacing decode error");
                EventData::DecodeError {
                    message: err.to_string(),
                    data: body.to_vec(),
                }
            }
            Err(err) => return Err(err),
        };

        if header.log_pos > 0 {
            self.log_pos = u64::from(header.log_pos);
        }

        Ok(BinlogEvent {
            raw_data: raw.to_vec(),
            header,
            event,
        })
    }

    fn decode_body(&mut self, header: &EventHeader, body: &[u8]) -> Result<EventData> {
        use EventType::*;

        Ok(match header.event_type {
            FormatDescription => {
                let mut e = FormatDescriptionEvent::default();
                e.decode(body)?;
                self.format = Some(e.clone());
                EventData::FormatDescription(e)
            }
            Rotate => {
                let mut e = RotateEvent::default();
                e.decode(body)?;
                self.log_name = e.next_log_name.clone();
                self.log_pos = e.position;
                EventData::Rotate(e)
            }
            PreviousGtids => {
                let mut e = PreviousGtidsEvent::default();
                e.decode(body)?;
                EventData::PreviousGtids(e)
            }
            Query | MariadbQueryCompressed => {
                let mut e = QueryEvent {
                    compressed: header.event_type == MariadbQueryCompressed,
                    ..Default::default()
                };
                e.decode(body)?;
                e.gset = self.gset.clone();
                EventData::Query(e)
            }
            Xid => {
                let mut e = XidEvent::default();
                e.decode(body)?;
                e.gset = self.gset.clone();
                EventData::Xid(e)
            }
            Gtid | AnonymousGtid => {
                let mut e = GtidEvent::default();
                e.decode(body)?;
                self.gset = Some(e.gtid_next());
                EventData::Gtid(e)
            }
            GtidTagged => {
                let mut e = GtidEvent::default();
                e.decode_tagged(body)?;
                self.gset = Some(e.gtid_next());
                EventData::Gtid(e)
            }
            MariadbGtid => {
                let mut e = MariadbGtidEvent::default();
                e.decode(body)?;
                e.gtid.server_id = header.server_id;
                self.gset = Some(e.gtid_next());
                EventData::MariadbGtid(e)
            }
            MariadbGtidList => {
                let mut e = MariadbGtidListEvent::default();
                e.decode(body)?;
                EventData::MariadbGtidList(e)
            }
            MariadbAnnotateRows => {
                let mut e = MariadbAnnotateRowsEvent::default();
                e.decode(body)?;
                EventData::MariadbAnnotateRows(e)
            }
            MariadbBinlogCheckPoint => {
                let mut e = MariadbBinlogCheckPointEvent::default();
                e.decode(body)?;
                EventData::MariadbBinlogCheckPoint(e)
            }
            IntVar => {
                let mut e = IntVarEvent::default();
                e.decode(body)?;
                EventData::IntVar(e)
            }
            TableMap => {
                let mut e = TableMapEvent {
                    table_id_size: self.table_id_size(),
                    ..Default::default()
                };
                e.decode(body)?;
                let e = Arc::new(e);
                self.tables.insert(e.table_id, Arc::clone(&e));
                EventData::TableMap(e)
            }
            t if t.is_rows_event() => {
                let table_id_size = self.table_id_size();
                if body.len() < table_id_size {
                    return Err(Error::MalformedEvent(format!(
                        "rows event too short: {} bytes",
                        body.len()
                    )));
                }
                let table_id = crate::codec::fixed_length_int(&body[..table_id_size]);

                let mut e = RowsEvent {
                    table_id_size,
                    table: self.tables.get(&table_id).cloned(),
                    json_options: self.config.json_options,
                    ..Default::default()
                }
                .with_event_type(header.event_type);
                e.decode(body)?;
                EventData::Rows(e)
            }
            RowsQuery => {
                let mut e = RowsQueryEvent::default();
                e.decode(body)?;
                EventData::RowsQuery(e)
            }
            BeginLoadQuery => {
                let mut e = BeginLoadQueryEvent::default();
                e.decode(body)?;
                EventData::BeginLoadQuery(e)
            }
            ExecuteLoadQuery => {
                let mut e = ExecuteLoadQueryEvent::default();
                e.decode(body)?;
                EventData::ExecuteLoadQuery(e)
            }
            Heartbeat | HeartbeatV2 => EventData::Heartbeat,
            _ => {
                let mut e = UnknownEvent::default();
                e.decode(body)?;
                EventData::Unknown(e)
            }
        })
    }
}

/// Source of framed binlog records; the transport below it owns packet
/// framing.
#[async_trait]
pub trait RecordSource: Send {
    /// Next whole record, or `None` at end of stream.
    async fn next_record(&mut self) -> Result<Option<Bytes>>;
}

/// Async driver: pulls records from a source, decodes them, and honors a
/// cancellation token on blocking reads.
///
/// The consumer callback runs on the driver's task; suspending in it
/// suspends the stream.
pub struct BinlogStream<S> {
    source: S,
    decoder: BinlogDecoder,
    cancel: CancellationToken,
}

impl<S: RecordSource> BinlogStream<S> {
    /// Creates a stream over `source`.
    pub fn new(source: S, decoder: BinlogDecoder) -> Self {
        BinlogStream {
            source,
            decoder,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` for cancellation instead of an internal one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this stream.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The underlying decoder, for position and GTID state.
    pub fn decoder(&self) -> &BinlogDecoder {
        &self.decoder
    }

    /// Reads and decodes the next event; `Ok(None)` at end of stream,
    /// `Err(Cancelled)` if the token fires while waiting.
    pub async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            record = self.source.next_record() => match record? {
                None => Ok(None),
                Some(raw) => self.decoder.decode(&raw).map(Some),
            },
        }
    }

    /// Drives the stream to completion, delivering each event to
    /// `on_event`.
    pub async fn run<F>(&mut self, mut on_event: F) -> Result<()>
    where
        F: FnMut(BinlogEvent) -> Result<()> + Send,
    {
        while let Some(event) = self.next_event().await? {
            on_event(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::binlog::format::tests::format_description_body;
    use crate::binlog::query::tests::query_event_body;
    use crate::binlog::rows::tests::table_map_body;
    use crate::binlog::ColumnValue;

    const SID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    /// Frames a record with a valid header and, when `checksum`, a valid
    /// CRC32 trailer.
    fn record(event_type: u8, body: &[u8], log_pos: u32, checksum: bool) -> Vec<u8> {
        let trailer = if checksum { BINLOG_CHECKSUM_LENGTH } else { 0 };
        let size = (EventHeader::SIZE + body.len() + trailer) as u32;

        let mut raw = Vec::with_capacity(size as usize);
        raw.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        raw.push(event_type);
        raw.extend_from_slice(&1234u32.to_le_bytes()); // server id
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

    fn decoder_with_crc_format() -> BinlogDecoder {
        let mut decoder = BinlogDecoder::default();
        let fde = record(15, &format_description_body("8.0.36", 1), 120, false);
        decoder.decode(&fde).unwrap();
        assert_eq!(
            decoder.format().unwrap().checksum_algorithm,
            ChecksumAlgorithm::Crc32
        );
        decoder
    }

    fn gtid_body(gno: i64) -> Vec<u8> {
        let mut body = vec![1u8];
        body.extend_from_slice(uuid::Uuid::parse_str(SID).unwrap().as_bytes());
        body.extend_from_slice(&gno.to_le_bytes());
        body
    }

    #[test]
    fn test_gtid_context_threads_into_query_and_xid() {
        let mut decoder = decoder_with_crc_format();

        decoder.decode(&record(33, &gtid_body(9), 200, true)).unwrap();

        let event = decoder
            .decode(&record(2, &query_event_body("test", b"BEGIN"), 300, true))
            .unwrap();
        match event.event {
            EventData::Query(q) => {
                assert_eq!(q.query, "BEGIN");
                assert_eq!(q.gset.unwrap().to_string(), format!("{SID}:9"));
            }
            other => panic!("expected Query, got {other:?}"),
        }

        let event = decoder
            .decode(&record(16, &7u64.to_le_bytes(), 400, true))
            .unwrap();
        match event.event {
            EventData::Xid(x) => {
                assert_eq!(x.xid, 7);
                assert_eq!(x.gset.unwrap().to_string(), format!("{SID}:9"));
            }
            other => panic!("expected Xid, got {other:?}"),
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut decoder = decoder_with_crc_format();

        let mut raw = record(16, &7u64.to_le_bytes(), 200, true);
        let len = raw.len();
        raw[len - 1] ^= 0xff;

        assert!(matches!(
            decoder.decode(&raw),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_skipped_when_disabled() {
        let mut decoder = BinlogDecoder::new(BinlogDecoderConfig {
            verify_checksum: false,
            ..Default::default()
        });
        decoder
            .decode(&record(15, &format_description_body("8.0.36", 1), 120, false))
            .unwrap();

        let mut raw = record(16, &7u64.to_le_bytes(), 200, true);
        let len = raw.len();
        raw[len - 1] ^= 0xff;

        // corrupted trailer is stripped but not verified
        assert!(decoder.decode(&raw).is_ok());
    }

    #[test]
    fn test_rotate_updates_position() {
        let mut decoder = decoder_with_crc_format();

        let mut body = 4u64.to_le_bytes().to_vec();
        body.extend_from_slice(b"mysql-bin.000007");
        decoder.decode(&record(4, &body, 0, true)).unwrap();

        assert_eq!(decoder.position(), ("mysql-bin.000007", 4));

        decoder.decode(&record(16, &7u64.to_le_bytes(), 500, true)).unwrap();
        assert_eq!(decoder.position(), ("mysql-bin.000007", 500));
    }

    #[test]
    fn test_unknown_event_is_surfaced_not_fatal() {
        let mut decoder = decoder_with_crc_format();

        let event = decoder.decode(&record(99, &[1, 2, 3], 600, true)).unwrap();
        match event.event {
            EventData::Unknown(e) => assert_eq!(e.data, vec![1, 2, 3]),
            other => panic!("expected Unknown, got {other:?}"),
        }

        // the stream keeps going
        decoder.decode(&record(16, &7u64.to_le_bytes(), 700, true)).unwrap();
    }

    #[test]
    fn test_surface_decode_errors_sentinel() {
        let mut decoder = BinlogDecoder::new(BinlogDecoderConfig {
            surface_decode_errors: true,
            ..Default::default()
        });
        decoder
            .decode(&record(15, &format_description_body("8.0.36", 1), 120, false))
            .unwrap();

        // a GTID event body far too short to decode
        let event = decoder.decode(&record(33, &[1, 2, 3], 800, true)).unwrap();
        match event.event {
            EventData::DecodeError { message, data } => {
                assert!(message.contains("gtid"));
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("expected DecodeError, got {other:?}"),
        }

        // strict mode fails instead
        let mut strict = decoder_with_crc_format();
        assert!(strict.decode(&record(33, &[1, 2, 3], 800, true)).is_err());
    }

    #[test]
    fn test_table_map_then_write_rows() {
        let mut decoder = decoder_with_crc_format();

        let tm = table_map_body(42, "test", "t", &[(3, &[])]);
        decoder.decode(&record(19, &tm, 900, true)).unwrap();

        let mut body = Vec::new();
        body.extend_from_slice(&42u64.to_le_bytes()[..6]);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.push(1); // column count
        body.push(0x01); // present bitmap
        body.push(0x00); // null bitmap
        body.extend_from_slice(&5i32.to_le_bytes());

        let event = decoder.decode(&record(30, &body, 1000, true)).unwrap();
        match event.event {
            EventData::Rows(rows) => {
                assert_eq!(rows.table_id, 42);
                assert_eq!(rows.table.as_ref().unwrap().table_name, "t");
                assert_eq!(
                    rows.rows[0].after.as_ref().unwrap()[0],
                    ColumnValue::SignedInt(5)
                );
            }
            other => panic!("expected Rows, got {other:?}"),
        }
    }

    #[test]
    fn test_mariadb_gtid_takes_server_id_from_header() {
        let mut decoder = BinlogDecoder::default();
        let fde = record(
            15,
            &format_description_body("10.6.14-MariaDB-log", 1),
            120,
            false,
        );
        decoder.decode(&fde).unwrap();

        let mut body = 42u64.to_le_bytes().to_vec(); // sequence number
        body.extend_from_slice(&0u32.to_le_bytes()); // domain
        body.push(0); // flags
        let event = decoder.decode(&record(162, &body, 200, true)).unwrap();
        match event.event {
            EventData::MariadbGtid(e) => {
                assert_eq!(e.gtid.server_id, 1234);
                assert_eq!(e.gtid_next().to_string(), "0-1234-42");
            }
            other => panic!("expected MariadbGtid, got {other:?}"),
        }
        assert_eq!(decoder.gtid_set().unwrap().to_string(), "0-1234-42");
    }

    #[test]
    fn test_record_size_mismatch_rejected() {
        let mut decoder = BinlogDecoder::default();
        let mut raw = record(16, &7u64.to_le_bytes(), 100, false);
        raw.push(0); // one stray byte
        assert!(decoder.decode(&raw).is_err());
    }

    struct VecSource {
        records: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl RecordSource for VecSource {
        async fn next_record(&mut self) -> Result<Option<Bytes>> {
            if self.records.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Bytes::from(self.records.remove(0))))
            }
        }
    }

    #[tokio::test]
    async fn test_binlog_stream_run() {
        let records = vec![
            record(15, &format_description_body("8.0.36", 1), 120, false),
            record(33, &gtid_body(1), 200, true),
            record(16, &7u64.to_le_bytes(), 300, true),
        ];

        let mut stream = BinlogStream::new(VecSource { records }, BinlogDecoder::default());
        let mut seen = Vec::new();
        stream
            .run(|event| {
                seen.push(event.header.event_type);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![EventType::FormatDescription, EventType::Gtid, EventType::Xid]
        );
        assert_eq!(stream.decoder().position().1, 300);
    }

    struct PendingSource;

    #[async_trait]
    impl RecordSource for PendingSource {
        async fn next_record(&mut self) -> Result<Option<Bytes>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_binlog_stream_cancellation() {
        let token = CancellationToken::new();
        let mut stream = BinlogStream::new(PendingSource, BinlogDecoder::default())
            .with_cancellation(token.clone());

        token.cancel();
        assert!(matches!(stream.next_event().await, Err(Error::Cancelled)));
    }
}
