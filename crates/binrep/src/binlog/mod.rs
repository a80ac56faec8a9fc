//! Binary-log event decoding
//!
//! Events arrive as whole framed records (19-byte header plus body plus
//! optional CRC32 trailer). [`stream::BinlogDecoder`] drives per-record
//! decoding; the per-event-type decoders live in the submodules.

pub mod event;
pub mod format;
pub mod gtid_event;
pub mod header;
pub mod json_binary;
pub mod json_diff;
pub mod query;
pub mod rows;
pub mod stream;

pub use event::{BinlogEvent, Event, EventData, UnknownEvent};
pub use format::{
    ChecksumAlgorithm, FormatDescriptionEvent, IntVarEvent, IntVarEventType, PreviousGtidsEvent,
    RotateEvent,
};
pub use gtid_event::{GtidEvent, MariadbGtidEvent, MariadbGtidListEvent};
pub use header::EventHeader;
pub use json_binary::{decode_json_binary, JsonDecodeOptions, JsonValue};
pub use json_diff::{decode_json_diffs, JsonDiff, JsonDiffOperation};
pub use query::{
    BeginLoadQueryEvent, ExecuteLoadQueryEvent, MariadbAnnotateRowsEvent,
    MariadbBinlogCheckPointEvent, QueryEvent, RowsQueryEvent, XidEvent,
};
pub use rows::{ColumnType, ColumnValue, RowImage, RowsEvent, RowsEventKind, TableMapEvent};
pub use stream::{BinlogDecoder, BinlogDecoderConfig, BinlogStream, RecordSource};

/// Length of the trailing CRC32 when checksums are on.
pub const BINLOG_CHECKSUM_LENGTH: usize = 4;

/// Binlog event type codes.
///
/// Codes 160 and up are MariaDB extensions. Codes this crate has no name
/// for are preserved in `Other` so unknown events can be surfaced intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Unknown,
    StartV3,
    Query,
    Stop,
    Rotate,
    IntVar,
    Load,
    Slave,
    CreateFile,
    AppendBlock,
    ExecLoad,
    DeleteFile,
    NewLoad,
    Rand,
    UserVar,
    FormatDescription,
    Xid,
    BeginLoadQuery,
    ExecuteLoadQuery,
    TableMap,
    WriteRowsV0,
    UpdateRowsV0,
    DeleteRowsV0,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    Incident,
    Heartbeat,
    Ignorable,
    RowsQuery,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Gtid,
    AnonymousGtid,
    PreviousGtids,
    TransactionContext,
    ViewChange,
    XaPrepare,
    PartialUpdateRows,
    TransactionPayload,
    HeartbeatV2,
    GtidTagged,
    MariadbAnnotateRows,
    MariadbBinlogCheckPoint,
    MariadbGtid,
    MariadbGtidList,
    MariadbStartEncryption,
    MariadbQueryCompressed,
    MariadbWriteRowsCompressedV1,
    MariadbUpdateRowsCompressedV1,
    MariadbDeleteRowsCompressedV1,
    Other(u8),
}

impl EventType {
    /// Maps a wire code to an event type.
    pub fn from_u8(code: u8) -> EventType {
        use EventType::*;
        match code {
            0 => Unknown,
            1 => StartV3,
            2 => Query,
            3 => Stop,
            4 => Rotate,
            5 => IntVar,
            6 => Load,
            7 => Slave,
            8 => CreateFile,
            9 => AppendBlock,
            10 => ExecLoad,
            11 => DeleteFile,
            12 => NewLoad,
            13 => Rand,
            14 => UserVar,
            15 => FormatDescription,
            16 => Xid,
            17 => BeginLoadQuery,
            18 => ExecuteLoadQuery,
            19 => TableMap,
            20 => WriteRowsV0,
            21 => UpdateRowsV0,
            22 => DeleteRowsV0,
            23 => WriteRowsV1,
            24 => UpdateRowsV1,
            25 => DeleteRowsV1,
            26 => Incident,
            27 => Heartbeat,
            28 => Ignorable,
            29 => RowsQuery,
            30 => WriteRowsV2,
            31 => UpdateRowsV2,
            32 => DeleteRowsV2,
            33 => Gtid,
            34 => AnonymousGtid,
            35 => PreviousGtids,
            36 => TransactionContext,
            37 => ViewChange,
            38 => XaPrepare,
            39 => PartialUpdateRows,
            40 => TransactionPayload,
            41 => HeartbeatV2,
            42 => GtidTagged,
            160 => MariadbAnnotateRows,
            161 => MariadbBinlogCheckPoint,
            162 => MariadbGtid,
            163 => MariadbGtidList,
            164 => MariadbStartEncryption,
            165 => MariadbQueryCompressed,
            166 => MariadbWriteRowsCompressedV1,
            167 => MariadbUpdateRowsCompressedV1,
            168 => MariadbDeleteRowsCompressedV1,
            other => Other(other),
        }
    }

    /// The wire code of this event type.
    pub fn code(&self) -> u8 {
        use EventType::*;
        match self {
            Unknown => 0,
            StartV3 => 1,
            Query => 2,
            Stop => 3,
            Rotate => 4,
            IntVar => 5,
            Load => 6,
            Slave => 7,
            CreateFile => 8,
            AppendBlock => 9,
            ExecLoad => 10,
            DeleteFile => 11,
            NewLoad => 12,
            Rand => 13,
            UserVar => 14,
            FormatDescription => 15,
            Xid => 16,
            BeginLoadQuery => 17,
            ExecuteLoadQuery => 18,
            TableMap => 19,
            WriteRowsV0 => 20,
            UpdateRowsV0 => 21,
            DeleteRowsV0 => 22,
            WriteRowsV1 => 23,
            UpdateRowsV1 => 24,
            DeleteRowsV1 => 25,
            Incident => 26,
            Heartbeat => 27,
            Ignorable => 28,
            RowsQuery => 29,
            WriteRowsV2 => 30,
            UpdateRowsV2 => 31,
            DeleteRowsV2 => 32,
            Gtid => 33,
            AnonymousGtid => 34,
            PreviousGtids => 35,
            TransactionContext => 36,
            ViewChange => 37,
            XaPrepare => 38,
            PartialUpdateRows => 39,
            TransactionPayload => 40,
            HeartbeatV2 => 41,
            GtidTagged => 42,
            MariadbAnnotateRows => 160,
            MariadbBinlogCheckPoint => 161,
            MariadbGtid => 162,
            MariadbGtidList => 163,
            MariadbStartEncryption => 164,
            MariadbQueryCompressed => 165,
            MariadbWriteRowsCompressedV1 => 166,
            MariadbUpdateRowsCompressedV1 => 167,
            MariadbDeleteRowsCompressedV1 => 168,
            Other(code) => *code,
        }
    }

    /// Whether this is a rows event of any version.
    pub fn is_rows_event(&self) -> bool {
        use EventType::*;
        matches!(
            self,
            WriteRowsV0
                | UpdateRowsV0
                | DeleteRowsV0
                | WriteRowsV1
                | UpdateRowsV1
                | DeleteRowsV1
                | WriteRowsV2
                | UpdateRowsV2
                | DeleteRowsV2
                | PartialUpdateRows
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Other(code) => write!(f, "UnknownEvent({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}
