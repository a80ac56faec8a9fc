//! # binrep - MySQL/MariaDB replication toolkit
//!
//! Building blocks for consuming a MySQL or MariaDB replication stream:
//!
//! - **Binlog decoding** - framed records in, typed events out, with
//!   checksum verification, table-map tracking and GTID threading
//! - **GTID set algebra** - interval-exact union, difference and
//!   containment for MySQL sets, domain tracking for MariaDB sets
//! - **Connection pooling** - min/max-bounded pool with liveness pings,
//!   idle eviction and fair hand-off to waiters
//!
//! ## Architecture
//!
//! ```text
//! transport (framed records)          "uuid:1-5,..." text
//!         │                                  │
//!         ▼                                  ▼
//!   BinlogStream ──► BinlogDecoder     GTID set algebra
//!         │                │                 │
//!         ▼                ▼                 ▼
//!    BinlogEvent     position/GTID      MysqlGtidSet /
//!    (typed body)      tracking         MariadbGtidSet
//! ```
//!
//! The pool is orthogonal: it manages the transports the stream and any
//! control queries run on.
//!
//! ## Quick start
//!
//! ```rust
//! use binrep::{BinlogDecoder, MysqlGtidSet};
//!
//! # fn example() -> binrep::Result<()> {
//! // GTID algebra
//! let mut executed: MysqlGtidSet = "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5".parse()?;
//! executed.update("3e11fa47-71ca-11e1-9e33-c80aa9429562:6-10")?;
//!
//! // Binlog decoding: feed whole framed records
//! let mut decoder = BinlogDecoder::default();
//! assert_eq!(decoder.position(), ("", 0));
//! // let event = decoder.decode(&record)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Buffer ownership
//!
//! Decoded events own their bytes ([`BinlogEvent::raw_data`] is copied
//! out of the read buffer), so events may be retained after the
//! transport reuses its buffer.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod binlog;
pub mod codec;
pub mod error;
pub mod gtid;
pub mod pool;
pub mod serialization;

pub use binlog::{
    BinlogDecoder, BinlogDecoderConfig, BinlogEvent, BinlogStream, ChecksumAlgorithm, ColumnValue,
    EventData, EventHeader, EventType, FormatDescriptionEvent, GtidEvent, JsonDecodeOptions,
    JsonDiff, JsonDiffOperation, JsonValue, RecordSource, RowsEvent, TableMapEvent,
};
pub use error::{Error, Result};
pub use gtid::{
    GtidSet, Interval, IntervalSlice, MariadbGtid, MariadbGtidSet, MysqlGtidSet, UuidSet,
};
pub use pool::{Connection, ConnectionFactory, Pool, PoolConfig, PoolStats};
