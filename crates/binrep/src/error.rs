//! Error types for binrep operations
//!
//! One crate-level enum with granular variants so callers can distinguish
//! textual parse failures from binary decode failures and pool lifecycle
//! errors without string matching.

use thiserror::Error;

/// Result type for binrep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by GTID parsing, binlog decoding and the connection pool.
#[derive(Error, Debug)]
pub enum Error {
    /// Textual parse failure (intervals, UUIDs, GTID sets)
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Binary decode: buffer too short or declared length inconsistent
    /// with the remaining bytes
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    /// Event header or body violates layout rules
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Trailing CRC32 does not match the computed value
    #[error("checksum mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    ChecksumMismatch {
        /// CRC32 computed over the event bytes
        computed: u32,
        /// CRC32 carried in the event trailer
        stored: u32,
    },

    /// JSON-binary buffer violates invariants
    #[error("malformed JSON binary: {0}")]
    MalformedJsonBinary(String),

    /// JSON-diff operation byte outside {0, 1, 2}
    #[error("corrupted JSON diff: operation {0}")]
    CorruptedJsonDiff(u8),

    /// Wire bytes do not match the declared field schema
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Dial failure reported by the pool producer
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// `get_conn` after `close`
    #[error("pool closed")]
    PoolClosed,

    /// Cancellation observed while waiting
    #[error("cancelled")]
    Cancelled,

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is a transient condition worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::ConnectFailed(_) | Error::Io(_))
    }
}
