//! GTID events: MySQL classic, MySQL tagged, and MariaDB

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::codec;
use crate::error::{Error, Result};
use crate::gtid::{GtidSet, MariadbGtid, MariadbGtidSet, MysqlGtidSet};
use crate::serialization::{Field, Message};

use super::event::Event;

const SID_LENGTH: usize = 16;
const LOGICAL_TIMESTAMP_TYPE_CODE: u8 = 2;
const PART_LOGICAL_TIMESTAMP_LENGTH: usize = 8;
const IMMEDIATE_COMMIT_TIMESTAMP_LENGTH: usize = 7;

/// `UNDEFINED_SERVER_VERSION` sentinel for servers predating version
/// metadata.
pub const UNDEFINED_SERVER_VERSION: u32 = 999_999;

/// MariaDB GTID event flag: standalone (not part of a transaction group).
pub const MARIADB_FL_STANDALONE: u8 = 1;
/// MariaDB GTID event flag: a group commit id follows.
pub const MARIADB_FL_GROUP_COMMIT_ID: u8 = 2;
/// MariaDB GTID event flag: transactional event group.
pub const MARIADB_FL_TRANSACTIONAL: u8 = 4;
/// MariaDB GTID event flag: group may be applied in parallel.
pub const MARIADB_FL_ALLOW_PARALLEL: u8 = 8;
/// MariaDB GTID event flag: group waited for a prior commit.
pub const MARIADB_FL_WAITED: u8 = 16;
/// MariaDB GTID event flag: the group contains DDL.
pub const MARIADB_FL_DDL: u8 = 32;

/// MySQL GTID event, classic or tagged.
///
/// The logical-timestamp, commit-timestamp, transaction-length and
/// server-version fields appeared incrementally between 5.7 and 8.0;
/// absent fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtidEvent {
    /// Commit flag byte.
    pub commit_flag: u8,
    /// Source server UUID bytes.
    pub sid: [u8; SID_LENGTH],
    /// GTID tag, only set by GTID_TAGGED_LOG_EVENT.
    pub tag: String,
    /// Transaction sequence number.
    pub gno: i64,
    /// Logical clock: newest transaction this one depends on.
    pub last_committed: i64,
    /// Logical clock: this transaction's sequence number.
    pub sequence_number: i64,
    /// Microsecond commit timestamp on the immediate source.
    pub immediate_commit_timestamp: u64,
    /// Microsecond commit timestamp on the original source; equals the
    /// immediate timestamp when not sent.
    pub original_commit_timestamp: u64,
    /// Total transaction length including this event.
    pub transaction_length: u64,
    /// Version of the immediate source.
    pub immediate_server_version: u32,
    /// Version of the original source; equals the immediate version when
    /// not sent.
    pub original_server_version: u32,
}

impl Default for GtidEvent {
    fn default() -> Self {
        GtidEvent {
            commit_flag: 0,
            sid: [0; SID_LENGTH],
            tag: String::new(),
            gno: 0,
            last_committed: 0,
            sequence_number: 0,
            immediate_commit_timestamp: 0,
            original_commit_timestamp: 0,
            transaction_length: 0,
            immediate_server_version: UNDEFINED_SERVER_VERSION,
            original_server_version: UNDEFINED_SERVER_VERSION,
        }
    }
}

impl GtidEvent {
    /// The SID as a UUID.
    pub fn sid_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.sid)
    }

    /// The GTID this event announces, as a single-element set.
    pub fn gtid_next(&self) -> GtidSet {
        let mut set = MysqlGtidSet::new();
        set.add_gtid(self.sid_uuid(), self.gno);
        GtidSet::Mysql(set)
    }

    /// Commit time on the immediate source, if the event carried one.
    pub fn immediate_commit_time(&self) -> Option<SystemTime> {
        micros_to_time(self.immediate_commit_timestamp)
    }

    /// Commit time on the original source, if the event carried one.
    pub fn original_commit_time(&self) -> Option<SystemTime> {
        micros_to_time(self.original_commit_timestamp)
    }

    /// Decodes the tagged (MySQL 8.3+) wire form, a schema-driven
    /// variable-length message.
    pub fn decode_tagged(&mut self, data: &[u8]) -> Result<()> {
        let mut msg = Message::new(vec![
            Field::int_fixed("gtid_flags", 1),
            Field::int_fixed("uuid", SID_LENGTH),
            Field::int_var("gno"),
            Field::string_field("tag"),
            Field::int_var("last_committed"),
            Field::int_var("sequence_number"),
            Field::uint_var("immediate_commit_timestamp"),
            Field::uint_var("original_commit_timestamp").optional(),
            Field::uint_var("transaction_length"),
            Field::uint_var("immediate_server_version"),
            Field::uint_var("original_server_version").optional(),
            Field::uint_var("commit_group_ticket").optional(),
        ]);
        msg.unmarshal(data)?;

        self.commit_flag = msg.field("gtid_flags")?.bytes()?[0];
        self.sid = msg
            .field("uuid")?
            .bytes()?
            .try_into()
            .map_err(|_| Error::MalformedMessage("uuid field is not 16 bytes".into()))?;
        self.gno = msg.field("gno")?.int()?;
        self.tag = msg.field("tag")?.string()?.to_owned();
        self.last_committed = msg.field("last_committed")?.int()?;
        self.sequence_number = msg.field("sequence_number")?.int()?;

        self.immediate_commit_timestamp = msg.field("immediate_commit_timestamp")?.uint()?;
        let original = msg.field("original_commit_timestamp")?;
        self.original_commit_timestamp = if original.skipped {
            self.immediate_commit_timestamp
        } else {
            original.uint()?
        };

        self.transaction_length = msg.field("transaction_length")?.uint()?;

        self.immediate_server_version = msg.field("immediate_server_version")?.uint()? as u32;
        let original = msg.field("original_server_version")?;
        self.original_server_version = if original.skipped {
            self.immediate_server_version
        } else {
            original.uint()? as u32
        };

        Ok(())
    }
}

fn micros_to_time(micros: u64) -> Option<SystemTime> {
    if micros == 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_micros(micros))
}

impl Event for GtidEvent {
    /// Decodes the classic wire form. Trailing field groups are optional;
    /// decoding stops cleanly at whichever the server sent last.
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 25 {
            return Err(Error::MalformedEvent(format!(
                "gtid event too short: {} bytes",
                data.len()
            )));
        }

        let mut pos = 0;
        self.commit_flag = data[pos];
        pos += 1;
        self.sid.copy_from_slice(&data[pos..pos + SID_LENGTH]);
        pos += SID_LENGTH;
        self.gno = codec::parse_binary_i64(&data[pos..])?;
        pos += 8;

        if data.len() >= 42 && data[pos] == LOGICAL_TIMESTAMP_TYPE_CODE {
            pos += 1;
            self.last_committed = codec::parse_binary_i64(&data[pos..])?;
            pos += PART_LOGICAL_TIMESTAMP_LENGTH;
            self.sequence_number = codec::parse_binary_i64(&data[pos..])?;
            pos += 8;

            if data.len() - pos < IMMEDIATE_COMMIT_TIMESTAMP_LENGTH {
                return Ok(());
            }
            self.immediate_commit_timestamp =
                codec::fixed_length_int(&data[pos..pos + IMMEDIATE_COMMIT_TIMESTAMP_LENGTH]);
            pos += IMMEDIATE_COMMIT_TIMESTAMP_LENGTH;
            if self.immediate_commit_timestamp & (1 << 55) != 0 {
                // Bit 55 set: a separate original-commit timestamp follows.
                self.immediate_commit_timestamp &= !(1 << 55);
                if data.len() - pos < IMMEDIATE_COMMIT_TIMESTAMP_LENGTH {
                    return Err(Error::MalformedEvent(
                        "gtid event misses original commit timestamp".into(),
                    ));
                }
                self.original_commit_timestamp =
                    codec::fixed_length_int(&data[pos..pos + IMMEDIATE_COMMIT_TIMESTAMP_LENGTH]);
                pos += IMMEDIATE_COMMIT_TIMESTAMP_LENGTH;
            } else {
                self.original_commit_timestamp = self.immediate_commit_timestamp;
            }

            if data.len() - pos < 1 {
                return Ok(());
            }
            let (length, _, n) = codec::length_encoded_int(&data[pos..])?;
            self.transaction_length = length;
            pos += n;

            if data.len() - pos < 4 {
                return Ok(());
            }
            self.immediate_server_version = codec::parse_binary_u32(&data[pos..])?;
            pos += 4;
            if self.immediate_server_version & (1 << 31) != 0 {
                // Bit 31 set: a separate original server version follows.
                self.immediate_server_version &= !(1 << 31);
                if data.len() - pos < 4 {
                    return Err(Error::MalformedEvent(
                        "gtid event misses original server version".into(),
                    ));
                }
                self.original_server_version = codec::parse_binary_u32(&data[pos..])?;
            } else {
                self.original_server_version = self.immediate_server_version;
            }
        }

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "Commit flag: {}", self.commit_flag)?;
        if self.tag.is_empty() {
            writeln!(w, "GTID_NEXT: {}:{}", self.sid_uuid(), self.gno)?;
        } else {
            writeln!(w, "GTID_NEXT: {}:{}:{}", self.sid_uuid(), self.tag, self.gno)?;
        }
        writeln!(w, "LAST_COMMITTED: {}", self.last_committed)?;
        writeln!(w, "SEQUENCE_NUMBER: {}", self.sequence_number)?;
        writeln!(
            w,
            "Immediate commit timestamp: {}",
            self.immediate_commit_timestamp
        )?;
        writeln!(
            w,
            "Original commit timestamp: {}",
            self.original_commit_timestamp
        )?;
        writeln!(w, "Transaction length: {}", self.transaction_length)?;
        writeln!(
            w,
            "Immediate server version: {}",
            self.immediate_server_version
        )?;
        writeln!(
            w,
            "Original server version: {}",
            self.original_server_version
        )?;
        writeln!(w)
    }
}

/// MariaDB GTID event announcing the next event group's GTID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MariadbGtidEvent {
    /// The announced GTID; the server id is filled from the event header.
    pub gtid: MariadbGtid,
    /// Event flags (`MARIADB_FL_*`).
    pub flags: u8,
    /// Group commit id, present when `MARIADB_FL_GROUP_COMMIT_ID` is set.
    pub commit_id: u64,
}

impl MariadbGtidEvent {
    /// Whether the group contains DDL.
    pub fn is_ddl(&self) -> bool {
        self.flags & MARIADB_FL_DDL != 0
    }

    /// Whether the event stands alone rather than opening a group.
    pub fn is_standalone(&self) -> bool {
        self.flags & MARIADB_FL_STANDALONE != 0
    }

    /// Whether the group was committed together with others.
    pub fn is_group_commit(&self) -> bool {
        self.flags & MARIADB_FL_GROUP_COMMIT_ID != 0
    }

    /// The GTID this event announces, as a single-domain set.
    pub fn gtid_next(&self) -> GtidSet {
        let mut set = MariadbGtidSet::new();
        set.add_gtid(self.gtid);
        GtidSet::Mariadb(set)
    }
}

impl Event for MariadbGtidEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 13 {
            return Err(Error::MalformedEvent(format!(
                "mariadb gtid event too short: {} bytes",
                data.len()
            )));
        }

        self.gtid.sequence_number = codec::parse_binary_u64(&data[0..])?;
        self.gtid.domain_id = codec::parse_binary_u32(&data[8..])?;
        self.flags = data[12];

        if self.flags & MARIADB_FL_GROUP_COMMIT_ID != 0 {
            self.commit_id = codec::parse_binary_u64(&data[13..])?;
        }

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        writeln!(w, "GTID: {}", self.gtid)?;
        writeln!(w, "Flags: {}", self.flags)?;
        writeln!(w, "CommitID: {}", self.commit_id)?;
        writeln!(w)
    }
}

/// MariaDB GTID_LIST event: the replication state at the top of the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MariadbGtidListEvent {
    /// One GTID per tracked domain.
    pub gtids: Vec<MariadbGtid>,
}

impl Event for MariadbGtidListEvent {
    fn decode(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(Error::MalformedEvent(format!(
                "mariadb gtid list event too short: {} bytes",
                data.len()
            )));
        }

        // Low 28 bits carry the count, the rest are flags.
        let count = codec::parse_binary_u32(&data[0..])? & ((1 << 28) - 1);
        let mut pos = 4;

        let need = 4 + count as usize * 16;
        if data.len() < need {
            return Err(Error::InvalidBuffer(format!(
                "gtid list declares {count} entries, needs {need} bytes, got {}",
                data.len()
            )));
        }

        self.gtids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let gtid = MariadbGtid {
                domain_id: codec::parse_binary_u32(&data[pos..])?,
                server_id: codec::parse_binary_u32(&data[pos + 4..])?,
                sequence_number: codec::parse_binary_u64(&data[pos + 8..])?,
            };
            pos += 16;
            self.gtids.push(gtid);
        }

        Ok(())
    }

    fn dump(&self, w: &mut dyn io::Write) -> io::Result<()> {
        write!(w, "Lists: [")?;
        let mut sep = "";
        for gtid in &self.gtids {
            write!(w, "{sep}{gtid}")?;
            sep = ", ";
        }
        writeln!(w, "]")?;
        writeln!(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    fn sid_bytes() -> [u8; 16] {
        *Uuid::parse_str(SID).unwrap().as_bytes()
    }

    fn classic_prefix(gno: i64) -> Vec<u8> {
        let mut body = vec![1u8];
        body.extend_from_slice(&sid_bytes());
        body.extend_from_slice(&gno.to_le_bytes());
        body
    }

    #[test]
    fn test_classic_minimal() {
        let mut e = GtidEvent::default();
        e.decode(&classic_prefix(9)).unwrap();
        assert_eq!(e.commit_flag, 1);
        assert_eq!(e.gno, 9);
        assert_eq!(e.sid_uuid().to_string(), SID);
        assert_eq!(e.last_committed, 0);
        assert_eq!(e.immediate_server_version, UNDEFINED_SERVER_VERSION);
        assert_eq!(e.gtid_next().to_string(), format!("{SID}:9"));
    }

    #[test]
    fn test_classic_with_logical_timestamps() {
        let mut body = classic_prefix(9);
        body.push(2); // logical timestamp type code
        body.extend_from_slice(&3i64.to_le_bytes());
        body.extend_from_slice(&4i64.to_le_bytes());

        let mut e = GtidEvent::default();
        e.decode(&body).unwrap();
        assert_eq!(e.last_committed, 3);
        assert_eq!(e.sequence_number, 4);
        assert_eq!(e.immediate_commit_timestamp, 0);
        assert!(e.immediate_commit_time().is_none());
    }

    #[test]
    fn test_classic_full() {
        let mut body = classic_prefix(9);
        body.push(2);
        body.extend_from_slice(&3i64.to_le_bytes());
        body.extend_from_slice(&4i64.to_le_bytes());

        // immediate commit timestamp with bit 55 set: original follows
        let imm: u64 = 1_700_000_000_000_000;
        let with_flag = imm | 1 << 55;
        body.extend_from_slice(&with_flag.to_le_bytes()[..7]);
        let orig: u64 = 1_600_000_000_000_000;
        body.extend_from_slice(&orig.to_le_bytes()[..7]);

        body.push(0x2a); // transaction length 42

        // immediate server version with bit 31 set: original follows
        body.extend_from_slice(&(80_036u32 | 1 << 31).to_le_bytes());
        body.extend_from_slice(&50_744u32.to_le_bytes());

        let mut e = GtidEvent::default();
        e.decode(&body).unwrap();
        assert_eq!(e.immediate_commit_timestamp, imm);
        assert_eq!(e.original_commit_timestamp, orig);
        assert_eq!(e.transaction_length, 42);
        assert_eq!(e.immediate_server_version, 80_036);
        assert_eq!(e.original_server_version, 50_744);
        assert!(e.immediate_commit_time().is_some());
    }

    #[test]
    fn test_classic_timestamp_shared() {
        let mut body = classic_prefix(9);
        body.push(2);
        body.extend_from_slice(&0i64.to_le_bytes());
        body.extend_from_slice(&1i64.to_le_bytes());

        let imm: u64 = 1_700_000_000_000_000;
        body.extend_from_slice(&imm.to_le_bytes()[..7]);
        body.push(1); // transaction length
        body.extend_from_slice(&80_036u32.to_le_bytes());

        let mut e = GtidEvent::default();
        e.decode(&body).unwrap();
        assert_eq!(e.original_commit_timestamp, imm);
        assert_eq!(e.original_server_version, 80_036);
    }

    #[test]
    fn test_classic_too_short() {
        assert!(GtidEvent::default().decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_tagged_round_trip() {
        use crate::serialization::{Field, Message};

        let mut msg = Message::new(vec![
            Field::int_fixed("gtid_flags", 1),
            Field::int_fixed("uuid", 16),
            Field::int_var("gno"),
            Field::string_field("tag"),
            Field::int_var("last_committed"),
            Field::int_var("sequence_number"),
            Field::uint_var("immediate_commit_timestamp"),
            Field::uint_var("original_commit_timestamp").optional(),
            Field::uint_var("transaction_length"),
            Field::uint_var("immediate_server_version"),
            Field::uint_var("original_server_version").optional(),
            Field::uint_var("commit_group_ticket").optional(),
        ]);
        msg.fields[0].set_bytes(vec![1]);
        msg.fields[1].set_bytes(sid_bytes().to_vec());
        msg.fields[2].set_int(7);
        msg.fields[3].set_string("ou");
        msg.fields[4].set_int(3);
        msg.fields[5].set_int(4);
        msg.fields[6].set_uint(1_700_000_000_000_000);
        // original_commit_timestamp skipped
        msg.fields[8].set_uint(120);
        msg.fields[9].set_uint(80_300);
        // original_server_version and commit_group_ticket skipped
        let wire = msg.marshal().unwrap();

        let mut e = GtidEvent::default();
        e.decode_tagged(&wire).unwrap();
        assert_eq!(e.commit_flag, 1);
        assert_eq!(e.sid, sid_bytes());
        assert_eq!(e.gno, 7);
        assert_eq!(e.tag, "ou");
        assert_eq!(e.last_committed, 3);
        assert_eq!(e.sequence_number, 4);
        // skipped optionals default to the immediate values
        assert_eq!(e.original_commit_timestamp, e.immediate_commit_timestamp);
        assert_eq!(e.original_server_version, 80_300);
        assert_eq!(e.transaction_length, 120);
    }

    #[test]
    fn test_tagged_malformed() {
        let mut e = GtidEvent::default();
        assert!(matches!(
            e.decode_tagged(&[0x00, 0x00]),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_mariadb_gtid() {
        let mut body = 42u64.to_le_bytes().to_vec();
        body.extend_from_slice(&2u32.to_le_bytes());
        body.push(MARIADB_FL_GROUP_COMMIT_ID | MARIADB_FL_DDL);
        body.extend_from_slice(&7u64.to_le_bytes());

        let mut e = MariadbGtidEvent::default();
        e.decode(&body).unwrap();
        assert_eq!(e.gtid.sequence_number, 42);
        assert_eq!(e.gtid.domain_id, 2);
        assert!(e.is_ddl());
        assert!(e.is_group_commit());
        assert!(!e.is_standalone());
        assert_eq!(e.commit_id, 7);
    }

    #[test]
    fn test_mariadb_gtid_list() {
        let mut body = 2u32.to_le_bytes().to_vec();
        for i in 0..2u32 {
            body.extend_from_slice(&i.to_le_bytes());
            body.extend_from_slice(&1u32.to_le_bytes());
            body.extend_from_slice(&u64::from(100 + i).to_le_bytes());
        }

        let mut e = MariadbGtidListEvent::default();
        e.decode(&body).unwrap();
        assert_eq!(e.gtids.len(), 2);
        assert_eq!(e.gtids[1].domain_id, 1);
        assert_eq!(e.gtids[1].sequence_number, 101);

        // declared count exceeding the buffer is rejected
        let body = u32::MAX.to_le_bytes().to_vec();
        assert!(MariadbGtidListEvent::default().decode(&body).is_err());
    }
}
