//! MySQL-flavor GTID sets
//!
//! A GTID set maps source UUIDs to normalized interval slices, e.g.
//! `3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5:10`. Both the textual form
//! used by `gtid_executed` and the little-endian binary form used by
//! `COM_BINLOG_DUMP_GTID` are supported.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::interval::{Interval, IntervalSlice};
use crate::codec;
use crate::error::{Error, Result};

/// One source UUID together with its executed-transaction intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UuidSet {
    /// Source identifier (the server UUID).
    pub sid: Uuid,
    /// Normalized executed intervals.
    pub intervals: IntervalSlice,
}

impl UuidSet {
    /// Creates a UUID set, normalizing the intervals.
    pub fn new(sid: Uuid, intervals: IntervalSlice) -> Self {
        UuidSet {
            sid,
            intervals: intervals.normalize(),
        }
    }

    /// Whether `sub` covers the same SID and only points covered by `self`.
    pub fn contain(&self, sub: &UuidSet) -> bool {
        self.sid == sub.sid && self.intervals.contain(&sub.intervals)
    }

    /// Unions `intervals` into this set.
    pub fn add_intervals(&mut self, intervals: &IntervalSlice) {
        let mut merged = self.intervals.clone();
        for iv in intervals {
            merged.push(*iv);
        }
        self.intervals = merged.normalize();
    }

    /// Subtracts `intervals` from this set.
    pub fn minus_intervals(&mut self, intervals: &IntervalSlice) {
        self.intervals = self.intervals.minus(intervals);
    }

    /// Appends the binary form: 16 raw SID bytes, `u64` interval count,
    /// then `(u64 start, u64 stop)` pairs, all little-endian.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.sid.as_bytes());
        buf.extend_from_slice(&(self.intervals.len() as u64).to_le_bytes());
        for iv in &self.intervals {
            buf.extend_from_slice(&iv.start.to_le_bytes());
            buf.extend_from_slice(&iv.stop.to_le_bytes());
        }
    }

    /// Binary form of this UUID set.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + 16 * self.intervals.len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes one UUID set from the front of `data`, returning it and the
    /// number of bytes consumed.
    pub(crate) fn decode_prefix(data: &[u8]) -> Result<(UuidSet, usize)> {
        if data.len() < 24 {
            return Err(Error::InvalidBuffer(format!(
                "uuid set needs at least 24 bytes, got {}",
                data.len()
            )));
        }

        let sid = Uuid::from_slice(&data[..16])
            .map_err(|e| Error::InvalidBuffer(format!("bad sid bytes: {e}")))?;
        let n = codec::fixed_length_int(&data[16..24]) as usize;

        let mut pos = 24;
        let need = pos + 16 * n;
        if data.len() < need {
            return Err(Error::InvalidBuffer(format!(
                "uuid set declares {n} intervals, needs {need} bytes, got {}",
                data.len()
            )));
        }

        let mut intervals = IntervalSlice::new();
        for _ in 0..n {
            let start = codec::fixed_length_int(&data[pos..pos + 8]) as i64;
            let stop = codec::fixed_length_int(&data[pos + 8..pos + 16]) as i64;
            intervals.push(Interval { start, stop });
            pos += 16;
        }

        Ok((
            UuidSet {
                sid,
                intervals: intervals.normalize(),
            },
            pos,
        ))
    }

    /// Decodes the binary form; the buffer must contain exactly one set.
    pub fn decode(data: &[u8]) -> Result<UuidSet> {
        let (set, n) = UuidSet::decode_prefix(data)?;
        if n != data.len() {
            return Err(Error::InvalidBuffer(format!(
                "uuid set buffer has {} trailing bytes",
                data.len() - n
            )));
        }
        Ok(set)
    }
}

impl FromStr for UuidSet {
    type Err = Error;

    /// Parses `UUID:interval[:interval...]`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut parts = s.split(':');
        let sid_part = parts.next().unwrap_or_default();

        let sid = Uuid::parse_str(sid_part)
            .map_err(|e| Error::InvalidFormat(format!("invalid sid {sid_part:?}: {e}")))?;

        let mut intervals = IntervalSlice::new();
        let mut seen = false;
        for part in parts {
            seen = true;
            intervals.push(part.parse()?);
        }
        if !seen {
            return Err(Error::InvalidFormat(format!(
                "invalid GTID set {s:?}, must be uuid:interval[:interval]"
            )));
        }

        Ok(UuidSet {
            sid,
            intervals: intervals.normalize(),
        })
    }
}

impl fmt::Display for UuidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sid)?;
        for iv in &self.intervals {
            write!(f, ":{iv}")?;
        }
        Ok(())
    }
}

/// A set of MySQL GTIDs, keyed by stringified source UUID.
///
/// The canonical string form sorts sets lexicographically by UUID, which
/// the ordered map gives for free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlGtidSet {
    sets: BTreeMap<String, UuidSet>,
}

impl MysqlGtidSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        MysqlGtidSet::default()
    }

    /// Decodes the binary form: `u64` UUID count followed by that many
    /// encoded UUID sets.
    pub fn decode(data: &[u8]) -> Result<MysqlGtidSet> {
        if data.len() < 8 {
            return Err(Error::InvalidBuffer(format!(
                "gtid set needs at least 8 bytes, got {}",
                data.len()
            )));
        }

        let n = codec::fixed_length_int(&data[..8]);
        let mut pos = 8;

        let mut set = MysqlGtidSet::new();
        for _ in 0..n {
            let (uuid_set, consumed) = UuidSet::decode_prefix(&data[pos..])?;
            pos += consumed;
            set.add_set(uuid_set);
        }

        if pos != data.len() {
            return Err(Error::InvalidBuffer(format!(
                "gtid set buffer has {} trailing bytes",
                data.len() - pos
            )));
        }

        Ok(set)
    }

    /// Binary form: `u64` UUID count plus each UUID set.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.sets.len() as u64).to_le_bytes());
        for set in self.sets.values() {
            set.encode_into(&mut buf);
        }
        buf
    }

    /// Unions a UUID set into this set; repeated SIDs merge intervals.
    pub fn add_set(&mut self, set: UuidSet) {
        match self.sets.get_mut(&set.sid.to_string()) {
            Some(existing) => existing.add_intervals(&set.intervals),
            None => {
                self.sets.insert(set.sid.to_string(), set);
            }
        }
    }

    /// Subtracts a UUID set; the SID entry is dropped when its intervals
    /// empty out.
    pub fn minus_set(&mut self, set: &UuidSet) {
        let sid = set.sid.to_string();
        if let Some(existing) = self.sets.get_mut(&sid) {
            existing.minus_intervals(&set.intervals);
            if existing.intervals.is_empty() {
                self.sets.remove(&sid);
            }
        }
    }

    /// Records a single executed transaction, `[gno, gno + 1)`.
    pub fn add_gtid(&mut self, sid: Uuid, gno: i64) {
        match self.sets.get_mut(&sid.to_string()) {
            Some(existing) => existing.intervals.insert_interval(Interval {
                start: gno,
                stop: gno + 1,
            }),
            None => {
                self.sets.insert(
                    sid.to_string(),
                    UuidSet {
                        sid,
                        intervals: vec![Interval {
                            start: gno,
                            stop: gno + 1,
                        }]
                        .into(),
                    },
                );
            }
        }
    }

    /// Parses and unions a textual GTID set into this one.
    pub fn update(&mut self, gtid_str: &str) -> Result<()> {
        let parsed: MysqlGtidSet = gtid_str.parse()?;
        for set in parsed.sets.into_values() {
            self.add_set(set);
        }
        Ok(())
    }

    /// Unions all UUID sets from `addend`.
    pub fn add(&mut self, addend: MysqlGtidSet) {
        for set in addend.sets.into_values() {
            self.add_set(set);
        }
    }

    /// Subtracts all UUID sets of `subtrahend`.
    pub fn minus(&mut self, subtrahend: &MysqlGtidSet) {
        for set in subtrahend.sets.values() {
            self.minus_set(set);
        }
    }

    /// Per-UUID containment; a SID missing on `self` fails the check.
    pub fn contain(&self, sub: &MysqlGtidSet) -> bool {
        sub.sets.iter().all(|(sid, set)| {
            self.sets
                .get(sid)
                .is_some_and(|own| own.contain(set))
        })
    }

    /// Whether no SID carries any interval.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// UUID sets keyed by stringified SID.
    pub fn sets(&self) -> &BTreeMap<String, UuidSet> {
        &self.sets
    }
}

impl FromStr for MysqlGtidSet {
    type Err = Error;

    /// Parses a comma-separated list of UUID sets; the empty string is the
    /// empty set and repeated UUIDs union their intervals.
    fn from_str(s: &str) -> Result<Self> {
        let mut set = MysqlGtidSet::new();
        if s.is_empty() {
            return Ok(set);
        }

        for part in s.split(',') {
            set.add_set(part.parse()?);
        }
        Ok(set)
    }
}

impl fmt::Display for MysqlGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for set in self.sets.values() {
            write!(f, "{sep}{set}")?;
            sep = ",";
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID1: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
    const SID2: &str = "519ce0f4-4c49-11e9-8705-0242ac110002";

    fn parse(s: &str) -> MysqlGtidSet {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_uuid_set() {
        let set: UuidSet = "3E11FA47-71CA-11E1-9E33-C80AA9429562:1-5:10".parse().unwrap();
        assert_eq!(set.intervals.as_slice().len(), 2);
        assert_eq!(set.intervals.as_slice()[0], Interval { start: 1, stop: 6 });
        assert_eq!(
            set.intervals.as_slice()[1],
            Interval {
                start: 10,
                stop: 11
            }
        );
        assert_eq!(set.to_string(), format!("{SID1}:1-5:10"));
    }

    #[test]
    fn test_parse_uuid_set_invalid() {
        assert!("not-a-uuid:1-5".parse::<UuidSet>().is_err());
        assert!(SID1.parse::<UuidSet>().is_err());
        assert!(format!("{SID1}:5-1").parse::<UuidSet>().is_err());
    }

    #[test]
    fn test_parse_gtid_set() {
        let set = parse(&format!("{SID1}:1-5,{SID2}:1-3:5"));
        assert_eq!(set.sets().len(), 2);
        assert_eq!(set.to_string(), format!("{SID1}:1-5,{SID2}:1-3:5"));

        assert!(parse("").is_empty());
    }

    #[test]
    fn test_parse_redundant_uuid_unions() {
        let set = parse(&format!("{SID1}:1-5,{SID1}:4-10"));
        assert_eq!(set.to_string(), format!("{SID1}:1-10"));
    }

    #[test]
    fn test_canonical_print_sorts() {
        // parse order does not matter; printing sorts by UUID
        let set = parse(&format!("{SID2}:1-3,{SID1}:1-5"));
        assert_eq!(set.to_string(), format!("{SID1}:1-5,{SID2}:1-3"));
    }

    #[test]
    fn test_contain() {
        let all = parse(&format!("{SID1}:1-100"));
        assert!(all.contain(&parse(&format!("{SID1}:10-20"))));
        assert!(!all.contain(&parse(&format!("{SID1}:50-200"))));

        let multi = parse(&format!("{SID1}:1-100,{SID2}:1-5"));
        assert!(multi.contain(&parse(&format!("{SID2}:1-3"))));
        assert!(!multi.contain(&parse(&format!("{SID2}:1-10"))));

        // missing SID on self fails containment
        assert!(!all.contain(&parse(&format!("{SID2}:1"))));

        // reflexivity
        assert!(multi.contain(&multi));
    }

    #[test]
    fn test_add_gtid() {
        let sid = Uuid::parse_str(SID1).unwrap();
        let mut set = MysqlGtidSet::new();
        set.add_gtid(sid, 1);
        set.add_gtid(sid, 2);
        set.add_gtid(sid, 5);
        assert_eq!(set.to_string(), format!("{SID1}:1-2:5"));

        set.add_gtid(sid, 3);
        set.add_gtid(sid, 4);
        assert_eq!(set.to_string(), format!("{SID1}:1-5"));
    }

    #[test]
    fn test_update() {
        let mut set = parse(&format!("{SID1}:1-5"));
        set.update(&format!("{SID1}:6-10,{SID2}:1")).unwrap();
        assert_eq!(set.to_string(), format!("{SID1}:1-10,{SID2}:1"));
    }

    #[test]
    fn test_minus_set_drops_empty_uuid() {
        let mut set = parse(&format!("{SID1}:1-5,{SID2}:1-3"));
        let sub: UuidSet = format!("{SID2}:1-3").parse().unwrap();
        set.minus_set(&sub);
        assert_eq!(set.to_string(), format!("{SID1}:1-5"));
        assert!(!set.is_empty());

        let sub: UuidSet = format!("{SID1}:1-5").parse().unwrap();
        set.minus_set(&sub);
        assert!(set.is_empty());
    }

    #[test]
    fn test_minus_partial() {
        let mut set = parse(&format!("{SID1}:1-10"));
        set.minus(&parse(&format!("{SID1}:3-4:7")));
        assert_eq!(set.to_string(), format!("{SID1}:1-2:5-6:8-10"));
    }

    #[test]
    fn test_binary_round_trip() {
        let set = parse(&format!("{SID1}:1-5:10,{SID2}:1-3"));
        let encoded = set.encode();
        let decoded = MysqlGtidSet::decode(&encoded).unwrap();
        assert_eq!(decoded, set);

        let empty = MysqlGtidSet::new();
        assert_eq!(MysqlGtidSet::decode(&empty.encode()).unwrap(), empty);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(MysqlGtidSet::decode(&[1, 0, 0]).is_err());

        // declares one uuid set but carries no bytes for it
        let mut data = 1u64.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 10]);
        assert!(MysqlGtidSet::decode(&data).is_err());

        // declared interval count exceeds the buffer
        let set = parse(&format!("{SID1}:1-5"));
        let mut encoded = set.encode();
        let len = encoded.len();
        encoded[len - 16 - 8] = 9; // interval count of the only uuid set
        assert!(MysqlGtidSet::decode(&encoded).is_err());
    }

    #[test]
    fn test_text_round_trip_canonical() {
        for text in [
            format!("{SID1}:1-5"),
            format!("{SID1}:1-5:10,{SID2}:7"),
            String::new(),
        ] {
            let printed = parse(&text).to_string();
            assert_eq!(parse(&printed).to_string(), printed);
        }
    }
}
