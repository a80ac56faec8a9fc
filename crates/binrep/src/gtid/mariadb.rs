//! MariaDB-flavor GTIDs
//!
//! A MariaDB GTID is `domain-server-sequence`; a set keeps the latest
//! GTID per replication domain rather than interval ranges.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One MariaDB global transaction identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MariadbGtid {
    /// Replication domain.
    pub domain_id: u32,
    /// Server that committed the transaction.
    pub server_id: u32,
    /// Monotonic sequence number within the domain.
    pub sequence_number: u64,
}

impl MariadbGtid {
    /// Whether this GTID supersedes `other` within the same domain.
    pub fn contain(&self, other: &MariadbGtid) -> bool {
        self.domain_id == other.domain_id && self.sequence_number >= other.sequence_number
    }
}

impl FromStr for MariadbGtid {
    type Err = Error;

    /// Parses `domain-server-sequence`; the empty string is the zero GTID.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(MariadbGtid::default());
        }

        let invalid =
            || Error::InvalidFormat(format!("invalid MariaDB GTID {s:?}, must be D-S-N"));

        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }

        Ok(MariadbGtid {
            domain_id: parts[0].parse().map_err(|_| invalid())?,
            server_id: parts[1].parse().map_err(|_| invalid())?,
            sequence_number: parts[2].parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for MariadbGtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.domain_id, self.server_id, self.sequence_number
        )
    }
}

/// The latest GTID seen in each replication domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MariadbGtidSet {
    sets: BTreeMap<u32, MariadbGtid>,
}

impl MariadbGtidSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        MariadbGtidSet::default()
    }

    /// Records `gtid`, keeping only the highest sequence per domain.
    pub fn add_gtid(&mut self, gtid: MariadbGtid) {
        match self.sets.get_mut(&gtid.domain_id) {
            Some(existing) if existing.sequence_number >= gtid.sequence_number => {}
            Some(existing) => *existing = gtid,
            None => {
                self.sets.insert(gtid.domain_id, gtid);
            }
        }
    }

    /// Parses and merges a textual GTID list into this set.
    pub fn update(&mut self, gtid_str: &str) -> Result<()> {
        let parsed: MariadbGtidSet = gtid_str.parse()?;
        for gtid in parsed.sets.into_values() {
            self.add_gtid(gtid);
        }
        Ok(())
    }

    /// Per-domain containment; a domain missing on `self` fails the check.
    pub fn contain(&self, sub: &MariadbGtidSet) -> bool {
        sub.sets.iter().all(|(domain, gtid)| {
            self.sets
                .get(domain)
                .is_some_and(|own| own.contain(gtid))
        })
    }

    /// Whether no domain is tracked.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// GTIDs keyed by domain.
    pub fn sets(&self) -> &BTreeMap<u32, MariadbGtid> {
        &self.sets
    }

    /// Wire form; MariaDB transfers GTID sets as their text.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl FromStr for MariadbGtidSet {
    type Err = Error;

    /// Parses a comma-separated GTID list; the empty string is the empty
    /// set.
    fn from_str(s: &str) -> Result<Self> {
        let mut set = MariadbGtidSet::new();
        if s.is_empty() {
            return Ok(set);
        }

        for part in s.split(',') {
            set.add_gtid(part.trim().parse()?);
        }
        Ok(set)
    }
}

impl fmt::Display for MariadbGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for gtid in self.sets.values() {
            write!(f, "{sep}{gtid}")?;
            sep = ",";
        }
        Ok(())
    }
}
