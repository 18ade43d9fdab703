//! Storage module for persisting discovered communities
//!
//! This module owns all on-disk state for the crawler, including:
//! - The append-only NDJSON record log
//! - Batched durability points (flush + sync)
//! - Atomic snapshot rewrites
//! - Byte-level corruption repair
//!
//! The in-memory [`SeenSet`] is derived from the log and never serialized on
//! its own.

mod error;
mod ndjson;
mod repair;

pub use error::{StoreError, StoreResult};
pub use ndjson::NdjsonStore;
pub use repair::scan_fragments;

use crate::identity::normalize_identity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// One confirmed community
///
/// Serialized as `{"name", "subscribers", "nsfw"}`, the format downstream
/// consumers of the log read. `identity`, `metric` and `flag` are accepted as
/// aliases when loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Normalized community identity
    #[serde(rename = "name", alias = "identity")]
    pub identity: String,

    /// Subscriber count
    #[serde(rename = "subscribers", alias = "metric")]
    pub metric: u64,

    /// Adult-content flag from the authoritative endpoint
    #[serde(rename = "nsfw", alias = "flag")]
    pub flag: bool,
}

impl Record {
    /// Creates a new record
    pub fn new(identity: impl Into<String>, metric: u64, flag: bool) -> Self {
        Self {
            identity: identity.into(),
            metric,
            flag,
        }
    }

    /// Parses one serialized line, returning None if it is not a valid record
    pub fn from_json(line: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Record>(line)
            .ok()
            .and_then(Record::normalized)
    }

    /// Re-normalizes the identity, rejecting records whose identity is invalid
    pub fn normalized(self) -> Option<Self> {
        let identity = normalize_identity(&self.identity)?;
        Some(Self { identity, ..self })
    }
}

/// The set of all identities ever written to the store
///
/// There is no removal API: the set only shrinks by being rebuilt from a
/// repaired store.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    identities: HashSet<String>,
}

impl SeenSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the identity has been seen
    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    /// Adds an identity, returning true if it was not already present
    pub fn insert(&mut self, identity: impl Into<String>) -> bool {
        self.identities.insert(identity.into())
    }

    /// Number of identities seen
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns whether nothing has been seen yet
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Returns the candidates that have not been seen
    pub fn fresh<'a, I>(&self, candidates: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates
            .into_iter()
            .filter(|c| !self.contains(c))
            .cloned()
            .collect()
    }

    /// Returns all identities in sorted order
    pub fn sorted(&self) -> Vec<String> {
        let mut all: Vec<String> = self.identities.iter().cloned().collect();
        all.sort();
        all
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self {
            identities: iter.into_iter().collect(),
        }
    }
}

/// When the store reaches a durability point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurabilityPolicy {
    /// Number of pending records that forces a sync (1 = every append)
    pub batch_size: usize,

    /// Maximum time since the last sync before an append forces one
    pub max_delay: Duration,
}

impl DurabilityPolicy {
    /// Sync after every append
    pub fn immediate() -> Self {
        Self {
            batch_size: 1,
            max_delay: Duration::ZERO,
        }
    }
}

impl Default for DurabilityPolicy {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Result of replaying the log
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Records merged by identity, last write wins, in first-appearance order
    pub records: Vec<Record>,

    /// Identities of all loaded records
    pub seen: SeenSet,

    /// Lines that could not be parsed
    pub malformed: usize,
}

/// Result of a repair pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Records written back
    pub kept: usize,

    /// Records dropped because a later record had the same identity
    pub duplicates: usize,

    /// Non-whitespace bytes that were not part of any valid record
    pub discarded_bytes: usize,
}

/// Ordered last-write-wins merge of records by identity
#[derive(Debug, Default)]
pub(crate) struct RecordSet {
    records: Vec<Record>,
    positions: HashMap<String, usize>,
    duplicates: usize,
}

impl RecordSet {
    pub(crate) fn upsert(&mut self, record: Record) {
        match self.positions.get(&record.identity) {
            Some(&idx) => {
                self.records[idx] = record;
                self.duplicates += 1;
            }
            None => {
                self.positions
                    .insert(record.identity.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub(crate) fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_format() {
        let record = Record::new("pics", 10_000, false);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"name":"pics","subscribers":10000,"nsfw":false}"#);
    }

    #[test]
    fn test_record_aliases_and_legacy_fields() {
        let aliased = Record::from_json(br#"{"identity":"Pics","metric":5,"flag":true}"#);
        assert_eq!(aliased, Some(Record::new("pics", 5, true)));

        let legacy = Record::from_json(
            br#"{"name":"gaming","subscribers":10000,"nsfw":false,"verified_nsfw":false}"#,
        );
        assert_eq!(legacy, Some(Record::new("gaming", 10_000, false)));
    }

    #[test]
    fn test_record_rejects_invalid() {
        assert!(Record::from_json(br#"{"name":"pics","subscribers":-1,"nsfw":false}"#).is_none());
        assert!(Record::from_json(br#"{"name":"x","subscribers":1,"nsfw":false}"#).is_none());
        assert!(Record::from_json(br#"{"name":"pics","subscribers":null,"nsfw":false}"#).is_none());
        assert!(Record::from_json(br#"{"name":"pics","subscri"#).is_none());
    }

    #[test]
    fn test_seen_set_fresh() {
        let seen: SeenSet = vec!["x".to_string(), "y".to_string()].into_iter().collect();
        let candidates: BTreeSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();

        let fresh = seen.fresh(&candidates);
        assert_eq!(fresh.into_iter().collect::<Vec<_>>(), vec!["z".to_string()]);
    }

    #[test]
    fn test_record_set_last_write_wins() {
        let mut set = RecordSet::default();
        set.upsert(Record::new("aaa", 1, false));
        set.upsert(Record::new("bbb", 2, false));
        set.upsert(Record::new("aaa", 3, true));

        assert_eq!(set.duplicates(), 1);
        assert_eq!(
            set.into_records(),
            vec![Record::new("aaa", 3, true), Record::new("bbb", 2, false)]
        );
    }
}
