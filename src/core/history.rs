//! Claim History Store: append-only, per-name ordered list of confirmed claim records.
//!
//! # Scan order
//! Scans enumerate names in the order the store returns them. `MemoryHistoryStore` uses
//! byte-lexicographic name order (BTreeMap order). That order is stable across calls,
//! which offset/limit pagination depends on: page `k` of a filter is exactly the
//! `k`-th slice of the unpaginated result.
//!
//! # Invariants
//! - Records are never deleted or mutated, only superseded by a later record.
//! - A name's records are ordered by height; appending below the tail height is refused.
//! - Records are appended only after their transaction confirmed.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use crate::core::name::Name;
use crate::core::transaction::TxId;
use crate::error::{RegistryError, Result};

/// Names fetched from the store per scan round trip.
pub const SCAN_BATCH_SIZE: usize = 256;

/// Default number of entries returned by `scan_all`.
pub const DEFAULT_SCAN_MAX_COUNT: usize = 500;

/// One historical claim entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub name: Name,
    pub value: Vec<u8>,
    /// Transaction that owns the claim output.
    pub txid: TxId,
    /// Height of the block that confirmed `txid`.
    pub height: u64,
}

/// Persistence collaborator: durable `name -> ordered list of ClaimRecord`.
pub trait ClaimHistoryStore: Send + Sync {
    /// The name's records in height order. `NotFound` if the store has never seen the
    /// name, which is distinct from a known name with no records.
    fn read_history(&self, name: &Name) -> Result<Vec<ClaimRecord>>;

    fn append(&self, record: ClaimRecord) -> Result<()>;

    /// Up to `limit` names with their histories, in scan order, starting from `start`.
    fn scan_batch(&self, start: Bound<&Name>, limit: usize) -> Result<Vec<(Name, Vec<ClaimRecord>)>>;
}

/// In-memory history store.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    names: RwLock<BTreeMap<Name, Vec<ClaimRecord>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `name` known without any record.
    pub fn register_name(&self, name: Name) {
        self.names.write().entry(name).or_default();
    }

    pub fn name_count(&self) -> usize {
        self.names.read().len()
    }

    pub fn record_count(&self) -> usize {
        self.names.read().values().map(Vec::len).sum()
    }
}

impl ClaimHistoryStore for MemoryHistoryStore {
    fn read_history(&self, name: &Name) -> Result<Vec<ClaimRecord>> {
        self.names
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    fn append(&self, record: ClaimRecord) -> Result<()> {
        let mut names = self.names.write();
        let history = names.entry(record.name.clone()).or_default();
        if let Some(tail) = history.last() {
            if record.height < tail.height {
                return Err(RegistryError::Store(format!(
                    "record for {} at height {} is below tail height {}",
                    record.name, record.height, tail.height
                )));
            }
            if tail.txid == record.txid {
                return Err(RegistryError::Store(format!(
                    "record for {} from tx {} already appended",
                    record.name, record.txid
                )));
            }
        }
        history.push(record);
        Ok(())
    }

    fn scan_batch(&self, start: Bound<&Name>, limit: usize) -> Result<Vec<(Name, Vec<ClaimRecord>)>> {
        let names = self.names.read();
        Ok(names
            .range::<Name, _>((start, Bound::Unbounded))
            .take(limit)
            .map(|(name, history)| (name.clone(), history.clone()))
            .collect())
    }
}

/// Lazy scan over `(name, most recent record)`, one entry per name, in scan order.
///
/// Fetches names from the store in batches of `SCAN_BATCH_SIZE`. Names without any
/// record are skipped. A scan can be restarted from any name with `NameScan::from`.
/// After a store error the error is yielded once and the scan ends.
pub struct NameScan<'a> {
    store: &'a dyn ClaimHistoryStore,
    cursor: Option<Name>,
    inclusive: bool,
    buffer: VecDeque<(Name, ClaimRecord)>,
    finished: bool,
}

impl<'a> NameScan<'a> {
    /// Scan from the first name.
    pub fn new(store: &'a dyn ClaimHistoryStore) -> Self {
        Self { store, cursor: None, inclusive: true, buffer: VecDeque::new(), finished: false }
    }

    /// Scan from `start` (inclusive).
    pub fn from(store: &'a dyn ClaimHistoryStore, start: Name) -> Self {
        Self { store, cursor: Some(start), inclusive: true, buffer: VecDeque::new(), finished: false }
    }

    fn fill(&mut self) -> Result<()> {
        let start = match (&self.cursor, self.inclusive) {
            (None, _) => Bound::Unbounded,
            (Some(name), true) => Bound::Included(name),
            (Some(name), false) => Bound::Excluded(name),
        };
        let batch = self.store.scan_batch(start, SCAN_BATCH_SIZE)?;
        if batch.len() < SCAN_BATCH_SIZE {
            self.finished = true;
        }
        if let Some((last, _)) = batch.last() {
            self.cursor = Some(last.clone());
            self.inclusive = false;
        }
        self.buffer.extend(
            batch
                .into_iter()
                .filter_map(|(name, mut history)| history.pop().map(|latest| (name, latest))),
        );
        Ok(())
    }
}

impl Iterator for NameScan<'_> {
    type Item = Result<(Name, ClaimRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fill() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}

/// Name filter applied on top of a `NameScan`.
#[derive(Debug, Clone)]
pub struct ScanQuery {
    /// Regular expression searched (unanchored) in the decoded name. Empty matches all.
    pub pattern: String,
    /// Only records younger than this many blocks. Zero means unbounded.
    pub max_age: u64,
    pub current_height: u64,
    /// Matches skipped before the first returned entry.
    pub offset: usize,
    /// Maximum entries returned; `None` returns all.
    pub limit: Option<usize>,
}

/// Lazy, finite filtered scan. See `scan`.
pub struct FilteredScan<'a> {
    inner: NameScan<'a>,
    regex: Option<Regex>,
    max_age: u64,
    current_height: u64,
    to_skip: usize,
    remaining: Option<usize>,
}

impl FilteredScan<'_> {
    fn matches(&self, name: &Name, record: &ClaimRecord) -> bool {
        if let Some(regex) = &self.regex {
            if !regex.is_match(&name.to_string_lossy()) {
                return false;
            }
        }
        self.max_age == 0 || self.current_height.saturating_sub(record.height) < self.max_age
    }
}

impl Iterator for FilteredScan<'_> {
    type Item = Result<(Name, ClaimRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            let (name, record) = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if !self.matches(&name, &record) {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Some(Ok((name, record)));
        }
    }
}

/// Filtered scan over most-recent records: pattern and age filters first, then offset
/// and limit, all in scan order.
pub fn scan<'a>(store: &'a dyn ClaimHistoryStore, query: &ScanQuery) -> Result<FilteredScan<'a>> {
    let regex = if query.pattern.is_empty() {
        None
    } else {
        Some(Regex::new(&query.pattern)?)
    };
    Ok(FilteredScan {
        inner: NameScan::new(store),
        regex,
        max_age: query.max_age,
        current_height: query.current_height,
        to_skip: query.offset,
        remaining: query.limit,
    })
}

/// Every record (not reduced to the most recent) of names at or after `start`, at most
/// `max_count` of them.
pub fn scan_all(store: &dyn ClaimHistoryStore, start: Option<&Name>, max_count: usize) -> Result<Vec<ClaimRecord>> {
    let mut out = Vec::new();
    let mut cursor: Option<Name> = start.cloned();
    let mut inclusive = true;
    while out.len() < max_count {
        let bound = match (&cursor, inclusive) {
            (None, _) => Bound::Unbounded,
            (Some(name), true) => Bound::Included(name),
            (Some(name), false) => Bound::Excluded(name),
        };
        let batch = store.scan_batch(bound, SCAN_BATCH_SIZE)?;
        let done = batch.len() < SCAN_BATCH_SIZE;
        for (name, history) in batch {
            for record in history {
                if out.len() == max_count {
                    return Ok(out);
                }
                out.push(record);
            }
            cursor = Some(name);
            inclusive = false;
        }
        if done {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(name: &str, value: &str, height: u64) -> ClaimRecord {
        let mut id = [0u8; 32];
        id[..8].copy_from_slice(&height.to_le_bytes());
        id[8] = name.len() as u8;
        id[9] = value.len() as u8;
        ClaimRecord {
            name: Name::new(name).unwrap(),
            value: value.as_bytes().to_vec(),
            txid: TxId::from_bytes(id),
            height,
        }
    }

    fn store_with(records: &[ClaimRecord]) -> MemoryHistoryStore {
        let store = MemoryHistoryStore::new();
        for r in records {
            store.append(r.clone()).unwrap();
        }
        store
    }

    fn names(entries: Vec<Result<(Name, ClaimRecord)>>) -> Vec<String> {
        entries.into_iter().map(|e| e.unwrap().0.to_string()).collect()
    }

    #[test]
    fn test_read_history_not_found_vs_empty() {
        let store = MemoryHistoryStore::new();
        let bob = Name::new("bob").unwrap();
        assert!(matches!(store.read_history(&bob), Err(RegistryError::NotFound(_))));
        store.register_name(bob.clone());
        assert_eq!(store.read_history(&bob).unwrap(), vec![]);
    }

    #[test]
    fn test_append_keeps_height_order() {
        let store = store_with(&[record("bob", "hello", 10), record("bob", "world", 12)]);
        let history = store.read_history(&Name::new("bob").unwrap()).unwrap();
        assert_eq!(history.iter().map(|r| r.value.clone()).collect::<Vec<_>>(), vec![b"hello".to_vec(), b"world".to_vec()]);

        let err = store.append(record("bob", "older", 11)).unwrap_err();
        assert!(matches!(err, RegistryError::Store(_)));
        assert_eq!(store.record_count(), 2);
    }

    #[test]
    fn test_append_rejects_duplicate_tail() {
        let store = store_with(&[record("bob", "hello", 10)]);
        assert!(store.append(record("bob", "hello", 10)).is_err());
    }

    #[test]
    fn test_name_scan_reduces_to_most_recent() {
        let store = store_with(&[
            record("carol", "c1", 3),
            record("alice", "a1", 1),
            record("alice", "a2", 5),
            record("bob", "b1", 2),
        ]);
        store.register_name(Name::new("empty").unwrap());
        let entries: Vec<_> = NameScan::new(&store).map(|e| e.unwrap()).collect();
        let view: Vec<(String, String)> = entries
            .iter()
            .map(|(n, r)| (n.to_string(), String::from_utf8(r.value.clone()).unwrap()))
            .collect();
        assert_eq!(
            view,
            vec![
                ("alice".to_string(), "a2".to_string()),
                ("bob".to_string(), "b1".to_string()),
                ("carol".to_string(), "c1".to_string()),
            ]
        );
    }

    #[test]
    fn test_name_scan_crosses_batches_and_restarts() {
        let store = MemoryHistoryStore::new();
        for i in 0..(SCAN_BATCH_SIZE * 2 + 3) {
            store.append(record(&format!("n{:05}", i), "v", 1)).unwrap();
        }
        assert_eq!(NameScan::new(&store).count(), SCAN_BATCH_SIZE * 2 + 3);

        let restarted: Vec<_> = NameScan::from(&store, Name::new("n00300").unwrap()).map(|e| e.unwrap().0).collect();
        assert_eq!(restarted.len(), SCAN_BATCH_SIZE * 2 + 3 - 300);
        assert_eq!(restarted[0].to_string(), "n00300");
    }

    #[test]
    fn test_filter_pattern_and_age() {
        let store = store_with(&[
            record("alpha", "1", 100),
            record("alps", "2", 190),
            record("beta", "3", 195),
        ]);
        let query = ScanQuery { pattern: "^al".to_string(), max_age: 0, current_height: 200, offset: 0, limit: None };
        assert_eq!(names(scan(&store, &query).unwrap().collect()), vec!["alpha", "alps"]);

        let aged = ScanQuery { pattern: String::new(), max_age: 10, ..query.clone() };
        assert_eq!(names(scan(&store, &aged).unwrap().collect()), vec!["beta"]);

        // exactly max_age blocks old is excluded
        let boundary = ScanQuery { pattern: String::new(), max_age: 5, ..query };
        assert!(names(scan(&store, &boundary).unwrap().collect()).is_empty());
    }

    #[test]
    fn test_filter_invalid_pattern() {
        let store = MemoryHistoryStore::new();
        let query = ScanQuery { pattern: "(".to_string(), max_age: 0, current_height: 0, offset: 0, limit: None };
        assert!(matches!(scan(&store, &query).err(), Some(RegistryError::InvalidPattern(_))));
    }

    #[test]
    fn test_scan_all_returns_every_record() {
        let store = store_with(&[
            record("alice", "a1", 1),
            record("alice", "a2", 5),
            record("bob", "b1", 2),
            record("carol", "c1", 3),
        ]);
        let all = scan_all(&store, None, DEFAULT_SCAN_MAX_COUNT).unwrap();
        assert_eq!(all.len(), 4);

        let from_bob = scan_all(&store, Some(&Name::new("b").unwrap()), 2).unwrap();
        assert_eq!(from_bob.iter().map(|r| r.name.to_string()).collect::<Vec<_>>(), vec!["bob", "carol"]);

        let capped = scan_all(&store, None, 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].value, b"a1".to_vec());
    }

    proptest! {
        #[test]
        fn proptest_filter_pagination_is_a_slice(
            heights in proptest::collection::vec(0u64..500, 0..60),
            max_age in 0u64..300,
            from in 0usize..70,
            count in 0usize..70,
        ) {
            let store = MemoryHistoryStore::new();
            for (i, h) in heights.iter().enumerate() {
                store.append(record(&format!("name{:03}", i), "v", *h)).unwrap();
            }
            let base = ScanQuery { pattern: "[02468]$".to_string(), max_age, current_height: 500, offset: 0, limit: None };
            let all: Vec<Name> = scan(&store, &base).unwrap().map(|e| e.unwrap().0).collect();

            let page_query = ScanQuery { offset: from, limit: Some(count), ..base };
            let page: Vec<Name> = scan(&store, &page_query).unwrap().map(|e| e.unwrap().0).collect();

            let expected_len = count.min(all.len().saturating_sub(from));
            prop_assert_eq!(page.len(), expected_len);
            let start = from.min(all.len());
            prop_assert_eq!(&page[..], &all[start..start + expected_len]);
        }
    }
}
