//! Pending-operation tracker: which names have operations emitted but not yet confirmed
//! or invalidated.
//!
//! # Gating
//! Any non-empty entry for a name blocks further Activate/Update on it (`PendingConflict`).
//! Reserve is never gated: a reservation does not reveal the name.
//!
//! # Invariants
//! - Insertion order of txids per name is kept; `pending_for` reports it.
//! - Per-name sets that become empty are pruned, so `names()` lists only names with
//!   operations in flight.
//! - Removing an unknown entry is a no-op that logs a warning. A caller that never
//!   removes leaves the name blocked until restart; `names()` is how an operator spots it.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};
use crate::core::name::Name;
use crate::core::transaction::TxId;

/// Thread-safe `name -> ordered set of txids` of in-flight operations.
#[derive(Debug, Default)]
pub struct PendingSet {
    entries: RwLock<HashMap<Name, Vec<TxId>>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self, name: &Name) -> bool {
        self.entries.read().get(name).is_some_and(|txids| !txids.is_empty())
    }

    /// Records `txid` as pending for `name`. Adding the same pair twice keeps one entry.
    pub fn add(&self, name: Name, txid: TxId) {
        let mut entries = self.entries.write();
        let txids = entries.entry(name.clone()).or_default();
        if !txids.contains(&txid) {
            txids.push(txid);
            debug!(name = %name, txid = %txid, "pending operation added");
        }
    }

    /// Removes `txid` from `name`'s pending set. Returns whether it was present.
    pub fn remove(&self, name: &Name, txid: &TxId) -> bool {
        let mut entries = self.entries.write();
        let Some(txids) = entries.get_mut(name) else {
            warn!(name = %name, txid = %txid, "removing pending entry for a name with nothing pending");
            return false;
        };
        let before = txids.len();
        txids.retain(|t| t != txid);
        let removed = txids.len() != before;
        if txids.is_empty() {
            entries.remove(name);
        }
        if removed {
            debug!(name = %name, txid = %txid, "pending operation removed");
        } else {
            warn!(name = %name, txid = %txid, "removing unknown pending entry");
        }
        removed
    }

    /// Pending txids for `name`, oldest first.
    pub fn pending_for(&self, name: &Name) -> Vec<TxId> {
        self.entries.read().get(name).cloned().unwrap_or_default()
    }

    /// Every name with at least one pending operation, sorted.
    pub fn names(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of pending operations across all names.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn test_add_and_remove() {
        let pending = PendingSet::new();
        let bob = name("bob");
        let tx = TxId::from_bytes([1; 32]);

        assert!(!pending.has_pending(&bob));
        pending.add(bob.clone(), tx);
        assert!(pending.has_pending(&bob));
        assert_eq!(pending.len(), 1);

        assert!(pending.remove(&bob, &tx));
        assert!(!pending.has_pending(&bob));
        assert!(pending.is_empty());
        assert!(pending.names().is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let pending = PendingSet::new();
        let bob = name("bob");
        pending.add(bob.clone(), TxId::from_bytes([1; 32]));

        assert!(!pending.remove(&bob, &TxId::from_bytes([2; 32])));
        assert!(!pending.remove(&name("alice"), &TxId::from_bytes([1; 32])));
        assert!(pending.has_pending(&bob));
    }

    #[test]
    fn test_order_and_duplicates() {
        let pending = PendingSet::new();
        let bob = name("bob");
        let a = TxId::from_bytes([1; 32]);
        let b = TxId::from_bytes([2; 32]);
        pending.add(bob.clone(), b);
        pending.add(bob.clone(), a);
        pending.add(bob.clone(), b);
        assert_eq!(pending.pending_for(&bob), vec![b, a]);

        pending.remove(&bob, &b);
        assert_eq!(pending.pending_for(&bob), vec![a]);
        assert!(pending.has_pending(&bob));
    }

    #[test]
    fn test_names_lists_in_flight() {
        let pending = PendingSet::new();
        pending.add(name("carol"), TxId::from_bytes([3; 32]));
        pending.add(name("alice"), TxId::from_bytes([1; 32]));
        assert_eq!(pending.names(), vec![name("alice"), name("carol")]);
        assert!(pending.pending_for(&name("bob")).is_empty());
    }
}
